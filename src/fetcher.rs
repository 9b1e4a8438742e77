use crate::types::{BriefingError, NewsItem, Result, SourceConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// The news API caps a single request at this many results.
pub const MAX_FETCH_COUNT: usize = 100;

/// Over-fetch so that keyword exclusion still leaves `limit` survivors.
pub fn overfetch_count(limit: usize) -> usize {
    (limit * 3).min(MAX_FETCH_COUNT).max(1)
}

/// Trait for pulling raw news items from a source.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Human-readable name for this source.
    fn source_name(&self) -> String;

    /// Fetch up to `count` items matching `query`, newest first.
    async fn fetch(&self, query: &str, count: usize) -> Result<Vec<NewsItem>>;
}

#[derive(Debug, Deserialize)]
struct NewsSearchResponse {
    #[serde(default)]
    items: Vec<NewsSearchItem>,
}

#[derive(Debug, Deserialize)]
struct NewsSearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    originallink: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(rename = "pubDate", default)]
    pub_date: String,
    #[serde(default)]
    description: String,
}

/// Client for the Naver open news search API.
pub struct NaverNewsSource {
    client: Client,
    config: SourceConfig,
}

impl NaverNewsSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        Url::parse(&config.endpoint)?;

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self { client, config })
    }
}

#[async_trait]
impl NewsSource for NaverNewsSource {
    fn source_name(&self) -> String {
        "Naver News Search".to_string()
    }

    async fn fetch(&self, query: &str, count: usize) -> Result<Vec<NewsItem>> {
        let count = count.min(MAX_FETCH_COUNT);
        debug!(query, count, "Fetching news items");

        let display = count.to_string();
        let response = self
            .client
            .get(&self.config.endpoint)
            .header("X-Naver-Client-Id", &self.config.client_id)
            .header("X-Naver-Client-Secret", &self.config.client_secret)
            .query(&[
                ("query", query),
                ("display", display.as_str()),
                ("sort", "date"),
            ])
            .send()
            .await
            .map_err(|e| BriefingError::Source(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BriefingError::Source(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body: NewsSearchResponse = response
            .json()
            .await
            .map_err(|e| BriefingError::Source(format!("invalid response body: {}", e)))?;

        let items: Vec<NewsItem> = body
            .items
            .into_iter()
            .map(|raw| {
                let url = raw
                    .originallink
                    .filter(|l| !l.is_empty())
                    .or(raw.link)
                    .unwrap_or_default();
                NewsItem::new(
                    clean_html(&raw.title),
                    url,
                    raw.pub_date,
                    clean_html(&raw.description),
                )
            })
            .collect();

        info!(count = items.len(), query, "Fetched news items");
        Ok(items)
    }
}

/// Strip markup tags and unescape the HTML entities the news API emits.
pub fn clean_html(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }
    stripped
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_html_strips_tags_and_unescapes() {
        assert_eq!(clean_html("<b>삼성전자</b> 신기록"), "삼성전자 신기록");
        assert_eq!(clean_html("&quot;단독&quot; 계약 &amp; 체결"), "\"단독\" 계약 & 체결");
        assert_eq!(clean_html("a &lt;b&gt; c"), "a <b> c");
        assert_eq!(clean_html("plain text"), "plain text");
    }

    #[test]
    fn new_rejects_invalid_endpoint() {
        let config = SourceConfig {
            endpoint: "not a url".to_string(),
            ..SourceConfig::default()
        };
        assert!(matches!(
            NaverNewsSource::new(config),
            Err(crate::types::BriefingError::InvalidUrl(_))
        ));
    }

    #[test]
    fn overfetch_triples_and_caps_at_api_maximum() {
        assert_eq!(overfetch_count(10), 30);
        assert_eq!(overfetch_count(40), 100);
        assert_eq!(overfetch_count(0), 1);
    }

    #[test]
    fn response_parsing_prefers_original_link() {
        let json = r#"{
            "items": [
                {"title": "t1", "originallink": "https://orig", "link": "https://portal",
                 "pubDate": "Mon, 06 May 2024 09:00:00 +0900", "description": "d1"},
                {"title": "t2", "originallink": "", "link": "https://portal2",
                 "pubDate": "Mon, 06 May 2024 09:01:00 +0900", "description": "d2"}
            ]
        }"#;
        let parsed: NewsSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 2);
        let first = &parsed.items[0];
        assert_eq!(first.originallink.as_deref(), Some("https://orig"));
        // Empty originallink falls back to link in fetch()
        let second = &parsed.items[1];
        assert_eq!(
            second
                .originallink
                .clone()
                .filter(|l| !l.is_empty())
                .or(second.link.clone())
                .unwrap(),
            "https://portal2"
        );
    }
}
