use crate::types::{
    BriefingError, BriefingSummary, ClassifierConfig, Enrichment, Mood, NewsItem, Result,
    Sentiment,
};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const ITEM_SYSTEM_PROMPT: &str = "You are a Korean stock market expert analyst. \
Analyze news and recommend SPECIFIC listed stocks. Always respond in Korean. \
Output valid JSON only.";

const BRIEFING_SYSTEM_PROMPT: &str = "You are a Korean financial news analyst. \
Summarize market trends. Respond in Korean. Output valid JSON only.";

const ITEM_TEMPERATURE: f64 = 0.1;
const BRIEFING_TEMPERATURE: f64 = 0.2;

/// One per-item result carried back from the classification service.
/// The 1-based `index` refers to the position of the item in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAnalysis {
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub stocks: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemAnalysisResponse {
    #[serde(default)]
    pub news: Vec<ItemAnalysis>,
}

/// Parse the strict-JSON enrichment body. The service contract wraps the
/// results in a `news` array, but a bare top-level array is accepted too.
pub fn parse_item_analysis(body: &str) -> Result<ItemAnalysisResponse> {
    let malformed =
        |e: serde_json::Error| BriefingError::MalformedResponse(format!("enrichment body: {}", e));

    let value: serde_json::Value = serde_json::from_str(body).map_err(malformed)?;
    if value.is_array() {
        let news = serde_json::from_value(value).map_err(malformed)?;
        return Ok(ItemAnalysisResponse { news });
    }
    serde_json::from_value(value).map_err(malformed)
}

/// Map per-item results back onto the original items.
///
/// A result whose index is missing or outside `[1, N]` is dropped silently;
/// no item is fabricated to fill the gap, so the returned list may be
/// shorter than the input. The drop count is returned for observability.
pub fn apply_analysis(
    items: &[NewsItem],
    response: &ItemAnalysisResponse,
) -> (Vec<NewsItem>, usize) {
    let mut enriched = Vec::with_capacity(items.len());
    let mut dropped = 0usize;

    for result in &response.news {
        if result.index < 1 || result.index as usize > items.len() {
            warn!(
                index = result.index,
                total = items.len(),
                "Dropping enrichment result with out-of-range index"
            );
            dropped += 1;
            continue;
        }
        let mut item = items[result.index as usize - 1].clone();
        item.summary = Some(result.summary.clone());
        item.sentiment = Some(result.sentiment.unwrap_or(Sentiment::Neutral));
        item.enrichment = Some(Enrichment {
            theme: result.theme.clone(),
            stocks: result.stocks.clone(),
            comment: result.comment.clone(),
        });
        enriched.push(item);
    }

    (enriched, dropped)
}

/// Trait for the external text-classification service. Both calls are
/// idempotent given identical input.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn classifier_name(&self) -> String;

    /// Enrich the full filtered item list. The 1-based index of each item
    /// is implied by its list position.
    async fn classify_items(&self, items: &[NewsItem]) -> Result<ItemAnalysisResponse>;

    /// Produce the daily mood digest from the ordered item titles.
    async fn daily_briefing(&self, items: &[NewsItem]) -> Result<BriefingSummary>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint
/// with JSON response mode.
pub struct LlmClassifier {
    client: Client,
    config: ClassifierConfig,
}

impl LlmClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        url::Url::parse(&config.api_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self { client, config })
    }

    fn build_item_prompt(items: &[NewsItem]) -> String {
        let mut listing = String::new();
        for (idx, item) in items.iter().enumerate() {
            listing.push_str(&format!(
                "[{}] 제목: {}\n내용: {}\n\n",
                idx + 1,
                item.title,
                item.description
            ));
        }

        format!(
            "아래 뉴스들을 분석해서 JSON으로 응답해줘.\n\n\
             [뉴스 목록]\n{listing}\
             [투자 타겟 추출 규칙 - 엄격히 따라줘]\n\
             1. 모호한 표현 금지: '수출 관련주' 같은 뜬구름 잡는 단어 쓰지 마.\n\
             2. 구체적 종목명 명시: 한국 주식 시장(KOSPI, KOSDAQ)에 상장된 실제 종목명을 2~3개 추천해.\n\
             3. 비상장 기업 처리: 뉴스에 나온 기업이 비상장이면, 상장된 경쟁사나 지분을 가진 모회사를 찾아서 추천해.\n\n\
             [출력 형식]\n\
             {{\n  \"news\": [\n    {{\n      \"index\": 1,\n      \
             \"summary\": \"한국어로 2-3줄 핵심 요약\",\n      \
             \"sentiment\": \"bullish 또는 bearish 또는 neutral\",\n      \
             \"theme\": \"관련 테마/업종\",\n      \
             \"stocks\": \"주목할 종목 2-3개, 쉼표로 구분\",\n      \
             \"comment\": \"왜 이 종목들이 관련 있는지 1-2줄로 쉽게 설명\"\n    }}\n  ]\n}}\n\n\
             중요:\n- summary, theme, stocks, comment는 반드시 한국어로\n\
             - sentiment 값은 반드시 bullish, bearish, neutral 중 하나\n\
             - 이모지 사용 금지\n- stocks에는 반드시 상장된 종목명만 넣어\n"
        )
    }

    fn build_briefing_prompt(items: &[NewsItem]) -> String {
        let mut listing = String::new();
        for (idx, item) in items.iter().enumerate() {
            listing.push_str(&format!("[{}] 제목: {}\n", idx + 1, item.title));
        }

        format!(
            "아래 경제 뉴스들의 공통된 흐름을 분석해서 JSON으로 응답해줘.\n\n\
             [오늘의 뉴스 제목들]\n{listing}\n\
             [출력 형식]\n\
             {{\n  \"mood\": \"sunny 또는 cloudy 또는 volatile\",\n  \
             \"mood_label\": \"호재 우세 또는 악재 우세 또는 혼조세\",\n  \
             \"summary\": \"오늘 시장의 전반적인 분위기를 3-4문장으로 설명\",\n  \
             \"hot_keywords\": [\"키워드1\", \"키워드2\", \"키워드3\"]\n}}\n\n\
             중요:\n- mood 값은 반드시 sunny, cloudy, volatile 중 하나\n\
             - mood_label, summary, hot_keywords는 한국어로\n\
             - 이모지 사용 금지\n\
             - hot_keywords는 뉴스에서 자주 언급된 테마/종목/이슈 3-5개\n"
        )
    }

    /// One chat completion round trip with bounded retry-with-backoff for
    /// transient transport errors and 429/5xx responses.
    async fn chat(&self, system: &str, user: &str, temperature: f64) -> Result<String> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": temperature,
            "response_format": {"type": "json_object"},
        });

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 16),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error: Option<BriefingError> = None;

        for attempt in 0..=self.config.max_retries {
            let result = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_key)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
                            BriefingError::MalformedResponse(format!(
                                "completion envelope: {}",
                                e
                            ))
                        })?;
                        let content = body
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .ok_or_else(|| {
                                BriefingError::MalformedResponse(
                                    "completion response has no choices".to_string(),
                                )
                            })?;
                        debug!(bytes = content.len(), "Classifier responded");
                        return Ok(content);
                    }

                    let retryable =
                        status.as_u16() == 429 || status.is_server_error();
                    last_error = Some(BriefingError::Classifier(format!(
                        "HTTP {}: {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown")
                    )));
                    if !retryable {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(BriefingError::Classifier(format!("transport: {}", e)));
                }
            }

            if attempt >= self.config.max_retries {
                break;
            }
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(attempt = attempt + 1, ?delay, "Classifier call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        Err(last_error
            .unwrap_or_else(|| BriefingError::Classifier("exhausted retries".to_string())))
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn classifier_name(&self) -> String {
        format!("LLM Classifier ({})", self.config.model)
    }

    async fn classify_items(&self, items: &[NewsItem]) -> Result<ItemAnalysisResponse> {
        let prompt = Self::build_item_prompt(items);
        let body = self
            .chat(ITEM_SYSTEM_PROMPT, &prompt, ITEM_TEMPERATURE)
            .await?;
        parse_item_analysis(&body)
    }

    async fn daily_briefing(&self, items: &[NewsItem]) -> Result<BriefingSummary> {
        let prompt = Self::build_briefing_prompt(items);
        let body = self
            .chat(BRIEFING_SYSTEM_PROMPT, &prompt, BRIEFING_TEMPERATURE)
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| BriefingError::MalformedResponse(format!("briefing body: {}", e)))
    }
}

/// Outcome of one analysis pass over a filtered item list.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub items: Vec<NewsItem>,
    pub briefing: Option<BriefingSummary>,
    /// Enrichment results discarded because of a bad index.
    pub dropped_results: usize,
}

/// Turns a filtered item list into one enrichment call and one mood call,
/// mapping the structured responses back onto the items.
///
/// Enrichment failure aborts the run before anything is persisted. Mood
/// failure is tolerated: the batch is stored with items only.
pub struct AnalysisOrchestrator {
    classifier: std::sync::Arc<dyn Classifier>,
}

impl AnalysisOrchestrator {
    pub fn new(classifier: std::sync::Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub async fn analyze(&self, items: &[NewsItem]) -> Result<AnalysisOutcome> {
        info!(
            count = items.len(),
            classifier = %self.classifier.classifier_name(),
            "Running analysis"
        );

        // The two calls are independent; issue them concurrently.
        let (item_result, mood_result) = tokio::join!(
            self.classifier.classify_items(items),
            self.classifier.daily_briefing(items)
        );

        let response = item_result?;

        let briefing = match mood_result {
            Ok(briefing) => Some(briefing),
            Err(e) => {
                warn!(error = %e, "Mood briefing failed, continuing without it");
                None
            }
        };

        let (enriched, dropped) = apply_analysis(items, &response);
        if dropped > 0 {
            warn!(dropped, "Discarded enrichment results with invalid indices");
        }

        Ok(AnalysisOutcome {
            items: enriched,
            briefing,
            dropped_results: dropped,
        })
    }
}

/// Deterministic classifier for development and testing.
pub struct MockClassifier {
    fail_items: bool,
    fail_briefing: bool,
    index_override: Option<Vec<i64>>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            fail_items: false,
            fail_briefing: false,
            index_override: None,
        }
    }

    pub fn with_failing_items(mut self) -> Self {
        self.fail_items = true;
        self
    }

    pub fn with_failing_briefing(mut self) -> Self {
        self.fail_briefing = true;
        self
    }

    /// Respond with exactly these indices instead of one result per item.
    pub fn with_indices(mut self, indices: Vec<i64>) -> Self {
        self.index_override = Some(indices);
        self
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn classifier_name(&self) -> String {
        "Mock Classifier".to_string()
    }

    async fn classify_items(&self, items: &[NewsItem]) -> Result<ItemAnalysisResponse> {
        if self.fail_items {
            return Err(BriefingError::Classifier("mock item failure".to_string()));
        }

        let indices: Vec<i64> = match &self.index_override {
            Some(indices) => indices.clone(),
            None => (1..=items.len() as i64).collect(),
        };

        let news = indices
            .into_iter()
            .map(|index| {
                let title = items
                    .get((index - 1).max(0) as usize)
                    .map(|i| i.title.clone())
                    .unwrap_or_default();
                ItemAnalysis {
                    index,
                    summary: format!("요약: {}", title),
                    sentiment: Some(Sentiment::Neutral),
                    theme: "테스트 테마".to_string(),
                    stocks: "테스트종목".to_string(),
                    comment: "테스트 코멘트".to_string(),
                }
            })
            .collect();

        Ok(ItemAnalysisResponse { news })
    }

    async fn daily_briefing(&self, items: &[NewsItem]) -> Result<BriefingSummary> {
        if self.fail_briefing {
            return Err(BriefingError::Classifier(
                "mock briefing failure".to_string(),
            ));
        }

        Ok(BriefingSummary {
            mood: Mood::Sunny,
            mood_label: "호재 우세".to_string(),
            summary: format!("{}개 뉴스 기준 테스트 브리핑입니다.", items.len()),
            hot_keywords: vec![
                "반도체".to_string(),
                "수주".to_string(),
                "2차전지".to_string(),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<NewsItem> {
        (0..n)
            .map(|i| {
                NewsItem::new(
                    format!("title {}", i + 1),
                    format!("https://example.com/{}", i + 1),
                    "Mon, 06 May 2024 09:00:00 +0900".to_string(),
                    format!("description {}", i + 1),
                )
            })
            .collect()
    }

    fn result_for(index: i64) -> ItemAnalysis {
        ItemAnalysis {
            index,
            summary: format!("summary {}", index),
            sentiment: Some(Sentiment::Bullish),
            theme: "semis".to_string(),
            stocks: "삼성전자, SK하이닉스".to_string(),
            comment: "memory upcycle".to_string(),
        }
    }

    #[test]
    fn out_of_range_indices_are_dropped_silently() {
        let items = items(7);
        let response = ItemAnalysisResponse {
            news: vec![result_for(1), result_for(11), result_for(0), result_for(7)],
        };
        let (enriched, dropped) = apply_analysis(&items, &response);
        assert_eq!(enriched.len(), 2);
        assert_eq!(dropped, 2);
        assert_eq!(enriched[0].title, "title 1");
        assert_eq!(enriched[1].title, "title 7");
    }

    #[test]
    fn enrichment_is_merged_onto_the_original_item() {
        let items = items(3);
        let response = ItemAnalysisResponse {
            news: vec![result_for(2)],
        };
        let (enriched, dropped) = apply_analysis(&items, &response);
        assert_eq!(dropped, 0);
        let item = &enriched[0];
        assert_eq!(item.title, "title 2");
        assert_eq!(item.url, "https://example.com/2");
        assert_eq!(item.summary.as_deref(), Some("summary 2"));
        assert_eq!(item.sentiment, Some(Sentiment::Bullish));
        let enrichment = item.enrichment.as_ref().unwrap();
        assert_eq!(enrichment.stocks, "삼성전자, SK하이닉스");
    }

    #[test]
    fn missing_sentiment_defaults_to_neutral() {
        let items = items(1);
        let mut result = result_for(1);
        result.sentiment = None;
        let response = ItemAnalysisResponse { news: vec![result] };
        let (enriched, _) = apply_analysis(&items, &response);
        assert_eq!(enriched[0].sentiment, Some(Sentiment::Neutral));
    }

    #[test]
    fn parse_accepts_wrapped_object_and_bare_array() {
        let wrapped = r#"{"news":[{"index":1,"summary":"s","sentiment":"bullish",
            "theme":"t","stocks":"a, b","comment":"c"}]}"#;
        let parsed = parse_item_analysis(wrapped).unwrap();
        assert_eq!(parsed.news.len(), 1);

        let bare = r#"[{"index":2,"summary":"s","sentiment":"neutral",
            "theme":"t","stocks":"a","comment":"c"}]"#;
        let parsed = parse_item_analysis(bare).unwrap();
        assert_eq!(parsed.news[0].index, 2);
    }

    #[test]
    fn parse_rejects_non_json_body() {
        assert!(matches!(
            parse_item_analysis("I am not JSON"),
            Err(BriefingError::MalformedResponse(_))
        ));
    }

    #[test]
    fn parse_empty_object_yields_no_results() {
        assert!(parse_item_analysis("{}").unwrap().news.is_empty());
        assert!(parse_item_analysis(r#"{"news":[]}"#).unwrap().news.is_empty());
    }

    #[tokio::test]
    async fn orchestrator_tolerates_mood_failure() {
        let classifier = std::sync::Arc::new(MockClassifier::new().with_failing_briefing());
        let orchestrator = AnalysisOrchestrator::new(classifier);
        let outcome = orchestrator.analyze(&items(3)).await.unwrap();
        assert_eq!(outcome.items.len(), 3);
        assert!(outcome.briefing.is_none());
        assert_eq!(outcome.dropped_results, 0);
    }

    #[tokio::test]
    async fn orchestrator_fails_fast_on_enrichment_failure() {
        let classifier = std::sync::Arc::new(MockClassifier::new().with_failing_items());
        let orchestrator = AnalysisOrchestrator::new(classifier);
        let result = orchestrator.analyze(&items(3)).await;
        assert!(matches!(result, Err(BriefingError::Classifier(_))));
    }

    #[tokio::test]
    async fn orchestrator_counts_dropped_results() {
        let classifier =
            std::sync::Arc::new(MockClassifier::new().with_indices(vec![1, 2, 11, -3]));
        let orchestrator = AnalysisOrchestrator::new(classifier);
        let outcome = orchestrator.analyze(&items(7)).await.unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.dropped_results, 2);
        assert!(outcome.briefing.is_some());
    }

    #[test]
    fn item_prompt_numbers_items_from_one() {
        let prompt = LlmClassifier::build_item_prompt(&items(2));
        assert!(prompt.contains("[1] 제목: title 1"));
        assert!(prompt.contains("[2] 제목: title 2"));
        assert!(prompt.contains("내용: description 1"));
    }

    #[test]
    fn briefing_prompt_uses_titles_only() {
        let prompt = LlmClassifier::build_briefing_prompt(&items(2));
        assert!(prompt.contains("[1] 제목: title 1"));
        assert!(!prompt.contains("description"));
    }
}
