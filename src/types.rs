use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Per-item sentiment label assigned by the classification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }

    /// Parse a stored label back into the enum. Unknown labels map to `None`
    /// rather than failing the whole load.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bullish" => Some(Sentiment::Bullish),
            "bearish" => Some(Sentiment::Bearish),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

/// Overall market mood for one batch day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Sunny,
    Cloudy,
    Volatile,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Sunny => "sunny",
            Mood::Cloudy => "cloudy",
            Mood::Volatile => "volatile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sunny" => Some(Mood::Sunny),
            "cloudy" => Some(Mood::Cloudy),
            "volatile" => Some(Mood::Volatile),
            _ => None,
        }
    }
}

/// Structured enrichment attached to an item by the classification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Related theme or industry sector.
    #[serde(default)]
    pub theme: String,
    /// Comma-separated listed securities related to the story.
    #[serde(default)]
    pub stocks: String,
    /// Plain-language rationale for the stock picks.
    #[serde(default)]
    pub comment: String,
}

/// One news story flowing through the pipeline.
///
/// Identity within a batch is positional: the 1-based index assigned at
/// fetch time is what the classifier's response refers back to. The fetch
/// step creates the item, the orchestrator fills in `summary`, `sentiment`
/// and `enrichment`, and it is immutable after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    /// Publication timestamp as the source emits it (RFC-2822-like string).
    pub pub_date: String,
    pub description: String,
    pub summary: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub enrichment: Option<Enrichment>,
}

impl NewsItem {
    pub fn new(title: String, url: String, pub_date: String, description: String) -> Self {
        Self {
            title,
            url,
            pub_date,
            description,
            summary: None,
            sentiment: None,
            enrichment: None,
        }
    }
}

/// Aggregate mood digest for one batch day. At most one per batch key;
/// overwritten on refresh, never appended to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefingSummary {
    pub mood: Mood,
    /// Free-text qualifier for the mood ("good news dominant", "mixed", ...).
    #[serde(default)]
    pub mood_label: String,
    /// 3-4 sentence narrative of the day's market tone.
    #[serde(default)]
    pub summary: String,
    /// 3-5 hot themes/stocks/issues, most mentioned first.
    #[serde(default)]
    pub hot_keywords: Vec<String>,
}

/// Everything stored under one batch key.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub batch_date: String,
    pub items: Vec<NewsItem>,
    pub briefing: Option<BriefingSummary>,
    /// Later of the items' and briefing's creation times, in the fixed
    /// display offset.
    pub last_modified: Option<DateTime<FixedOffset>>,
}

/// Configuration for the inbound news source client.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openapi.naver.com/v1/search/news.json".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: "daily-briefing/0.1".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// Configuration for the external classification service client.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "llama-3.3-70b-versatile".to_string(),
            timeout_seconds: 60,
            max_retries: 3,
            retry_delay_seconds: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BriefingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("news source error: {0}")]
    Source(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "refresh denied for {batch_date}: {remaining} runs remaining, operating window open: {in_window}"
    )]
    RefreshDenied {
        batch_date: String,
        remaining: u32,
        in_window: bool,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, BriefingError>;
