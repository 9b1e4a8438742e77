pub mod analyzer;
pub mod clock;
pub mod fetcher;
pub mod filter;
pub mod limiter;
pub mod pipeline;
pub mod store;
pub mod types;

pub use analyzer::{
    AnalysisOrchestrator, Classifier, ItemAnalysis, ItemAnalysisResponse, LlmClassifier,
    MockClassifier,
};
pub use clock::{BatchClock, ClockConfig};
pub use fetcher::{NaverNewsSource, NewsSource};
pub use filter::KeywordFilter;
pub use limiter::RefreshLimiter;
pub use pipeline::{PipelineConfig, PipelineRunner, RunReport};
pub use store::BatchStore;
pub use types::*;
