use crate::analyzer::AnalysisOrchestrator;
use crate::clock::BatchClock;
use crate::fetcher::{overfetch_count, NewsSource};
use crate::filter::KeywordFilter;
use crate::limiter::RefreshLimiter;
use crate::store::BatchStore;
use crate::types::{BriefingError, Result};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Search query sent to the news source.
    pub query: String,
    /// Number of items kept after filtering.
    pub item_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            query: "경제".to_string(),
            item_limit: 10,
        }
    }
}

/// What one successful pipeline run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub batch_date: String,
    pub fetched: usize,
    pub kept: usize,
    pub enriched: usize,
    pub dropped_results: usize,
    pub briefing_stored: bool,
}

/// Composes clock, limiter, source, filter, orchestrator and store into the
/// single end-to-end operation "produce (or refresh) today's batch".
///
/// Any fatal error aborts the run before persistence, leaving the prior
/// stored batch untouched.
pub struct PipelineRunner {
    clock: BatchClock,
    limiter: RefreshLimiter,
    source: Arc<dyn NewsSource>,
    filter: KeywordFilter,
    orchestrator: AnalysisOrchestrator,
    store: Arc<BatchStore>,
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(
        clock: BatchClock,
        limiter: RefreshLimiter,
        source: Arc<dyn NewsSource>,
        filter: KeywordFilter,
        orchestrator: AnalysisOrchestrator,
        store: Arc<BatchStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            clock,
            limiter,
            source,
            filter,
            orchestrator,
            store,
            config,
        }
    }

    pub fn clock(&self) -> &BatchClock {
        &self.clock
    }

    pub fn limiter(&self) -> &RefreshLimiter {
        &self.limiter
    }

    /// Run the pipeline for an explicit batch key.
    pub async fn run(&self, batch_date: &str) -> Result<RunReport> {
        if !self.limiter.try_consume(batch_date).await {
            let remaining = self.limiter.remaining(batch_date).await;
            let in_window = self.clock.is_operating_window();
            info!(batch_date, remaining, in_window, "Pipeline run refused");
            return Err(BriefingError::RefreshDenied {
                batch_date: batch_date.to_string(),
                remaining,
                in_window,
            });
        }

        info!(batch_date, source = %self.source.source_name(), "Starting pipeline run");

        let raw = self
            .source
            .fetch(&self.config.query, overfetch_count(self.config.item_limit))
            .await?;
        let fetched = raw.len();

        let selected = self.filter.select(raw, self.config.item_limit);
        let kept = selected.len();
        if selected.is_empty() {
            error!(batch_date, fetched, "No items survived keyword filtering");
            return Err(BriefingError::Source(
                "news source returned no usable items".to_string(),
            ));
        }

        let outcome = self.orchestrator.analyze(&selected).await?;
        if outcome.items.is_empty() {
            error!(batch_date, kept, "Every enrichment result was discarded");
            return Err(BriefingError::MalformedResponse(
                "enrichment produced no usable results".to_string(),
            ));
        }

        self.store
            .save(batch_date, &outcome.items, outcome.briefing.as_ref())
            .await?;

        let report = RunReport {
            batch_date: batch_date.to_string(),
            fetched,
            kept,
            enriched: outcome.items.len(),
            dropped_results: outcome.dropped_results,
            briefing_stored: outcome.briefing.is_some(),
        };

        info!(
            batch_date,
            fetched = report.fetched,
            kept = report.kept,
            enriched = report.enriched,
            dropped = report.dropped_results,
            briefing = report.briefing_stored,
            "Pipeline run complete"
        );
        Ok(report)
    }

    /// Run the pipeline for the current batch day.
    pub async fn run_today(&self) -> Result<RunReport> {
        let batch_date = self.clock.batch_key();
        self.run(&batch_date).await
    }
}
