use clap::{Parser, Subcommand};
use daily_briefing::{
    AnalysisOrchestrator, BatchClock, BatchStore, BriefingError, ClassifierConfig, ClockConfig,
    KeywordFilter, LlmClassifier, NaverNewsSource, PipelineConfig, PipelineRunner,
    RefreshLimiter, SourceConfig,
};
use daily_briefing::limiter::DAILY_REFRESH_LIMIT;
use std::env;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "daily-briefing", about = "Daily market news briefing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Produce or refresh the current day's batch
    Run {
        /// News search query
        #[arg(long)]
        query: Option<String>,
        /// Number of items to keep after filtering
        #[arg(long)]
        limit: Option<usize>,
        /// Run for an explicit batch date (YYYY-MM-DD) instead of today's
        #[arg(long)]
        force_date: Option<String>,
    },
    /// Print the stored batch for a day
    Show {
        /// Batch date (YYYY-MM-DD), defaults to the current batch day
        #[arg(long)]
        date: Option<String>,
    },
    /// Purge a day's stored batch
    Clear {
        /// Batch date (YYYY-MM-DD), defaults to the current batch day
        #[arg(long)]
        date: Option<String>,
    },
}

fn required_env(key: &str) -> Result<String, BriefingError> {
    env::var(key).map_err(|_| BriefingError::Config(format!("{} is not set", key)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:daily_news.db?mode=rwc".to_string());
    let store = Arc::new(BatchStore::new(&database_url).await?);
    let clock = BatchClock::new(ClockConfig::default());

    match cli.command {
        Command::Run {
            query,
            limit,
            force_date,
        } => {
            let source_config = SourceConfig {
                client_id: required_env("NAVER_CLIENT_ID")?,
                client_secret: required_env("NAVER_CLIENT_SECRET")?,
                ..SourceConfig::default()
            };

            let mut classifier_config = ClassifierConfig {
                api_key: required_env("GROQ_API_KEY")?,
                ..ClassifierConfig::default()
            };
            if let Ok(url) = env::var("GROQ_API_URL") {
                classifier_config.api_url = url;
            }
            if let Ok(model) = env::var("GROQ_MODEL") {
                classifier_config.model = model;
            }

            let mut pipeline_config = PipelineConfig::default();
            if let Some(query) = query {
                pipeline_config.query = query;
            }
            if let Some(limit) = limit {
                pipeline_config.item_limit = limit;
            }

            let runner = PipelineRunner::new(
                clock.clone(),
                RefreshLimiter::new(clock.clone(), DAILY_REFRESH_LIMIT),
                Arc::new(NaverNewsSource::new(source_config)?),
                KeywordFilter::default(),
                AnalysisOrchestrator::new(Arc::new(LlmClassifier::new(classifier_config)?)),
                store,
                pipeline_config,
            );

            let report = match force_date {
                Some(date) => runner.run(&date).await?,
                None => runner.run_today().await?,
            };

            println!(
                "Batch {}: fetched {}, kept {}, enriched {} (dropped {}), briefing: {}",
                report.batch_date,
                report.fetched,
                report.kept,
                report.enriched,
                report.dropped_results,
                if report.briefing_stored { "yes" } else { "no" }
            );
        }

        Command::Show { date } => {
            let batch_date = date.unwrap_or_else(|| clock.batch_key());
            match store.load(&batch_date).await? {
                Some(record) => {
                    println!("== Batch {} ==", record.batch_date);
                    if let Some(last) = record.last_modified {
                        println!("Last updated: {}", last.format("%Y-%m-%d %H:%M"));
                    }
                    if let Some(briefing) = &record.briefing {
                        println!(
                            "\nMood: {} ({})",
                            briefing.mood.as_str(),
                            briefing.mood_label
                        );
                        println!("{}", briefing.summary);
                        println!("Hot keywords: {}", briefing.hot_keywords.join(", "));
                    }
                    for (idx, item) in record.items.iter().enumerate() {
                        println!("\n[{}] {}", idx + 1, item.title);
                        if let Some(sentiment) = item.sentiment {
                            println!("    sentiment: {}", sentiment.as_str());
                        }
                        if let Some(summary) = &item.summary {
                            println!("    {}", summary);
                        }
                        if let Some(enrichment) = &item.enrichment {
                            println!(
                                "    theme: {} / stocks: {}",
                                enrichment.theme, enrichment.stocks
                            );
                            println!("    {}", enrichment.comment);
                        }
                        println!("    {}", item.url);
                    }
                }
                None => println!("No batch stored for {}", batch_date),
            }
        }

        Command::Clear { date } => {
            let batch_date = date.unwrap_or_else(|| clock.batch_key());
            let deleted = store.delete(&batch_date).await?;
            info!(batch_date, deleted, "Cleared batch");
            println!("Deleted {} rows for {}", deleted, batch_date);
        }
    }

    Ok(())
}
