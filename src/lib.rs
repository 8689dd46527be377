pub mod analysis;
pub mod clients;
pub mod config;
pub mod dataset_logger;
pub mod error;
pub mod file_processor;
pub mod http;
pub mod json_repair;
pub mod prompts;
pub mod schemas;
pub mod streaming;

pub use analysis::{SalesAnalyzer, StageError, TranscriptAnalysis};
pub use config::Config;
pub use error::{AnalyzerError, Result};

/// Install the global tracing subscriber using the configured filter
pub fn init_tracing(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(config::DEFAULT_LOG_FILTER)
    });
    // a second init (tests, embedded use) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .try_init();
}
