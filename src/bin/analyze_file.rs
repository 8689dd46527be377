//! Run the analysis pipeline on a local transcript and print the JSON.
//!
//! Usage:
//!   cargo run --bin analyze_file -- call.txt
//!   cargo run --bin analyze_file -- --sample --deal-review
//!   LLM_PROVIDER=mock cargo run --bin analyze_file -- notes.docx --compact

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use sales_call_analyzer::{
    Config, SalesAnalyzer, clients,
    dataset_logger::{AnalysisRecord, DatasetLogger, RecordContext},
    file_processor::{self, UploadedFile},
    init_tracing,
};
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(name = "analyze-file")]
#[command(about = "Analyze a sales-call transcript from the command line", long_about = None)]
struct Cli {
    /// Transcript file (.txt or .docx)
    #[arg(required_unless_present = "sample", conflicts_with = "sample")]
    path: Option<PathBuf>,

    /// Use the bundled sample transcript
    #[arg(long)]
    sample: bool,

    /// Also run the deal review stage
    #[arg(long)]
    deal_review: bool,

    /// Single-line JSON instead of pretty output
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    init_tracing(&config.runtime.log_level);

    let (transcript, source) = match &cli.path {
        Some(path) => {
            let file = UploadedFile::from_path(path)
                .with_context(|| format!("reading {}", path.display()))?;
            file_processor::validate_upload(&file)?;
            let text = file_processor::read_content(&file)?;
            (text, file_processor::safe_filename(&file.filename))
        }
        None => {
            let Some(text) =
                file_processor::load_sample_transcript(config.results.sample_transcript.as_deref())
            else {
                bail!("sample transcript not available");
            };
            (text, "sample_transcript.txt".to_string())
        }
    };

    let analyzer = SalesAnalyzer::new(clients::create_model(&config)?);
    let started = Instant::now();
    let result = analyzer.analyze_transcript(&transcript).await?;

    let deal_review = if cli.deal_review {
        Some(
            analyzer
                .create_deal_review(&result.evidence, &result.analysis)
                .await?,
        )
    } else {
        None
    };
    let elapsed = started.elapsed();
    info!(source = %source, seconds = elapsed.as_secs_f64(), "analysis finished");

    if let Some(logger) = DatasetLogger::from_config(&config) {
        let mut record = AnalysisRecord::new(
            &result,
            RecordContext {
                transcript: &transcript,
                source: &source,
                is_sample: cli.sample,
                user: Some("cli"),
                model: analyzer.model_id(),
                elapsed,
            },
        );
        if let Some(review) = &deal_review {
            record = record.with_deal_review(review);
        }
        logger.append(&record)?;
    }

    let mut output = serde_json::to_value(&result)?;
    if let Some(review) = deal_review {
        output["deal_review"] = json!(review);
    }
    output["is_sample"] = json!(cli.sample);

    let rendered = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", rendered);
    Ok(())
}
