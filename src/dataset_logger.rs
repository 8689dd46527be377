//! Optional audit trail: one CSV row per completed analysis.
//!
//! Writes happen on the blocking pool and never fail the request that
//! produced them.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::analysis::TranscriptAnalysis;
use crate::error::{AnalyzerError, Result};
use crate::schemas::DealReview;

/// Column order of the dataset follows field order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub analysis_id: String,
    pub timestamp: String,
    pub transcript_source: String,
    pub is_sample: bool,
    pub user_id: String,
    pub llm_id: String,
    pub processing_time_seconds: f64,
    pub transcript_fingerprint: String,
    pub num_evidence_items: usize,
    pub three_whys_completeness: usize,
    pub meddic_completeness: usize,
    pub corporate_objectives_summary: String,
    pub domain_initiatives_summary: String,
    pub domain_challenges_summary: String,
    pub meddic_metrics_summary: String,
    pub meddic_economic_buyer_summary: String,
    pub meddic_decision_process_summary: String,
    pub meddic_decision_criteria_summary: String,
    pub meddic_implicated_pain_summary: String,
    pub meddic_champion_summary: String,
    pub has_deal_review: bool,
    pub deal_review_stage_readiness: String,
    pub deal_review_confidence_note: String,
}

/// Where a transcript came from and who asked
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    pub transcript: &'a str,
    pub source: &'a str,
    pub is_sample: bool,
    pub user: Option<&'a str>,
    pub model: &'a str,
    pub elapsed: Duration,
}

impl AnalysisRecord {
    pub fn new(result: &TranscriptAnalysis, ctx: RecordContext<'_>) -> Self {
        let whys = &result.analysis.three_whys;
        let meddic = &result.analysis.meddic;
        Self {
            analysis_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            transcript_source: ctx.source.to_string(),
            is_sample: ctx.is_sample,
            user_id: ctx.user.unwrap_or("unknown").to_string(),
            llm_id: ctx.model.to_string(),
            processing_time_seconds: (ctx.elapsed.as_secs_f64() * 100.0).round() / 100.0,
            transcript_fingerprint: blake3::hash(ctx.transcript.as_bytes()).to_hex().to_string(),
            num_evidence_items: result.evidence.len(),
            three_whys_completeness: whys.completeness(),
            meddic_completeness: meddic.completeness(),
            corporate_objectives_summary: whys.corporate_objectives.summary.clone(),
            domain_initiatives_summary: whys.domain_initiatives.summary.clone(),
            domain_challenges_summary: whys.domain_challenges.summary.clone(),
            meddic_metrics_summary: meddic.metrics.summary.clone(),
            meddic_economic_buyer_summary: meddic.economic_buyer.summary.clone(),
            meddic_decision_process_summary: meddic.decision_process.summary.clone(),
            meddic_decision_criteria_summary: meddic.decision_criteria.summary.clone(),
            meddic_implicated_pain_summary: meddic.implicated_pain.summary.clone(),
            meddic_champion_summary: meddic.champion.summary.clone(),
            has_deal_review: false,
            deal_review_stage_readiness: String::new(),
            deal_review_confidence_note: String::new(),
        }
    }

    pub fn with_deal_review(mut self, review: &DealReview) -> Self {
        self.has_deal_review = true;
        self.deal_review_stage_readiness = review.stage_readiness.as_str().to_string();
        self.deal_review_confidence_note = review.confidence_note.clone();
        self
    }
}

/// Appends records to a CSV file, header first when the file is new
#[derive(Debug, Clone)]
pub struct DatasetLogger {
    path: PathBuf,
    // serialises appends from concurrent requests
    write_lock: Arc<Mutex<()>>,
}

impl DatasetLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "dataset logging enabled");
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Logger for the configured dataset, if any
    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        match &config.results.dataset {
            Some(path) => Some(Self::new(path)),
            None => {
                info!("dataset logging disabled (no dataset configured)");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking append of one row
    pub fn append(&self, record: &AnalysisRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AnalyzerError::internal("dataset write lock poisoned"))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Fire-and-forget append on the blocking pool
    pub fn log_in_background(&self, record: AnalysisRecord) -> JoinHandle<()> {
        let logger = self.clone();
        tokio::task::spawn_blocking(move || match logger.append(&record) {
            Ok(()) => info!(
                id = %record.analysis_id,
                path = %logger.path.display(),
                "logged analysis to dataset"
            ),
            Err(e) => error!(error = %e, "failed to log analysis to dataset"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{EvidenceItem, EvidenceRegistry, FrameworkAnalysis, StageReadiness};

    fn sample_result() -> TranscriptAnalysis {
        let mut evidence = EvidenceRegistry::default();
        evidence
            .evidence_registry
            .insert("E001".into(), EvidenceItem::default());
        let mut analysis = FrameworkAnalysis::default();
        analysis.meddic.champion.summary = "Head of Sales".into();
        analysis.meddic.metrics.summary = "No evidence found".into();
        analysis.three_whys.corporate_objectives.summary = "Cut pricing cycle".into();
        TranscriptAnalysis { evidence, analysis }
    }

    fn ctx(transcript: &str) -> RecordContext<'_> {
        RecordContext {
            transcript,
            source: "call.txt",
            is_sample: false,
            user: None,
            model: "mock-llm",
            elapsed: Duration::from_millis(1234),
        }
    }

    #[test]
    fn record_counts_completeness() {
        let record = AnalysisRecord::new(&sample_result(), ctx("transcript text"));
        assert_eq!(record.num_evidence_items, 1);
        assert_eq!(record.meddic_completeness, 1);
        assert_eq!(record.three_whys_completeness, 1);
        assert_eq!(record.user_id, "unknown");
        assert_eq!(record.processing_time_seconds, 1.23);
        assert_eq!(record.transcript_fingerprint.len(), 64);
        assert!(!record.has_deal_review);
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("analyses.csv");
        let logger = DatasetLogger::new(&path);
        let review = DealReview {
            stage_readiness: StageReadiness::MoreDiscoveryNeeded,
            confidence_note: "thin, but real".into(),
            critical_gaps: vec!["Champion".into()],
            next_call_objectives: vec![],
        };

        logger
            .append(&AnalysisRecord::new(&sample_result(), ctx("a")))
            .unwrap();
        logger
            .append(&AnalysisRecord::new(&sample_result(), ctx("b")).with_deal_review(&review))
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "analysis_id");
        assert_eq!(headers.len(), 23);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][20], "true");
        assert_eq!(&rows[1][21], "More Discovery Needed");
        assert_eq!(&rows[1][22], "thin, but real");
    }

    #[tokio::test]
    async fn background_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened for append
        let logger = DatasetLogger::new(dir.path());
        let handle = logger.log_in_background(AnalysisRecord::new(&sample_result(), ctx("a")));
        assert!(handle.await.is_ok());
    }
}
