//! The three-stage analysis pipeline: evidence, frameworks, deal review.
//!
//! Every stage makes exactly one model call and returns a typed result.
//! Nothing here retries; a failed stage is reported to the caller as a
//! [`StageError`] and the caller decides how to surface it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clients::{CompletionRequest, LanguageModel, ModelError};
use crate::error::AnalyzerError;
use crate::json_repair::{clean_json_response, error_window, snippet};
use crate::prompts::{self, PromptKind};
use crate::schemas::{
    DealReview, DealReviewEnvelope, EvidenceRegistry, FrameworkAnalysis, Meddic, StageReadiness,
};

/// Longest transcript accepted, in characters
pub const MAX_TRANSCRIPT_CHARS: usize = 50_000;
/// Shortest transcript accepted, in characters after trimming
pub const MIN_TRANSCRIPT_CHARS: usize = 50;
/// More missing MEDDIC elements than this means the deal is not demo-ready
pub const MAX_MISSING_MEDDIC: usize = 2;

const LOG_SNIPPET_CHARS: usize = 500;
const LOG_WINDOW_CHARS: usize = 100;
const MAX_DERIVED_GAPS: usize = 3;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("transcript has {chars} characters (max 50000)")]
    TranscriptTooLong { chars: usize },

    #[error("transcript has {chars} characters after trimming (min 50)")]
    TranscriptTooShort { chars: usize },

    #[error("{stage} model call failed: {source}")]
    Upstream {
        stage: &'static str,
        #[source]
        source: ModelError,
    },

    #[error("{stage} response is not valid JSON: {source}")]
    Parse {
        stage: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{stage} output rejected: {reason}")]
    InvalidOutput { stage: &'static str, reason: String },
}

impl StageError {
    /// Short message safe to show to the end user
    pub fn user_message(&self) -> &'static str {
        let deal_review = self.stage() == Some(PromptKind::DealReview.id());
        match self {
            StageError::TranscriptTooLong { .. } => "Transcript too long",
            StageError::TranscriptTooShort { .. } => "Transcript too short",
            StageError::Upstream { .. } if deal_review => {
                "Deal review service temporarily unavailable"
            }
            StageError::Upstream { .. } => "AI analysis service temporarily unavailable",
            StageError::Parse { .. } | StageError::InvalidOutput { .. } if deal_review => {
                "Deal review failed - please try again"
            }
            StageError::Parse { .. } | StageError::InvalidOutput { .. } => {
                "Analysis failed - please try again"
            }
        }
    }

    /// Prompt id of the stage that failed; None for transcript checks
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            StageError::TranscriptTooLong { .. } | StageError::TranscriptTooShort { .. } => None,
            StageError::Upstream { stage, .. }
            | StageError::Parse { stage, .. }
            | StageError::InvalidOutput { stage, .. } => Some(*stage),
        }
    }
}

impl From<StageError> for AnalyzerError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::TranscriptTooLong { .. } | StageError::TranscriptTooShort { .. } => {
                AnalyzerError::validation(err.user_message())
            }
            StageError::Upstream { .. }
            | StageError::Parse { .. }
            | StageError::InvalidOutput { .. } => AnalyzerError::Stage {
                detail: err.to_string(),
                user_message: err.user_message(),
            },
        }
    }
}

/// Evidence plus frameworks, flattened the way API clients expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptAnalysis {
    #[serde(flatten)]
    pub evidence: EvidenceRegistry,
    #[serde(flatten)]
    pub analysis: FrameworkAnalysis,
}

/// Check the transcript length bounds without calling the model
pub fn validate_transcript(transcript: &str) -> Result<(), StageError> {
    let chars = transcript.chars().count();
    if chars > MAX_TRANSCRIPT_CHARS {
        return Err(StageError::TranscriptTooLong { chars });
    }
    let trimmed = transcript.trim().chars().count();
    if trimmed < MIN_TRANSCRIPT_CHARS {
        return Err(StageError::TranscriptTooShort { chars: trimmed });
    }
    Ok(())
}

#[derive(Clone)]
pub struct SalesAnalyzer {
    model: Arc<dyn LanguageModel>,
}

impl SalesAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Stage 1: catalogue evidence from the transcript
    pub async fn create_evidence_registry(
        &self,
        transcript: &str,
    ) -> Result<EvidenceRegistry, StageError> {
        validate_transcript(transcript)?;

        let prompt = prompts::evidence_prompt(transcript);
        let raw = self.call(PromptKind::Evidence, prompt).await?;
        let registry: EvidenceRegistry = parse_stage(PromptKind::Evidence, &raw)?;

        info!(items = registry.len(), "evidence registry created");
        Ok(registry)
    }

    /// Stage 2: three-whys and MEDDIC grounded in the registry
    pub async fn create_analysis(
        &self,
        registry: &EvidenceRegistry,
    ) -> Result<FrameworkAnalysis, StageError> {
        let prompt = prompts::frameworks_prompt(registry)
            .map_err(|e| invalid(PromptKind::Frameworks, format!("prompt build: {}", e)))?;
        let raw = self.call(PromptKind::Frameworks, prompt).await?;
        let analysis: FrameworkAnalysis = parse_stage(PromptKind::Frameworks, &raw)?;

        let unknown: Vec<&str> = analysis
            .cited_ids()
            .filter(|id| !registry.contains(id))
            .collect();
        if !unknown.is_empty() {
            warn!(ids = ?unknown, "analysis cites evidence ids missing from the registry");
        }

        info!(
            three_whys = analysis.three_whys.completeness(),
            meddic = analysis.meddic.completeness(),
            "framework analysis created"
        );
        Ok(analysis)
    }

    /// Stage 3: readiness verdict, critical gaps and next-call questions
    pub async fn create_deal_review(
        &self,
        registry: &EvidenceRegistry,
        analysis: &FrameworkAnalysis,
    ) -> Result<DealReview, StageError> {
        let prompt = prompts::deal_review_prompt(registry, analysis)
            .map_err(|e| invalid(PromptKind::DealReview, format!("prompt build: {}", e)))?;
        let raw = self.call(PromptKind::DealReview, prompt).await?;
        let envelope: DealReviewEnvelope = parse_stage(PromptKind::DealReview, &raw)?;

        let review = apply_rubric(envelope.deal_review, &analysis.meddic)?;
        info!(
            readiness = review.stage_readiness.as_str(),
            gaps = review.critical_gaps.len(),
            "deal review created"
        );
        Ok(review)
    }

    /// Stages 1 and 2 back to back
    pub async fn analyze_transcript(
        &self,
        transcript: &str,
    ) -> Result<TranscriptAnalysis, StageError> {
        let evidence = self.create_evidence_registry(transcript).await?;
        let analysis = self.create_analysis(&evidence).await?;
        Ok(TranscriptAnalysis { evidence, analysis })
    }

    async fn call(&self, stage: PromptKind, prompt: String) -> Result<String, StageError> {
        debug!(
            stage = stage.id(),
            template = stage.checksum(),
            prompt_chars = prompt.len(),
            "calling model"
        );
        self.model
            .complete(CompletionRequest::for_stage(stage, prompt))
            .await
            .map_err(|source| StageError::Upstream {
                stage: stage.id(),
                source,
            })
    }
}

fn invalid(stage: PromptKind, reason: impl Into<String>) -> StageError {
    StageError::InvalidOutput {
        stage: stage.id(),
        reason: reason.into(),
    }
}

fn parse_stage<T: serde::de::DeserializeOwned>(
    stage: PromptKind,
    raw: &str,
) -> Result<T, StageError> {
    let cleaned = clean_json_response(raw);
    serde_json::from_str(&cleaned).map_err(|source| {
        warn!(
            stage = stage.id(),
            error = %source,
            snippet = %snippet(&cleaned, LOG_SNIPPET_CHARS),
            around_error = %error_window(&cleaned, &source, LOG_WINDOW_CHARS),
            "could not parse model response"
        );
        StageError::Parse {
            stage: stage.id(),
            source,
        }
    })
}

fn meddic_label(dimension: &str) -> &'static str {
    match dimension {
        "metrics" => "Metrics",
        "economic_buyer" => "Economic Buyer",
        "decision_process" => "Decision Process",
        "decision_criteria" => "Decision Criteria",
        "implicated_pain" => "Implicated Pain",
        "champion" => "Champion",
        _ => "MEDDIC element",
    }
}

/// Force the readiness verdict to agree with MEDDIC coverage and make sure
/// the review names at least one gap.
fn apply_rubric(mut review: DealReview, meddic: &Meddic) -> Result<DealReview, StageError> {
    let missing = meddic.missing();
    if missing.len() > MAX_MISSING_MEDDIC
        && review.stage_readiness != StageReadiness::MoreDiscoveryNeeded
    {
        warn!(
            missing = ?missing,
            model_verdict = review.stage_readiness.as_str(),
            "overriding readiness: too many MEDDIC elements missing"
        );
        review.stage_readiness = StageReadiness::MoreDiscoveryNeeded;
    }

    review.critical_gaps.retain(|gap| !gap.trim().is_empty());
    if review.critical_gaps.is_empty() {
        let mut derived: Vec<String> = missing
            .iter()
            .map(|name| format!("{} not established", meddic_label(name)))
            .collect();
        if derived.is_empty() {
            derived = meddic
                .entries()
                .iter()
                .filter(|(_, entry)| entry.evidence_ids.is_empty())
                .map(|(name, _)| format!("{} not backed by transcript evidence", meddic_label(name)))
                .collect();
        }
        derived.truncate(MAX_DERIVED_GAPS);
        if derived.is_empty() {
            return Err(invalid(PromptKind::DealReview, "no critical gaps returned"));
        }
        warn!(gaps = derived.len(), "model returned no critical gaps; derived from MEDDIC");
        review.critical_gaps = derived;
    }

    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ScriptedModel;
    use crate::schemas::FrameworkEntry;

    fn entry(summary: &str, ids: &[&str]) -> FrameworkEntry {
        FrameworkEntry {
            summary: summary.to_string(),
            evidence_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn full_meddic() -> Meddic {
        Meddic {
            metrics: entry("3 weeks to 3 days", &["E001"]),
            economic_buyer: entry("CFO", &["E003"]),
            decision_process: entry("Committee", &["E004"]),
            decision_criteria: entry("CRM integration", &["E005"]),
            implicated_pain: entry("Lost deals", &["E002"]),
            champion: entry("Head of Sales", &["E006"]),
        }
    }

    fn review(readiness: StageReadiness, gaps: &[&str]) -> DealReview {
        DealReview {
            stage_readiness: readiness,
            confidence_note: String::new(),
            critical_gaps: gaps.iter().map(|s| s.to_string()).collect(),
            next_call_objectives: vec![],
        }
    }

    #[test]
    fn transcript_bounds() {
        assert!(matches!(
            validate_transcript("   too short   "),
            Err(StageError::TranscriptTooShort { .. })
        ));
        let long = "a".repeat(MAX_TRANSCRIPT_CHARS + 1);
        assert!(matches!(
            validate_transcript(&long),
            Err(StageError::TranscriptTooLong { .. })
        ));
        assert!(validate_transcript(&"a".repeat(MAX_TRANSCRIPT_CHARS)).is_ok());
        assert!(validate_transcript(&"b".repeat(MIN_TRANSCRIPT_CHARS)).is_ok());
    }

    #[test]
    fn rubric_overrides_optimistic_verdict() {
        let mut meddic = full_meddic();
        meddic.decision_process = entry("No evidence found", &[]);
        meddic.champion = FrameworkEntry::default();
        meddic.economic_buyer = entry("", &[]);

        let out = apply_rubric(review(StageReadiness::ReadyForDemo, &["gap"]), &meddic).unwrap();
        assert_eq!(out.stage_readiness, StageReadiness::MoreDiscoveryNeeded);
        assert_eq!(out.critical_gaps, vec!["gap".to_string()]);
    }

    #[test]
    fn rubric_keeps_verdict_with_two_missing() {
        let mut meddic = full_meddic();
        meddic.champion = FrameworkEntry::default();
        meddic.metrics = FrameworkEntry::default();
        let out = apply_rubric(review(StageReadiness::ReadyForDemo, &["gap"]), &meddic).unwrap();
        assert_eq!(out.stage_readiness, StageReadiness::ReadyForDemo);
    }

    #[test]
    fn empty_gaps_are_derived_from_missing_elements() {
        let mut meddic = full_meddic();
        meddic.champion = FrameworkEntry::default();
        let out = apply_rubric(review(StageReadiness::ReadyForDemo, &[" "]), &meddic).unwrap();
        assert_eq!(out.critical_gaps, vec!["Champion not established".to_string()]);

        let mut meddic = full_meddic();
        meddic.decision_criteria.evidence_ids.clear();
        let out = apply_rubric(review(StageReadiness::ReadyForDemo, &[]), &meddic).unwrap();
        assert_eq!(
            out.critical_gaps,
            vec!["Decision Criteria not backed by transcript evidence".to_string()]
        );
    }

    #[test]
    fn no_derivable_gap_is_invalid_output() {
        let err = apply_rubric(review(StageReadiness::ReadyForDemo, &[]), &full_meddic())
            .unwrap_err();
        assert!(matches!(err, StageError::InvalidOutput { .. }));
        assert_eq!(err.user_message(), "Analysis failed - please try again");
    }

    #[tokio::test]
    async fn short_transcript_makes_no_call() {
        let model = Arc::new(ScriptedModel::replying(["{}"]));
        let analyzer = SalesAnalyzer::new(model.clone());
        let err = analyzer.create_evidence_registry("hello").await.unwrap_err();
        assert_eq!(err.user_message(), "Transcript too short");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn registry_key_is_required() {
        let model = Arc::new(ScriptedModel::replying([r#"{"E001": {"quote": "x"}}"#]));
        let analyzer = SalesAnalyzer::new(model);
        let err = analyzer
            .create_evidence_registry(&"Customer: we need faster pricing. ".repeat(3))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Parse { .. }));
    }

    #[test]
    fn stage_errors_map_to_http_errors() {
        let err: AnalyzerError = StageError::TranscriptTooShort { chars: 3 }.into();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Transcript too short");

        let err: AnalyzerError = StageError::Upstream {
            stage: "evidence-registry-v1",
            source: ModelError::Empty,
        }
        .into();
        assert_eq!(err.public_message(), "AI analysis service temporarily unavailable");
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn deal_review_failures_have_their_own_wording() {
        let err: AnalyzerError = StageError::Upstream {
            stage: PromptKind::DealReview.id(),
            source: ModelError::Empty,
        }
        .into();
        assert_eq!(err.public_message(), "Deal review service temporarily unavailable");

        let err = invalid(PromptKind::DealReview, "no critical gaps returned");
        assert_eq!(err.user_message(), "Deal review failed - please try again");
        let err = invalid(PromptKind::Frameworks, "empty");
        assert_eq!(err.user_message(), "Analysis failed - please try again");
    }
}
