//! Structured artifacts produced by the analysis stages.
//!
//! Framework dimensions are struct fields, so serialization order is the
//! declaration order no matter what order the model used.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of an extracted evidence item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    DirectQuote,
    ImpliedInfo,
    QuantitativeData,
    ProcessDetail,
    /// Anything the model invents outside the four categories
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceItem {
    pub quote: String,
    #[serde(rename = "type")]
    pub evidence_type: EvidenceType,
    pub context: String,
    pub relevance: String,
}

/// Evidence keyed by short id ("E001"). A map, so ids are unique.
pub type EvidenceMap = BTreeMap<String, EvidenceItem>;

/// Stage 1 output: `{"evidence_registry": {...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRegistry {
    pub evidence_registry: EvidenceMap,
}

impl EvidenceRegistry {
    pub fn len(&self) -> usize {
        self.evidence_registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evidence_registry.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.evidence_registry.contains_key(id)
    }
}

/// One framework dimension: a summary plus the evidence ids backing it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkEntry {
    pub summary: String,
    pub evidence_ids: Vec<String>,
}

impl FrameworkEntry {
    /// A dimension counts as covered when it has a real summary
    pub fn is_complete(&self) -> bool {
        let summary = self.summary.trim();
        !summary.is_empty() && !summary.eq_ignore_ascii_case("no evidence found")
    }
}

/// Strategic to operational, in this order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreeWhys {
    pub corporate_objectives: FrameworkEntry,
    pub domain_initiatives: FrameworkEntry,
    pub domain_challenges: FrameworkEntry,
}

impl ThreeWhys {
    pub const DIMENSIONS: [&'static str; 3] = [
        "corporate_objectives",
        "domain_initiatives",
        "domain_challenges",
    ];

    pub fn entries(&self) -> [(&'static str, &FrameworkEntry); 3] {
        [
            (Self::DIMENSIONS[0], &self.corporate_objectives),
            (Self::DIMENSIONS[1], &self.domain_initiatives),
            (Self::DIMENSIONS[2], &self.domain_challenges),
        ]
    }

    pub fn completeness(&self) -> usize {
        self.entries().iter().filter(|(_, e)| e.is_complete()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meddic {
    pub metrics: FrameworkEntry,
    pub economic_buyer: FrameworkEntry,
    pub decision_process: FrameworkEntry,
    pub decision_criteria: FrameworkEntry,
    pub implicated_pain: FrameworkEntry,
    pub champion: FrameworkEntry,
}

impl Meddic {
    pub const DIMENSIONS: [&'static str; 6] = [
        "metrics",
        "economic_buyer",
        "decision_process",
        "decision_criteria",
        "implicated_pain",
        "champion",
    ];

    pub fn entries(&self) -> [(&'static str, &FrameworkEntry); 6] {
        [
            (Self::DIMENSIONS[0], &self.metrics),
            (Self::DIMENSIONS[1], &self.economic_buyer),
            (Self::DIMENSIONS[2], &self.decision_process),
            (Self::DIMENSIONS[3], &self.decision_criteria),
            (Self::DIMENSIONS[4], &self.implicated_pain),
            (Self::DIMENSIONS[5], &self.champion),
        ]
    }

    pub fn completeness(&self) -> usize {
        self.entries().iter().filter(|(_, e)| e.is_complete()).count()
    }

    /// Dimensions without a usable summary
    pub fn missing(&self) -> Vec<&'static str> {
        self.entries()
            .iter()
            .filter(|(_, e)| !e.is_complete())
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Stage 2 output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkAnalysis {
    pub three_whys: ThreeWhys,
    pub meddic: Meddic,
}

impl FrameworkAnalysis {
    /// Every evidence id cited anywhere in the analysis, in dimension order
    pub fn cited_ids(&self) -> impl Iterator<Item = &str> {
        self.three_whys
            .entries()
            .into_iter()
            .chain(self.meddic.entries())
            .flat_map(|(_, e)| e.evidence_ids.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageReadiness {
    #[serde(rename = "More Discovery Needed")]
    MoreDiscoveryNeeded,
    #[serde(rename = "Ready for Demo")]
    ReadyForDemo,
}

impl StageReadiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageReadiness::MoreDiscoveryNeeded => "More Discovery Needed",
            StageReadiness::ReadyForDemo => "Ready for Demo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealReview {
    pub stage_readiness: StageReadiness,
    #[serde(default)]
    pub confidence_note: String,
    #[serde(default)]
    pub critical_gaps: Vec<String>,
    #[serde(default)]
    pub next_call_objectives: Vec<String>,
}

/// Stage 3 output: `{"deal_review": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealReviewEnvelope {
    pub deal_review: DealReview,
}

/// Which part of the pipeline a progress event reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Evidence,
    Analysis,
    Error,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Evidence => "evidence",
            ProgressStage::Analysis => "analysis",
            ProgressStage::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Started,
    Complete,
}

/// Payload attached to a stage-complete event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressData {
    Evidence(EvidenceRegistry),
    Analysis(FrameworkAnalysis),
}

/// One event of the streaming analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProgressStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProgressData>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn started(stage: ProgressStage) -> Self {
        Self {
            stage,
            status: Some(ProgressStatus::Started),
            data: None,
            complete: false,
            error: None,
        }
    }

    pub fn finished(stage: ProgressStage, data: ProgressData, complete: bool) -> Self {
        Self {
            stage,
            status: Some(ProgressStatus::Complete),
            data: Some(data),
            complete,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: ProgressStage::Error,
            status: None,
            data: None,
            complete: true,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_whys_serializes_in_canonical_order() {
        let raw = r#"{
            "domain_challenges": {"summary": "c", "evidence_ids": ["E3"]},
            "corporate_objectives": {"summary": "a", "evidence_ids": ["E1"]},
            "domain_initiatives": {"summary": "b", "evidence_ids": []}
        }"#;
        let parsed: ThreeWhys = serde_json::from_str(raw).unwrap();
        let out = serde_json::to_string(&parsed).unwrap();
        let a = out.find("corporate_objectives").unwrap();
        let b = out.find("domain_initiatives").unwrap();
        let c = out.find("domain_challenges").unwrap();
        assert!(a < b && b < c, "unexpected order: {}", out);
    }

    #[test]
    fn missing_dimensions_default_to_empty() {
        let parsed: FrameworkAnalysis =
            serde_json::from_str(r#"{"meddic": {"champion": {"summary": "VP Sales"}}}"#).unwrap();
        assert_eq!(parsed.three_whys, ThreeWhys::default());
        assert_eq!(parsed.meddic.champion.summary, "VP Sales");
        assert!(parsed.meddic.champion.evidence_ids.is_empty());
        assert_eq!(parsed.meddic.completeness(), 1);
    }

    #[test]
    fn no_evidence_found_is_incomplete() {
        let entry = FrameworkEntry {
            summary: "No evidence found".into(),
            evidence_ids: vec![],
        };
        assert!(!entry.is_complete());
        assert!(!FrameworkEntry::default().is_complete());
    }

    #[test]
    fn unknown_evidence_type_maps_to_other() {
        let item: EvidenceItem =
            serde_json::from_str(r#"{"quote": "q", "type": "direct_quote|implied_info"}"#).unwrap();
        assert_eq!(item.evidence_type, EvidenceType::Other);
        assert_eq!(item.context, "");
    }

    #[test]
    fn stage_readiness_uses_display_strings() {
        let json = serde_json::to_string(&StageReadiness::ReadyForDemo).unwrap();
        assert_eq!(json, "\"Ready for Demo\"");
        let bad: Result<StageReadiness, _> = serde_json::from_str("\"Maybe\"");
        assert!(bad.is_err());
    }

    #[test]
    fn error_event_shape() {
        let v = serde_json::to_value(ProgressEvent::failed("Transcript too short")).unwrap();
        assert_eq!(v["stage"], "error");
        assert_eq!(v["complete"], true);
        assert_eq!(v["error"], "Transcript too short");
        assert!(v.get("data").is_none());
    }
}
