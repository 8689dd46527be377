use std::sync::Arc;

use sales_call_analyzer::{
    SalesAnalyzer, StageError,
    analysis::MAX_TRANSCRIPT_CHARS,
    clients::{MockModel, ModelError, ScriptedModel},
    prompts::PromptKind,
    schemas::{
        EvidenceItem, EvidenceRegistry, EvidenceType, FrameworkAnalysis, FrameworkEntry,
        StageReadiness,
    },
};

const TRANSCRIPT: &str = "Rep: What does pricing look like today?\n\
Buyer: Twelve people touch every quote and it takes three weeks.\n\
Rep: Who signs off on new tooling?\nBuyer: Our CFO, she approved the budget.";

fn registry() -> EvidenceRegistry {
    let mut registry = EvidenceRegistry::default();
    registry.evidence_registry.insert(
        "E001".into(),
        EvidenceItem {
            quote: "Twelve people touch every quote".into(),
            evidence_type: EvidenceType::ProcessDetail,
            context: "Buyer describing the approval chain".into(),
            relevance: "Manual process pain".into(),
        },
    );
    registry
}

fn entry(summary: &str, ids: &[&str]) -> FrameworkEntry {
    FrameworkEntry {
        summary: summary.into(),
        evidence_ids: ids.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_transcript_limits_make_no_model_call() {
    let model = Arc::new(ScriptedModel::replying(["{}", "{}"]));
    let analyzer = SalesAnalyzer::new(model.clone());

    let err = analyzer
        .create_evidence_registry(&"x".repeat(MAX_TRANSCRIPT_CHARS + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::TranscriptTooLong { .. }));
    assert_eq!(err.user_message(), "Transcript too long");

    let padded = format!("{}short{}", " ".repeat(200), "\n".repeat(200));
    let err = analyzer.create_evidence_registry(&padded).await.unwrap_err();
    assert!(matches!(err, StageError::TranscriptTooShort { .. }));

    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_stage_requests_use_stage_budgets() {
    let model = Arc::new(MockModel::new());
    let analyzer = SalesAnalyzer::new(model.clone());

    let result = analyzer.analyze_transcript(TRANSCRIPT).await.unwrap();
    assert_eq!(result.evidence.len(), 3);
    let review = analyzer
        .create_deal_review(&result.evidence, &result.analysis)
        .await
        .unwrap();
    assert_eq!(review.stage_readiness, StageReadiness::MoreDiscoveryNeeded);
    assert!(!review.critical_gaps.is_empty());
    assert_eq!(model.calls(), 3);

    let scripted = Arc::new(ScriptedModel::replying([
        r#"{"evidence_registry": {}}"#,
        r#"{"three_whys": {}, "meddic": {}}"#,
    ]));
    SalesAnalyzer::new(scripted.clone())
        .analyze_transcript(TRANSCRIPT)
        .await
        .unwrap();
    let requests = scripted.requests();
    assert_eq!(requests[0].stage, PromptKind::Evidence);
    assert_eq!(requests[0].max_tokens, 8000);
    assert!(requests[0].prompt.ends_with(TRANSCRIPT));
    assert_eq!(requests[1].stage, PromptKind::Frameworks);
    assert_eq!(requests[1].max_tokens, 4000);
    assert!(requests.iter().all(|r| r.temperature == 0.0));
}

#[tokio::test]
async fn test_framework_order_is_canonical() {
    let shuffled = r#"```json
{
  "meddic": {
    "champion": {"summary": "Head of Sales", "evidence_ids": ["E001"]},
    "metrics": {"summary": "3 weeks to 3 days", "evidence_ids": []},
  },
  "three_whys": {
    "domain_challenges": {"summary": "Manual approvals", "evidence_ids": ["E001"]},
    "corporate_objectives": {"summary": "Faster quoting", "evidence_ids": []}
  }
}
```"#;
    let model = Arc::new(ScriptedModel::replying([shuffled]));
    let analysis = SalesAnalyzer::new(model)
        .create_analysis(&registry())
        .await
        .unwrap();

    assert_eq!(analysis.three_whys.domain_initiatives, FrameworkEntry::default());
    let json = serde_json::to_string(&analysis).unwrap();
    let positions: Vec<usize> = [
        "corporate_objectives",
        "domain_initiatives",
        "domain_challenges",
        "metrics",
        "economic_buyer",
        "decision_process",
        "decision_criteria",
        "implicated_pain",
        "champion",
    ]
    .iter()
    .map(|key| json.find(&format!("\"{}\"", key)).unwrap())
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", json);
}

#[tokio::test]
async fn test_unparseable_response_is_a_stage_error() {
    let model = Arc::new(ScriptedModel::replying([
        "I'm sorry, I can't produce JSON for this transcript.",
    ]));
    let err = SalesAnalyzer::new(model)
        .create_evidence_registry(TRANSCRIPT)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::Parse { .. }));
    assert_eq!(err.user_message(), "Analysis failed - please try again");
}

#[tokio::test]
async fn test_upstream_failure_is_reported_not_retried() {
    let model = Arc::new(ScriptedModel::new([
        Err(ModelError::Api {
            status: 529,
            body: "overloaded".into(),
        }),
        Ok(r#"{"evidence_registry": {}}"#.to_string()),
    ]));
    let err = SalesAnalyzer::new(model.clone())
        .create_evidence_registry(TRANSCRIPT)
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::Upstream { .. }));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_deal_review_follows_meddic_rubric() {
    let mut analysis = FrameworkAnalysis::default();
    analysis.meddic.metrics = entry("Quote turnaround", &["E001"]);
    analysis.meddic.implicated_pain = entry("Lost deals", &["E001"]);
    analysis.meddic.economic_buyer = entry("CFO", &[]);
    analysis.meddic.champion = entry("No evidence found", &[]);
    // decision_process and decision_criteria left empty: three missing

    let optimistic = r#"{"deal_review": {
        "stage_readiness": "Ready for Demo",
        "confidence_note": "Strong pain",
        "critical_gaps": [],
        "next_call_objectives": ["Who else signs?"]
    }}"#;
    let model = Arc::new(ScriptedModel::replying([optimistic]));
    let review = SalesAnalyzer::new(model)
        .create_deal_review(&registry(), &analysis)
        .await
        .unwrap();

    assert_eq!(review.stage_readiness, StageReadiness::MoreDiscoveryNeeded);
    assert_eq!(
        review.critical_gaps,
        vec![
            "Decision Process not established".to_string(),
            "Decision Criteria not established".to_string(),
            "Champion not established".to_string(),
        ]
    );
    assert_eq!(review.next_call_objectives, vec!["Who else signs?".to_string()]);
}

#[tokio::test]
async fn test_deal_review_rejects_unknown_readiness() {
    let model = Arc::new(ScriptedModel::replying([
        r#"{"deal_review": {"stage_readiness": "Close it now", "critical_gaps": ["x"]}}"#,
    ]));
    let err = SalesAnalyzer::new(model)
        .create_deal_review(&registry(), &FrameworkAnalysis::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::Parse { .. }));
}
