//! Offline model clients: canned responses for local development and a
//! scripted client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::clients::traits::{CompletionRequest, LanguageModel, ModelError};
use crate::prompts::PromptKind;

/// Returns a fixed, well-formed answer for each stage
#[derive(Debug, Default)]
pub struct MockModel {
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(stage = request.stage.id(), "mock model answering");
        Ok(canned_response(request.stage).to_string())
    }

    fn model_id(&self) -> &str {
        "mock-llm"
    }
}

/// The canned text the mock returns for a stage
pub fn canned_response(stage: PromptKind) -> &'static str {
    match stage {
        PromptKind::Evidence => MOCK_EVIDENCE,
        PromptKind::Frameworks => MOCK_FRAMEWORKS,
        PromptKind::DealReview => MOCK_DEAL_REVIEW,
    }
}

/// Pops pre-arranged responses in order and records every request
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for all-success scripts
    pub fn replying<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.into())))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(Err(ModelError::Transport("script exhausted".to_string())))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

const MOCK_EVIDENCE: &str = r#"Here is the evidence registry:
```json
{
    "evidence_registry": {
        "E001": {
            "quote": "We need to reduce our pricing cycle from 3 weeks to 3 days",
            "type": "quantitative_data",
            "context": "CEO mentioned during strategic planning discussion",
            "relevance": "Clear business objective with measurable timeline"
        },
        "E002": {
            "quote": "Current manual pricing process involves 12 different people",
            "type": "process_detail",
            "context": "Operations manager describing current workflow",
            "relevance": "Indicates complexity and potential for automation"
        },
        "E003": {
            "quote": "CFO approved $500K budget for pricing transformation",
            "type": "quantitative_data",
            "context": "Budget discussion",
            "relevance": "Shows executive sponsorship and available funding",
        },
    }
}
```"#;

const MOCK_FRAMEWORKS: &str = r#"{
    "meddic": {
        "metrics": {"summary": "Pricing cycle 3 weeks to 3 days, error rate reduction, improved deal close rate", "evidence_ids": ["E001"]},
        "economic_buyer": {"summary": "CFO approved $500K budget; CEO engaged and championing initiative", "evidence_ids": ["E003"]},
        "decision_process": {"summary": "CFO/COO/Head of Sales decision committee; vendor evaluation in progress", "evidence_ids": []},
        "decision_criteria": {"summary": "Implementation speed, CRM integration, ease of use, vendor support", "evidence_ids": []},
        "implicated_pain": {"summary": "Slow pricing turnaround losing deals to faster competitors", "evidence_ids": ["E001", "E002"]},
        "champion": {"summary": "Head of Sales advocating for solution", "evidence_ids": []}
    },
    "three_whys": {
        "domain_challenges": {"summary": "12-person manual process causes errors and deal losses", "evidence_ids": ["E002"]},
        "corporate_objectives": {"summary": "CEO/CFO allocated $500K budget targeting a 90% pricing cycle reduction", "evidence_ids": ["E001", "E003"]},
        "domain_initiatives": {"summary": "Operations launching pricing automation project with Q2 deadline", "evidence_ids": ["E002"]}
    }
}"#;

const MOCK_DEAL_REVIEW: &str = r#"{
    "deal_review": {
        "stage_readiness": "More Discovery Needed",
        "confidence_note": "Clear pain and budget, but decision process, timeline, and champion strength are unconfirmed.",
        "critical_gaps": [
            "No clear timeline for decision - only 'end of Q1' mentioned",
            "Champion relationship unclear - need to validate Head of Sales influence",
            "Competition unknown - are other vendors being evaluated?"
        ],
        "next_call_objectives": [
            "What is the exact decision date and what are the milestones leading up to it?",
            "Who else is being evaluated and what criteria will be used to choose between vendors?",
            "Can you walk me through the decision process step-by-step? Who has final say?",
            "What happens if you don't solve this by Q2? What's the business impact?",
            "Would the Head of Sales introduce us to the CFO for a technical discussion?"
        ]
    }
}"#;
