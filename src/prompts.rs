//! Fixed prompt bodies for the three analysis stages.
//!
//! Each stage embeds the previous stage's output as pretty-printed JSON.
//! A blake3 checksum of every template is recorded with audit rows so a
//! result can be traced back to the prompt wording that produced it.

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::schemas::{EvidenceRegistry, FrameworkAnalysis};

/// The three model calls of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Evidence,
    Frameworks,
    DealReview,
}

impl PromptKind {
    pub const ALL: [PromptKind; 3] = [
        PromptKind::Evidence,
        PromptKind::Frameworks,
        PromptKind::DealReview,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            PromptKind::Evidence => "evidence-registry-v1",
            PromptKind::Frameworks => "three-whys-meddic-v1",
            PromptKind::DealReview => "deal-review-v1",
        }
    }

    /// Response budget for the stage
    pub fn max_tokens(&self) -> u32 {
        match self {
            PromptKind::Evidence => 8000,
            PromptKind::Frameworks => 4000,
            PromptKind::DealReview => 2000,
        }
    }

    fn sections(&self) -> &'static [&'static str] {
        match self {
            PromptKind::Evidence => &[EVIDENCE_INSTRUCTIONS],
            PromptKind::Frameworks => &[FRAMEWORKS_PREAMBLE, FRAMEWORKS_INSTRUCTIONS],
            PromptKind::DealReview => &[
                DEAL_REVIEW_PREAMBLE,
                DEAL_REVIEW_ANALYSIS_HEADER,
                DEAL_REVIEW_INSTRUCTIONS,
            ],
        }
    }

    /// Short hex checksum of the template text
    pub fn checksum(&self) -> &'static str {
        match self {
            PromptKind::Evidence => &CHECKSUMS[0],
            PromptKind::Frameworks => &CHECKSUMS[1],
            PromptKind::DealReview => &CHECKSUMS[2],
        }
    }
}

static CHECKSUMS: Lazy<[String; 3]> = Lazy::new(|| PromptKind::ALL.map(template_checksum));

fn template_checksum(kind: PromptKind) -> String {
    let mut hasher = blake3::Hasher::new();
    for section in kind.sections() {
        hasher.update(section.as_bytes());
    }
    hasher.finalize().to_hex().as_str()[..12].to_string()
}

pub fn evidence_prompt(transcript: &str) -> String {
    let mut prompt = String::with_capacity(EVIDENCE_INSTRUCTIONS.len() + transcript.len());
    prompt.push_str(EVIDENCE_INSTRUCTIONS);
    prompt.push_str(transcript);
    prompt
}

pub fn frameworks_prompt(registry: &EvidenceRegistry) -> Result<String, serde_json::Error> {
    let registry_json = serde_json::to_string_pretty(registry)?;
    let mut prompt = String::with_capacity(
        FRAMEWORKS_PREAMBLE.len() + registry_json.len() + FRAMEWORKS_INSTRUCTIONS.len(),
    );
    prompt.push_str(FRAMEWORKS_PREAMBLE);
    prompt.push_str(&registry_json);
    prompt.push_str(FRAMEWORKS_INSTRUCTIONS);
    Ok(prompt)
}

pub fn deal_review_prompt(
    registry: &EvidenceRegistry,
    analysis: &FrameworkAnalysis,
) -> Result<String, serde_json::Error> {
    let registry_json = serde_json::to_string_pretty(registry)?;
    let analysis_json = serde_json::to_string_pretty(analysis)?;
    let mut prompt = String::with_capacity(
        DEAL_REVIEW_PREAMBLE.len()
            + registry_json.len()
            + DEAL_REVIEW_ANALYSIS_HEADER.len()
            + analysis_json.len()
            + DEAL_REVIEW_INSTRUCTIONS.len(),
    );
    prompt.push_str(DEAL_REVIEW_PREAMBLE);
    prompt.push_str(&registry_json);
    prompt.push_str(DEAL_REVIEW_ANALYSIS_HEADER);
    prompt.push_str(&analysis_json);
    prompt.push_str(DEAL_REVIEW_INSTRUCTIONS);
    Ok(prompt)
}

const EVIDENCE_INSTRUCTIONS: &str = r#"
You are an expert at extracting and cataloging evidence from sales call transcripts.

Your task is to create a comprehensive evidence registry that captures ALL relevant information from this transcript.

Evidence Collection Standards:
- Direct Quotes: Exact wording from the transcript
- Implied Information: Clear contextual references and implications
- Quantitative Data: All numbers, timeframes, frequencies, and metrics mentioned
- Process Details: Current workflows, pain points, and operational context

For each piece of evidence, assign a unique ID (E001, E002, etc.) and categorize it.

Extract every meaningful piece of information - be thorough and comprehensive.

IMPORTANT: Return ONLY valid JSON with no trailing commas. Ensure all quotes are properly escaped.

Return your response as a JSON object with this structure:
{
    "evidence_registry": {
        "E001": {
            "quote": "exact quote from transcript",
            "type": "direct_quote|implied_info|quantitative_data|process_detail",
            "context": "brief context about when/why this was mentioned",
            "relevance": "why this evidence is important for sales analysis"
        }
    }
}

Transcript:
"#;

const FRAMEWORKS_PREAMBLE: &str = r#"
You are a sales expert analyzing a call transcript. Use ONLY the evidence provided in the evidence registry to create your analysis.

Evidence Registry:
"#;

const FRAMEWORKS_INSTRUCTIONS: &str = r#"

Create a comprehensive analysis with two frameworks:

1. Three Whys Framework (HIERARCHICAL - from strategic to operational):

- Corporate Objectives: C-level strategic goals with executive sponsorship and significant budget (revenue targets, market expansion, compliance mandates). Look for: "CEO wants", "board approved", "company goal", numbers/percentages, annual targets. ONLY use quantitative_data and executive-level direct_quotes evidence.

- Domain Initiatives: Department-level projects that support objectives with dedicated teams and timelines. Look for: "we're launching", "team is working on", project names, specific deadlines, allocated resources. ONLY use process_detail and project-related direct_quotes evidence.

- Domain Challenges: Day-to-day operational challenges blocking progress that we can solve. Look for: "struggling with", "takes too long", "can't integrate", "manual process", current state problems. ONLY use process_detail and operational implied_info evidence.

2. MEDDIC Framework:
- Metrics: What measurable criteria matter to them?
- Economic Buyer: Who has budget authority?
- Decision Process: How do they make decisions?
- Decision Criteria: What factors influence their choices?
- Implicated Pain: What pain points need solving?
- Champion: Who supports/advocates for solutions?

For each analysis point:
- Provide a clear summary
- Reference specific evidence IDs that support your analysis
- Use evidence that matches the appropriate scope/level for each section
- If no evidence exists for a section, state "No evidence found"

Return as JSON:
{
    "three_whys": {
        "corporate_objectives": {"summary": "analysis summary", "evidence_ids": ["E001", "E002"]},
        "domain_initiatives": {"summary": "analysis summary", "evidence_ids": ["E003"]},
        "domain_challenges": {"summary": "analysis summary", "evidence_ids": ["E004", "E005"]}
    },
    "meddic": {
        "metrics": {"summary": "analysis summary", "evidence_ids": ["E006"]},
        "economic_buyer": {"summary": "analysis summary", "evidence_ids": ["E007"]},
        "decision_process": {"summary": "analysis summary", "evidence_ids": ["E008"]},
        "decision_criteria": {"summary": "analysis summary", "evidence_ids": ["E009"]},
        "implicated_pain": {"summary": "analysis summary", "evidence_ids": ["E010"]},
        "champion": {"summary": "analysis summary", "evidence_ids": ["E011"]}
    }
}
"#;

const DEAL_REVIEW_PREAMBLE: &str = r#"
You are a tough but fair sales manager reviewing this deal. Based on the evidence and analysis provided, give me an honest assessment.

Evidence Registry:
"#;

const DEAL_REVIEW_ANALYSIS_HEADER: &str = r#"

Analysis Data:
"#;

const DEAL_REVIEW_INSTRUCTIONS: &str = r#"

Provide a direct, no-nonsense deal review focusing on:

1. STAGE READINESS: Determine if this deal needs "More Discovery Needed" or "Ready for Demo"
- Look for concrete evidence of pain, budget, authority, timeline
- If missing >2 critical MEDDIC elements, it's "More Discovery Needed"
- Be honest about deal strength

2. CRITICAL GAPS: Identify the 2-3 most important missing pieces that could kill this deal
- Focus on deal-breakers, not nice-to-haves
- Be specific about what's missing
- Call out assumptions vs confirmed facts

3. NEXT CALL OBJECTIVES: Provide 3-5 specific, actionable questions to ask in the next conversation
- Make them copy-pasteable
- Focus on filling the critical gaps
- Include discovery questions about decision process, stakeholders, budget

Be direct and honest - sugar-coating helps no one. This rep needs to know the truth about their deal.

Return as JSON:
{
    "deal_review": {
        "stage_readiness": "More Discovery Needed" or "Ready for Demo",
        "confidence_note": "brief explanation of why",
        "critical_gaps": ["specific gap 1", "specific gap 2", "specific gap 3"],
        "next_call_objectives": [
            "specific question 1",
            "specific question 2",
            "specific question 3",
            "specific question 4",
            "specific question 5"
        ]
    }
}
"#;
