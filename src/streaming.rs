//! Progress events for the two-stage analysis.
//!
//! A small state machine drives `futures_util::stream::unfold`: every pull
//! advances exactly one step and yields one event. After an error event the
//! machine is finished and the stream ends.

use futures_util::stream::{self, Stream};
use tracing::{info, warn};

use crate::analysis::{SalesAnalyzer, TranscriptAnalysis};
use crate::schemas::{EvidenceRegistry, ProgressData, ProgressEvent, ProgressStage};

/// Called once with the full result when both stages succeed
pub type CompletionHook = Box<dyn FnOnce(TranscriptAnalysis) + Send + 'static>;

enum PipelineState {
    NotStarted { transcript: String },
    EvidenceRunning { transcript: String },
    EvidenceDone { registry: EvidenceRegistry },
    AnalysisRunning { registry: EvidenceRegistry },
    Finished,
}

struct Pipeline {
    analyzer: SalesAnalyzer,
    state: PipelineState,
    on_complete: Option<CompletionHook>,
}

impl Pipeline {
    async fn advance(&mut self) -> Option<ProgressEvent> {
        match std::mem::replace(&mut self.state, PipelineState::Finished) {
            PipelineState::NotStarted { transcript } => {
                self.state = PipelineState::EvidenceRunning { transcript };
                Some(ProgressEvent::started(ProgressStage::Evidence))
            }
            PipelineState::EvidenceRunning { transcript } => {
                match self.analyzer.create_evidence_registry(&transcript).await {
                    Ok(registry) => {
                        let event = ProgressEvent::finished(
                            ProgressStage::Evidence,
                            ProgressData::Evidence(registry.clone()),
                            false,
                        );
                        self.state = PipelineState::EvidenceDone { registry };
                        Some(event)
                    }
                    Err(e) => {
                        warn!(error = %e, "streaming evidence stage failed");
                        Some(ProgressEvent::failed(e.user_message()))
                    }
                }
            }
            PipelineState::EvidenceDone { registry } => {
                self.state = PipelineState::AnalysisRunning { registry };
                Some(ProgressEvent::started(ProgressStage::Analysis))
            }
            PipelineState::AnalysisRunning { registry } => {
                match self.analyzer.create_analysis(&registry).await {
                    Ok(analysis) => {
                        let event = ProgressEvent::finished(
                            ProgressStage::Analysis,
                            ProgressData::Analysis(analysis.clone()),
                            true,
                        );
                        info!("streaming analysis complete");
                        if let Some(hook) = self.on_complete.take() {
                            hook(TranscriptAnalysis {
                                evidence: registry,
                                analysis,
                            });
                        }
                        Some(event)
                    }
                    Err(e) => {
                        warn!(error = %e, "streaming analysis stage failed");
                        Some(ProgressEvent::failed(e.user_message()))
                    }
                }
            }
            PipelineState::Finished => None,
        }
    }
}

/// Finite, single-use stream of progress events for one transcript.
///
/// Success yields evidence-started, evidence-complete, analysis-started,
/// analysis-complete. Any stage failure yields one error event instead of
/// that stage's completion and nothing after it.
pub fn progress_stream(
    analyzer: SalesAnalyzer,
    transcript: String,
    on_complete: Option<CompletionHook>,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    let pipeline = Pipeline {
        analyzer,
        state: PipelineState::NotStarted { transcript },
        on_complete,
    };
    stream::unfold(pipeline, |mut pipeline| async move {
        let event = pipeline.advance().await?;
        Some((event, pipeline))
    })
}
