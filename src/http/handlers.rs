//! `/api` handlers: analyze (buffered and streaming) and deal review.

use std::time::{Duration, Instant};

use axum::{
    Extension, Json,
    extract::{
        Multipart, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::HttpState;
use super::middleware::ClientKey;
use crate::{
    analysis::TranscriptAnalysis,
    dataset_logger::{AnalysisRecord, RecordContext},
    error::{AnalyzerError, Result},
    file_processor::{self, UploadedFile},
    schemas::{DealReviewEnvelope, EvidenceMap, EvidenceRegistry, FrameworkAnalysis},
    streaming::{CompletionHook, progress_stream},
};

const FILE_FIELD: &str = "file";
const SAMPLE_SOURCE: &str = "sample_transcript.txt";

/// Buffered analyze response
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub result: TranscriptAnalysis,
    pub is_sample: bool,
}

/// Body of `POST /api/deal-review`
#[derive(Debug, Default, Deserialize)]
pub struct DealReviewRequest {
    #[serde(default)]
    pub evidence_registry: Value,
    #[serde(default)]
    pub analysis_data: Value,
}

/// Everything needed to run and record one analysis
struct Job {
    transcript: String,
    source: String,
    is_sample: bool,
    client: ClientKey,
}

pub async fn analyze(
    State(state): State<HttpState>,
    Extension(client): Extension<ClientKey>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>> {
    let job = upload_job(multipart, client).await?;
    run_buffered(&state, job).await
}

pub async fn analyze_sample(
    State(state): State<HttpState>,
    Extension(client): Extension<ClientKey>,
) -> Result<Json<AnalyzeResponse>> {
    let job = sample_job(&state, client)?;
    run_buffered(&state, job).await
}

pub async fn analyze_stream(
    State(state): State<HttpState>,
    Extension(client): Extension<ClientKey>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let job = upload_job(multipart, client).await?;
    Ok(run_streaming(&state, job))
}

pub async fn analyze_sample_stream(
    State(state): State<HttpState>,
    Extension(client): Extension<ClientKey>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let job = sample_job(&state, client)?;
    Ok(run_streaming(&state, job))
}

pub async fn deal_review(
    State(state): State<HttpState>,
    Extension(client): Extension<ClientKey>,
    payload: std::result::Result<Json<DealReviewRequest>, JsonRejection>,
) -> Result<Json<DealReviewEnvelope>> {
    let Json(request) = payload.map_err(|e| {
        warn!(client = client.as_str(), error = %e, "deal review body rejected");
        AnalyzerError::validation("Invalid request data")
    })?;
    if is_blank(&request.evidence_registry) || is_blank(&request.analysis_data) {
        return Err(AnalyzerError::validation(
            "Missing analysis data for deal review",
        ));
    }

    let registry = registry_from_value(request.evidence_registry)
        .map_err(|_| AnalyzerError::validation("Invalid request data"))?;
    let analysis: FrameworkAnalysis = serde_json::from_value(request.analysis_data)
        .map_err(|_| AnalyzerError::validation("Invalid request data"))?;

    let deal_review = state
        .analyzer
        .create_deal_review(&registry, &analysis)
        .await?;
    info!(
        client = client.as_str(),
        readiness = deal_review.stage_readiness.as_str(),
        "deal review completed"
    );
    Ok(Json(DealReviewEnvelope { deal_review }))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Accept the registry either wrapped (`{"evidence_registry": {...}}`) or
/// as the bare id map
fn registry_from_value(value: Value) -> std::result::Result<EvidenceRegistry, serde_json::Error> {
    let wrapped = value
        .get("evidence_registry")
        .is_some_and(Value::is_object);
    if wrapped {
        serde_json::from_value(value)
    } else {
        let evidence_registry: EvidenceMap = serde_json::from_value(value)?;
        Ok(EvidenceRegistry { evidence_registry })
    }
}

async fn upload_job(
    multipart: std::result::Result<Multipart, MultipartRejection>,
    client: ClientKey,
) -> Result<Job> {
    let mut multipart =
        multipart.map_err(|_| AnalyzerError::validation("No file provided"))?;
    let file = read_file_field(&mut multipart)
        .await?
        .ok_or_else(|| AnalyzerError::validation("No file provided"))?;

    let source = file_processor::safe_filename(&file.filename);
    if let Err(e) = file_processor::validate_upload(&file) {
        warn!(client = client.as_str(), file = %source, error = %e, "invalid file upload");
        return Err(e.into());
    }
    let transcript = file_processor::read_content(&file)?;

    Ok(Job {
        transcript,
        source,
        is_sample: false,
        client,
    })
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Option<UploadedFile>> {
    loop {
        let field = multipart.next_field().await.map_err(multipart_error)?;
        let Some(field) = field else {
            return Ok(None);
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        }));
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AnalyzerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AnalyzerError::PayloadTooLarge {
            message: file_processor::FileError::TooLarge.to_string(),
        }
    } else {
        warn!(error = %err.body_text(), "malformed multipart body");
        AnalyzerError::validation("No file provided")
    }
}

fn sample_job(state: &HttpState, client: ClientKey) -> Result<Job> {
    let transcript =
        file_processor::load_sample_transcript(state.config.results.sample_transcript.as_deref())
            .ok_or_else(|| {
                AnalyzerError::validation(
                    "Sample transcript not available. Please try uploading your own file.",
                )
            })?;
    Ok(Job {
        transcript,
        source: SAMPLE_SOURCE.to_string(),
        is_sample: true,
        client,
    })
}

async fn run_buffered(state: &HttpState, job: Job) -> Result<Json<AnalyzeResponse>> {
    let started = Instant::now();
    let result = state
        .analyzer
        .analyze_transcript(&job.transcript)
        .await
        .inspect_err(|e| {
            warn!(client = job.client.as_str(), source = %job.source, error = %e, "analysis failed");
        })?;

    let elapsed = started.elapsed();
    info!(
        client = job.client.as_str(),
        source = %job.source,
        is_sample = job.is_sample,
        seconds = elapsed.as_secs_f64(),
        "analysis completed"
    );
    record_result(state, &job, &result, elapsed);

    Ok(Json(AnalyzeResponse {
        result,
        is_sample: job.is_sample,
    }))
}

fn record_result(state: &HttpState, job: &Job, result: &TranscriptAnalysis, elapsed: Duration) {
    if let Some(logger) = &state.dataset {
        let record = AnalysisRecord::new(
            result,
            RecordContext {
                transcript: &job.transcript,
                source: &job.source,
                is_sample: job.is_sample,
                user: Some(job.client.as_str()),
                model: state.analyzer.model_id(),
                elapsed,
            },
        );
        // detached; failures are logged by the writer
        let _ = logger.log_in_background(record);
    }
}

fn run_streaming(
    state: &HttpState,
    job: Job,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>> + use<>> {
    info!(
        client = job.client.as_str(),
        source = %job.source,
        is_sample = job.is_sample,
        "streaming analysis started"
    );
    let transcript = job.transcript.clone();
    let hook: Option<CompletionHook> = state.dataset.is_some().then(|| {
        let hook_state = state.clone();
        let started = Instant::now();
        Box::new(move |result: TranscriptAnalysis| {
            record_result(&hook_state, &job, &result, started.elapsed());
        }) as CompletionHook
    });

    let events = progress_stream(state.analyzer.clone(), transcript, hook)
        .map(|event| Event::default().event(event.stage.as_str()).json_data(&event));

    Sse::new(events).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(state.config.http.sse_keepalive_sec)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_values() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&json!({})));
        assert!(!is_blank(&json!({"E001": {}})));
    }

    #[test]
    fn registry_accepts_wrapped_or_bare() {
        let bare = json!({"E001": {"quote": "q", "type": "direct_quote"}});
        let wrapped = json!({"evidence_registry": bare.clone()});
        let a = registry_from_value(bare).unwrap();
        let b = registry_from_value(wrapped).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("E001"));
    }
}
