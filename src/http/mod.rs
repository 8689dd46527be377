//! HTTP transport for the sales-call analyzer
//!
//! axum router with the analysis API under `/api`, plus plain JSON health,
//! info, and metrics endpoints.

pub mod handlers;
pub mod middleware;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::{cmp::Ordering, collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::{
    analysis::SalesAnalyzer,
    config::Config,
    dataset_logger::DatasetLogger,
    error::Result,
    file_processor::MAX_FILE_BYTES,
    prompts::PromptKind,
};

use self::middleware::{ClientRateLimiter, Window};

/// Multipart framing overhead allowed on top of the file itself
pub const BODY_LIMIT_SLACK: usize = 64 * 1024;
const LATENCY_WINDOW: usize = 256;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub analyzer: SalesAnalyzer,
    pub dataset: Option<DatasetLogger>,
    pub metrics: Arc<Mutex<HttpMetrics>>,
}

impl HttpState {
    pub fn new(config: Arc<Config>, analyzer: SalesAnalyzer) -> Self {
        let dataset = DatasetLogger::from_config(&config);
        Self {
            config,
            analyzer,
            dataset,
            metrics: Arc::new(Mutex::new(HttpMetrics::new())),
        }
    }
}

/// Request counters for `/metrics`
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    pub total_requests: u64,
    pub last_request_unix: u64,
    pub errors_total: u64,
    pub latencies: Vec<f64>, // ring buffer for p95
    pub route_counts: HashMap<String, u64>,
}

impl HttpMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            last_request_unix: unix_now(),
            errors_total: 0,
            latencies: Vec::with_capacity(LATENCY_WINDOW),
            route_counts: HashMap::new(),
        }
    }

    pub(crate) fn record(&mut self, route: &str, latency_ms: f64, success: bool) {
        if latency_ms > 0.0 {
            self.latencies.push(latency_ms);
            if self.latencies.len() > LATENCY_WINDOW {
                self.latencies.remove(0);
            }
        }
        if !success {
            self.errors_total = self.errors_total.saturating_add(1);
        }
        self.total_requests = self.total_requests.saturating_add(1);
        *self.route_counts.entry(route.to_string()).or_default() += 1;
        self.last_request_unix = unix_now();
    }

    /// Average and p95 latency in milliseconds
    fn latency_stats(&self) -> (Option<f64>, Option<f64>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let sum: f64 = self.latencies.iter().sum();
        let avg = sum / self.latencies.len() as f64;
        let mut sorted = self.latencies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let p95_idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
        (Some(avg), sorted.get(p95_idx).copied())
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::UNIX_EPOCH
        .elapsed()
        .unwrap_or_default()
        .as_secs()
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Info endpoint
pub async fn info_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let config = &state.config;
    let prompts: Vec<_> = PromptKind::ALL
        .iter()
        .map(|kind| json!({ "id": kind.id(), "checksum": kind.checksum() }))
        .collect();

    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "model": {
            "provider": config.system.provider.to_string(),
            "id": state.analyzer.model_id(),
        },
        "prompts": prompts,
        "dataset_logging": config.dataset_logging_enabled(),
        "docx_support": cfg!(feature = "docx"),
        "auth_required": config.runtime.bearer_token.is_some(),
        "rate_limits_per_minute": {
            "analyze": config.http.analyze_per_minute,
            "deal_review": config.http.review_per_minute,
        },
        "api_budget": {
            "per_hour": config.http.api_per_hour,
            "per_day": config.http.api_per_day,
        },
        "trust_proxy": config.http.trust_proxy,
    }))
}

/// Metrics endpoint
pub async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics = state.metrics.lock().await.clone();
    let (avg_latency_ms, p95_latency_ms) = metrics.latency_stats();

    let mut routes: Vec<_> = metrics.route_counts.iter().collect();
    routes.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let routes: Vec<_> = routes
        .into_iter()
        .map(|(route, count)| json!({ "route": route, "count": count }))
        .collect();

    Json(json!({
        "metrics_version": "1",
        "total_requests": metrics.total_requests,
        "last_request_unix": metrics.last_request_unix,
        "errors_total": metrics.errors_total,
        "avg_latency_ms": avg_latency_ms,
        "p95_latency_ms": p95_latency_ms,
        "routes": routes,
    }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Assemble the full application router
pub fn build_router(state: HttpState) -> Router {
    let config = state.config.clone();
    let http = &config.http;
    let analyze_limiter = ClientRateLimiter::per_minute(http.analyze_per_minute);
    let review_limiter = ClientRateLimiter::per_minute(http.review_per_minute);
    let api_budget = ClientRateLimiter::new([
        (Window::Hour, http.api_per_hour),
        (Window::Day, http.api_per_day),
    ]);

    let analyze_routes = Router::new()
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/analyze-sample", post(handlers::analyze_sample))
        .route("/api/analyze-stream", post(handlers::analyze_stream))
        .route(
            "/api/analyze-sample-stream",
            post(handlers::analyze_sample_stream),
        )
        .route_layer(from_fn_with_state(
            analyze_limiter,
            middleware::rate_limit,
        ));

    let review_routes = Router::new()
        .route("/api/deal-review", post(handlers::deal_review))
        .route_layer(from_fn_with_state(review_limiter, middleware::rate_limit));

    // hourly and daily budget shared across every /api route
    let api_routes = analyze_routes
        .merge(review_routes)
        .route_layer(from_fn_with_state(api_budget, middleware::rate_limit));

    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(MAX_FILE_BYTES + BODY_LIMIT_SLACK))
        .layer(from_fn_with_state(
            http.trust_proxy,
            middleware::identify_client,
        ))
        .layer(from_fn_with_state(
            state.metrics.clone(),
            middleware::track_metrics,
        ))
        .layer(from_fn_with_state(
            config.runtime.bearer_token.clone(),
            middleware::require_bearer,
        ))
        .layer(from_fn_with_state(
            http.production,
            middleware::security_headers,
        ))
        .layer(cors_layer(&http.allowed_origins))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_http_server(state: HttpState) -> Result<()> {
    let bind = state.config.http.bind;
    if state.config.runtime.bearer_token.is_none() {
        tracing::warn!("ANALYZER_BEARER_TOKEN not set; API endpoints are unauthenticated");
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    tracing::info!("Starting HTTP server on {}", bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_window_is_bounded() {
        let mut m = HttpMetrics::new();
        for i in 0..300 {
            m.record("/api/analyze", (i + 1) as f64, i % 10 != 0);
        }
        assert_eq!(m.latencies.len(), LATENCY_WINDOW);
        assert_eq!(m.total_requests, 300);
        assert_eq!(m.errors_total, 30);
        assert_eq!(m.route_counts["/api/analyze"], 300);
        let (avg, p95) = m.latency_stats();
        assert!(avg.unwrap() > 0.0);
        assert!(p95.unwrap() >= avg.unwrap());
    }

    #[test]
    fn empty_metrics_have_no_latency() {
        assert_eq!(HttpMetrics::new().latency_stats(), (None, None));
    }
}
