//! Request middleware: client identity, rate limiting, bearer auth,
//! security headers, and request metrics.

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use tokio::sync::Mutex;

use super::HttpMetrics;
use crate::error::AnalyzerError;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please wait before trying again.";

/// Route key used in metrics for requests that matched no route
pub const UNMATCHED_ROUTE: &str = "<unmatched>";
/// Limiter stores are pruned of idle clients every this many checks
const PRUNE_EVERY: u64 = 1024;

/// Who is calling: the peer address, or the first `X-Forwarded-For` hop
/// when the deployment trusts its proxy. "unknown" without either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn from_request(req: &Request, trust_proxy: bool) -> Self {
        if trust_proxy {
            let forwarded = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Self(ip.to_string());
            }
        }
        match req.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Self(addr.ip().to_string()),
            None => Self("unknown".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Tag the request with its [`ClientKey`] for limiters and handlers
pub async fn identify_client(
    State(trust_proxy): State<bool>,
    mut req: Request,
    next: Next,
) -> Response {
    let key = ClientKey::from_request(&req, trust_proxy);
    req.extensions_mut().insert(key);
    next.run(req).await
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Replenish window of one quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    fn quota(self, n: NonZeroU32) -> Quota {
        match self {
            Window::Minute => Quota::per_minute(n),
            Window::Hour => Quota::per_hour(n),
            Window::Day => Quota::with_period(Duration::from_secs(86_400) / n.get())
                .map(|q| q.allow_burst(n))
                .unwrap_or_else(|| Quota::per_second(n)),
        }
    }

    /// Seconds a rejected client is told to wait
    pub fn retry_after_secs(self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3_600,
            Window::Day => 86_400,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

struct WindowLimit {
    window: Window,
    per_window: u32,
    limiter: KeyedLimiter,
}

/// Per-client quotas; a request passes only if every window allows it.
/// A quota of zero disables that window.
#[derive(Clone)]
pub struct ClientRateLimiter {
    limits: Arc<Vec<WindowLimit>>,
    checks: Arc<AtomicU64>,
}

impl ClientRateLimiter {
    pub fn new(quotas: impl IntoIterator<Item = (Window, u32)>) -> Self {
        let limits = quotas
            .into_iter()
            .filter_map(|(window, per_window)| {
                let n = NonZeroU32::new(per_window)?;
                Some(WindowLimit {
                    window,
                    per_window,
                    limiter: RateLimiter::keyed(window.quota(n)),
                })
            })
            .collect();
        Self {
            limits: Arc::new(limits),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn per_minute(per_minute: u32) -> Self {
        Self::new([(Window::Minute, per_minute)])
    }

    /// Ok when the client may proceed, else the window that ran out
    pub fn check(&self, key: &ClientKey) -> Result<(), Window> {
        let n = self.checks.fetch_add(1, Ordering::Relaxed);
        if n % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        for limit in self.limits.iter() {
            if limit.limiter.check_key(&key.0).is_err() {
                return Err(limit.window);
            }
        }
        Ok(())
    }

    /// Forget clients whose quota has fully replenished
    pub fn prune(&self) {
        for limit in self.limits.iter() {
            limit.limiter.retain_recent();
            limit.limiter.shrink_to_fit();
        }
    }

    /// Number of clients currently held by the busiest window
    pub fn tracked_clients(&self) -> usize {
        self.limits
            .iter()
            .map(|l| l.limiter.len())
            .max()
            .unwrap_or_default()
    }

    fn per_window(&self, window: Window) -> u32 {
        self.limits
            .iter()
            .find(|l| l.window == window)
            .map(|l| l.per_window)
            .unwrap_or_default()
    }
}

pub async fn rate_limit(
    State(limiter): State<ClientRateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .extensions()
        .get::<ClientKey>()
        .cloned()
        .unwrap_or_else(|| ClientKey::from_request(&req, false));

    let Err(window) = limiter.check(&key) else {
        return next.run(req).await;
    };

    tracing::warn!(
        client = key.as_str(),
        path = req.uri().path(),
        window = window.as_str(),
        limit = limiter.per_window(window),
        "rate limit exceeded"
    );
    let mut resp = AnalyzerError::RateLimited {
        message: RATE_LIMIT_MESSAGE.to_string(),
    }
    .into_response();
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(window.retry_after_secs()));
    resp
}

/// Reject requests without the configured bearer token. `/health` and
/// CORS preflights are always let through; no token configured means no auth.
pub async fn require_bearer(
    State(token): State<Option<String>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = token else {
        return next.run(req).await;
    };
    if req.uri().path() == "/health" || req.method() == axum::http::Method::OPTIONS {
        return next.run(req).await;
    }

    let header_ok = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|v| v == expected);

    if !header_ok {
        return AnalyzerError::Unauthorized.into_response();
    }
    next.run(req).await
}

pub async fn security_headers(
    State(production): State<bool>,
    req: Request,
    next: Next,
) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    if production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    resp
}

pub async fn track_metrics(
    State(metrics): State<Arc<Mutex<HttpMetrics>>>,
    req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    let start = Instant::now();

    let resp = next.run(req).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let success = resp.status().is_success();
    metrics.lock().await.record(&route, latency_ms, success);
    if !success {
        tracing::debug!(route = %route, status = resp.status().as_u16(), "request finished with error status");
    }
    resp
}
