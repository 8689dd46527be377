use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{AnalyzerError, Result};

pub const DEFAULT_MODEL: &str = "claude-opus-4-5-20251101";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_LOG_FILTER: &str = "sales_call_analyzer=info,tower_http=info";

/// Main configuration structure loaded from sales_analyzer.toml and environment variables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    /// Secrets and process-level settings, environment only
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Which model service backs the analysis stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Anthropic,
    /// Canned responses, for local development without credentials
    Mock,
}

impl FromStr for ModelProvider {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ModelProvider::Anthropic),
            "mock" => Ok(ModelProvider::Mock),
            other => Err(AnalyzerError::Config {
                message: format!("unknown LLM_PROVIDER '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProvider::Anthropic => write!(f, "anthropic"),
            ModelProvider::Mock => write!(f, "mock"),
        }
    }
}

/// Model service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub provider: ModelProvider,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Anthropic,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 300,
        }
    }
}

/// HTTP surface settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    /// Per-client requests per minute on the analyze endpoints (0 disables)
    pub analyze_per_minute: u32,
    /// Per-client requests per minute on the deal review endpoint (0 disables)
    pub review_per_minute: u32,
    /// Per-client budget shared by every `/api` route (0 disables)
    pub api_per_hour: u32,
    pub api_per_day: u32,
    /// Key clients on the first `X-Forwarded-For` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_proxy: bool,
    pub allowed_origins: Vec<String>,
    pub production: bool,
    pub sse_keepalive_sec: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5500)),
            analyze_per_minute: 5,
            review_per_minute: 10,
            api_per_hour: 50,
            api_per_day: 200,
            trust_proxy: false,
            allowed_origins: vec!["*".to_string()],
            production: false,
            sse_keepalive_sec: 15,
        }
    }
}

/// Where analysis results go and where the sample transcript comes from
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// CSV file receiving one audit row per analysis; None disables logging
    pub dataset: Option<PathBuf>,
    /// Overrides the bundled sample transcript
    pub sample_transcript: Option<PathBuf>,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub anthropic_api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            bearer_token: None,
            log_level: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RuntimeConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|v| !v.trim().is_empty()),
            bearer_token: lookup("ANALYZER_BEARER_TOKEN").filter(|v| !v.trim().is_empty()),
            log_level: lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

fn flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

impl Config {
    /// Load configuration from TOML file and environment variables.
    /// Uses ANALYZER_CONFIG or defaults to "sales_analyzer.toml".
    pub fn load() -> Result<Self> {
        // 1) ANALYZER_ENV_FILE if set, 2) ./.env
        if let Ok(env_path) = std::env::var("ANALYZER_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::dotenv();
        }

        let config_path = std::env::var("ANALYZER_CONFIG")
            .unwrap_or_else(|_| "sales_analyzer.toml".to_string());
        let content = match std::fs::read_to_string(&config_path) {
            Ok(content) => Some(content),
            Err(_) => {
                tracing::warn!("Config file {} not found, using defaults", config_path);
                None
            }
        };

        Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from optional TOML text plus a variable lookup (env-first).
    pub fn from_sources(
        toml_text: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config: Config = match toml_text {
            Some(text) => toml::from_str(text).map_err(|e| AnalyzerError::Config {
                message: format!("invalid config file: {}", e),
            })?,
            None => Self::default(),
        };

        if let Some(provider) = lookup("LLM_PROVIDER") {
            config.system.provider = provider.parse()?;
        }
        if let Some(model) = lookup("ANTHROPIC_MODEL").filter(|v| !v.is_empty()) {
            config.system.model = model;
        }
        if let Some(base) = lookup("ANTHROPIC_BASE_URL").filter(|v| !v.is_empty()) {
            config.system.base_url = base;
        }
        if let Some(secs) = lookup("LLM_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            config.system.timeout_secs = secs;
        }

        if let Some(bind) = lookup("ANALYZER_HTTP_BIND") {
            config.http.bind = bind.parse().map_err(|e| AnalyzerError::Config {
                message: format!("ANALYZER_HTTP_BIND '{}' is not a socket address: {}", bind, e),
            })?;
        }
        if let Some(n) = lookup("ANALYZER_RATE_ANALYZE_PER_MIN").and_then(|v| v.parse().ok()) {
            config.http.analyze_per_minute = n;
        }
        if let Some(n) = lookup("ANALYZER_RATE_REVIEW_PER_MIN").and_then(|v| v.parse().ok()) {
            config.http.review_per_minute = n;
        }
        if let Some(n) = lookup("ANALYZER_RATE_API_PER_HOUR").and_then(|v| v.parse().ok()) {
            config.http.api_per_hour = n;
        }
        if let Some(n) = lookup("ANALYZER_RATE_API_PER_DAY").and_then(|v| v.parse().ok()) {
            config.http.api_per_day = n;
        }
        if let Some(trust) = lookup("ANALYZER_TRUST_PROXY") {
            config.http.trust_proxy = flag(&trust);
        }
        if let Some(origins) = lookup("ANALYZER_ALLOWED_ORIGINS") {
            config.http.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(prod) = lookup("ANALYZER_PRODUCTION") {
            config.http.production = flag(&prod);
        }

        // Empty string means "logging disabled", same as unset
        if let Some(dataset) = lookup("RESULTS_DATASET") {
            let dataset = dataset.trim();
            config.results.dataset = (!dataset.is_empty()).then(|| PathBuf::from(dataset));
        }
        if let Some(sample) = lookup("SAMPLE_TRANSCRIPT_PATH").filter(|v| !v.trim().is_empty()) {
            config.results.sample_transcript = Some(PathBuf::from(sample));
        }

        config.runtime = RuntimeConfig::from_lookup(&lookup);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.system.provider == ModelProvider::Anthropic
            && self.runtime.anthropic_api_key.is_none()
        {
            return Err(AnalyzerError::Config {
                message: "Missing required environment variables: ANTHROPIC_API_KEY".to_string(),
            });
        }
        if self.system.model.trim().is_empty() {
            return Err(AnalyzerError::Config {
                message: "model identifier must not be empty".to_string(),
            });
        }
        if !self.system.base_url.starts_with("http://")
            && !self.system.base_url.starts_with("https://")
        {
            tracing::warn!(
                "Model base URL '{}' doesn't start with http:// or https://",
                self.system.base_url
            );
        }
        if self.system.timeout_secs == 0 {
            return Err(AnalyzerError::Config {
                message: "LLM_TIMEOUT_SECS must be > 0".to_string(),
            });
        }
        if self.http.sse_keepalive_sec == 0 {
            return Err(AnalyzerError::Config {
                message: "http.sse_keepalive_sec must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Whether analysis results are appended to a dataset
    pub fn dataset_logging_enabled(&self) -> bool {
        self.results.dataset.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            http: HttpConfig::default(),
            results: ResultsConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}
