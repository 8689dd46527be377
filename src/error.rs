//! Domain-specific error types for the sales-call analyzer

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the analyzer service
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Bad request input (missing fields, malformed body)
    #[error("{message}")]
    Validation { message: String },

    /// Uploaded file rejected or unreadable
    #[error("{message}")]
    Upload { message: String },

    #[error("{message}")]
    PayloadTooLarge { message: String },

    #[error("Authentication required")]
    Unauthorized,

    #[error("{message}")]
    RateLimited { message: String },

    /// Model service unreachable or returned an error status
    #[error("Upstream model error: {message}")]
    Upstream { message: String },

    /// Model output could not be turned into the expected structure
    #[error("Response parse error: {message}")]
    ResponseParse { message: String },

    /// An analysis stage failed; `user_message` is already safe to show
    #[error("{detail}")]
    Stage {
        detail: String,
        user_message: &'static str,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AnalyzerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzerError::Validation { .. } | AnalyzerError::Upload { .. } => {
                StatusCode::BAD_REQUEST
            }
            AnalyzerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AnalyzerError::Unauthorized => StatusCode::UNAUTHORIZED,
            AnalyzerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AnalyzerError::Config { .. }
            | AnalyzerError::Upstream { .. }
            | AnalyzerError::ResponseParse { .. }
            | AnalyzerError::Stage { .. }
            | AnalyzerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Server-side failures never leak details.
    pub fn public_message(&self) -> String {
        match self {
            AnalyzerError::Validation { message }
            | AnalyzerError::Upload { message }
            | AnalyzerError::PayloadTooLarge { message }
            | AnalyzerError::RateLimited { message } => message.clone(),
            AnalyzerError::Unauthorized => "Authentication required".to_string(),
            AnalyzerError::Upstream { .. } => {
                "AI analysis service temporarily unavailable".to_string()
            }
            AnalyzerError::ResponseParse { .. } => "Analysis failed - please try again".to_string(),
            AnalyzerError::Stage { user_message, .. } => user_message.to_string(),
            AnalyzerError::Config { .. } | AnalyzerError::Internal { .. } => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }
}

impl From<anyhow::Error> for AnalyzerError {
    fn from(err: anyhow::Error) -> Self {
        AnalyzerError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AnalyzerError {
    fn from(err: serde_json::Error) -> Self {
        AnalyzerError::ResponseParse {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AnalyzerError {
    fn from(err: reqwest::Error) -> Self {
        AnalyzerError::Upstream {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

impl From<std::io::Error> for AnalyzerError {
    fn from(err: std::io::Error) -> Self {
        AnalyzerError::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

impl From<csv::Error> for AnalyzerError {
    fn from(err: csv::Error) -> Self {
        AnalyzerError::Internal {
            message: format!("CSV error: {}", err),
        }
    }
}

/// Every handler failure becomes `{"error": "<message>"}` with the mapped status
impl IntoResponse for AnalyzerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Result type alias for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AnalyzerError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AnalyzerError::upload("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AnalyzerError::Unauthorized.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AnalyzerError::RateLimited {
                message: "slow down".into()
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AnalyzerError::PayloadTooLarge {
                message: "big".into()
            }
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AnalyzerError::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = AnalyzerError::internal("db password is hunter2");
        assert!(!err.public_message().contains("hunter2"));
        let err = AnalyzerError::validation("No file provided");
        assert_eq!(err.public_message(), "No file provided");
    }
}
