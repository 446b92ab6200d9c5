#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
#[cfg(feature = "server")]
use serde_json::json;
use thiserror::Error;

use crate::scheduler::RunRejection;

/// # Monitor Error
///
/// Failures of the monitoring machinery itself. Provider failures are not
/// errors: they are classified into [`crate::probe::ErrorKind`] and carried
/// inside the report.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Run rejected: {0}")]
    RunRejected(RunRejection),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config_error",
            MonitorError::Unauthorized(_) => "unauthorized",
            MonitorError::RunRejected(_) => "run_rejected",
            MonitorError::Http(_) => "upstream_error",
            MonitorError::Serialization(_) => "serialization_error",
            MonitorError::Internal(_) => "internal_error",
        }
    }
}

impl From<url::ParseError> for MonitorError {
    /// Malformed endpoint URLs are configuration faults.
    fn from(err: url::ParseError) -> Self {
        MonitorError::Config(format!("Invalid URL: {}", err))
    }
}

impl From<crate::core::http_client::HttpClientError> for MonitorError {
    fn from(err: crate::core::http_client::HttpClientError) -> Self {
        MonitorError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MonitorError {
    /// A monitoring task that panicked or was aborted.
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            MonitorError::Internal(format!("monitoring task panicked: {}", err))
        } else {
            MonitorError::Internal(format!("monitoring task cancelled: {}", err))
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MonitorError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MonitorError::RunRejected(_) => StatusCode::CONFLICT,
            MonitorError::Http(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Config(_)
            | MonitorError::Serialization(_)
            | MonitorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut error = json!({
            "message": self.to_string(),
            "type": "monitor_error",
            "code": self.code(),
        });
        if let MonitorError::RunRejected(rejection) = &self {
            error["rejection"] = json!(rejection);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
