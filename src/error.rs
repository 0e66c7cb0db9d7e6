//! ==============================================================================
//! error.rs - error taxonomy for the hub and the producer agent
//! ==============================================================================
//!
//! hub side:
//!     - ValidationError: bad envelope, reported back with a reason code (400)
//!     - StoreError: sqlite unavailable or write failed (500, never retried)
//!
//! node side:
//!     - ConnectivityError: attach or send failed, retried by the agent loop
//!     - AgentError: per-iteration failures, plus Fatal which escapes the loop
//!
//! ==============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("row {id} is unreadable: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("storage worker failed: {0}")]
    Worker(String),
}

/// why an ingestion request was refused
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid producer ID: {0}")]
    UnknownProducer(String),
}

impl ValidationError {
    /// stable reason code for clients
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed(_) => "malformed_request",
            ValidationError::MissingFields(_) => "missing_required_fields",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::UnknownProducer(_) => "unknown_producer",
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::Validation(e) => {
                tracing::warn!("[INGEST] rejected: {}", e);
                error_body(StatusCode::BAD_REQUEST, e.code(), &e.to_string())
            }
            IngestError::Storage(e) => e.into_response(),
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        tracing::error!("[STORE] {}", self);
        error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }
}

fn error_body(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "code": code,
            "error": message,
        })),
    )
        .into_response()
}

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("attach command failed: {0}")]
    Attach(String),

    #[error("hub unreachable at {addr}: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("send failed: {0}")]
    Send(#[from] reqwest::Error),

    #[error("hub rejected reading: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid hub url {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("sensor read failed: {0:#}")]
    Sensor(anyhow::Error),

    #[error("status indicator failed: {0:#}")]
    Indicator(anyhow::Error),

    /// escapes the control loop; the supervisor restarts the process
    #[error("fatal: {0:#}")]
    Fatal(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_distinct() {
        let missing = ValidationError::MissingFields(vec!["producer_id"]);
        let unknown = ValidationError::UnknownProducer("group_99".into());
        assert_eq!(missing.code(), "missing_required_fields");
        assert_eq!(unknown.code(), "unknown_producer");
        assert_ne!(missing.code(), unknown.code());
        assert_eq!(missing.to_string(), "Missing required fields: producer_id");
    }

    #[test]
    fn storage_failures_are_server_side() {
        let err = IngestError::Storage(StoreError::Worker("gone".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = IngestError::Validation(ValidationError::Malformed("eof".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
