//! Pipeline error kinds.
//!
//! These are the error *classes* of the system, not exception plumbing.
//! Suppression outcomes (inhibited, silenced, blocked, ignored) are not
//! errors and live on the outcome enums of their components.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed ingest payload: schema mismatch, oversize batch, bad
    /// timestamps. Surfaces to the client as 400.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    /// Unknown target or fingerprint.
    #[error("not found: {0}")]
    NotFound(String),

    /// History store or cache I/O. The deduplicator degrades to in-memory
    /// decisions on this; it is fatal only when nothing could be persisted.
    #[error("storage error: {0}")]
    StorageError(#[source] anyhow::Error),

    /// LLM timeout, 5xx, or circuit open. Triggers the rule fallback and is
    /// never fatal to the pipeline.
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Network, 429, or 5xx from a publishing target. Retried with backoff
    /// and counted against the target's circuit.
    #[error("target error (retryable): {0}")]
    TargetRetryable(String),

    /// 4xx other than 429, auth failure, or malformed payload. Not retried,
    /// still counted against the circuit.
    #[error("target error (permanent): {0}")]
    TargetPermanent(String),

    /// Worker pool saturated beyond the configured wait threshold.
    #[error("overloaded: publish worker pool saturated")]
    Overloaded,

    /// Caller deadline expired. Partial results are returned; not counted
    /// against circuits.
    #[error("cancelled: deadline expired")]
    Cancelled,
}

impl PipelineError {
    /// Stable machine-readable kind for API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidPayload(_) => "invalid_payload",
            PipelineError::Unauthorized => "unauthorized",
            PipelineError::Forbidden => "forbidden",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::StorageError(_) => "storage_error",
            PipelineError::ClassifierUnavailable(_) => "classifier_unavailable",
            PipelineError::TargetRetryable(_) => "target_retryable",
            PipelineError::TargetPermanent(_) => "target_permanent",
            PipelineError::Overloaded => "overloaded",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// HTTP status for the errors that surface to clients. Everything else
    /// is absorbed by its owning component and reported in the summary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthorized => StatusCode::UNAUTHORIZED,
            PipelineError::Forbidden => StatusCode::FORBIDDEN,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable_target(&self) -> bool {
        matches!(self, PipelineError::TargetRetryable(_))
    }
}

impl axum::response::IntoResponse for PipelineError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(serde_json::json!({
            "error": self.kind(),
            "detail": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PipelineError::InvalidPayload("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PipelineError::Overloaded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PipelineError::NotFound("t".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
