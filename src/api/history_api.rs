//! History read surface over the label-indexed alert store.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::PipelineError;
use crate::models::AlertStatus;
use crate::storage::{HistoryQuery, StoredAlert};

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// `label=key:value` equality filter.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub alerts: Vec<StoredAlert>,
    pub count: usize,
}

/// GET /api/v1/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, PipelineError> {
    let status = match params.status.as_deref() {
        None => None,
        Some("firing") => Some(AlertStatus::Firing),
        Some("resolved") => Some(AlertStatus::Resolved),
        Some(other) => {
            return Err(PipelineError::InvalidPayload(format!(
                "unknown status {other:?}"
            )))
        }
    };

    let label = match &params.label {
        None => None,
        Some(raw) => match raw.split_once(':') {
            Some((k, v)) => Some((k.to_string(), v.to_string())),
            None => {
                return Err(PipelineError::InvalidPayload(
                    "label filter must be key:value".to_string(),
                ))
            }
        },
    };

    let query = HistoryQuery {
        status,
        severity: params.severity.clone(),
        label,
        limit: params.limit.min(1000),
    };

    let alerts = state
        .pipeline
        .store()
        .query(&query)
        .map_err(PipelineError::StorageError)?;
    let count = alerts.len();
    Ok(Json(HistoryResponse { alerts, count }))
}

/// GET /api/v1/alerts/{fingerprint}
pub async fn get_alert(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<Json<StoredAlert>, PipelineError> {
    state
        .pipeline
        .store()
        .get(&fingerprint)
        .map_err(PipelineError::StorageError)?
        .map(Json)
        .ok_or_else(|| PipelineError::NotFound(fingerprint))
}
