//! Target management: listing, out-of-band refresh, and the one-off test
//! delivery endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::ingest_api::{convert_alert, IngestAlert};
use crate::api::AppState;
use crate::error::PipelineError;
use crate::models::{Alert, AlertStatus};
use crate::publish::coordinator::TargetTestReport;

#[derive(Debug, Serialize)]
pub struct TargetSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub enabled: bool,
    pub circuit_state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_healthy_seconds_ago: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<TargetSummary>,
    pub count: usize,
}

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<AppState>) -> Json<TargetsResponse> {
    let snapshot = state.discovery.snapshot();
    let targets: Vec<TargetSummary> = snapshot
        .iter()
        .map(|t| TargetSummary {
            name: t.name.clone(),
            kind: t.kind.as_str(),
            enabled: t.enabled,
            circuit_state: state.pipeline.coordinator().circuit_state(&t.name).as_str(),
            last_healthy_seconds_ago: state
                .pipeline
                .coordinator()
                .last_health_age_seconds(&t.name),
        })
        .collect();
    let count = targets.len();
    Json(TargetsResponse { targets, count })
}

/// POST /api/v1/targets/refresh
pub async fn post_refresh(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.discovery.trigger_refresh();
    Json(json!({"status": "refresh_requested"}))
}

#[derive(Debug, Default, Deserialize)]
pub struct TestTargetRequest {
    #[serde(default)]
    pub alert_name: Option<String>,
    #[serde(default)]
    pub test_alert: Option<IngestAlert>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn synthetic_alert(name: &str) -> Alert {
    let mut labels = BTreeMap::new();
    labels.insert("alertname".to_string(), name.to_string());
    labels.insert("severity".to_string(), "info".to_string());
    labels.insert("synthetic".to_string(), "true".to_string());
    let mut annotations = BTreeMap::new();
    annotations.insert(
        "summary".to_string(),
        "Connectivity test from alerthub".to_string(),
    );
    let now = Utc::now();
    Alert {
        fingerprint: crate::fingerprint::fnv1a_fingerprint(&labels),
        labels,
        annotations,
        status: AlertStatus::Firing,
        starts_at: now,
        ends_at: None,
        generator_url: None,
        created_at: now,
        updated_at: now,
        classification: None,
    }
}

/// POST /api/v1/targets/{name}/test — body optional.
pub async fn post_test_target(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<TestTargetRequest>>,
) -> Result<Json<TargetTestReport>, PipelineError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let timeout_seconds = req.timeout_seconds.unwrap_or(30);
    if !(1..=300).contains(&timeout_seconds) {
        return Err(PipelineError::InvalidPayload(
            "timeout_seconds must be within 1..=300".to_string(),
        ));
    }

    let alert = match req.test_alert {
        Some(raw) => convert_alert(raw, None, state.config.fingerprint_algorithm)
            .map_err(PipelineError::InvalidPayload)?,
        None => synthetic_alert(req.alert_name.as_deref().unwrap_or("AlerthubTestAlert")),
    };

    let report = state
        .pipeline
        .coordinator()
        .test_target(&name, &alert, Duration::from_secs(timeout_seconds))
        .await
        .ok_or_else(|| PipelineError::NotFound(format!("unknown target {name}")))?;

    Ok(Json(report))
}
