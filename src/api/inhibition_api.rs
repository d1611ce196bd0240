//! Inhibition observability and the dry-run check endpoint.

use std::time::Instant;

use axum::{extract::State, response::Json};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::ingest_api::{convert_alert, IngestAlert};
use crate::api::AppState;
use crate::error::PipelineError;
use crate::models::InhibitionRule;
use crate::pipeline::InhibitionOutcome;

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<InhibitionRule>,
    pub count: usize,
}

/// GET /api/v1/inhibition/rules
pub async fn list_rules(State(state): State<AppState>) -> Json<RulesResponse> {
    let rules = state.pipeline.inhibition().rules().as_ref().clone();
    let count = rules.len();
    Json(RulesResponse { rules, count })
}

#[derive(Debug, Serialize)]
pub struct ActivePair {
    pub target_fingerprint: String,
    pub source_fingerprint: String,
    pub rule_name: String,
    pub inhibited_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active: Vec<ActivePair>,
    pub count: usize,
}

/// GET /api/v1/inhibition/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let active: Vec<ActivePair> = state
        .pipeline
        .inhibition()
        .active_pairs()
        .into_iter()
        .map(|(target, source, rule, at)| ActivePair {
            target_fingerprint: target,
            source_fingerprint: source,
            rule_name: rule,
            inhibited_at: Utc.timestamp_opt(at, 0).single().unwrap_or_else(Utc::now),
        })
        .collect();
    let count = active.len();
    Json(StatusResponse { active, count })
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub alert: IngestAlert,
}

/// POST /api/v1/inhibition/check — dry-run an alert against the current
/// rules and active set without touching history.
pub async fn post_check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<serde_json::Value>, PipelineError> {
    let alert = convert_alert(req.alert, None, state.config.fingerprint_algorithm)
        .map_err(PipelineError::InvalidPayload)?;

    let started = Instant::now();
    let outcome = state.pipeline.inhibition().check(&alert);
    let latency_ms = started.elapsed().as_millis() as u64;

    Ok(Json(match outcome {
        InhibitionOutcome::Inhibited {
            source_fingerprint,
            rule_name,
        } => json!({
            "alert": alert,
            "inhibited": true,
            "inhibited_by": source_fingerprint,
            "rule": rule_name,
            "latency_ms": latency_ms,
        }),
        InhibitionOutcome::NotInhibited => json!({
            "alert": alert,
            "inhibited": false,
            "latency_ms": latency_ms,
        }),
    }))
}
