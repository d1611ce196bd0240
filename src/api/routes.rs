//! Router assembly.
//!
//! Public routes: health and Prometheus exposition. Everything under
//! /api/v1 goes through the bearer-token middleware when API_TOKEN is set.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};

use crate::api::{
    history_api, ingest_api, inhibition_api, mode_api, targets_api, AppState,
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/alerts",
            post(ingest_api::post_alerts).get(history_api::list_alerts),
        )
        .route("/alerts/:fingerprint", get(history_api::get_alert))
        .route("/publishing/mode", get(mode_api::get_publishing_mode))
        .route(
            "/enrichment/mode",
            get(mode_api::get_enrichment_mode).post(mode_api::post_enrichment_mode),
        )
        .route("/inhibition/rules", get(inhibition_api::list_rules))
        .route("/inhibition/status", get(inhibition_api::get_status))
        .route("/inhibition/check", post(inhibition_api::post_check))
        .route("/targets", get(targets_api::list_targets))
        .route("/targets/refresh", post(targets_api::post_refresh))
        .route("/targets/:name/test", post(targets_api::post_test_target))
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.to_prometheus()
}
