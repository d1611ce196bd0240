//! Mode endpoints: publishing mode (with ETag) and enrichment mode.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::AppState;
use crate::enrichment_mode::ModeSource;
use crate::error::PipelineError;
use crate::models::EnrichmentMode;

/// GET /api/v1/publishing/mode
///
/// Conditional requests supported: identical state yields an identical ETag
/// and If-None-Match answers 304. Short cache lifetime keeps dashboards from
/// hammering the coordinator.
pub async fn get_publishing_mode(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let status = state.pipeline.coordinator().mode_manager().status();
    let etag = status.etag();

    if let Some(candidate) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if candidate == etag {
            return (
                StatusCode::NOT_MODIFIED,
                [
                    (header::ETAG, etag),
                    (header::CACHE_CONTROL, "max-age=5".to_string()),
                ],
            )
                .into_response();
        }
    }

    (
        [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, "max-age=5".to_string()),
        ],
        Json(status),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct EnrichmentModeResponse {
    pub mode: &'static str,
    pub source: ModeSource,
}

/// GET /api/v1/enrichment/mode
pub async fn get_enrichment_mode(State(state): State<AppState>) -> Json<EnrichmentModeResponse> {
    let (mode, source) = state.pipeline.enrichment_mode().current();
    Json(EnrichmentModeResponse {
        mode: mode.as_str(),
        source,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
}

/// POST /api/v1/enrichment/mode
pub async fn post_enrichment_mode(
    State(state): State<AppState>,
    Json(req): Json<SetModeRequest>,
) -> Result<Json<serde_json::Value>, PipelineError> {
    let Some(mode) = EnrichmentMode::parse(&req.mode) else {
        return Err(PipelineError::InvalidPayload(format!(
            "mode must be one of transparent, enriched, transparent_with_recommendations; got {:?}",
            req.mode
        )));
    };

    state
        .pipeline
        .enrichment_mode()
        .set(mode)
        .map_err(PipelineError::StorageError)?;

    Ok(Json(json!({"mode": mode.as_str(), "source": "store"})))
}
