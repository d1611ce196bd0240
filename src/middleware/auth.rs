//! Static bearer-token check for the /api/v1 surface.
//!
//! The real identity system lives in front of this service; all the core
//! owes producers is a 401 when the shared token is missing or wrong. With
//! no API_TOKEN configured the check is a pass-through (dev setups).

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

pub async fn require_bearer(
    State(expected): State<Option<String>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => {
            warn!(path = %request.uri().path(), "Rejected unauthenticated request");
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}
