//! Per-IP rate limiting for the ingest surface.
//!
//! Fixed-window counters in memory; a saturated producer gets 429 with a
//! Retry-After hint. Windows reset lazily on the next request.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 600,
            window: Duration::from_secs(60),
        }
    }
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<IpAddr, WindowEntry>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns seconds until reset when the caller is over the limit.
    fn check(&self, ip: IpAddr) -> Option<u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.len() > 10_000 {
            let window = self.config.window;
            windows.retain(|_, e| now.duration_since(e.window_start) < window);
        }

        let entry = windows.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count > self.config.max_requests {
            let reset_in = self
                .config
                .window
                .saturating_sub(now.duration_since(entry.window_start));
            Some(reset_in.as_secs().max(1))
        } else {
            None
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(retry_after) = limiter.check(addr.ip()) {
        warn!(client_ip = %addr.ip(), "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after.to_string())],
            "rate limit exceeded",
        )
            .into_response();
    }
    next.run(request).await
}
