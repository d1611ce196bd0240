//! Circuit breaker primitive.
//!
//! Modeled as the triple (state, consecutive failures, opened-at), updated
//! atomically on each attempt outcome. Both the LLM client and the
//! publishing coordinator drive one of these per upstream; the coordinator
//! also reads the state for target eligibility.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a half-open probe is in flight so only one caller probes.
    probe_in_flight: bool,
}

/// Failure-tolerance state machine: closed -> open after N consecutive
/// failures, open -> half-open after the cooldown, one probe decides
/// half-open -> {closed, open}.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state, advancing open -> half-open when the cooldown has
    /// elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = false;
                info!(circuit = %self.name, "🔶 Circuit half-open, next attempt probes");
            }
        }
        inner.state
    }

    /// Whether a call may proceed right now. In half-open only the first
    /// caller gets through; the rest are refused until the probe settles.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let mut inner = self.inner.lock();
                if inner.state != CircuitState::HalfOpen || inner.probe_in_flight {
                    return inner.state == CircuitState::Closed;
                }
                inner.probe_in_flight = true;
                true
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(circuit = %self.name, "✅ Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: straight back to open.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(circuit = %self.name, "🛑 Half-open probe failed, circuit re-opened");
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold
                    && inner.state == CircuitState::Closed
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "🛑 Circuit opened"
                    );
                }
            }
        }
    }

    /// Cancellation is not an outcome: release the half-open probe slot
    /// without deciding the state.
    pub fn release_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}
