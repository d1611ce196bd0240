//! Publishing mode: normal vs metrics-only.
//!
//! Metrics-only is the degraded state entered when no eligible targets
//! exist: the pipeline keeps running and recording telemetry but performs no
//! external publishing. Transitions are driven by the eligible-target count
//! and debounced so a flapping discovery source cannot thrash the mode.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::metrics::PipelineMetrics;

const DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct PublishingModeStatus {
    pub mode: String,
    pub targets_available: bool,
    pub enabled_targets: usize,
    pub metrics_only_active: bool,
    pub transition_count: u64,
    pub current_mode_duration_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_reason: Option<String>,
}

impl PublishingModeStatus {
    /// Weak validator over everything a client can observe changing.
    pub fn etag(&self) -> String {
        format!(
            "\"{}-{}-{}\"",
            self.mode, self.enabled_targets, self.transition_count
        )
    }
}

struct ModeInner {
    metrics_only: bool,
    /// Desired flip waiting out the debounce window.
    pending: Option<(bool, Instant, String)>,
    transition_count: u64,
    mode_since: DateTime<Utc>,
    last_transition_time: Option<DateTime<Utc>>,
    last_transition_reason: Option<String>,
    discovered_targets: usize,
    enabled_targets: usize,
}

pub struct PublishingModeManager {
    inner: Mutex<ModeInner>,
    debounce: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl PublishingModeManager {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self::with_debounce(metrics, DEBOUNCE)
    }

    pub fn with_debounce(metrics: Arc<PipelineMetrics>, debounce: Duration) -> Self {
        metrics.mode.metrics_only.store(1, Ordering::Relaxed);
        Self {
            inner: Mutex::new(ModeInner {
                // Boot in metrics-only until discovery proves otherwise.
                metrics_only: true,
                pending: None,
                transition_count: 0,
                mode_since: Utc::now(),
                last_transition_time: None,
                last_transition_reason: None,
                discovered_targets: 0,
                enabled_targets: 0,
            }),
            debounce,
            metrics,
        }
    }

    /// Feed the latest target counts. Called on every fanout and every
    /// discovery change.
    pub fn observe(&self, discovered: usize, enabled: usize) {
        let mut inner = self.inner.lock();
        inner.discovered_targets = discovered;
        inner.enabled_targets = enabled;

        let desired_metrics_only = enabled == 0;
        if desired_metrics_only == inner.metrics_only {
            inner.pending = None;
            return;
        }

        let reason = if !desired_metrics_only {
            "targets_available"
        } else if discovered == 0 {
            "no_enabled_targets"
        } else {
            "targets_disabled"
        };

        // First settle after boot commits immediately; later flips wait out
        // the debounce window.
        let debounced = inner.last_transition_time.is_some();
        let pending_elapsed = match &inner.pending {
            Some((pending_desired, since, _)) if *pending_desired == desired_metrics_only => {
                Some(since.elapsed())
            }
            _ => None,
        };

        match pending_elapsed {
            Some(elapsed) => {
                if !debounced || elapsed >= self.debounce {
                    self.commit(&mut inner, desired_metrics_only, reason);
                }
            }
            None => {
                if !debounced {
                    self.commit(&mut inner, desired_metrics_only, reason);
                } else {
                    inner.pending =
                        Some((desired_metrics_only, Instant::now(), reason.to_string()));
                }
            }
        }
    }

    fn commit(&self, inner: &mut ModeInner, metrics_only: bool, reason: &str) {
        let from = mode_name(inner.metrics_only);
        let to = mode_name(metrics_only);
        inner.metrics_only = metrics_only;
        inner.pending = None;
        inner.transition_count += 1;
        inner.mode_since = Utc::now();
        inner.last_transition_time = Some(inner.mode_since);
        inner.last_transition_reason = Some(reason.to_string());

        self.metrics
            .mode
            .metrics_only
            .store(if metrics_only { 1 } else { 0 }, Ordering::Relaxed);
        self.metrics
            .mode
            .transitions_total
            .incr(&format!("{from}->{to}"));
        *self.metrics.mode.mode_entered_at.write() = inner.mode_since;

        info!(from, to, reason, "🔀 Publishing mode transition");
    }

    pub fn is_metrics_only(&self) -> bool {
        self.inner.lock().metrics_only
    }

    pub fn status(&self) -> PublishingModeStatus {
        let inner = self.inner.lock();
        PublishingModeStatus {
            mode: mode_name(inner.metrics_only).to_string(),
            targets_available: inner.enabled_targets > 0,
            enabled_targets: inner.enabled_targets,
            metrics_only_active: inner.metrics_only,
            transition_count: inner.transition_count,
            current_mode_duration_seconds: (Utc::now() - inner.mode_since).num_seconds().max(0),
            last_transition_time: inner.last_transition_time,
            last_transition_reason: inner.last_transition_reason.clone(),
        }
    }
}

fn mode_name(metrics_only: bool) -> &'static str {
    if metrics_only {
        "metrics-only"
    } else {
        "normal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(debounce: Duration) -> PublishingModeManager {
        PublishingModeManager::with_debounce(Arc::new(PipelineMetrics::new()), debounce)
    }

    #[test]
    fn test_boots_metrics_only_and_settles_immediately() {
        let m = manager(Duration::from_secs(1));
        assert!(m.is_metrics_only());

        // First observation after boot is not debounced.
        m.observe(3, 3);
        assert!(!m.is_metrics_only());
        let status = m.status();
        assert_eq!(status.mode, "normal");
        assert_eq!(status.last_transition_reason.as_deref(), Some("targets_available"));
    }

    #[test]
    fn test_debounce_blocks_instant_flapping() {
        let m = manager(Duration::from_secs(60));
        m.observe(3, 3); // settle to normal

        m.observe(3, 0); // all disabled: pending, not committed
        assert!(!m.is_metrics_only());
        m.observe(3, 3); // back before debounce elapsed: pending cleared
        m.observe(3, 0);
        assert!(!m.is_metrics_only());
        assert_eq!(m.status().transition_count, 1);
    }

    #[test]
    fn test_transition_commits_after_debounce() {
        let m = manager(Duration::from_millis(0));
        m.observe(3, 3);
        m.observe(3, 0);
        // Zero debounce: second confirmation commits.
        m.observe(3, 0);
        assert!(m.is_metrics_only());
        assert_eq!(
            m.status().last_transition_reason.as_deref(),
            Some("targets_disabled")
        );
    }

    #[test]
    fn test_reason_no_enabled_targets_when_nothing_discovered() {
        let m = manager(Duration::from_millis(0));
        m.observe(2, 2);
        m.observe(0, 0);
        m.observe(0, 0);
        assert_eq!(
            m.status().last_transition_reason.as_deref(),
            Some("no_enabled_targets")
        );
    }

    #[test]
    fn test_etag_changes_with_state() {
        let m = manager(Duration::from_millis(0));
        let before = m.status().etag();
        m.observe(2, 2);
        let after = m.status().etag();
        assert_ne!(before, after);
        // Identical state => identical ETag.
        assert_eq!(after, m.status().etag());
    }
}
