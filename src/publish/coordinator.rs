//! Parallel publishing fanout.
//!
//! For each alert the coordinator snapshots the eligible targets, submits
//! one task per target into a bounded worker pool, and collects results at
//! a barrier. One target's failure never cancels another. The coordinator
//! is the single writer of per-target operational state (circuit, tokens,
//! last-healthy); that state is keyed by target name and survives discovery
//! refreshes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::metrics::PipelineMetrics;
use crate::models::{matchers_match, Alert, PublishingConfig};
use crate::publish::mode::PublishingModeManager;
use crate::publish::publisher::{build_publisher, Publisher, SendOutcome};
use crate::publish::targets::{TargetDescriptor, TargetDiscovery};

/// Per-target operational state. Preserved across discovery refreshes.
struct TargetState {
    circuit: CircuitBreaker,
    /// Per-target concurrency cap.
    tokens: Arc<Semaphore>,
    last_health_at: Mutex<Option<Instant>>,
}

/// Result of one target's delivery attempt chain.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub success: bool,
    pub attempts: u32,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Aggregated fanout result. Partial success is not an error.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub mode: String,
    pub status: String,
    pub total_targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<TargetReport>,
}

impl PublishReport {
    fn metrics_only() -> Self {
        Self {
            mode: "metrics-only".to_string(),
            status: "no_targets".to_string(),
            total_targets: 0,
            succeeded: 0,
            failed: 0,
            results: Vec::new(),
        }
    }
}

/// One-off target test result (POST /targets/{name}/test).
#[derive(Debug, Clone, Serialize)]
pub struct TargetTestReport {
    pub success: bool,
    pub message: String,
    pub target_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub test_timestamp: chrono::DateTime<chrono::Utc>,
}

pub struct PublishCoordinator {
    config: PublishingConfig,
    discovery: Arc<TargetDiscovery>,
    mode: Arc<PublishingModeManager>,
    metrics: Arc<PipelineMetrics>,
    http: reqwest::Client,
    /// Worker pool bounding concurrent external calls across all targets.
    pool: Arc<Semaphore>,
    states: Mutex<HashMap<String, Arc<TargetState>>>,
    /// Built publishers, invalidated when the discovery version moves.
    publishers: RwLock<(u64, HashMap<String, Arc<dyn Publisher>>)>,
}

impl PublishCoordinator {
    pub fn new(
        config: PublishingConfig,
        discovery: Arc<TargetDiscovery>,
        mode: Arc<PublishingModeManager>,
        metrics: Arc<PipelineMetrics>,
        http: reqwest::Client,
    ) -> Self {
        let discovery_version = discovery.version();
        Self {
            pool: Arc::new(Semaphore::new(config.worker_pool_size)),
            config,
            discovery,
            mode,
            metrics,
            http,
            states: Mutex::new(HashMap::new()),
            publishers: RwLock::new((discovery_version, HashMap::new())),
        }
    }

    pub fn mode_manager(&self) -> &PublishingModeManager {
        &self.mode
    }

    /// Install a publisher for a target name ahead of the built-in factory.
    /// Seam for custom target kinds.
    pub fn register_publisher(&self, name: &str, publisher: Arc<dyn Publisher>) {
        self.publishers.write().1.insert(name.to_string(), publisher);
    }

    fn state_for(&self, name: &str) -> Arc<TargetState> {
        let mut states = self.states.lock();
        states
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(TargetState {
                    circuit: CircuitBreaker::new(
                        name,
                        self.config.circuit_failure_threshold,
                        self.config.circuit_cooldown,
                    ),
                    tokens: Arc::new(Semaphore::new(self.config.per_target_concurrency)),
                    last_health_at: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Drop state for targets discovery no longer reports.
    fn prune_states(&self, snapshot: &[Arc<TargetDescriptor>]) {
        let mut states = self.states.lock();
        states.retain(|name, _| snapshot.iter().any(|t| &t.name == name));
    }

    fn publisher_for(&self, descriptor: &Arc<TargetDescriptor>) -> Arc<dyn Publisher> {
        let version = self.discovery.version();
        {
            let guard = self.publishers.read();
            if guard.0 == version {
                if let Some(p) = guard.1.get(&descriptor.name) {
                    return p.clone();
                }
            }
        }
        let mut guard = self.publishers.write();
        if guard.0 != version {
            // Descriptor set changed: stale publishers may hold old URLs or
            // credentials, rebuild from scratch.
            guard.0 = version;
            guard.1.clear();
        }
        guard
            .1
            .entry(descriptor.name.clone())
            .or_insert_with(|| build_publisher(descriptor, self.http.clone()))
            .clone()
    }

    pub fn circuit_state(&self, name: &str) -> CircuitState {
        self.state_for(name).circuit.state()
    }

    /// Seconds since the target last answered a delivery, if it ever has.
    pub fn last_health_age_seconds(&self, name: &str) -> Option<u64> {
        self.state_for(name)
            .last_health_at
            .lock()
            .map(|at| at.elapsed().as_secs())
    }

    /// Deliver one alert to every eligible target.
    pub async fn publish(&self, alert: &Alert, deadline: Duration) -> PublishReport {
        let snapshot = self.discovery.snapshot();
        let discovered = snapshot.len();
        let enabled = snapshot.iter().filter(|t| t.enabled).count();
        self.mode.observe(discovered, enabled);
        self.prune_states(&snapshot);

        let eligible: Vec<Arc<TargetDescriptor>> = snapshot
            .iter()
            .filter(|t| {
                t.enabled
                    && matchers_match(&t.matchers, &alert.labels)
                    && self.state_for(&t.name).circuit.state() != CircuitState::Open
            })
            .cloned()
            .collect();

        if eligible.is_empty() {
            self.metrics
                .publishing
                .submissions_rejected_total
                .incr("metrics_only");
            debug!(fingerprint = %alert.fingerprint, "No eligible targets, metrics-only");
            return PublishReport::metrics_only();
        }

        let deadline_at = Instant::now() + deadline;
        let results: Vec<TargetReport> = if self.config.parallel {
            // Fan-out/fan-in: every target future progresses concurrently,
            // join_all is the barrier. Worker-pool and per-target semaphores
            // bound what actually runs.
            join_all(
                eligible
                    .iter()
                    .map(|target| self.publish_one(alert, target, deadline_at)),
            )
            .await
        } else {
            let mut out = Vec::with_capacity(eligible.len());
            for target in &eligible {
                out.push(self.publish_one(alert, target, deadline_at).await);
            }
            out
        };

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        let status = if failed == 0 {
            "success"
        } else if succeeded > 0 {
            "partial"
        } else {
            "failed"
        };
        self.metrics.publishing.submissions_total.incr(status);

        PublishReport {
            mode: "normal".to_string(),
            status: status.to_string(),
            total_targets: results.len(),
            succeeded,
            failed,
            results,
        }
    }

    /// One target: pool admission, per-target token, optional pre-flight,
    /// then the retry chain.
    async fn publish_one(
        &self,
        alert: &Alert,
        target: &Arc<TargetDescriptor>,
        deadline_at: Instant,
    ) -> TargetReport {
        let started = Instant::now();
        let fail = |outcome: &str, attempts: u32, error: Option<String>, status: Option<u16>| {
            TargetReport {
                target: target.name.clone(),
                success: false,
                attempts,
                outcome: outcome.to_string(),
                status_code: status,
                error,
                latency_ms: started.elapsed().as_millis() as u64,
            }
        };

        // Pool admission: waiting longer than the threshold is overload.
        let _pool_permit =
            match tokio::time::timeout(self.config.overload_wait, self.pool.clone().acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                _ => {
                    self.metrics
                        .publishing
                        .submissions_rejected_total
                        .incr("overloaded");
                    warn!(target_name = %target.name, "Publish worker pool saturated");
                    return fail("overloaded", 0, Some("worker pool saturated".to_string()), None);
                }
            };

        let state = self.state_for(&target.name);
        let _token = match state.tokens.clone().acquire_owned().await {
            Ok(token) => token,
            Err(_) => return fail("closed", 0, Some("token semaphore closed".to_string()), None),
        };

        // Circuit gate: open circuits were filtered at snapshot time, this
        // also arbitrates the single half-open probe.
        if !state.circuit.allow_request() {
            self.metrics
                .publishing
                .jobs_skipped_total
                .fetch_add(1, Ordering::Relaxed);
            return fail("circuit_open", 0, Some("circuit open".to_string()), None);
        }

        // Cheap pre-flight before paying for a full publish attempt.
        if self.config.preflight_enabled
            && !preflight_ok(&target.url, self.config.preflight_timeout).await
        {
            state.circuit.record_failure();
            self.metrics
                .publishing
                .failures_total
                .incr(&target.name);
            return fail(
                "preflight_failed",
                0,
                Some("pre-flight connect failed".to_string()),
                None,
            );
        }

        let publisher = self.publisher_for(target);
        let action = publisher.lifecycle(alert.status);
        let payload = publisher.format(alert, action);

        let mut attempt: u32 = 0;
        loop {
            if Instant::now() >= deadline_at {
                // Cancellation is not a circuit outcome.
                state.circuit.release_probe();
                self.metrics
                    .publishing
                    .submissions_rejected_total
                    .incr("cancelled");
                return fail("cancelled", attempt, Some("deadline expired".to_string()), None);
            }

            attempt += 1;
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            let per_attempt = self.config.attempt_timeout.min(remaining);

            match publisher.send(&payload, per_attempt).await {
                SendOutcome::Delivered { status } => {
                    state.circuit.record_success();
                    *state.last_health_at.lock() = Some(Instant::now());
                    let latency = started.elapsed();
                    self.metrics
                        .publishing
                        .record_target_duration(&target.name, latency);
                    debug!(target_name = %target.name, status, attempt, "Published");
                    return TargetReport {
                        target: target.name.clone(),
                        success: true,
                        attempts: attempt,
                        outcome: "delivered".to_string(),
                        status_code: Some(status),
                        error: None,
                        latency_ms: latency.as_millis() as u64,
                    };
                }
                SendOutcome::Retryable { error } => {
                    state.circuit.record_failure();
                    self.metrics.publishing.failures_total.incr(&target.name);
                    if attempt >= self.config.retry_max_attempts
                        || state.circuit.state() == CircuitState::Open
                    {
                        return fail("retries_exhausted", attempt, Some(error), None);
                    }
                    let backoff = self.backoff(attempt).min(
                        deadline_at.saturating_duration_since(Instant::now()),
                    );
                    debug!(target_name = %target.name, attempt, error = %error,
                        backoff_ms = backoff.as_millis() as u64, "Retryable publish failure");
                    tokio::time::sleep(backoff).await;
                }
                SendOutcome::Permanent { error } => {
                    state.circuit.record_failure();
                    self.metrics.publishing.failures_total.incr(&target.name);
                    warn!(target_name = %target.name, error = %error, "Permanent publish failure");
                    return fail("permanent", attempt, Some(error), None);
                }
            }
        }
    }

    /// Exponential backoff from the configured initial interval, capped and
    /// jittered.
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = (attempt - 1).min(8);
        let base = (self.config.retry_initial_interval.as_millis() as u64)
            .saturating_mul(1u64 << shift);
        let capped = base.min(self.config.retry_max_interval.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..capped / 4 + 1);
        Duration::from_millis(capped + jitter)
    }

    /// One-off delivery of a synthetic alert to a single target, ignoring
    /// circuits. Diagnostic path for POST /targets/{name}/test.
    pub async fn test_target(
        &self,
        name: &str,
        alert: &Alert,
        timeout: Duration,
    ) -> Option<TargetTestReport> {
        let descriptor = self.discovery.get(name)?;
        let started = Instant::now();

        if !descriptor.enabled {
            return Some(TargetTestReport {
                success: false,
                message: format!("target {name} is disabled"),
                target_name: name.to_string(),
                status_code: None,
                response_time_ms: 0,
                error: None,
                test_timestamp: chrono::Utc::now(),
            });
        }

        let publisher = {
            let guard = self.publishers.read();
            guard.1.get(name).cloned()
        }
        .unwrap_or_else(|| build_publisher(&descriptor, self.http.clone()));

        let payload = publisher.format(alert, publisher.lifecycle(alert.status));
        let outcome = publisher.send(&payload, timeout).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        Some(match outcome {
            SendOutcome::Delivered { status } => TargetTestReport {
                success: true,
                message: format!("test alert delivered to {name}"),
                target_name: name.to_string(),
                status_code: Some(status),
                response_time_ms,
                error: None,
                test_timestamp: chrono::Utc::now(),
            },
            SendOutcome::Retryable { error } | SendOutcome::Permanent { error } => {
                let kind = if error.starts_with("timeout") {
                    "timeout"
                } else {
                    "delivery_failed"
                };
                TargetTestReport {
                    success: false,
                    message: format!("test alert to {name} failed"),
                    target_name: name.to_string(),
                    status_code: None,
                    response_time_ms,
                    error: Some(kind.to_string()),
                    test_timestamp: chrono::Utc::now(),
                }
            }
        })
    }
}

/// TCP connect probe against the target host. Unparseable URLs skip the
/// probe rather than fail it.
async fn preflight_ok(url: &str, timeout: Duration) -> bool {
    let Some((host, port)) = host_port(url) else {
        return true;
    };
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await,
        Ok(Ok(_))
    )
}

fn host_port(url: &str) -> Option<(String, u16)> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?']).next()?;
    if authority.is_empty() {
        return None;
    }
    let default_port = if url.starts_with("http://") { 80 } else { 443 };
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().unwrap_or(default_port))),
        None => Some((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertStatus, MatchOperator, Matcher};
    use crate::publish::publisher::LifecycleAction;
    use crate::publish::targets::TargetKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex as PlMutex;
    use std::collections::{BTreeMap, VecDeque};

    struct MockPublisher {
        name: String,
        script: PlMutex<VecDeque<SendOutcome>>,
        calls: std::sync::atomic::AtomicU32,
        delay: Duration,
    }

    impl MockPublisher {
        fn new(name: &str, outcomes: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: PlMutex::new(outcomes.into()),
                calls: std::sync::atomic::AtomicU32::new(0),
                delay: Duration::from_millis(0),
            })
        }

        fn slow(name: &str, outcomes: Vec<SendOutcome>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: PlMutex::new(outcomes.into()),
                calls: std::sync::atomic::AtomicU32::new(0),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        fn name(&self) -> &str {
            &self.name
        }

        fn format(&self, _alert: &Alert, _action: LifecycleAction) -> serde_json::Value {
            serde_json::json!({})
        }

        async fn send(&self, _payload: &serde_json::Value, _timeout: Duration) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or(SendOutcome::Delivered { status: 200 })
        }
    }

    fn descriptor(name: &str, enabled: bool) -> TargetDescriptor {
        TargetDescriptor {
            name: name.to_string(),
            kind: TargetKind::Generic,
            url: format!("https://hooks.example.com/{name}"),
            headers: Default::default(),
            credentials: None,
            enabled,
            matchers: Vec::new(),
            labels: Default::default(),
        }
    }

    fn test_config() -> PublishingConfig {
        PublishingConfig {
            parallel: true,
            per_target_concurrency: 2,
            worker_pool_size: 8,
            retry_max_attempts: 3,
            retry_initial_interval: Duration::from_millis(1),
            retry_max_interval: Duration::from_millis(5),
            circuit_failure_threshold: 3,
            circuit_cooldown: Duration::from_secs(30),
            overload_wait: Duration::from_millis(500),
            preflight_enabled: false,
            preflight_timeout: Duration::from_millis(50),
            attempt_timeout: Duration::from_secs(2),
        }
    }

    fn coordinator(
        config: PublishingConfig,
        targets: Vec<TargetDescriptor>,
    ) -> Arc<PublishCoordinator> {
        let metrics = Arc::new(PipelineMetrics::new());
        Arc::new(PublishCoordinator::new(
            config,
            Arc::new(TargetDiscovery::with_static_targets(targets)),
            Arc::new(PublishingModeManager::with_debounce(
                metrics.clone(),
                Duration::from_millis(0),
            )),
            metrics,
            reqwest::Client::new(),
        ))
    }

    fn alert() -> Alert {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), "HighCPU".to_string());
        labels.insert("severity".to_string(), "critical".to_string());
        let now = Utc::now();
        Alert {
            fingerprint: crate::fingerprint::fnv1a_fingerprint(&labels),
            labels,
            annotations: BTreeMap::new(),
            status: AlertStatus::Firing,
            starts_at: now,
            ends_at: None,
            generator_url: None,
            created_at: now,
            updated_at: now,
            classification: None,
        }
    }

    #[tokio::test]
    async fn test_metrics_only_when_no_targets() {
        let c = coordinator(test_config(), vec![]);
        let report = c.publish(&alert(), Duration::from_secs(5)).await;

        assert_eq!(report.status, "no_targets");
        assert_eq!(report.mode, "metrics-only");
        assert_eq!(report.succeeded, 0);
        assert!(c.mode.is_metrics_only());
        assert_eq!(
            c.metrics
                .publishing
                .submissions_rejected_total
                .get("metrics_only"),
            1
        );
    }

    #[tokio::test]
    async fn test_disabled_targets_mean_metrics_only() {
        let c = coordinator(test_config(), vec![descriptor("a", false)]);
        let report = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(report.status, "no_targets");
        assert_eq!(report.total_targets, 0);
    }

    #[tokio::test]
    async fn test_parallel_fanout_all_succeed() {
        let c = coordinator(
            test_config(),
            vec![descriptor("a", true), descriptor("b", true)],
        );
        c.register_publisher("a", MockPublisher::new("a", vec![]));
        c.register_publisher("b", MockPublisher::new("b", vec![]));

        let report = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(report.status, "success");
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert!(!c.mode.is_metrics_only());
    }

    #[tokio::test]
    async fn test_partial_failure_opens_failing_circuit() {
        let c = coordinator(
            test_config(),
            vec![
                descriptor("a", true),
                descriptor("b", true),
                descriptor("c", true),
            ],
        );
        c.register_publisher("a", MockPublisher::new("a", vec![]));
        let failing = MockPublisher::new(
            "b",
            vec![
                SendOutcome::Retryable { error: "500".into() },
                SendOutcome::Retryable { error: "500".into() },
                SendOutcome::Retryable { error: "500".into() },
            ],
        );
        c.register_publisher("b", failing.clone());
        c.register_publisher("c", MockPublisher::new("c", vec![]));

        let report = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(report.status, "partial");
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(failing.calls(), 3);
        assert!(c.metrics.publishing.failures_total.get("b") >= 3);
        assert_eq!(c.circuit_state("b"), CircuitState::Open);

        let b_report = report.results.iter().find(|r| r.target == "b").unwrap();
        assert!(!b_report.success);
        assert_eq!(b_report.attempts, 3);
    }

    #[tokio::test]
    async fn test_open_circuit_excludes_target_from_eligibility() {
        let mut config = test_config();
        config.circuit_failure_threshold = 1;
        config.retry_max_attempts = 1;
        let c = coordinator(config, vec![descriptor("a", true), descriptor("b", true)]);
        c.register_publisher("a", MockPublisher::new("a", vec![]));
        c.register_publisher(
            "b",
            MockPublisher::new("b", vec![SendOutcome::Retryable { error: "boom".into() }]),
        );

        let first = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(first.status, "partial");
        assert_eq!(c.circuit_state("b"), CircuitState::Open);

        // Second fanout: b is no longer eligible, only a is attempted.
        let second = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(second.total_targets, 1);
        assert_eq!(second.status, "success");
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let c = coordinator(test_config(), vec![descriptor("a", true)]);
        let p = MockPublisher::new(
            "a",
            vec![SendOutcome::Permanent { error: "401 rejected".into() }],
        );
        c.register_publisher("a", p.clone());

        let report = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(report.status, "failed");
        assert_eq!(p.calls(), 1);
        assert_eq!(report.results[0].outcome, "permanent");
    }

    #[tokio::test]
    async fn test_deadline_cancels_without_circuit_accounting() {
        let c = coordinator(test_config(), vec![descriptor("a", true)]);
        let p = MockPublisher::slow(
            "a",
            vec![
                SendOutcome::Retryable { error: "500".into() },
                SendOutcome::Retryable { error: "500".into() },
                SendOutcome::Retryable { error: "500".into() },
            ],
            Duration::from_millis(80),
        );
        c.register_publisher("a", p);

        let report = c.publish(&alert(), Duration::from_millis(100)).await;
        let r = &report.results[0];
        assert!(!r.success);
        // Either the deadline fired between attempts (cancelled) or retries
        // ran out; with an 80ms attempt and 100ms budget it is cancelled.
        assert_eq!(r.outcome, "cancelled");
        assert_ne!(c.circuit_state("a"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_overload_rejection() {
        let mut config = test_config();
        config.worker_pool_size = 1;
        config.overload_wait = Duration::from_millis(20);
        let c = coordinator(
            config,
            vec![descriptor("a", true), descriptor("b", true)],
        );
        c.register_publisher(
            "a",
            MockPublisher::slow("a", vec![], Duration::from_millis(300)),
        );
        c.register_publisher(
            "b",
            MockPublisher::slow("b", vec![], Duration::from_millis(300)),
        );

        let report = c.publish(&alert(), Duration::from_secs(5)).await;
        // One of the two tasks lost the single pool slot and was rejected.
        let overloaded = report
            .results
            .iter()
            .filter(|r| r.outcome == "overloaded")
            .count();
        assert_eq!(overloaded, 1);
        assert_eq!(
            c.metrics
                .publishing
                .submissions_rejected_total
                .get("overloaded"),
            1
        );
    }

    #[tokio::test]
    async fn test_target_matchers_gate_eligibility() {
        let mut routed = descriptor("critical-only", true);
        routed.matchers = vec![Matcher::new("severity", MatchOperator::Eq, "critical")];
        let mut other = descriptor("warning-only", true);
        other.matchers = vec![Matcher::new("severity", MatchOperator::Eq, "warning")];

        let c = coordinator(test_config(), vec![routed, other]);
        c.register_publisher("critical-only", MockPublisher::new("critical-only", vec![]));
        c.register_publisher("warning-only", MockPublisher::new("warning-only", vec![]));

        let report = c.publish(&alert(), Duration::from_secs(5)).await;
        assert_eq!(report.total_targets, 1);
        assert_eq!(report.results[0].target, "critical-only");
    }

    #[tokio::test]
    async fn test_test_target_unknown_and_disabled() {
        let c = coordinator(test_config(), vec![descriptor("off", false)]);
        assert!(c
            .test_target("missing", &alert(), Duration::from_secs(1))
            .await
            .is_none());

        let report = c
            .test_target("off", &alert(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!report.success);
        assert!(report.message.contains("disabled"));
    }

    #[test]
    fn test_host_port_parsing() {
        assert_eq!(
            host_port("https://hooks.slack.com/services/x"),
            Some(("hooks.slack.com".to_string(), 443))
        );
        assert_eq!(
            host_port("http://localhost:8080/hook"),
            Some(("localhost".to_string(), 8080))
        );
        assert_eq!(host_port("http://"), None);
    }
}
