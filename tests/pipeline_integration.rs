//! End-to-end pipeline scenarios against an in-memory history store and
//! scripted publishers. No network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use alerthub_backend::api::AppState;
use alerthub_backend::circuit::CircuitState;
use alerthub_backend::classify::ClassificationService;
use alerthub_backend::enrichment_mode::EnrichmentModeManager;
use alerthub_backend::metrics::PipelineMetrics;
use alerthub_backend::models::{
    Alert, AlertStatus, ClassificationConfig, ClassificationSource, Config, EnrichmentMode,
    InhibitionRule, MatchOperator, Matcher, PublishingConfig,
};
use alerthub_backend::pipeline::filters::FilterAction;
use alerthub_backend::pipeline::{
    ActiveAlertSet, AlertPipeline, Deduplicator, FilterEngine, InhibitionEngine, SilenceEngine,
};
use alerthub_backend::publish::targets::{TargetDescriptor, TargetKind};
use alerthub_backend::publish::{
    LifecycleAction, PublishCoordinator, Publisher, PublishingModeManager, SendOutcome,
    TargetDiscovery,
};
use alerthub_backend::storage::HistoryStore;

struct ScriptedPublisher {
    name: String,
    script: Mutex<VecDeque<SendOutcome>>,
    calls: AtomicU32,
}

impl ScriptedPublisher {
    fn new(name: &str, outcomes: Vec<SendOutcome>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self, _alert: &Alert, _action: LifecycleAction) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn send(&self, _payload: &serde_json::Value, _timeout: Duration) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.script
            .lock()
            .pop_front()
            .unwrap_or(SendOutcome::Delivered { status: 200 })
    }
}

fn descriptor(name: &str) -> TargetDescriptor {
    TargetDescriptor {
        name: name.to_string(),
        kind: TargetKind::Generic,
        url: format!("https://hooks.example.com/{name}"),
        headers: Default::default(),
        credentials: None,
        enabled: true,
        matchers: Vec::new(),
        labels: Default::default(),
    }
}

struct Harness {
    pipeline: Arc<AlertPipeline>,
    store: Arc<HistoryStore>,
    metrics: Arc<PipelineMetrics>,
}

fn harness(targets: Vec<TargetDescriptor>, inhibition_rules: Vec<InhibitionRule>) -> Harness {
    let store = Arc::new(HistoryStore::in_memory().unwrap());
    let metrics = Arc::new(PipelineMetrics::new());
    let active = Arc::new(ActiveAlertSet::new(store.clone()));

    let mut classification = ClassificationConfig::from_env();
    classification.enabled = false;
    classification.cache_ttl_l1 = Duration::from_secs(300);

    let mut publishing = PublishingConfig::from_env();
    publishing.preflight_enabled = false;
    publishing.retry_max_attempts = 3;
    publishing.retry_initial_interval = Duration::from_millis(1);
    publishing.retry_max_interval = Duration::from_millis(2);
    publishing.circuit_failure_threshold = 3;

    let discovery = Arc::new(TargetDiscovery::with_static_targets(targets));
    let coordinator = Arc::new(PublishCoordinator::new(
        publishing,
        discovery,
        Arc::new(PublishingModeManager::with_debounce(
            metrics.clone(),
            Duration::from_millis(0),
        )),
        metrics.clone(),
        reqwest::Client::new(),
    ));

    let pipeline = Arc::new(AlertPipeline::new(
        Arc::new(Deduplicator::new(store.clone(), metrics.clone())),
        Arc::new(InhibitionEngine::new(
            inhibition_rules,
            active,
            store.clone(),
            metrics.clone(),
        )),
        Arc::new(SilenceEngine::new(Vec::new(), metrics.clone())),
        FilterEngine::new(Vec::new(), FilterAction::Allow, 0, metrics.clone()),
        Arc::new(ClassificationService::new(
            classification,
            store.clone(),
            metrics.clone(),
        )),
        coordinator,
        Arc::new(EnrichmentModeManager::new(
            store.clone(),
            Duration::from_secs(30),
        )),
        store.clone(),
    ));

    Harness {
        pipeline,
        store,
        metrics,
    }
}

fn alert(pairs: &[(&str, &str)], status: AlertStatus) -> Alert {
    let labels: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let now = Utc::now();
    Alert {
        fingerprint: alerthub_backend::fingerprint::fnv1a_fingerprint(&labels),
        labels,
        annotations: BTreeMap::new(),
        status,
        starts_at: now,
        ends_at: if status == AlertStatus::Resolved {
            Some(now)
        } else {
            None
        },
        generator_url: None,
        created_at: now,
        updated_at: now,
        classification: None,
    }
}

fn node_down_rule() -> InhibitionRule {
    InhibitionRule {
        name: "node-down-inhibits-instance-down".to_string(),
        source_match: vec![
            Matcher::new("alertname", MatchOperator::Eq, "NodeDown"),
            Matcher::new("severity", MatchOperator::Eq, "critical"),
        ],
        target_match: vec![Matcher::new("alertname", MatchOperator::Eq, "InstanceDown")],
        equal: vec!["node".to_string(), "cluster".to_string()],
    }
}

// Scenario 1: identical re-submission is ignored, history keeps one row.
#[tokio::test]
async fn dedup_create_then_ignore() {
    let h = harness(vec![descriptor("ok")], vec![]);
    h.pipeline
        .coordinator()
        .register_publisher("ok", ScriptedPublisher::new("ok", vec![]));

    let a = alert(
        &[("alertname", "HighCPU"), ("instance", "web-01")],
        AlertStatus::Firing,
    );

    let first = h.pipeline.process_batch(vec![a.clone()]).await;
    assert_eq!(first.per_alert_results[0].outcome, "published");

    let second = h.pipeline.process_batch(vec![a]).await;
    assert_eq!(second.per_alert_results[0].outcome, "ignored");
    assert_eq!(second.total_ignored_duplicates, 1);

    assert_eq!(h.store.len(), 1);
    assert_eq!(h.metrics.dedup.created_total.load(Ordering::Relaxed), 1);
    assert_eq!(h.metrics.dedup.ignored_total.load(Ordering::Relaxed), 1);
}

// Scenario 2: firing -> resolved updates the row, keeps starts_at.
#[tokio::test]
async fn firing_to_resolved_update() {
    let h = harness(vec![descriptor("ok")], vec![]);
    h.pipeline
        .coordinator()
        .register_publisher("ok", ScriptedPublisher::new("ok", vec![]));

    let firing = alert(&[("alertname", "HighCPU")], AlertStatus::Firing);
    h.pipeline.process_batch(vec![firing.clone()]).await;
    let stored_start = h
        .store
        .get(&firing.fingerprint)
        .unwrap()
        .unwrap()
        .starts_at;

    let mut resolved = firing.clone();
    resolved.status = AlertStatus::Resolved;
    resolved.ends_at = Some(Utc::now());
    resolved.starts_at = Utc::now();
    let summary = h.pipeline.process_batch(vec![resolved]).await;
    assert_eq!(summary.per_alert_results[0].outcome, "published");

    let row = h.store.get(&firing.fingerprint).unwrap().unwrap();
    assert_eq!(row.status, AlertStatus::Resolved);
    assert!(row.ends_at.is_some());
    assert_eq!(row.starts_at, stored_start);
    assert_eq!(h.store.len(), 1);
}

// Scenario 3: NodeDown suppresses InstanceDown on shared node+cluster.
#[tokio::test]
async fn inhibition_suppresses_dependent_alert() {
    let h = harness(vec![descriptor("ok")], vec![node_down_rule()]);
    h.pipeline
        .coordinator()
        .register_publisher("ok", ScriptedPublisher::new("ok", vec![]));

    let source = alert(
        &[
            ("alertname", "NodeDown"),
            ("severity", "critical"),
            ("node", "n1"),
            ("cluster", "prod"),
        ],
        AlertStatus::Firing,
    );
    h.pipeline.process_batch(vec![source.clone()]).await;

    let target = alert(
        &[
            ("alertname", "InstanceDown"),
            ("node", "n1"),
            ("cluster", "prod"),
        ],
        AlertStatus::Firing,
    );
    let summary = h.pipeline.process_batch(vec![target]).await;

    let r = &summary.per_alert_results[0];
    assert_eq!(r.outcome, "inhibited");
    let detail = r.detail.as_deref().unwrap();
    assert!(detail.contains(&source.fingerprint));
    assert!(detail.contains("node-down-inhibits-instance-down"));
    assert_eq!(summary.total_published, 0);
    assert_eq!(h.metrics.inhibition.inhibited_total.load(Ordering::Relaxed), 1);
}

// Scenario 4: second classification of the same fingerprint is served from
// L1 with source=cached.
#[tokio::test]
async fn classification_cache_hit() {
    let h = harness(vec![], vec![]);
    let a = alert(&[("alertname", "NodeDown")], AlertStatus::Firing);

    let first = h.pipeline.classifier().classify(&a).await;
    assert_eq!(first.source, ClassificationSource::FallbackRule);

    let second = h.pipeline.classifier().classify(&a).await;
    assert_eq!(second.source, ClassificationSource::Cached);
    assert_eq!(second.severity, first.severity);
    assert_eq!(second.category, first.category);
    assert_eq!(
        h.metrics
            .classification
            .l1_cache_hits_total
            .load(Ordering::Relaxed),
        1
    );
}

// Scenario 5: no enabled targets -> metrics-only, zero outbound calls.
#[tokio::test]
async fn metrics_only_mode() {
    let h = harness(vec![], vec![]);
    let summary = h
        .pipeline
        .process_batch(vec![alert(&[("alertname", "HighCPU")], AlertStatus::Firing)])
        .await;

    assert_eq!(summary.total_published, 0);
    assert_eq!(summary.total_metrics_only, 1);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.per_alert_results[0].outcome, "metrics_only");
    assert_eq!(
        summary.total_received,
        summary.total_published
            + summary.total_filtered
            + summary.total_inhibited
            + summary.total_silenced
            + summary.total_ignored_duplicates
            + summary.total_metrics_only
            + summary.total_errors
    );
    assert!(h.pipeline.coordinator().mode_manager().is_metrics_only());
    assert_eq!(
        h.metrics
            .publishing
            .submissions_rejected_total
            .get("metrics_only"),
        1
    );
}

// Scenario 6: one of three targets fails repeatedly; partial success, the
// failing circuit opens, the healthy targets deliver.
#[tokio::test]
async fn parallel_fanout_with_one_failing_target() {
    let h = harness(
        vec![descriptor("a"), descriptor("b"), descriptor("c")],
        vec![],
    );
    let a = ScriptedPublisher::new("a", vec![]);
    let b = ScriptedPublisher::new(
        "b",
        vec![
            SendOutcome::Retryable {
                error: "500 upstream error".to_string(),
            },
            SendOutcome::Retryable {
                error: "500 upstream error".to_string(),
            },
            SendOutcome::Retryable {
                error: "500 upstream error".to_string(),
            },
        ],
    );
    let c = ScriptedPublisher::new("c", vec![]);
    h.pipeline.coordinator().register_publisher("a", a.clone());
    h.pipeline.coordinator().register_publisher("b", b.clone());
    h.pipeline.coordinator().register_publisher("c", c.clone());

    let summary = h
        .pipeline
        .process_batch(vec![alert(&[("alertname", "HighCPU")], AlertStatus::Firing)])
        .await;

    let r = &summary.per_alert_results[0];
    assert_eq!(r.outcome, "published");
    assert_eq!(r.published_targets, Some(2));
    assert_eq!(r.failed_targets, Some(1));

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 3);
    assert_eq!(c.calls(), 1);
    assert!(h.metrics.publishing.failures_total.get("b") >= 3);
    assert_eq!(
        h.pipeline.coordinator().circuit_state("b"),
        CircuitState::Open
    );
}

// Boundary: 100 concurrent distinct fingerprints all create without
// deadlock.
#[tokio::test]
async fn concurrent_distinct_submissions() {
    let h = harness(vec![], vec![]);
    let alerts: Vec<Alert> = (0..100)
        .map(|i| {
            alert(
                &[("alertname", "Burst"), ("instance", &format!("web-{i:02}"))],
                AlertStatus::Firing,
            )
        })
        .collect();

    let summary = h.pipeline.process_batch(alerts).await;
    assert_eq!(summary.total_received, 100);
    assert_eq!(h.metrics.dedup.created_total.load(Ordering::Relaxed), 100);
    assert_eq!(h.store.len(), 100);
}

// Idempotence law: posting a mode then reading returns it with
// source=store; the publishing-mode ETag is stable for identical state.
#[tokio::test]
async fn mode_roundtrip_and_etag() {
    let h = harness(vec![descriptor("ok")], vec![]);
    h.pipeline
        .enrichment_mode()
        .set(EnrichmentMode::Transparent)
        .unwrap();
    let (mode, source) = h.pipeline.enrichment_mode().current();
    assert_eq!(mode, EnrichmentMode::Transparent);
    assert_eq!(source, alerthub_backend::enrichment_mode::ModeSource::Store);

    let status = h.pipeline.coordinator().mode_manager().status();
    assert_eq!(status.etag(), h.pipeline.coordinator().mode_manager().status().etag());
}

// Accounting invariant across a mixed batch.
#[tokio::test]
async fn summary_accounting_invariant() {
    let h = harness(vec![descriptor("ok")], vec![node_down_rule()]);
    h.pipeline
        .coordinator()
        .register_publisher("ok", ScriptedPublisher::new("ok", vec![]));

    let source = alert(
        &[
            ("alertname", "NodeDown"),
            ("severity", "critical"),
            ("node", "n1"),
            ("cluster", "prod"),
        ],
        AlertStatus::Firing,
    );
    let refreshed = alert(&[("alertname", "NetSplit")], AlertStatus::Firing);
    h.pipeline
        .process_batch(vec![source.clone(), refreshed.clone()])
        .await;

    // Same fingerprint with changed annotations: an annotation-only update.
    let mut annotated = refreshed.clone();
    annotated
        .annotations
        .insert("summary".to_string(), "links flapping".to_string());

    let summary = h
        .pipeline
        .process_batch(vec![
            source, // ignored duplicate
            annotated, // updated (persisted without re-publish)
            alert(
                &[
                    ("alertname", "InstanceDown"),
                    ("node", "n1"),
                    ("cluster", "prod"),
                ],
                AlertStatus::Firing,
            ), // inhibited
            alert(&[("alertname", "DiskFull")], AlertStatus::Firing), // published
        ])
        .await;

    assert_eq!(summary.total_received, 4);
    assert_eq!(summary.total_ignored_duplicates, 1);
    assert_eq!(summary.total_inhibited, 1);
    // DiskFull delivery plus the annotation-only update.
    assert_eq!(summary.total_published, 2);
    assert_eq!(
        summary.total_received,
        summary.total_published
            + summary.total_filtered
            + summary.total_inhibited
            + summary.total_silenced
            + summary.total_ignored_duplicates
            + summary.total_metrics_only
            + summary.total_errors
    );
}

// The AppState plumbing stays constructible from library parts alone.
#[tokio::test]
async fn app_state_construction() {
    let h = harness(vec![descriptor("ok")], vec![]);
    let state = AppState {
        pipeline: h.pipeline.clone(),
        discovery: Arc::new(TargetDiscovery::with_static_targets(vec![descriptor("ok")])),
        metrics: h.metrics.clone(),
        config: Arc::new(Config::from_env()),
    };
    let exposition = state.metrics.to_prometheus();
    assert!(exposition.contains("deduplication_created_total"));
}
