//! Per-fingerprint deduplication.
//!
//! The deduplicator is the single owner of alert rows. Writes to the same
//! fingerprint are serialized through a per-key async lock; distinct
//! fingerprints proceed in parallel. Storage failures degrade to in-memory
//! decisions so a flaky disk never stalls ingest, but an alert is only
//! reported as persisted once a write actually landed.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::metrics::PipelineMetrics;
use crate::models::{Alert, AlertStatus};
use crate::storage::{HistoryStore, StoredAlert};

/// Outcome of one dedup decision.
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    Created,
    Updated {
        prev: Box<StoredAlert>,
        /// Status flipped (firing<->resolved).
        transitioned: bool,
        /// resolved -> firing: a fresh episode of the same identity.
        reopened: bool,
    },
    Ignored,
}

impl DedupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupOutcome::Created => "created",
            DedupOutcome::Updated { .. } => "updated",
            DedupOutcome::Ignored => "ignored",
        }
    }
}

/// Dedup decision plus whether the row made it to storage.
#[derive(Debug)]
pub struct DedupResult {
    pub outcome: DedupOutcome,
    /// False only when storage failed and the decision came from the
    /// in-memory degraded map. Such alerts must not be reported published
    /// until a later persist succeeds.
    pub persisted: bool,
    /// The alert as it should flow through the rest of the pipeline
    /// (stored timestamps merged in).
    pub alert: Alert,
}

const LOCK_REGISTRY_PRUNE_AT: usize = 4096;

pub struct Deduplicator {
    store: Arc<HistoryStore>,
    metrics: Arc<PipelineMetrics>,
    /// Per-fingerprint serialization points.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Degraded-mode shadow of current alerts, used when storage reads fail.
    degraded: RwLock<HashMap<String, Alert>>,
}

impl Deduplicator {
    pub fn new(store: Arc<HistoryStore>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            store,
            metrics,
            locks: Mutex::new(HashMap::new()),
            degraded: RwLock::new(HashMap::new()),
        }
    }

    fn key_lock(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() > LOCK_REGISTRY_PRUNE_AT {
            locks.retain(|_, l| Arc::strong_count(l) > 1);
        }
        locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Process one alert. Atomic per fingerprint.
    pub async fn process(&self, mut incoming: Alert) -> DedupResult {
        let started = Instant::now();
        let lock = self.key_lock(&incoming.fingerprint);
        let _guard = lock.lock().await;

        let now = Utc::now();
        incoming.updated_at = now;

        let result = match self.store.get(&incoming.fingerprint) {
            Ok(existing) => self.decide(incoming, existing, true),
            Err(e) => {
                warn!(error = %e, fingerprint = %incoming.fingerprint,
                    "History read failed, dedup degrading to in-memory");
                let existing = self
                    .degraded
                    .read()
                    .get(&incoming.fingerprint)
                    .map(stored_from_alert);
                self.decide(incoming, existing, false)
            }
        };

        match &result.outcome {
            DedupOutcome::Created => {
                self.metrics.dedup.created_total.fetch_add(1, Ordering::Relaxed)
            }
            DedupOutcome::Updated { .. } => {
                self.metrics.dedup.updated_total.fetch_add(1, Ordering::Relaxed)
            }
            DedupOutcome::Ignored => {
                self.metrics.dedup.ignored_total.fetch_add(1, Ordering::Relaxed)
            }
        };
        self.metrics.dedup.duration.record(started.elapsed());

        result
    }

    fn decide(
        &self,
        mut incoming: Alert,
        existing: Option<StoredAlert>,
        storage_ok: bool,
    ) -> DedupResult {
        match existing {
            None => {
                incoming.created_at = incoming.updated_at;
                let persisted = if storage_ok {
                    match self.store.insert(&incoming) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(error = %e, fingerprint = %incoming.fingerprint,
                                "History insert failed, continuing unpersisted");
                            false
                        }
                    }
                } else {
                    false
                };
                self.degraded
                    .write()
                    .insert(incoming.fingerprint.clone(), incoming.clone());
                debug!(fingerprint = %incoming.fingerprint, "Alert created");
                DedupResult {
                    outcome: DedupOutcome::Created,
                    persisted,
                    alert: incoming,
                }
            }
            Some(prev) => {
                let status_differs = prev.status != incoming.status;
                let ends_differs = prev.ends_at != incoming.ends_at;
                let annotations_differ = prev.annotations != incoming.annotations;

                if !status_differs && !ends_differs && !annotations_differ {
                    // Identical episode: short-circuit the pipeline.
                    return DedupResult {
                        outcome: DedupOutcome::Ignored,
                        persisted: true,
                        alert: incoming,
                    };
                }

                let reopened =
                    prev.status == AlertStatus::Resolved && incoming.status == AlertStatus::Firing;
                // Keep the stored episode start unless this is a re-fire.
                if !reopened {
                    incoming.starts_at = prev.starts_at;
                }
                if reopened {
                    incoming.ends_at = None;
                }
                incoming.created_at = prev.created_at;
                // updated_at is monotone per fingerprint.
                if incoming.updated_at <= prev.updated_at {
                    incoming.updated_at = prev.updated_at + chrono::Duration::microseconds(1);
                }

                let persisted = if storage_ok {
                    match self.store.update(&incoming, status_differs) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(error = %e, fingerprint = %incoming.fingerprint,
                                "History update failed, continuing unpersisted");
                            false
                        }
                    }
                } else {
                    false
                };
                self.degraded
                    .write()
                    .insert(incoming.fingerprint.clone(), incoming.clone());
                debug!(
                    fingerprint = %incoming.fingerprint,
                    transitioned = status_differs,
                    reopened,
                    "Alert updated"
                );
                DedupResult {
                    outcome: DedupOutcome::Updated {
                        prev: Box::new(prev),
                        transitioned: status_differs,
                        reopened,
                    },
                    persisted,
                    alert: incoming,
                }
            }
        }
    }
}

fn stored_from_alert(alert: &Alert) -> StoredAlert {
    StoredAlert {
        fingerprint: alert.fingerprint.clone(),
        alertname: alert.name().to_string(),
        status: alert.status,
        severity: alert.severity().map(|s| s.to_string()),
        labels: alert.labels.clone(),
        annotations: alert.annotations.clone(),
        starts_at: alert.starts_at,
        ends_at: alert.ends_at,
        generator_url: alert.generator_url.clone(),
        created_at: alert.created_at,
        updated_at: alert.updated_at,
        first_seen: alert.created_at,
        last_seen: alert.updated_at,
        transition_count: 0,
        classification: alert.classification.clone(),
        last_publish_status: None,
        last_publish_at: None,
    }
}
