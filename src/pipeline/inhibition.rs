//! Rule-based suppression of one alert by the presence of another.
//!
//! The active set of firing alerts is two-tiered: a process-local map that
//! is authoritative for reads, and the shared kv tier holding active
//! fingerprints as the merge point between replicas. Consistency is
//! eventual; a source that just resolved may still suppress for one
//! reconcile interval.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::metrics::PipelineMetrics;
use crate::models::{matchers_match, Alert, InhibitionRule};
use crate::storage::HistoryStore;

const ACTIVE_KEY_PREFIX: &str = "active:";

/// Snapshot of currently firing alerts, indexed by fingerprint.
pub struct ActiveAlertSet {
    l1: RwLock<HashMap<String, Alert>>,
    store: Arc<HistoryStore>,
}

impl ActiveAlertSet {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self {
            l1: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Track a firing alert. The shared tier write is best-effort.
    pub fn insert(&self, alert: &Alert) {
        self.l1
            .write()
            .insert(alert.fingerprint.clone(), alert.clone());
        let key = format!("{}{}", ACTIVE_KEY_PREFIX, alert.fingerprint);
        if let Err(e) = self.store.kv_put(&key, "1", Utc::now().timestamp()) {
            warn!(error = %e, "Active-set shared write failed (non-blocking)");
        }
    }

    /// Drop a resolved alert from both tiers.
    pub fn remove(&self, fingerprint: &str) {
        self.l1.write().remove(fingerprint);
        let key = format!("{}{}", ACTIVE_KEY_PREFIX, fingerprint);
        if let Err(e) = self.store.kv_delete(&key) {
            warn!(error = %e, "Active-set shared delete failed (non-blocking)");
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.l1.read().contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.l1.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First firing alert satisfying the predicate.
    pub fn find<F: Fn(&Alert) -> bool>(&self, pred: F) -> Option<Alert> {
        self.l1.read().values().find(|a| pred(a)).cloned()
    }

    /// Merge with the shared tier: adopt fingerprints other replicas marked
    /// active (hydrated from history), push local-only entries out, and
    /// drop entries whose history row has resolved.
    pub fn reconcile(&self) {
        let shared = match self.store.kv_keys_with_prefix(ACTIVE_KEY_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Active-set reconcile read failed");
                return;
            }
        };

        let local: Vec<String> = self.l1.read().keys().cloned().collect();

        for key in &shared {
            let fp = &key[ACTIVE_KEY_PREFIX.len()..];
            if self.contains(fp) {
                continue;
            }
            match self.store.get(fp) {
                Ok(Some(row)) if row.status == crate::models::AlertStatus::Firing => {
                    self.l1.write().insert(fp.to_string(), row.alert());
                }
                Ok(_) => {
                    // Resolved or unknown: the shared entry is stale.
                    let _ = self.store.kv_delete(key);
                }
                Err(_) => {}
            }
        }

        for fp in local {
            // Local entries that resolved in history drop out of both tiers.
            if let Ok(Some(row)) = self.store.get(&fp) {
                if row.status == crate::models::AlertStatus::Resolved {
                    self.remove(&fp);
                    continue;
                }
            }
            let key = format!("{}{}", ACTIVE_KEY_PREFIX, fp);
            if !shared.contains(&key) {
                let _ = self.store.kv_put(&key, "1", Utc::now().timestamp());
            }
        }
    }
}

/// Inhibition decision for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InhibitionOutcome {
    Inhibited {
        source_fingerprint: String,
        rule_name: String,
    },
    NotInhibited,
}

pub struct InhibitionEngine {
    rules: ArcSwap<Vec<InhibitionRule>>,
    active: Arc<ActiveAlertSet>,
    store: Arc<HistoryStore>,
    metrics: Arc<PipelineMetrics>,
}

impl InhibitionEngine {
    pub fn new(
        rules: Vec<InhibitionRule>,
        active: Arc<ActiveAlertSet>,
        store: Arc<HistoryStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            active,
            store,
            metrics,
        }
    }

    pub fn rules(&self) -> Arc<Vec<InhibitionRule>> {
        self.rules.load_full()
    }

    /// Swap in a new rule set (config reload). In-flight checks keep the
    /// set they loaded.
    pub fn set_rules(&self, rules: Vec<InhibitionRule>) {
        self.rules.store(Arc::new(rules));
    }

    pub fn active_set(&self) -> &ActiveAlertSet {
        &self.active
    }

    /// Rule order does not affect whether an alert is inhibited; the first
    /// hit is reported for diagnostics.
    pub fn check(&self, alert: &Alert) -> InhibitionOutcome {
        self.metrics
            .inhibition
            .checks_total
            .fetch_add(1, Ordering::Relaxed);

        let rules = self.rules.load();
        for rule in rules.iter() {
            if !matchers_match(&rule.target_match, &alert.labels) {
                continue;
            }

            let source = self.active.find(|candidate| {
                candidate.fingerprint != alert.fingerprint
                    && candidate.is_firing()
                    && matchers_match(&rule.source_match, &candidate.labels)
                    && rule
                        .equal
                        .iter()
                        .all(|k| candidate.labels.get(k) == alert.labels.get(k))
            });

            if let Some(source) = source {
                self.metrics
                    .inhibition
                    .inhibited_total
                    .fetch_add(1, Ordering::Relaxed);
                self.record_pair(&alert.fingerprint, &source.fingerprint, &rule.name);
                debug!(
                    target_fingerprint = %alert.fingerprint,
                    source_fingerprint = %source.fingerprint,
                    rule = %rule.name,
                    "Alert inhibited"
                );
                return InhibitionOutcome::Inhibited {
                    source_fingerprint: source.fingerprint,
                    rule_name: rule.name.clone(),
                };
            }
        }

        self.clear_pair(&alert.fingerprint);
        InhibitionOutcome::NotInhibited
    }

    /// Active target->source pairs for the status endpoint.
    pub fn active_pairs(&self) -> Vec<(String, String, String, i64)> {
        self.store.list_inhibitions().unwrap_or_default()
    }

    fn record_pair(&self, target: &str, source: &str, rule: &str) {
        // Observability only: never blocks the pipeline on failure.
        if let Err(e) = self
            .store
            .upsert_inhibition(target, source, rule, Utc::now().timestamp())
        {
            warn!(error = %e, "Inhibition state write failed (non-blocking)");
        }
        self.metrics
            .inhibition
            .active_pairs
            .store(self.active_pairs().len() as u64, Ordering::Relaxed);
    }

    fn clear_pair(&self, target: &str) {
        if self.store.remove_inhibition(target).is_ok() {
            self.metrics
                .inhibition
                .active_pairs
                .store(self.active_pairs().len() as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertStatus, MatchOperator, Matcher};
    use std::collections::BTreeMap;

    fn alert(pairs: &[(&str, &str)], status: AlertStatus) -> Alert {
        let labels: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let now = Utc::now();
        Alert {
            fingerprint: crate::fingerprint::fnv1a_fingerprint(&labels),
            labels,
            annotations: BTreeMap::new(),
            status,
            starts_at: now,
            ends_at: None,
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

    fn engine(rules: Vec<InhibitionRule>) -> InhibitionEngine {
        let store = Arc::new(HistoryStore::in_memory().unwrap());
        let active = Arc::new(ActiveAlertSet::new(store.clone()));
        InhibitionEngine::new(rules, active, store, Arc::new(PipelineMetrics::new()))
    }

    #[test]
    fn test_inhibits_when_source_firing_and_equal_labels_agree() {
        let e = engine(vec![node_down_rule()]);
        let source = alert(
            &[
                ("alertname", "NodeDown"),
                ("severity", "critical"),
                ("node", "n1"),
                ("cluster", "prod"),
            ],
            AlertStatus::Firing,
        );
        e.active_set().insert(&source);

        let target = alert(
            &[
                ("alertname", "InstanceDown"),
                ("node", "n1"),
                ("cluster", "prod"),
            ],
            AlertStatus::Firing,
        );
        match e.check(&target) {
            InhibitionOutcome::Inhibited {
                source_fingerprint,
                rule_name,
            } => {
                assert_eq!(source_fingerprint, source.fingerprint);
                assert_eq!(rule_name, "node-down-inhibits-instance-down");
            }
            other => panic!("expected Inhibited, got {other:?}"),
        }
        assert_eq!(e.active_pairs().len(), 1);
    }

    #[test]
    fn test_equal_label_mismatch_does_not_inhibit() {
        let e = engine(vec![node_down_rule()]);
        e.active_set().insert(&alert(
            &[
                ("alertname", "NodeDown"),
                ("severity", "critical"),
                ("node", "n1"),
                ("cluster", "prod"),
            ],
            AlertStatus::Firing,
        ));

        let target = alert(
            &[
                ("alertname", "InstanceDown"),
                ("node", "n2"), // different node
                ("cluster", "prod"),
            ],
            AlertStatus::Firing,
        );
        assert_eq!(e.check(&target), InhibitionOutcome::NotInhibited);
    }

    #[test]
    fn test_no_self_inhibition() {
        // An alert matching both source and target must not suppress itself.
        let rule = InhibitionRule {
            name: "self".to_string(),
            source_match: vec![Matcher::new("severity", MatchOperator::Eq, "critical")],
            target_match: vec![Matcher::new("severity", MatchOperator::Eq, "critical")],
            equal: vec![],
        };
        let e = engine(vec![rule]);
        let a = alert(
            &[("alertname", "NodeDown"), ("severity", "critical")],
            AlertStatus::Firing,
        );
        e.active_set().insert(&a);
        assert_eq!(e.check(&a), InhibitionOutcome::NotInhibited);
    }

    #[test]
    fn test_not_inhibited_clears_recorded_pair() {
        let e = engine(vec![node_down_rule()]);
        let source = alert(
            &[
                ("alertname", "NodeDown"),
                ("severity", "critical"),
                ("node", "n1"),
                ("cluster", "prod"),
            ],
            AlertStatus::Firing,
        );
        e.active_set().insert(&source);
        let target = alert(
            &[
                ("alertname", "InstanceDown"),
                ("node", "n1"),
                ("cluster", "prod"),
            ],
            AlertStatus::Firing,
        );
        assert!(matches!(
            e.check(&target),
            InhibitionOutcome::Inhibited { .. }
        ));

        // Source resolves; pair should clear on the next check.
        e.active_set().remove(&source.fingerprint);
        assert_eq!(e.check(&target), InhibitionOutcome::NotInhibited);
        assert!(e.active_pairs().is_empty());
    }

    #[test]
    fn test_active_set_reconcile_adopts_shared_entries() {
        let store = Arc::new(HistoryStore::in_memory().unwrap());
        let source = alert(
            &[("alertname", "NodeDown"), ("node", "n1")],
            AlertStatus::Firing,
        );
        store.insert(&source).unwrap();
        // Another replica marked it active in the shared tier.
        store
            .kv_put(
                &format!("active:{}", source.fingerprint),
                "1",
                Utc::now().timestamp(),
            )
            .unwrap();

        let active = ActiveAlertSet::new(store);
        assert!(!active.contains(&source.fingerprint));
        active.reconcile();
        assert!(active.contains(&source.fingerprint));
    }

    #[test]
    fn test_active_set_reconcile_drops_resolved() {
        let store = Arc::new(HistoryStore::in_memory().unwrap());
        let mut source = alert(
            &[("alertname", "NodeDown"), ("node", "n1")],
            AlertStatus::Firing,
        );
        store.insert(&source).unwrap();

        let active = ActiveAlertSet::new(store.clone());
        active.insert(&source);

        source.status = AlertStatus::Resolved;
        source.ends_at = Some(Utc::now());
        store.update(&source, true).unwrap();

        active.reconcile();
        assert!(!active.contains(&source.fingerprint));
        assert!(store
            .kv_keys_with_prefix("active:")
            .unwrap()
            .is_empty());
    }
}
