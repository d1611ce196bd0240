//! Pipeline orchestration.
//!
//! One invocation per ingested alert: dedup, active-set upkeep, inhibition,
//! silencing, the enrichment-mode gate, classification, filtering, and the
//! publishing fanout. Invocations are independent and run in parallel; the
//! batch summary is assembled at the end.
//!
//! Suppressed alerts (ignored, inhibited, silenced, blocked) are outcomes,
//! not errors. Only persistence catastrophes count against total_errors.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::classify::ClassificationService;
use crate::enrichment_mode::EnrichmentModeManager;
use crate::models::{Alert, AlertResult, AlertStatus, EnrichmentMode, IngestSummary};
use crate::pipeline::dedup::{DedupOutcome, Deduplicator};
use crate::pipeline::filters::{FilterDecision, FilterEngine};
use crate::pipeline::inhibition::{InhibitionEngine, InhibitionOutcome};
use crate::pipeline::silencing::{SilenceEngine, SilenceOutcome};
use crate::publish::PublishCoordinator;
use crate::storage::HistoryStore;

const PUBLISH_DEADLINE: Duration = Duration::from_secs(30);

pub struct AlertPipeline {
    dedup: Arc<Deduplicator>,
    inhibition: Arc<InhibitionEngine>,
    silencing: Arc<SilenceEngine>,
    filters: ArcSwap<FilterEngine>,
    classifier: Arc<ClassificationService>,
    coordinator: Arc<PublishCoordinator>,
    enrichment_mode: Arc<EnrichmentModeManager>,
    store: Arc<HistoryStore>,
}

impl AlertPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dedup: Arc<Deduplicator>,
        inhibition: Arc<InhibitionEngine>,
        silencing: Arc<SilenceEngine>,
        filters: FilterEngine,
        classifier: Arc<ClassificationService>,
        coordinator: Arc<PublishCoordinator>,
        enrichment_mode: Arc<EnrichmentModeManager>,
        store: Arc<HistoryStore>,
    ) -> Self {
        Self {
            dedup,
            inhibition,
            silencing,
            filters: ArcSwap::from_pointee(filters),
            classifier,
            coordinator,
            enrichment_mode,
            store,
        }
    }

    pub fn inhibition(&self) -> &InhibitionEngine {
        &self.inhibition
    }

    pub fn silencing(&self) -> &SilenceEngine {
        &self.silencing
    }

    pub fn classifier(&self) -> &Arc<ClassificationService> {
        &self.classifier
    }

    pub fn coordinator(&self) -> &Arc<PublishCoordinator> {
        &self.coordinator
    }

    pub fn enrichment_mode(&self) -> &EnrichmentModeManager {
        &self.enrichment_mode
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    /// Replace the filter rule set (config reload). Frequency counters
    /// restart with the new rules.
    pub fn set_filters(&self, filters: FilterEngine) {
        self.filters.store(Arc::new(filters));
    }

    /// Process a batch. The enrichment mode is captured once at entry so a
    /// mid-batch mode change never splits behavior.
    pub async fn process_batch(&self, alerts: Vec<Alert>) -> IngestSummary {
        let (mode, _source) = self.enrichment_mode.current();
        let total_received = alerts.len();

        let results: Vec<AlertResult> =
            join_all(alerts.into_iter().map(|a| self.process_one(a, mode))).await;

        let mut summary = IngestSummary {
            total_received,
            ..Default::default()
        };
        for r in &results {
            match r.outcome.as_str() {
                // Annotation-only refreshes were accepted and persisted;
                // they count as published so every alert has a bucket.
                "published" | "updated" => summary.total_published += 1,
                "blocked" => summary.total_filtered += 1,
                "inhibited" => summary.total_inhibited += 1,
                "silenced" => summary.total_silenced += 1,
                "ignored" => summary.total_ignored_duplicates += 1,
                "metrics_only" => summary.total_metrics_only += 1,
                _ => summary.total_errors += 1,
            }
        }
        summary.total_processed = total_received - summary.total_errors;
        summary.total_classified = results
            .iter()
            .filter(|r| r.detail.as_deref() == Some("classified"))
            .count();
        summary.per_alert_results = results;
        summary
    }

    /// Full pipeline for one alert under a fixed enrichment mode.
    pub async fn process_one(&self, alert: Alert, mode: EnrichmentMode) -> AlertResult {
        let alert_name = alert.name().to_string();
        let fingerprint = alert.fingerprint.clone();
        let result = |outcome: &str, detail: Option<String>| AlertResult {
            fingerprint: fingerprint.clone(),
            alert_name: alert_name.clone(),
            outcome: outcome.to_string(),
            detail,
            published_targets: None,
            failed_targets: None,
        };

        // 1. Dedup: identical re-submissions stop here.
        let dedup_result = self.dedup.process(alert).await;
        let mut alert = dedup_result.alert.clone();
        let transitioned = match &dedup_result.outcome {
            DedupOutcome::Ignored => {
                return result("ignored", None);
            }
            DedupOutcome::Created => true,
            DedupOutcome::Updated { transitioned, .. } => *transitioned,
        };

        // 2. Active-set upkeep for inhibition queries.
        match alert.status {
            AlertStatus::Firing => self.inhibition.active_set().insert(&alert),
            AlertStatus::Resolved => self.inhibition.active_set().remove(&alert.fingerprint),
        }

        // Annotation-only refresh: persist, do not re-publish.
        if !transitioned {
            self.record_outcome(&alert.fingerprint, "updated");
            return result("updated", Some("persisted without re-publish".to_string()));
        }

        // 3. Inhibition.
        if let InhibitionOutcome::Inhibited {
            source_fingerprint,
            rule_name,
        } = self.inhibition.check(&alert)
        {
            self.record_outcome(&alert.fingerprint, "inhibited");
            return result(
                "inhibited",
                Some(format!("by {source_fingerprint} via {rule_name}")),
            );
        }

        // 4. Silencing: history keeps the alert, nothing is published.
        if let SilenceOutcome::Silenced { silence_id } = self.silencing.check(&alert) {
            self.record_outcome(&alert.fingerprint, "silenced");
            return result("silenced", Some(format!("silence {silence_id}")));
        }

        // 5. Enrichment-mode gate.
        let mut detail = None;
        if mode == EnrichmentMode::Enriched {
            let classification = self.classifier.classify(&alert).await;
            if let Err(e) = self
                .store
                .record_classification(&alert.fingerprint, &classification)
            {
                debug!(error = %e, "Classification persist failed (non-blocking)");
            }
            alert.classification = Some(classification);
            detail = Some("classified".to_string());
        }

        // 6. Filter, unless the mode publishes everything.
        if mode != EnrichmentMode::TransparentWithRecommendations {
            if let FilterDecision::Blocked { rule } = self.filters.load().evaluate(&alert) {
                self.record_outcome(&alert.fingerprint, "blocked");
                return result("blocked", Some(format!("filter {rule}")));
            }
        }

        // 7. Fanout.
        let report = self.coordinator.publish(&alert, PUBLISH_DEADLINE).await;

        if report.status == "no_targets" {
            self.record_outcome(&alert.fingerprint, "metrics_only");
            return result("metrics_only", detail);
        }

        if report.succeeded > 0 && !dedup_result.persisted {
            // Degraded dedup: one more persistence attempt before the alert
            // may be declared published.
            if let Err(e) = self.store.insert(&alert) {
                warn!(error = %e, fingerprint = %alert.fingerprint,
                    "Delivered but never persisted");
                return AlertResult {
                    fingerprint: alert.fingerprint.clone(),
                    alert_name: alert_name.clone(),
                    outcome: "error".to_string(),
                    detail: Some("delivered but persistence failed".to_string()),
                    published_targets: Some(report.succeeded),
                    failed_targets: Some(report.failed),
                };
            }
        }

        let outcome = if report.succeeded > 0 {
            "published"
        } else {
            "error"
        };
        self.record_outcome(&alert.fingerprint, outcome);
        AlertResult {
            fingerprint: alert.fingerprint,
            alert_name,
            outcome: outcome.to_string(),
            detail: detail.or_else(|| {
                report
                    .results
                    .iter()
                    .find(|r| !r.success)
                    .and_then(|r| r.error.clone())
            }),
            published_targets: Some(report.succeeded),
            failed_targets: Some(report.failed),
        }
    }

    fn record_outcome(&self, fingerprint: &str, outcome: &str) {
        if let Err(e) = self.store.record_publish_outcome(fingerprint, outcome) {
            debug!(error = %e, "Publish outcome persist failed (non-blocking)");
        }
    }
}
