//! Prometheus metrics for the alert pipeline.
//!
//! Hand-rolled registry: atomic counters, fixed-bucket histograms, and a
//! text exporter served at GET /metrics. Metric names follow the
//! `{subsystem}_{operation}_{unit}` convention.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Fixed-bucket duration histogram. Bucket bounds are microseconds
/// internally; the exporter emits seconds.
#[derive(Debug)]
pub struct DurationHistogram {
    bucket_bounds_us: Vec<u64>,
    counts: Vec<AtomicU64>,
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl DurationHistogram {
    pub fn new(bucket_bounds_us: Vec<u64>) -> Self {
        let counts = bucket_bounds_us.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bucket_bounds_us,
            counts,
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Dedup processing buckets: 1us .. 10ms.
    pub fn dedup_buckets() -> Self {
        Self::new(vec![1, 5, 10, 50, 100, 500, 1_000, 2_500, 5_000, 10_000])
    }

    /// External-call buckets: 1ms .. 30s.
    pub fn external_buckets() -> Self {
        Self::new(vec![
            1_000, 5_000, 10_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000,
            5_000_000, 10_000_000, 30_000_000,
        ])
    }

    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        for (i, bound) in self.bucket_bounds_us.iter().enumerate() {
            if us <= *bound {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Cumulative-bucket Prometheus exposition for one labeled series.
    pub fn to_prometheus(&self, name: &str, labels: &str) -> String {
        let mut out = String::new();
        let sep = if labels.is_empty() { "" } else { "," };
        for (i, bound) in self.bucket_bounds_us.iter().enumerate() {
            out.push_str(&format!(
                "{}_bucket{{{}{}le=\"{}\"}} {}\n",
                name,
                labels,
                sep,
                *bound as f64 / 1_000_000.0,
                self.counts[i].load(Ordering::Relaxed)
            ));
        }
        let total = self.count.load(Ordering::Relaxed);
        out.push_str(&format!(
            "{}_bucket{{{}{}le=\"+Inf\"}} {}\n",
            name, labels, sep, total
        ));
        if labels.is_empty() {
            out.push_str(&format!(
                "{}_sum {}\n{}_count {}\n",
                name,
                self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
                name,
                total
            ));
        } else {
            out.push_str(&format!(
                "{}_sum{{{}}} {}\n{}_count{{{}}} {}\n",
                name,
                labels,
                self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
                name,
                labels,
                total
            ));
        }
        out
    }
}

/// Counter family keyed by one label value.
#[derive(Debug, Default)]
pub struct LabeledCounter {
    values: RwLock<HashMap<String, u64>>,
}

impl LabeledCounter {
    pub fn incr(&self, label: &str) {
        *self.values.write().entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        self.values.read().get(label).copied().unwrap_or(0)
    }

    fn export(&self, name: &str, label_name: &str, out: &mut String) {
        for (value, count) in self.values.read().iter() {
            out.push_str(&format!(
                "{}{{{}=\"{}\"}} {}\n",
                name, label_name, value, count
            ));
        }
    }
}

#[derive(Debug)]
pub struct DedupMetrics {
    pub created_total: AtomicU64,
    pub updated_total: AtomicU64,
    pub ignored_total: AtomicU64,
    pub duration: DurationHistogram,
}

#[derive(Debug)]
pub struct ClassificationMetrics {
    pub l1_cache_hits_total: AtomicU64,
    pub l2_cache_hits_total: AtomicU64,
    pub cache_misses_total: AtomicU64,
    /// result = ok | error | timeout | circuit_open
    pub llm_calls_total: LabeledCounter,
    pub fallbacks_total: AtomicU64,
    pub duration: DurationHistogram,
}

#[derive(Debug)]
pub struct PublishingMetrics {
    /// status = success | failed | partial
    pub submissions_total: LabeledCounter,
    /// reason = metrics_only | overloaded | cancelled
    pub submissions_rejected_total: LabeledCounter,
    pub jobs_skipped_total: AtomicU64,
    pub failures_total: LabeledCounter,
    per_target_duration: RwLock<HashMap<String, DurationHistogram>>,
}

impl PublishingMetrics {
    pub fn record_target_duration(&self, target: &str, elapsed: Duration) {
        {
            let map = self.per_target_duration.read();
            if let Some(h) = map.get(target) {
                h.record(elapsed);
                return;
            }
        }
        let mut map = self.per_target_duration.write();
        map.entry(target.to_string())
            .or_insert_with(DurationHistogram::external_buckets)
            .record(elapsed);
    }
}

#[derive(Debug)]
pub struct ModeMetrics {
    /// 1 while no eligible targets exist.
    pub metrics_only: AtomicU64,
    /// key = "from->to"
    pub transitions_total: LabeledCounter,
    pub mode_entered_at: RwLock<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct InhibitionMetrics {
    pub checks_total: AtomicU64,
    pub inhibited_total: AtomicU64,
    /// gauge: currently recorded target->source pairs
    pub active_pairs: AtomicU64,
}

#[derive(Debug)]
pub struct IngestMetrics {
    pub batches_total: AtomicU64,
    pub alerts_total: AtomicU64,
    pub rejected_total: AtomicU64,
}

/// Registry shared across the whole pipeline. Cloned by Arc only.
#[derive(Debug)]
pub struct PipelineMetrics {
    pub dedup: DedupMetrics,
    pub classification: ClassificationMetrics,
    pub publishing: PublishingMetrics,
    pub mode: ModeMetrics,
    pub inhibition: InhibitionMetrics,
    pub silenced_total: AtomicU64,
    pub filter_blocked_total: LabeledCounter,
    pub ingest: IngestMetrics,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            dedup: DedupMetrics {
                created_total: AtomicU64::new(0),
                updated_total: AtomicU64::new(0),
                ignored_total: AtomicU64::new(0),
                duration: DurationHistogram::dedup_buckets(),
            },
            classification: ClassificationMetrics {
                l1_cache_hits_total: AtomicU64::new(0),
                l2_cache_hits_total: AtomicU64::new(0),
                cache_misses_total: AtomicU64::new(0),
                llm_calls_total: LabeledCounter::default(),
                fallbacks_total: AtomicU64::new(0),
                duration: DurationHistogram::external_buckets(),
            },
            publishing: PublishingMetrics {
                submissions_total: LabeledCounter::default(),
                submissions_rejected_total: LabeledCounter::default(),
                jobs_skipped_total: AtomicU64::new(0),
                failures_total: LabeledCounter::default(),
                per_target_duration: RwLock::new(HashMap::new()),
            },
            mode: ModeMetrics {
                metrics_only: AtomicU64::new(0),
                transitions_total: LabeledCounter::default(),
                mode_entered_at: RwLock::new(Utc::now()),
            },
            inhibition: InhibitionMetrics {
                checks_total: AtomicU64::new(0),
                inhibited_total: AtomicU64::new(0),
                active_pairs: AtomicU64::new(0),
            },
            silenced_total: AtomicU64::new(0),
            filter_blocked_total: LabeledCounter::default(),
            ingest: IngestMetrics {
                batches_total: AtomicU64::new(0),
                alerts_total: AtomicU64::new(0),
                rejected_total: AtomicU64::new(0),
            },
        }
    }

    /// Export everything in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(8192);

        out.push_str("# HELP deduplication_created_total New alerts persisted\n");
        out.push_str("# TYPE deduplication_created_total counter\n");
        out.push_str(&format!(
            "deduplication_created_total {}\n",
            self.dedup.created_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE deduplication_updated_total counter\n");
        out.push_str(&format!(
            "deduplication_updated_total {}\n",
            self.dedup.updated_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE deduplication_ignored_total counter\n");
        out.push_str(&format!(
            "deduplication_ignored_total {}\n",
            self.dedup.ignored_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE deduplication_duration_seconds histogram\n");
        out.push_str(
            &self
                .dedup
                .duration
                .to_prometheus("deduplication_duration_seconds", ""),
        );

        out.push_str("\n# TYPE classification_l1_cache_hits_total counter\n");
        out.push_str(&format!(
            "classification_l1_cache_hits_total {}\n",
            self.classification.l1_cache_hits_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE classification_l2_cache_hits_total counter\n");
        out.push_str(&format!(
            "classification_l2_cache_hits_total {}\n",
            self.classification.l2_cache_hits_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE classification_cache_misses_total counter\n");
        out.push_str(&format!(
            "classification_cache_misses_total {}\n",
            self.classification.cache_misses_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE classification_llm_calls_total counter\n");
        self.classification
            .llm_calls_total
            .export("classification_llm_calls_total", "result", &mut out);
        out.push_str("# TYPE classification_fallbacks_total counter\n");
        out.push_str(&format!(
            "classification_fallbacks_total {}\n",
            self.classification.fallbacks_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE classification_duration_seconds histogram\n");
        out.push_str(
            &self
                .classification
                .duration
                .to_prometheus("classification_duration_seconds", ""),
        );

        out.push_str("\n# TYPE publishing_submissions_total counter\n");
        self.publishing
            .submissions_total
            .export("publishing_submissions_total", "status", &mut out);
        out.push_str("# TYPE publishing_submissions_rejected_total counter\n");
        self.publishing.submissions_rejected_total.export(
            "publishing_submissions_rejected_total",
            "reason",
            &mut out,
        );
        out.push_str("# TYPE publishing_jobs_skipped_total counter\n");
        out.push_str(&format!(
            "publishing_jobs_skipped_total {}\n",
            self.publishing.jobs_skipped_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE publishing_failures_total counter\n");
        self.publishing
            .failures_total
            .export("publishing_failures_total", "target", &mut out);
        out.push_str("# TYPE publishing_duration_seconds histogram\n");
        for (target, hist) in self.publishing.per_target_duration.read().iter() {
            out.push_str(&hist.to_prometheus(
                "publishing_duration_seconds",
                &format!("target=\"{}\"", target),
            ));
        }

        out.push_str("\n# TYPE publishing_mode_metrics_only gauge\n");
        out.push_str(&format!(
            "publishing_mode_metrics_only {}\n",
            self.mode.metrics_only.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE publishing_mode_transitions_total counter\n");
        self.mode
            .transitions_total
            .export("publishing_mode_transitions_total", "transition", &mut out);
        out.push_str("# TYPE publishing_mode_duration_seconds gauge\n");
        let entered = *self.mode.mode_entered_at.read();
        out.push_str(&format!(
            "publishing_mode_duration_seconds {}\n",
            (Utc::now() - entered).num_seconds().max(0)
        ));

        out.push_str("\n# TYPE inhibition_checks_total counter\n");
        out.push_str(&format!(
            "inhibition_checks_total {}\n",
            self.inhibition.checks_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE inhibition_inhibited_total counter\n");
        out.push_str(&format!(
            "inhibition_inhibited_total {}\n",
            self.inhibition.inhibited_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE inhibition_active_pairs gauge\n");
        out.push_str(&format!(
            "inhibition_active_pairs {}\n",
            self.inhibition.active_pairs.load(Ordering::Relaxed)
        ));

        out.push_str("\n# TYPE silencing_silenced_total counter\n");
        out.push_str(&format!(
            "silencing_silenced_total {}\n",
            self.silenced_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE filter_blocked_total counter\n");
        self.filter_blocked_total
            .export("filter_blocked_total", "rule", &mut out);

        out.push_str("\n# TYPE ingest_batches_total counter\n");
        out.push_str(&format!(
            "ingest_batches_total {}\n",
            self.ingest.batches_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE ingest_alerts_total counter\n");
        out.push_str(&format!(
            "ingest_alerts_total {}\n",
            self.ingest.alerts_total.load(Ordering::Relaxed)
        ));
        out.push_str("# TYPE ingest_rejected_total counter\n");
        out.push_str(&format!(
            "ingest_rejected_total {}\n",
            self.ingest.rejected_total.load(Ordering::Relaxed)
        ));

        out
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_cumulative_buckets() {
        let h = DurationHistogram::dedup_buckets();
        h.record(Duration::from_micros(3));
        h.record(Duration::from_micros(80));
        h.record(Duration::from_millis(20)); // beyond last bound, +Inf only

        assert_eq!(h.count(), 3);
        let text = h.to_prometheus("deduplication_duration_seconds", "");
        assert!(text.contains("le=\"+Inf\"} 3"));
        // 3us falls into the 5us bucket and everything above.
        assert!(text.contains("le=\"0.000005\"} 1"));
    }

    #[test]
    fn test_labeled_counter() {
        let c = LabeledCounter::default();
        c.incr("metrics_only");
        c.incr("metrics_only");
        c.incr("overloaded");

        assert_eq!(c.get("metrics_only"), 2);
        assert_eq!(c.get("overloaded"), 1);
        assert_eq!(c.get("unknown"), 0);
    }

    #[test]
    fn test_prometheus_export_contains_families() {
        let m = PipelineMetrics::new();
        m.dedup.created_total.fetch_add(1, Ordering::Relaxed);
        m.publishing.submissions_rejected_total.incr("metrics_only");
        m.publishing
            .record_target_duration("slack-ops", Duration::from_millis(120));
        m.inhibition.checks_total.fetch_add(2, Ordering::Relaxed);

        let out = m.to_prometheus();
        assert!(out.contains("deduplication_created_total 1"));
        assert!(out.contains(
            "publishing_submissions_rejected_total{reason=\"metrics_only\"} 1"
        ));
        assert!(out.contains("publishing_duration_seconds_bucket{target=\"slack-ops\""));
        assert!(out.contains("inhibition_checks_total 2"));
    }
}
