//! Classification service: two-tier cache over the LLM, fallback underneath.
//!
//! Resolution order per fingerprint: L1 (process-local, short TTL, bounded)
//! -> L2 (shared kv tier, long TTL) -> LLM -> rule fallback. Concurrent
//! misses for the same fingerprint are single-flighted: the first caller
//! does the external work, the rest wait and hit L1.
//!
//! Fallback results are cached in L1 only. Writing them to the shared tier
//! would poison other replicas for the whole L2 TTL.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::classify::fallback::FallbackClassifier;
use crate::classify::llm::LlmClient;
use crate::metrics::PipelineMetrics;
use crate::models::{Alert, ClassificationConfig, ClassificationResult};
use crate::storage::HistoryStore;

const L2_KEY_PREFIX: &str = "classify:";

pub struct ClassificationService {
    config: ClassificationConfig,
    l1: TtlCache<ClassificationResult>,
    store: Arc<HistoryStore>,
    llm: Option<LlmClient>,
    fallback: FallbackClassifier,
    metrics: Arc<PipelineMetrics>,
    /// Per-fingerprint single-flight locks.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClassificationService {
    pub fn new(
        config: ClassificationConfig,
        store: Arc<HistoryStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let llm = if config.enabled {
            match LlmClient::new(&config, metrics.clone()) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "LLM client unavailable, classification will use fallback rules only");
                    None
                }
            }
        } else {
            None
        };

        Self {
            l1: TtlCache::new(config.cache_ttl_l1, config.l1_max_entries),
            config,
            store,
            llm,
            fallback: FallbackClassifier::with_default_rules(),
            metrics,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn llm_circuit(&self) -> Option<&crate::circuit::CircuitBreaker> {
        self.llm.as_ref().map(|l| l.circuit())
    }

    fn flight_lock(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inflight = self.inflight.lock();
        if inflight.len() > 2048 {
            inflight.retain(|_, l| Arc::strong_count(l) > 1);
        }
        inflight
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Classify one alert. Never fails: the worst case is a low-confidence
    /// fallback answer.
    pub async fn classify(&self, alert: &Alert) -> ClassificationResult {
        let started = Instant::now();
        let result = self.classify_inner(alert).await;
        self.metrics.classification.duration.record(started.elapsed());
        result
    }

    async fn classify_inner(&self, alert: &Alert) -> ClassificationResult {
        let fp = alert.fingerprint.as_str();

        if let Some(hit) = self.l1.get(fp) {
            self.metrics
                .classification
                .l1_cache_hits_total
                .fetch_add(1, Ordering::Relaxed);
            return hit.as_cached();
        }

        // Single-flight: one external call per fingerprint at a time.
        let lock = self.flight_lock(fp);
        let _guard = lock.lock().await;

        // A concurrent caller may have populated L1 while we waited.
        if let Some(hit) = self.l1.get(fp) {
            self.metrics
                .classification
                .l1_cache_hits_total
                .fetch_add(1, Ordering::Relaxed);
            return hit.as_cached();
        }

        if let Some(hit) = self.l2_get(fp) {
            self.metrics
                .classification
                .l2_cache_hits_total
                .fetch_add(1, Ordering::Relaxed);
            self.l1.put(fp, hit.clone());
            return hit.as_cached();
        }

        self.metrics
            .classification
            .cache_misses_total
            .fetch_add(1, Ordering::Relaxed);

        if let Some(llm) = &self.llm {
            match llm.classify(alert).await {
                Ok(result) => {
                    self.l2_put(fp, &result);
                    self.l1.put(fp, result.clone());
                    debug!(fingerprint = %fp, severity = %result.severity, "Classified via LLM");
                    return result;
                }
                Err(e) => {
                    debug!(fingerprint = %fp, error = %e, "LLM unavailable, using fallback rules");
                }
            }
        }

        let result = self.fallback.classify(alert);
        self.metrics
            .classification
            .fallbacks_total
            .fetch_add(1, Ordering::Relaxed);
        // L1 only: fallback answers must not reach the shared tier.
        self.l1.put(fp, result.clone());
        result
    }

    /// Batch classification with bounded concurrency. The batch is trimmed
    /// to the configured max; partial failure is impossible because the
    /// fallback always answers.
    pub async fn classify_batch(&self, alerts: Vec<Alert>) -> Vec<(String, ClassificationResult)> {
        let batch: Vec<Alert> = alerts
            .into_iter()
            .take(self.config.batch_max_size)
            .collect();
        let semaphore = Semaphore::new(self.config.batch_max_concurrent.max(1));

        futures_util::future::join_all(batch.into_iter().map(|alert| {
            let sem = &semaphore;
            async move {
                let _permit = sem.acquire().await;
                let result = self.classify(&alert).await;
                (alert.fingerprint, result)
            }
        }))
        .await
    }

    fn l2_get(&self, fingerprint: &str) -> Option<ClassificationResult> {
        let key = format!("{L2_KEY_PREFIX}{fingerprint}");
        let (value, fetched_at) = match self.store.kv_get(&key) {
            Ok(Some(pair)) => pair,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "L2 read failed (treated as miss)");
                return None;
            }
        };
        let age = Utc::now().timestamp() - fetched_at;
        if age > self.config.cache_ttl_l2.as_secs() as i64 {
            return None;
        }
        serde_json::from_str(&value).ok()
    }

    fn l2_put(&self, fingerprint: &str, result: &ClassificationResult) {
        let key = format!("{L2_KEY_PREFIX}{fingerprint}");
        let Ok(value) = serde_json::to_string(result) else {
            return;
        };
        if let Err(e) = self.store.kv_put(&key, &value, Utc::now().timestamp()) {
            debug!(error = %e, "L2 write failed (non-blocking)");
        }
    }
}
