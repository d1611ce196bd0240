//! Time-windowed, matcher-based muting.
//!
//! Silences are evaluated independently and cheaply; there is no rule
//! interaction. Silenced alerts still persist to history, they just never
//! reach the publishing coordinator.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::PipelineMetrics;
use crate::models::{Alert, Matcher, SilenceRule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SilenceOutcome {
    Silenced { silence_id: String },
    NotSilenced,
}

pub struct SilenceEngine {
    silences: ArcSwap<Vec<SilenceRule>>,
    metrics: Arc<PipelineMetrics>,
}

impl SilenceEngine {
    pub fn new(silences: Vec<SilenceRule>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            silences: ArcSwap::from_pointee(silences),
            metrics,
        }
    }

    pub fn silences(&self) -> Arc<Vec<SilenceRule>> {
        self.silences.load_full()
    }

    pub fn set_silences(&self, silences: Vec<SilenceRule>) {
        self.silences.store(Arc::new(silences));
    }

    /// Create a silence at runtime. Returns its id.
    pub fn add_silence(
        &self,
        matchers: Vec<Matcher>,
        starts_at: chrono::DateTime<Utc>,
        ends_at: chrono::DateTime<Utc>,
        created_by: String,
        comment: String,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let rule = SilenceRule {
            id: id.clone(),
            matchers,
            starts_at,
            ends_at,
            created_by,
            comment,
        };
        let mut next: Vec<SilenceRule> = self.silences.load().as_ref().clone();
        next.push(rule);
        self.silences.store(Arc::new(next));
        id
    }

    pub fn check(&self, alert: &Alert) -> SilenceOutcome {
        let now = Utc::now();
        for rule in self.silences.load().iter() {
            if rule.silences(alert, now) {
                self.metrics.silenced_total.fetch_add(1, Ordering::Relaxed);
                debug!(
                    fingerprint = %alert.fingerprint,
                    silence = %rule.id,
                    "Alert silenced"
                );
                return SilenceOutcome::Silenced {
                    silence_id: rule.id.clone(),
                };
            }
        }
        SilenceOutcome::NotSilenced
    }
}
