//! Post-classification filter engine.
//!
//! An ordered list of named rules, each of one kind with an allow/deny
//! action. Evaluation is short-circuit: the first rule whose predicate
//! matches the alert decides. Frequency rules keep small per-fingerprint
//! counters with time-windowed decay.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{FixedOffset, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::PipelineMetrics;
use crate::models::Alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Allow,
    Deny,
}

impl Default for FilterAction {
    fn default() -> Self {
        FilterAction::Allow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Label,
    Severity,
    Time,
    Regex,
    Frequency,
    Health,
    Geo,
}

/// One configured rule. Kind-specific fields are optional in the TOML and
/// validated lazily; a rule missing its required fields never matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRuleConfig {
    pub name: String,
    pub kind: FilterKind,
    pub action: FilterAction,

    /// label/regex/geo kinds: which label to look at.
    #[serde(default)]
    pub label: Option<String>,
    /// label kind: exact value to compare.
    #[serde(default)]
    pub value: Option<String>,
    /// regex kind: pattern applied to the label value.
    #[serde(default)]
    pub pattern: Option<String>,
    /// severity kind: matching severities.
    #[serde(default)]
    pub severities: Vec<String>,
    /// time kind: [start_hour, end_hour) in the engine timezone, wrapping
    /// past midnight when start > end.
    #[serde(default)]
    pub start_hour: Option<u32>,
    #[serde(default)]
    pub end_hour: Option<u32>,
    /// frequency kind: more than `max_per_window` observations of one
    /// fingerprint inside `window_secs` matches.
    #[serde(default)]
    pub max_per_window: Option<u32>,
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// health kind: alert names treated as watchdog/heartbeat noise.
    #[serde(default)]
    pub alertnames: Vec<String>,
    /// geo kind: matching region values.
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    ShouldPublish,
    Blocked { rule: String },
}

const DEFAULT_WATCHDOG_NAMES: &[&str] = &["Watchdog", "DeadMansSnitch", "Heartbeat"];

pub struct FilterEngine {
    rules: Vec<FilterRuleConfig>,
    default_action: FilterAction,
    timezone: FixedOffset,
    metrics: Arc<PipelineMetrics>,
    /// (rule, fingerprint) -> observation times inside the rule window.
    frequency: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl FilterEngine {
    pub fn new(
        rules: Vec<FilterRuleConfig>,
        default_action: FilterAction,
        timezone_offset_hours: i32,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let timezone = FixedOffset::east_opt(timezone_offset_hours.clamp(-23, 23) * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        Self {
            rules,
            default_action,
            timezone,
            metrics,
            frequency: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &[FilterRuleConfig] {
        &self.rules
    }

    pub fn evaluate(&self, alert: &Alert) -> FilterDecision {
        for rule in &self.rules {
            if self.rule_matches(rule, alert) {
                return self.decide(&rule.name, rule.action, alert);
            }
        }
        self.decide("default", self.default_action, alert)
    }

    fn decide(&self, rule: &str, action: FilterAction, alert: &Alert) -> FilterDecision {
        match action {
            FilterAction::Allow => FilterDecision::ShouldPublish,
            FilterAction::Deny => {
                self.metrics.filter_blocked_total.incr(rule);
                debug!(fingerprint = %alert.fingerprint, rule, "Alert blocked by filter");
                FilterDecision::Blocked {
                    rule: rule.to_string(),
                }
            }
        }
    }

    fn rule_matches(&self, rule: &FilterRuleConfig, alert: &Alert) -> bool {
        match rule.kind {
            FilterKind::Label => match (&rule.label, &rule.value) {
                (Some(label), Some(value)) => alert.labels.get(label) == Some(value),
                _ => false,
            },
            FilterKind::Severity => {
                // Classifier-assigned severity wins over the raw label.
                let effective = alert
                    .classification
                    .as_ref()
                    .map(|c| c.severity.as_str())
                    .or_else(|| alert.severity());
                effective
                    .map(|sev| rule.severities.iter().any(|s| s == sev))
                    .unwrap_or(false)
            }
            FilterKind::Time => match (rule.start_hour, rule.end_hour) {
                (Some(start), Some(end)) => {
                    let hour = Utc::now().with_timezone(&self.timezone).hour();
                    if start <= end {
                        hour >= start && hour < end
                    } else {
                        // Window wraps midnight, e.g. 22..6.
                        hour >= start || hour < end
                    }
                }
                _ => false,
            },
            FilterKind::Regex => match (&rule.label, &rule.pattern) {
                (Some(label), Some(pattern)) => alert
                    .labels
                    .get(label)
                    .and_then(|v| crate::models::cached_regex_match(pattern, v))
                    .unwrap_or(false),
                _ => false,
            },
            FilterKind::Frequency => {
                let (Some(max), Some(window_secs)) = (rule.max_per_window, rule.window_secs)
                else {
                    return false;
                };
                let window = Duration::from_secs(window_secs);
                let now = Instant::now();
                let mut tracker = self.frequency.lock();
                let entry = tracker
                    .entry((rule.name.clone(), alert.fingerprint.clone()))
                    .or_default();
                while entry
                    .front()
                    .map(|t| now.duration_since(*t) > window)
                    .unwrap_or(false)
                {
                    entry.pop_front();
                }
                entry.push_back(now);
                entry.len() as u32 > max
            }
            FilterKind::Health => {
                let names: Vec<&str> = if rule.alertnames.is_empty() {
                    DEFAULT_WATCHDOG_NAMES.to_vec()
                } else {
                    rule.alertnames.iter().map(|s| s.as_str()).collect()
                };
                names.contains(&alert.name())
            }
            FilterKind::Geo => {
                let label = rule.label.as_deref().unwrap_or("region");
                alert
                    .labels
                    .get(label)
                    .map(|region| rule.regions.iter().any(|r| r == region))
                    .unwrap_or(false)
            }
        }
    }
}
