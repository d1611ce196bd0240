//! Core domain model: alerts, matchers, suppression rules, and runtime config.
//!
//! Everything downstream of ingest works on these types. Alerts are owned by
//! the deduplicator once persisted; the rest of the pipeline sees clones.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Alert lifecycle status. An alert may go firing -> resolved -> firing
/// (a new episode of the same fingerprint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central entity. Created at ingest, updated on status changes, never
/// deleted. `fingerprint` is a deterministic function of `labels` only and
/// is always recomputed server-side; ingest-provided fingerprints are
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub fingerprint: String,
    /// Sorted map so label iteration order is stable for hashing and display.
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub status: AlertStatus,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generator_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Attached by the classification stage when the enrichment mode asks
    /// for it. Not part of identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
}

impl Alert {
    /// Severity is drawn from the label set, not stored separately.
    pub fn severity(&self) -> Option<&str> {
        self.labels.get("severity").map(|s| s.as_str())
    }

    pub fn name(&self) -> &str {
        self.labels
            .get("alertname")
            .map(|s| s.as_str())
            .unwrap_or("unknown")
    }

    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationSource {
    Llm,
    FallbackRule,
    Cached,
}

/// Output of the classification service, keyed by fingerprint and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub severity: String,
    pub category: String,
    /// 0.0 ..= 1.0. Fallback-rule results are capped at 0.8.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    pub source: ClassificationSource,
    pub classified_at: DateTime<Utc>,
}

impl ClassificationResult {
    /// Same result re-served from a cache tier.
    pub fn as_cached(mut self) -> Self {
        self.source = ClassificationSource::Cached;
        self
    }
}

/// Label matcher operator set. `regex` / `not_regex` compile lazily and are
/// cached process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    Eq,
    Ne,
    Regex,
    NotRegex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    pub label: String,
    pub op: MatchOperator,
    pub value: String,
}

lazy_static! {
    /// Compiled-regex cache shared by every matcher evaluation. Patterns
    /// come from config so the set is small and stable.
    static ref REGEX_CACHE: RwLock<HashMap<String, Regex>> = RwLock::new(HashMap::new());
}

fn cached_regex(pattern: &str) -> Option<Regex> {
    if let Some(re) = REGEX_CACHE.read().get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    REGEX_CACHE.write().insert(pattern.to_string(), re.clone());
    Some(re)
}

impl Matcher {
    pub fn new(label: impl Into<String>, op: MatchOperator, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate against a label set. A missing label matches `ne` and
    /// `not_regex` (there is nothing to conflict with) and fails `eq` and
    /// `regex`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(&self.label);
        match self.op {
            MatchOperator::Eq => actual.map(|v| v == &self.value).unwrap_or(false),
            MatchOperator::Ne => actual.map(|v| v != &self.value).unwrap_or(true),
            MatchOperator::Regex => match (actual, cached_regex(&self.value)) {
                (Some(v), Some(re)) => re.is_match(v),
                _ => false,
            },
            MatchOperator::NotRegex => match actual {
                None => true,
                Some(v) => cached_regex(&self.value)
                    .map(|re| !re.is_match(v))
                    .unwrap_or(true),
            },
        }
    }
}

/// True when every matcher in the set matches the label set.
pub fn matchers_match(matchers: &[Matcher], labels: &BTreeMap<String, String>) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}

/// Match a value against a cached pattern. None when the pattern does not
/// compile.
pub fn cached_regex_match(pattern: &str, value: &str) -> Option<bool> {
    cached_regex(pattern).map(|re| re.is_match(value))
}

/// A firing alert matching `source_match` suppresses any alert matching
/// `target_match` whose values on every `equal` key agree with the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InhibitionRule {
    pub name: String,
    pub source_match: Vec<Matcher>,
    pub target_match: Vec<Matcher>,
    #[serde(default)]
    pub equal: Vec<String>,
}

/// Time-windowed mute. Silenced alerts still persist to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceRule {
    pub id: String,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub comment: String,
}

impl SilenceRule {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    pub fn silences(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        self.is_active(now) && matchers_match(&self.matchers, &alert.labels)
    }
}

/// Process-wide enrichment mode. Selected per request at pipeline entry;
/// in-flight requests keep the mode they started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentMode {
    /// Skip the classifier; silencing and filtering still apply.
    Transparent,
    /// Classify, then filter. Default.
    Enriched,
    /// Skip classifier and filter; publish to all matched targets.
    TransparentWithRecommendations,
}

impl EnrichmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentMode::Transparent => "transparent",
            EnrichmentMode::Enriched => "enriched",
            EnrichmentMode::TransparentWithRecommendations => "transparent_with_recommendations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "transparent" => Some(EnrichmentMode::Transparent),
            "enriched" => Some(EnrichmentMode::Enriched),
            "transparent_with_recommendations" => {
                Some(EnrichmentMode::TransparentWithRecommendations)
            }
            _ => None,
        }
    }
}

impl Default for EnrichmentMode {
    fn default() -> Self {
        EnrichmentMode::Enriched
    }
}

/// Fingerprint algorithm selector. FNV-1a is the wire-compatible default;
/// SHA-256 exists for legacy deployments only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    Fnv1a,
    Sha256,
}

impl Default for FingerprintAlgorithm {
    fn default() -> Self {
        FingerprintAlgorithm::Fnv1a
    }
}

/// Per-alert outcome reported in the ingest summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertResult {
    pub fingerprint: String,
    pub alert_name: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_targets: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_targets: Option<usize>,
}

/// Batch ingest summary returned to the producer. Every alert lands in
/// exactly one terminal bucket, so `total_received = published + filtered
/// + inhibited + silenced + ignored + metrics_only + errors` always holds;
/// the pipeline tests enforce it. Annotation-only updates count as
/// published (the row was accepted and re-persisted).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub total_received: usize,
    pub total_processed: usize,
    pub total_classified: usize,
    pub total_filtered: usize,
    pub total_inhibited: usize,
    pub total_silenced: usize,
    pub total_ignored_duplicates: usize,
    /// Alerts that ran the full pipeline while no targets were eligible.
    pub total_metrics_only: usize,
    pub total_published: usize,
    pub total_errors: usize,
    pub per_alert_results: Vec<AlertResult>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Classification / LLM tuning.
#[derive(Debug, Clone)]
pub struct ClassificationConfig {
    pub enabled: bool,
    pub cache_ttl_l1: Duration,
    pub cache_ttl_l2: Duration,
    pub l1_max_entries: usize,
    pub llm_api_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub batch_max_size: usize,
    pub batch_max_concurrent: usize,
}

impl ClassificationConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("CLASSIFICATION_ENABLED", true),
            cache_ttl_l1: Duration::from_secs(env_parse("CLASSIFICATION_CACHE_TTL_L1_SECS", 300)),
            cache_ttl_l2: Duration::from_secs(env_parse("CLASSIFICATION_CACHE_TTL_L2_SECS", 3600)),
            l1_max_entries: env_parse("CLASSIFICATION_L1_MAX_ENTRIES", 1000),
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            llm_api_key: env_opt("LLM_API_KEY"),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 10)),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", 2),
            circuit_failure_threshold: env_parse("LLM_CIRCUIT_FAILURE_THRESHOLD", 5),
            circuit_cooldown: Duration::from_secs(env_parse("LLM_CIRCUIT_COOLDOWN_SECS", 30)),
            batch_max_size: env_parse("CLASSIFICATION_BATCH_MAX_SIZE", 50),
            batch_max_concurrent: env_parse("CLASSIFICATION_BATCH_MAX_CONCURRENT", 5),
        }
    }
}

/// Publishing coordinator tuning.
#[derive(Debug, Clone)]
pub struct PublishingConfig {
    pub parallel: bool,
    pub per_target_concurrency: usize,
    pub worker_pool_size: usize,
    pub retry_max_attempts: u32,
    pub retry_initial_interval: Duration,
    pub retry_max_interval: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    /// Waiting on the worker pool longer than this rejects the submission
    /// with `Overloaded`.
    pub overload_wait: Duration,
    pub preflight_enabled: bool,
    pub preflight_timeout: Duration,
    pub attempt_timeout: Duration,
}

impl PublishingConfig {
    pub fn from_env() -> Self {
        Self {
            parallel: env_flag("PUBLISHING_PARALLEL", true),
            per_target_concurrency: env_parse("PUBLISHING_PER_TARGET_CONCURRENCY", 4usize).max(1),
            worker_pool_size: env_parse("PUBLISHING_WORKER_POOL_SIZE", 16usize).max(1),
            retry_max_attempts: env_parse("PUBLISHING_RETRY_MAX_ATTEMPTS", 4u32).max(1),
            retry_initial_interval: Duration::from_millis(env_parse(
                "PUBLISHING_RETRY_INITIAL_MS",
                100,
            )),
            retry_max_interval: Duration::from_millis(env_parse("PUBLISHING_RETRY_MAX_MS", 5000)),
            circuit_failure_threshold: env_parse("PUBLISHING_CIRCUIT_FAILURE_THRESHOLD", 3),
            circuit_cooldown: Duration::from_secs(env_parse(
                "PUBLISHING_CIRCUIT_COOLDOWN_SECS",
                30,
            )),
            overload_wait: Duration::from_millis(env_parse("PUBLISHING_OVERLOAD_WAIT_MS", 2000)),
            preflight_enabled: env_flag("PUBLISHING_PREFLIGHT_ENABLED", true),
            preflight_timeout: Duration::from_millis(env_parse("PUBLISHING_PREFLIGHT_MS", 50)),
            attempt_timeout: Duration::from_secs(env_parse("PUBLISHING_ATTEMPT_TIMEOUT_SECS", 10)),
        }
    }
}

/// Target discovery tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub refresh_interval: Duration,
    pub label_selector: Option<String>,
    pub targets_file: Option<String>,
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        Self {
            refresh_interval: Duration::from_secs(env_parse("DISCOVERY_REFRESH_SECS", 60)),
            label_selector: env_opt("DISCOVERY_LABEL_SELECTOR"),
            targets_file: env_opt("TARGETS_FILE"),
        }
    }
}

/// Top-level runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub api_token: Option<String>,
    pub fingerprint_algorithm: FingerprintAlgorithm,
    pub rules_file: Option<String>,
    pub filter_timezone_offset_hours: i32,
    pub mode_refresh_interval: Duration,
    pub max_batch_alerts: usize,
    pub classification: ClassificationConfig,
    pub publishing: PublishingConfig,
    pub discovery: DiscoveryConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let fingerprint_algorithm = match std::env::var("FINGERPRINT_ALGORITHM").as_deref() {
            Ok("sha256") => FingerprintAlgorithm::Sha256,
            _ => FingerprintAlgorithm::Fnv1a,
        };

        Self {
            port: env_parse("PORT", 3000),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "alerthub_history.db".to_string()),
            api_token: env_opt("API_TOKEN"),
            fingerprint_algorithm,
            rules_file: env_opt("RULES_FILE"),
            filter_timezone_offset_hours: env_parse("FILTER_TIMEZONE_OFFSET_HOURS", 0),
            mode_refresh_interval: Duration::from_secs(env_parse("MODE_REFRESH_SECS", 30u64).min(30)),
            max_batch_alerts: env_parse("MAX_BATCH_ALERTS", 500),
            classification: ClassificationConfig::from_env(),
            publishing: PublishingConfig::from_env(),
            discovery: DiscoveryConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_matcher_eq_ne() {
        let l = labels(&[("alertname", "HighCPU"), ("severity", "critical")]);

        assert!(Matcher::new("alertname", MatchOperator::Eq, "HighCPU").matches(&l));
        assert!(!Matcher::new("alertname", MatchOperator::Eq, "LowCPU").matches(&l));
        assert!(Matcher::new("alertname", MatchOperator::Ne, "LowCPU").matches(&l));
        // Missing label: eq fails, ne holds.
        assert!(!Matcher::new("instance", MatchOperator::Eq, "web-01").matches(&l));
        assert!(Matcher::new("instance", MatchOperator::Ne, "web-01").matches(&l));
    }

    #[test]
    fn test_matcher_regex() {
        let l = labels(&[("instance", "web-01.prod")]);

        assert!(Matcher::new("instance", MatchOperator::Regex, "^web-\\d+").matches(&l));
        assert!(!Matcher::new("instance", MatchOperator::Regex, "^db-").matches(&l));
        assert!(Matcher::new("instance", MatchOperator::NotRegex, "^db-").matches(&l));
        // Missing label fails regex, passes not_regex.
        assert!(!Matcher::new("node", MatchOperator::Regex, ".*").matches(&l));
        assert!(Matcher::new("node", MatchOperator::NotRegex, ".*").matches(&l));
    }

    #[test]
    fn test_silence_window() {
        let now = Utc::now();
        let rule = SilenceRule {
            id: "s1".to_string(),
            matchers: vec![Matcher::new("alertname", MatchOperator::Eq, "HighCPU")],
            starts_at: now - chrono::Duration::hours(1),
            ends_at: now + chrono::Duration::hours(1),
            created_by: "ops".to_string(),
            comment: String::new(),
        };

        assert!(rule.is_active(now));
        assert!(!rule.is_active(now + chrono::Duration::hours(2)));
        // ends_at is exclusive
        assert!(!rule.is_active(rule.ends_at));
        assert!(rule.is_active(rule.starts_at));
    }

    #[test]
    fn test_enrichment_mode_parse() {
        assert_eq!(
            EnrichmentMode::parse("enriched"),
            Some(EnrichmentMode::Enriched)
        );
        assert_eq!(
            EnrichmentMode::parse("transparent_with_recommendations"),
            Some(EnrichmentMode::TransparentWithRecommendations)
        );
        assert_eq!(EnrichmentMode::parse("bogus"), None);
        assert_eq!(EnrichmentMode::default().as_str(), "enriched");
    }
}
