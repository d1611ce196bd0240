//! Rule-based fallback classifier.
//!
//! Ordered substring rules over the alert name; first match wins and a
//! default is always produced, so classification never fails outright.
//! Fallback confidence is capped at 0.8 and results are only cached in the
//! process-local tier.

use chrono::Utc;

use crate::models::{Alert, ClassificationResult, ClassificationSource};

const FALLBACK_CONFIDENCE_CAP: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct FallbackRule {
    /// Case-insensitive substring of the alert name.
    pub name_contains: String,
    pub severity: String,
    pub category: String,
    pub confidence: f64,
    pub tags: Vec<String>,
}

impl FallbackRule {
    fn new(
        name_contains: &str,
        severity: &str,
        category: &str,
        confidence: f64,
        tags: &[&str],
    ) -> Self {
        Self {
            name_contains: name_contains.to_lowercase(),
            severity: severity.to_string(),
            category: category.to_string(),
            confidence,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub struct FallbackClassifier {
    rules: Vec<FallbackRule>,
}

impl FallbackClassifier {
    pub fn new(rules: Vec<FallbackRule>) -> Self {
        Self { rules }
    }

    /// Built-in rule set covering the usual infrastructure alert families.
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            FallbackRule::new("nodedown", "critical", "infrastructure", 0.8, &["node"]),
            FallbackRule::new("instancedown", "critical", "infrastructure", 0.75, &["instance"]),
            FallbackRule::new("oom", "critical", "resources", 0.75, &["memory"]),
            FallbackRule::new("disk", "warning", "capacity", 0.7, &["disk"]),
            FallbackRule::new("cpu", "warning", "resources", 0.7, &["cpu"]),
            FallbackRule::new("memory", "warning", "resources", 0.7, &["memory"]),
            FallbackRule::new("latency", "warning", "performance", 0.65, &["latency"]),
            FallbackRule::new("error", "critical", "application", 0.65, &["errors"]),
            FallbackRule::new("cert", "warning", "security", 0.7, &["tls"]),
            FallbackRule::new("watchdog", "info", "meta", 0.8, &["heartbeat"]),
        ])
    }

    pub fn classify(&self, alert: &Alert) -> ClassificationResult {
        let name = alert.name().to_lowercase();

        for rule in &self.rules {
            if name.contains(&rule.name_contains) {
                return ClassificationResult {
                    severity: rule.severity.clone(),
                    category: rule.category.clone(),
                    confidence: rule.confidence.min(FALLBACK_CONFIDENCE_CAP),
                    reasoning: format!(
                        "rule match: alert name contains \"{}\"",
                        rule.name_contains
                    ),
                    tags: rule.tags.clone(),
                    action_items: Vec::new(),
                    source: ClassificationSource::FallbackRule,
                    classified_at: Utc::now(),
                };
            }
        }

        // Default: trust the severity label if present, otherwise warning.
        let severity = alert.severity().unwrap_or("warning").to_string();
        ClassificationResult {
            severity,
            category: "general".to_string(),
            confidence: 0.5,
            reasoning: "no fallback rule matched".to_string(),
            tags: Vec::new(),
            action_items: Vec::new(),
            source: ClassificationSource::FallbackRule,
            classified_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertStatus;
    use std::collections::BTreeMap;

    fn alert(name: &str, severity: Option<&str>) -> Alert {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), name.to_string());
        if let Some(sev) = severity {
            labels.insert("severity".to_string(), sev.to_string());
        }
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

    #[test]
    fn test_first_match_wins() {
        let c = FallbackClassifier::with_default_rules();
        // "NodeDown" matches the nodedown rule before anything else.
        let result = c.classify(&alert("NodeDownCpu", None));
        assert_eq!(result.severity, "critical");
        assert_eq!(result.category, "infrastructure");
        assert_eq!(result.source, ClassificationSource::FallbackRule);
    }

    #[test]
    fn test_case_insensitive_match() {
        let c = FallbackClassifier::with_default_rules();
        let result = c.classify(&alert("HIGHCPU", None));
        assert_eq!(result.category, "resources");
    }

    #[test]
    fn test_default_result_uses_severity_label() {
        let c = FallbackClassifier::with_default_rules();
        let result = c.classify(&alert("SomethingUnusual", Some("critical")));
        assert_eq!(result.severity, "critical");
        assert_eq!(result.category, "general");
        assert_eq!(result.confidence, 0.5);

        let result = c.classify(&alert("SomethingUnusual", None));
        assert_eq!(result.severity, "warning");
    }

    #[test]
    fn test_confidence_never_exceeds_cap() {
        let c = FallbackClassifier::new(vec![FallbackRule::new(
            "x",
            "critical",
            "test",
            0.99,
            &[],
        )]);
        let result = c.classify(&alert("xyz", None));
        assert!(result.confidence <= 0.8);
    }
}
