//! Slack webhook publisher.
//!
//! Formats alerts as block-kit messages. Repeated sends of one fingerprint
//! within a day share a dedup key so the channel can thread updates instead
//! of stacking new messages.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cache::TtlCache;
use crate::models::Alert;
use crate::publish::publisher::{post_json, LifecycleAction, Publisher, SendOutcome};
use crate::publish::targets::TargetDescriptor;

const DEDUP_TTL: Duration = Duration::from_secs(24 * 3600);

pub struct SlackPublisher {
    descriptor: TargetDescriptor,
    client: reqwest::Client,
    /// fingerprint -> dedup key, ~24h, mirrors how long Slack threads stay
    /// useful.
    dedup_keys: TtlCache<String>,
}

impl SlackPublisher {
    pub fn new(descriptor: TargetDescriptor, client: reqwest::Client) -> Self {
        Self {
            descriptor,
            client,
            dedup_keys: TtlCache::new(DEDUP_TTL, 4096),
        }
    }

    fn severity_emoji(alert: &Alert) -> &'static str {
        match alert
            .classification
            .as_ref()
            .map(|c| c.severity.as_str())
            .or_else(|| alert.severity())
        {
            Some("critical") => "🔴",
            Some("warning") => "🟠",
            Some("info") => "🔵",
            _ => "⚪",
        }
    }
}

#[async_trait]
impl Publisher for SlackPublisher {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn format(&self, alert: &Alert, action: LifecycleAction) -> Value {
        let headline = match action {
            LifecycleAction::Resolve => format!("✅ Resolved: {}", alert.name()),
            _ => format!("{} Firing: {}", Self::severity_emoji(alert), alert.name()),
        };

        let mut fields: Vec<Value> = alert
            .labels
            .iter()
            .take(10)
            .map(|(k, v)| json!({"type": "mrkdwn", "text": format!("*{}:* {}", k, v)}))
            .collect();
        if let Some(c) = &alert.classification {
            fields.push(json!({
                "type": "mrkdwn",
                "text": format!("*classification:* {} / {} ({:.0}%)",
                    c.severity, c.category, c.confidence * 100.0)
            }));
        }

        let mut blocks = vec![
            json!({"type": "header", "text": {"type": "plain_text", "text": headline}}),
            json!({"type": "section", "fields": fields}),
        ];
        if let Some(summary) = alert.annotations.get("summary") {
            blocks.push(json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": summary}
            }));
        }

        json!({
            "text": format!("{}: {}", alert.status, alert.name()),
            "blocks": blocks,
        })
    }

    async fn send(&self, payload: &Value, timeout: Duration) -> SendOutcome {
        post_json(
            &self.client,
            &self.descriptor.url,
            &self.descriptor.headers,
            payload,
            timeout,
        )
        .await
    }

    fn dedup_key(&self, alert: &Alert) -> Option<String> {
        if let Some(existing) = self.dedup_keys.get(&alert.fingerprint) {
            return Some(existing);
        }
        let key = format!("slack-{}", alert.fingerprint);
        self.dedup_keys.put(alert.fingerprint.clone(), key.clone());
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertStatus;
    use crate::publish::targets::TargetKind;
    use chrono::Utc;
    use std::collections::{BTreeMap, HashMap};

    fn publisher() -> SlackPublisher {
        SlackPublisher::new(
            TargetDescriptor {
                name: "slack-ops".to_string(),
                kind: TargetKind::Slack,
                url: "https://hooks.slack.com/services/T0/B0/xyz".to_string(),
                headers: HashMap::new(),
                credentials: None,
                enabled: true,
                matchers: Vec::new(),
                labels: HashMap::new(),
            },
            reqwest::Client::new(),
        )
    }

    fn alert(status: AlertStatus) -> Alert {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), "HighCPU".to_string());
        labels.insert("severity".to_string(), "critical".to_string());
        let mut annotations = BTreeMap::new();
        annotations.insert("summary".to_string(), "CPU at 99%".to_string());
        let now = Utc::now();
        Alert {
            fingerprint: crate::fingerprint::fnv1a_fingerprint(&labels),
            labels,
            annotations,
            status,
            starts_at: now,
            ends_at: None,
            generator_url: None,
            created_at: now,
            updated_at: now,
            classification: None,
        }
    }

    #[test]
    fn test_format_firing_has_blocks() {
        let p = publisher();
        let payload = p.format(&alert(AlertStatus::Firing), LifecycleAction::Create);
        let blocks = payload.get("blocks").unwrap().as_array().unwrap();
        assert!(blocks.len() >= 2);
        let header = blocks[0]["text"]["text"].as_str().unwrap();
        assert!(header.contains("Firing: HighCPU"));
    }

    #[test]
    fn test_format_resolved_headline() {
        let p = publisher();
        let payload = p.format(&alert(AlertStatus::Resolved), LifecycleAction::Resolve);
        let header = payload["blocks"][0]["text"]["text"].as_str().unwrap();
        assert!(header.starts_with("✅ Resolved"));
    }

    #[test]
    fn test_dedup_key_stable_within_ttl() {
        let p = publisher();
        let a = alert(AlertStatus::Firing);
        let k1 = p.dedup_key(&a).unwrap();
        let k2 = p.dedup_key(&a).unwrap();
        assert_eq!(k1, k2);
    }
}
