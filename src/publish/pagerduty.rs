//! PagerDuty Events v2 publisher.
//!
//! trigger/resolve with the fingerprint as dedup_key, so PagerDuty collapses
//! repeats into one incident and resolves it when the alert clears.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::Alert;
use crate::publish::publisher::{post_json, LifecycleAction, Publisher, SendOutcome};
use crate::publish::targets::TargetDescriptor;

pub struct PagerdutyPublisher {
    descriptor: TargetDescriptor,
    client: reqwest::Client,
}

impl PagerdutyPublisher {
    pub fn new(descriptor: TargetDescriptor, client: reqwest::Client) -> Self {
        Self { descriptor, client }
    }

    fn pd_severity(alert: &Alert) -> &'static str {
        match alert
            .classification
            .as_ref()
            .map(|c| c.severity.as_str())
            .or_else(|| alert.severity())
        {
            Some("critical") => "critical",
            Some("warning") => "warning",
            Some("info") => "info",
            _ => "error",
        }
    }
}

#[async_trait]
impl Publisher for PagerdutyPublisher {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn format(&self, alert: &Alert, action: LifecycleAction) -> Value {
        let event_action = match action {
            LifecycleAction::Create => "trigger",
            LifecycleAction::Update => "trigger",
            LifecycleAction::Resolve => "resolve",
        };

        let mut payload = json!({
            "routing_key": self.descriptor.credentials.clone().unwrap_or_default(),
            "event_action": event_action,
            "dedup_key": alert.fingerprint,
        });

        if event_action == "trigger" {
            payload["payload"] = json!({
                "summary": alert
                    .annotations
                    .get("summary")
                    .cloned()
                    .unwrap_or_else(|| alert.name().to_string()),
                "source": alert
                    .labels
                    .get("instance")
                    .cloned()
                    .unwrap_or_else(|| "alerthub".to_string()),
                "severity": Self::pd_severity(alert),
                "timestamp": alert.starts_at.to_rfc3339(),
                "custom_details": {
                    "labels": alert.labels,
                    "annotations": alert.annotations,
                    "classification": alert.classification,
                },
            });
        }

        payload
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
        Some(alert.fingerprint.clone())
    }
}
