//! Rootly incident publisher.
//!
//! Creates an incident event on firing and marks it resolved when the alert
//! clears. Rootly keys incidents off our fingerprint via the idempotency
//! field.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::Alert;
use crate::publish::publisher::{post_json, LifecycleAction, Publisher, SendOutcome};
use crate::publish::targets::TargetDescriptor;

pub struct RootlyPublisher {
    descriptor: TargetDescriptor,
    client: reqwest::Client,
}

impl RootlyPublisher {
    pub fn new(mut descriptor: TargetDescriptor, client: reqwest::Client) -> Self {
        if let Some(token) = descriptor.credentials.clone() {
            descriptor
                .headers
                .entry("Authorization".to_string())
                .or_insert_with(|| format!("Bearer {token}"));
        }
        Self { descriptor, client }
    }
}

#[async_trait]
impl Publisher for RootlyPublisher {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn format(&self, alert: &Alert, action: LifecycleAction) -> Value {
        let status = match action {
            LifecycleAction::Create => "started",
            LifecycleAction::Update => "updated",
            LifecycleAction::Resolve => "resolved",
        };

        json!({
            "incident": {
                "title": alert
                    .annotations
                    .get("summary")
                    .cloned()
                    .unwrap_or_else(|| alert.name().to_string()),
                "status": status,
                "idempotency_key": alert.fingerprint,
                "severity": alert
                    .classification
                    .as_ref()
                    .map(|c| c.severity.clone())
                    .or_else(|| alert.severity().map(|s| s.to_string()))
                    .unwrap_or_else(|| "warning".to_string()),
                "started_at": alert.starts_at.to_rfc3339(),
                "labels": alert.labels,
                "summary": alert.annotations.get("description")
                    .or_else(|| alert.annotations.get("summary"))
                    .cloned()
                    .unwrap_or_default(),
                "action_items": alert
                    .classification
                    .as_ref()
                    .map(|c| c.action_items.clone())
                    .unwrap_or_default(),
            }
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

    fn lifecycle(&self, status: crate::models::AlertStatus) -> LifecycleAction {
        match status {
            crate::models::AlertStatus::Firing => LifecycleAction::Create,
            crate::models::AlertStatus::Resolved => LifecycleAction::Resolve,
        }
    }

    fn dedup_key(&self, alert: &Alert) -> Option<String> {
        Some(alert.fingerprint.clone())
    }
}
