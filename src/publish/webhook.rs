//! Generic JSON webhook publisher.
//!
//! Ships the whole alert as-is plus a small envelope; extra headers from the
//! descriptor pass straight through, which is how bespoke receivers get
//! their auth.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::Alert;
use crate::publish::publisher::{post_json, LifecycleAction, Publisher, SendOutcome};
use crate::publish::targets::TargetDescriptor;

pub struct WebhookPublisher {
    descriptor: TargetDescriptor,
    client: reqwest::Client,
}

impl WebhookPublisher {
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
impl Publisher for WebhookPublisher {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn format(&self, alert: &Alert, action: LifecycleAction) -> Value {
        json!({
            "version": "1",
            "action": match action {
                LifecycleAction::Create => "create",
                LifecycleAction::Update => "update",
                LifecycleAction::Resolve => "resolve",
            },
            "alert": alert,
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
}
