//! Per-target publisher contract.
//!
//! The coordinator treats publishers opaquely: it formats, sends, and
//! classifies the outcome. Retry and circuit decisions are made on the
//! classified outcome, never on the target type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Alert, AlertStatus};
use crate::publish::targets::{TargetDescriptor, TargetKind};

/// Classified result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { status: u16 },
    /// Network error, 429, or 5xx: retried with backoff, counted against
    /// the circuit.
    Retryable { error: String },
    /// Other 4xx or malformed payload: not retried, still counted.
    Permanent { error: String },
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }
}

/// Incident lifecycle mapping for services that track one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Create,
    Update,
    Resolve,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Build the wire payload for this alert and lifecycle step.
    fn format(&self, alert: &Alert, action: LifecycleAction) -> Value;

    /// One delivery attempt with a per-attempt deadline. Implementations
    /// classify their own HTTP responses via [`classify_status`].
    async fn send(&self, payload: &Value, timeout: Duration) -> SendOutcome;

    fn lifecycle(&self, status: AlertStatus) -> LifecycleAction {
        match status {
            AlertStatus::Firing => LifecycleAction::Create,
            AlertStatus::Resolved => LifecycleAction::Resolve,
        }
    }

    /// Stable key for collapsing repeated sends of one identity (chat
    /// thread ids and the like).
    fn dedup_key(&self, _alert: &Alert) -> Option<String> {
        None
    }
}

/// Shared response classification: 2xx delivered, 429/5xx retryable,
/// remaining 4xx permanent.
pub fn classify_status(status: u16, body_excerpt: &str) -> SendOutcome {
    match status {
        200..=299 => SendOutcome::Delivered { status },
        429 => SendOutcome::Retryable {
            error: format!("429 rate limited: {body_excerpt}"),
        },
        500..=599 => SendOutcome::Retryable {
            error: format!("{status} upstream error: {body_excerpt}"),
        },
        _ => SendOutcome::Permanent {
            error: format!("{status} rejected: {body_excerpt}"),
        },
    }
}

/// POST a JSON payload and classify the result. All four publishers funnel
/// through here.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    payload: &Value,
    timeout: Duration,
) -> SendOutcome {
    let mut req = client.post(url).timeout(timeout).json(payload);
    for (k, v) in headers {
        req = req.header(k.as_str(), v.as_str());
    }

    match req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            classify_status(status, &excerpt)
        }
        Err(e) if e.is_timeout() => SendOutcome::Retryable {
            error: format!("timeout: {e}"),
        },
        Err(e) => SendOutcome::Retryable {
            error: format!("network: {e}"),
        },
    }
}

/// Construct the concrete publisher for a descriptor.
pub fn build_publisher(
    descriptor: &TargetDescriptor,
    client: reqwest::Client,
) -> Arc<dyn Publisher> {
    match descriptor.kind {
        TargetKind::Rootly => Arc::new(crate::publish::rootly::RootlyPublisher::new(
            descriptor.clone(),
            client,
        )),
        TargetKind::Pagerduty => Arc::new(crate::publish::pagerduty::PagerdutyPublisher::new(
            descriptor.clone(),
            client,
        )),
        TargetKind::Slack => Arc::new(crate::publish::slack::SlackPublisher::new(
            descriptor.clone(),
            client,
        )),
        TargetKind::Generic => Arc::new(crate::publish::webhook::WebhookPublisher::new(
            descriptor.clone(),
            client,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(200, ""),
            SendOutcome::Delivered { status: 200 }
        );
        assert_eq!(
            classify_status(202, ""),
            SendOutcome::Delivered { status: 202 }
        );
        assert!(matches!(
            classify_status(429, "slow down"),
            SendOutcome::Retryable { .. }
        ));
        assert!(matches!(
            classify_status(503, ""),
            SendOutcome::Retryable { .. }
        ));
        assert!(matches!(
            classify_status(401, "bad token"),
            SendOutcome::Permanent { .. }
        ));
        assert!(matches!(
            classify_status(404, ""),
            SendOutcome::Permanent { .. }
        ));
    }
}
