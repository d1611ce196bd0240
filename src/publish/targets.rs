//! Publishing-target discovery.
//!
//! Targets are opaque JSON descriptors produced by the control plane (in a
//! cluster, label-selected secrets flattened to a file mount). Discovery is
//! pull-based on a bounded interval plus an out-of-band "refresh now"
//! trigger; reconciliation is by name, so per-target operational state in
//! the coordinator survives refreshes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::models::Matcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Rootly,
    Pagerduty,
    Slack,
    Generic,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Rootly => "rootly",
            TargetKind::Pagerduty => "pagerduty",
            TargetKind::Slack => "slack",
            TargetKind::Generic => "generic",
        }
    }
}

/// One discovered target. Credentials stay opaque and are never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Optional per-target routing conditions.
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    /// Control-plane labels the discovery selector filters on.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// `k=v,k2=v2` selector over descriptor labels.
fn selector_matches(selector: &str, labels: &HashMap<String, String>) -> bool {
    selector
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(|lv| lv == v.trim()).unwrap_or(false),
            None => false,
        })
}

pub struct TargetDiscovery {
    targets_file: Option<String>,
    label_selector: Option<String>,
    targets: ArcSwap<Vec<Arc<TargetDescriptor>>>,
    /// Bumped on every change; the coordinator subscribes.
    version_tx: watch::Sender<u64>,
    refresh_now: Notify,
}

impl TargetDiscovery {
    pub fn new(targets_file: Option<String>, label_selector: Option<String>) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            targets_file,
            label_selector,
            targets: ArcSwap::from_pointee(Vec::new()),
            version_tx,
            refresh_now: Notify::new(),
        }
    }

    /// Static seed, used by tests and single-node setups without a file.
    pub fn with_static_targets(descriptors: Vec<TargetDescriptor>) -> Self {
        let d = Self::new(None, None);
        d.replace(descriptors);
        d
    }

    /// Snapshot safe for concurrent readers.
    pub fn snapshot(&self) -> Arc<Vec<Arc<TargetDescriptor>>> {
        self.targets.load_full()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TargetDescriptor>> {
        self.snapshot().iter().find(|t| t.name == name).cloned()
    }

    pub fn version(&self) -> u64 {
        *self.version_tx.borrow()
    }

    /// Change notifications: the value is a monotonically increasing
    /// version.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Out-of-band refresh trigger (POST /targets/refresh).
    pub fn trigger_refresh(&self) {
        self.refresh_now.notify_one();
    }

    /// Replace the descriptor set, bumping the version only on real change.
    pub fn replace(&self, descriptors: Vec<TargetDescriptor>) {
        let filtered: Vec<Arc<TargetDescriptor>> = descriptors
            .into_iter()
            .filter(|d| {
                self.label_selector
                    .as_deref()
                    .map(|sel| selector_matches(sel, &d.labels))
                    .unwrap_or(true)
            })
            .map(Arc::new)
            .collect();

        let current = self.targets.load();
        let changed = current.len() != filtered.len()
            || current.iter().zip(filtered.iter()).any(|(a, b)| {
                a.name != b.name
                    || a.url != b.url
                    || a.enabled != b.enabled
                    || a.kind != b.kind
            });

        if changed {
            let names: Vec<&str> = filtered.iter().map(|t| t.name.as_str()).collect();
            info!(count = filtered.len(), targets = ?names, "🎯 Target set updated");
            self.targets.store(Arc::new(filtered));
            self.version_tx.send_modify(|v| *v += 1);
        }
    }

    /// One pull from the descriptor source.
    pub fn refresh(&self) -> Result<()> {
        let Some(path) = &self.targets_file else {
            debug!("No targets file configured, keeping current set");
            return Ok(());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read targets file {path}"))?;
        let descriptors: Vec<TargetDescriptor> =
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse {path}"))?;
        self.replace(descriptors);
        Ok(())
    }

    /// Discovery loop: interval pull plus the refresh-now trigger.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "🔭 Target discovery started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh_now.notified() => {
                    debug!("Out-of-band target refresh requested");
                }
            }
            if let Err(e) = self.refresh() {
                warn!(error = %e, "Target discovery refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, enabled: bool) -> TargetDescriptor {
        TargetDescriptor {
            name: name.to_string(),
            kind: TargetKind::Generic,
            url: format!("https://hooks.example.com/{name}"),
            headers: HashMap::new(),
            credentials: None,
            enabled,
            matchers: Vec::new(),
            labels: HashMap::new(),
        }
    }

    #[test]
    fn test_replace_bumps_version_only_on_change() {
        let d = TargetDiscovery::new(None, None);
        assert_eq!(d.version(), 0);

        d.replace(vec![descriptor("a", true)]);
        assert_eq!(d.version(), 1);
        assert_eq!(d.snapshot().len(), 1);

        // Identical set: no version bump.
        d.replace(vec![descriptor("a", true)]);
        assert_eq!(d.version(), 1);

        d.replace(vec![descriptor("a", false)]);
        assert_eq!(d.version(), 2);
    }

    #[test]
    fn test_label_selector_filters() {
        let d = TargetDiscovery::new(None, Some("team=sre,env=prod".to_string()));
        let mut matching = descriptor("a", true);
        matching.labels.insert("team".to_string(), "sre".to_string());
        matching.labels.insert("env".to_string(), "prod".to_string());
        let mut other = descriptor("b", true);
        other.labels.insert("team".to_string(), "sre".to_string());

        d.replace(vec![matching, other]);
        let snap = d.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "a");
    }

    #[test]
    fn test_get_by_name() {
        let d = TargetDiscovery::with_static_targets(vec![
            descriptor("slack-ops", true),
            descriptor("pd-primary", true),
        ]);
        assert!(d.get("slack-ops").is_some());
        assert!(d.get("missing").is_none());
    }

    #[test]
    fn test_descriptor_json_contract() {
        let raw = r#"[{
            "name": "slack-ops",
            "type": "slack",
            "url": "https://hooks.slack.com/services/T0/B0/xyz",
            "credentials": "xoxb-redacted",
            "enabled": true,
            "labels": {"team": "sre"}
        }]"#;
        let parsed: Vec<TargetDescriptor> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0].kind, TargetKind::Slack);
        assert!(parsed[0].enabled);
        assert!(parsed[0].matchers.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let d = TargetDiscovery::new(None, None);
        let mut rx = d.subscribe();
        d.replace(vec![descriptor("a", true)]);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
