//! Alert ingest endpoint.
//!
//! Accepts the Alertmanager-webhook batch shape and, for older producers, a
//! bare alert array. Fingerprints in the payload are ignored and recomputed;
//! the core never trusts ingest identity.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::PipelineError;
use crate::models::{Alert, AlertStatus, IngestSummary};

/// One alert as producers send it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAlert {
    #[serde(default)]
    pub status: Option<String>,
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    /// Ignored: identity is always recomputed server-side.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Webhook-shaped batch.
#[derive(Debug, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub alerts: Vec<IngestAlert>,
}

/// Zero value some producers emit for "still firing".
fn is_zero_time(t: &DateTime<Utc>) -> bool {
    t.timestamp() <= 0
}

fn parse_status(s: Option<&str>, ends_at: Option<DateTime<Utc>>) -> Result<AlertStatus, String> {
    match s {
        Some("firing") => Ok(AlertStatus::Firing),
        Some("resolved") => Ok(AlertStatus::Resolved),
        Some(other) => Err(format!("unknown status {other:?}")),
        // No status anywhere: a populated endsAt in the past means resolved.
        None => Ok(match ends_at {
            Some(t) if t <= Utc::now() => AlertStatus::Resolved,
            _ => AlertStatus::Firing,
        }),
    }
}

/// Convert one wire alert into the internal record.
pub fn convert_alert(
    raw: IngestAlert,
    batch_status: Option<&str>,
    algo: crate::models::FingerprintAlgorithm,
) -> Result<Alert, String> {
    for (k, v) in &raw.labels {
        if k.is_empty() {
            return Err("empty label name".to_string());
        }
        if v.len() > 4096 {
            return Err(format!("label {k} value too long"));
        }
    }

    let now = Utc::now();
    let ends_at = raw.ends_at.filter(|t| !is_zero_time(t));
    let status = parse_status(raw.status.as_deref().or(batch_status), ends_at)?;
    let starts_at = raw
        .starts_at
        .filter(|t| !is_zero_time(t))
        .unwrap_or(now);

    let ends_at = match status {
        AlertStatus::Firing => None,
        AlertStatus::Resolved => Some(ends_at.unwrap_or(now)),
    };
    if let Some(end) = ends_at {
        if end < starts_at {
            return Err("endsAt precedes startsAt".to_string());
        }
    }

    Ok(Alert {
        fingerprint: crate::fingerprint::fingerprint(&raw.labels, algo),
        labels: raw.labels,
        annotations: raw.annotations,
        status,
        starts_at,
        ends_at,
        generator_url: raw.generator_url,
        created_at: now,
        updated_at: now,
        classification: None,
    })
}

/// Accept both known batch schemas.
fn parse_batch(body: Value) -> Result<(Option<String>, Vec<IngestAlert>), String> {
    if body.is_array() {
        let alerts: Vec<IngestAlert> =
            serde_json::from_value(body).map_err(|e| format!("bad alert array: {e}"))?;
        return Ok((None, alerts));
    }
    let batch: IngestBatch =
        serde_json::from_value(body).map_err(|e| format!("bad alert batch: {e}"))?;
    Ok((batch.status, batch.alerts))
}

/// POST /api/v1/alerts
pub async fn post_alerts(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<IngestSummary>, PipelineError> {
    let bad_request = |msg: String| {
        state.metrics.ingest.rejected_total.fetch_add(1, Ordering::Relaxed);
        PipelineError::InvalidPayload(msg)
    };

    let (batch_status, raw_alerts) = parse_batch(body).map_err(bad_request)?;

    if raw_alerts.len() > state.config.max_batch_alerts {
        return Err(bad_request(format!(
            "batch of {} exceeds limit {}",
            raw_alerts.len(),
            state.config.max_batch_alerts
        )));
    }

    let mut alerts = Vec::with_capacity(raw_alerts.len());
    for raw in raw_alerts {
        let alert = convert_alert(
            raw,
            batch_status.as_deref(),
            state.config.fingerprint_algorithm,
        )
        .map_err(bad_request)?;
        alerts.push(alert);
    }

    state.metrics.ingest.batches_total.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .ingest
        .alerts_total
        .fetch_add(alerts.len() as u64, Ordering::Relaxed);

    let summary = state.pipeline.process_batch(alerts).await;

    if summary.total_errors > 0 {
        warn!(
            errors = summary.total_errors,
            received = summary.total_received,
            "Ingest batch finished with errors"
        );
    } else {
        info!(
            received = summary.total_received,
            published = summary.total_published,
            ignored = summary.total_ignored_duplicates,
            "📥 Ingest batch processed"
        );
    }

    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FingerprintAlgorithm;

    fn raw(labels: &[(&str, &str)]) -> IngestAlert {
        IngestAlert {
            status: Some("firing".to_string()),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: None,
            fingerprint: None,
        }
    }

    #[test]
    fn test_convert_recomputes_fingerprint() {
        let mut a = raw(&[("alertname", "HighCPU")]);
        a.fingerprint = Some("attacker-controlled".to_string());
        let alert = convert_alert(a, None, FingerprintAlgorithm::Fnv1a).unwrap();
        assert_ne!(alert.fingerprint, "attacker-controlled");
        assert_eq!(alert.fingerprint.len(), 16);
    }

    #[test]
    fn test_zero_ends_at_means_firing() {
        let mut a = raw(&[("alertname", "HighCPU")]);
        a.ends_at = Some(DateTime::parse_from_rfc3339("0001-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc));
        let alert = convert_alert(a, None, FingerprintAlgorithm::Fnv1a).unwrap();
        assert_eq!(alert.status, AlertStatus::Firing);
        assert!(alert.ends_at.is_none());
    }

    #[test]
    fn test_batch_status_fallback() {
        let mut a = raw(&[("alertname", "HighCPU")]);
        a.status = None;
        let alert = convert_alert(a, Some("resolved"), FingerprintAlgorithm::Fnv1a).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert!(alert.ends_at.is_some());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut a = raw(&[("alertname", "HighCPU")]);
        a.status = Some("snoozed".to_string());
        assert!(convert_alert(a, None, FingerprintAlgorithm::Fnv1a).is_err());
    }

    #[test]
    fn test_ends_before_starts_rejected() {
        let mut a = raw(&[("alertname", "HighCPU")]);
        a.status = Some("resolved".to_string());
        a.starts_at = Some(Utc::now());
        a.ends_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(convert_alert(a, None, FingerprintAlgorithm::Fnv1a).is_err());
    }

    #[test]
    fn test_empty_labels_accepted() {
        let a = IngestAlert {
            status: Some("firing".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: None,
            fingerprint: None,
        };
        let alert = convert_alert(a, None, FingerprintAlgorithm::Fnv1a).unwrap();
        assert_eq!(alert.fingerprint.len(), 16);
    }

    #[test]
    fn test_parse_both_batch_shapes() {
        let webhook = serde_json::json!({
            "receiver": "alerthub",
            "status": "firing",
            "alerts": [{"labels": {"alertname": "X"}}]
        });
        let (status, alerts) = parse_batch(webhook).unwrap();
        assert_eq!(status.as_deref(), Some("firing"));
        assert_eq!(alerts.len(), 1);

        let bare = serde_json::json!([{"labels": {"alertname": "X"}}]);
        let (status, alerts) = parse_batch(bare).unwrap();
        assert!(status.is_none());
        assert_eq!(alerts.len(), 1);

        assert!(parse_batch(serde_json::json!({"nope": true})).is_err());
    }
}
