//! Database-backed alert history.
//!
//! One current row per fingerprint; rows are updated in place and never
//! deleted. The generic kv_cache table doubles as the shared L2 tier for
//! classification results, the inhibition active-set, and the enrichment
//! mode.
//!
//! Key choices:
//! - WAL mode for concurrent reads during writes
//! - labels stored twice: lossless JSON plus a flattened `k=v` column the
//!   label query can LIKE against
//! - per-fingerprint write serialization happens in the deduplicator, not
//!   here; the connection mutex only guards statement execution

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{Alert, AlertStatus, ClassificationResult};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS alerts (
    fingerprint TEXT PRIMARY KEY,
    alertname TEXT NOT NULL,
    status TEXT NOT NULL,
    severity TEXT,
    labels_json TEXT NOT NULL,
    labels_flat TEXT NOT NULL,
    annotations_json TEXT NOT NULL,
    starts_at INTEGER NOT NULL,
    ends_at INTEGER,
    generator_url TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    transition_count INTEGER NOT NULL DEFAULT 0,
    classification_json TEXT,
    last_publish_status TEXT,
    last_publish_at INTEGER
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_alerts_alertname ON alerts(alertname, last_seen DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity, last_seen DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status, last_seen DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_last_seen ON alerts(last_seen DESC);

CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS inhibition_state (
    target_fingerprint TEXT PRIMARY KEY,
    source_fingerprint TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    inhibited_at INTEGER NOT NULL
) WITHOUT ROWID;
"#;

/// One history row. `alert()` rebuilds the domain type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAlert {
    pub fingerprint: String,
    pub alertname: String,
    pub status: AlertStatus,
    pub severity: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub generator_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub transition_count: i64,
    pub classification: Option<ClassificationResult>,
    pub last_publish_status: Option<String>,
    pub last_publish_at: Option<DateTime<Utc>>,
}

impl StoredAlert {
    pub fn alert(&self) -> Alert {
        Alert {
            fingerprint: self.fingerprint.clone(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            status: self.status,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            generator_url: self.generator_url.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            classification: self.classification.clone(),
        }
    }
}

/// Filters for the history query surface.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub status: Option<AlertStatus>,
    pub severity: Option<String>,
    /// `(key, value)` equality over the label set.
    pub label: Option<(String, String)>,
    pub limit: usize,
}

pub struct HistoryStore {
    conn: Mutex<Connection>,
}

/// Escape LIKE wildcards so a producer label like `instance=web_01` stays
/// an exact match instead of a pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn flatten_labels(labels: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in labels {
        out.push('\u{1}');
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\u{1}');
    }
    out
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

fn from_ts(us: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(us).single().unwrap_or_else(Utc::now)
}

impl HistoryStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("Failed to open history db at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply history schema")?;
        info!("📊 History store initialized at: {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory db")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn len(&self) -> usize {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM alerts", [], |r| r.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<StoredAlert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT fingerprint, alertname, status, severity, labels_json, annotations_json,
                    starts_at, ends_at, generator_url, created_at, updated_at, first_seen,
                    last_seen, transition_count, classification_json, last_publish_status,
                    last_publish_at
             FROM alerts WHERE fingerprint = ?1",
        )?;
        let mut rows = stmt.query(params![fingerprint])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_stored(row)?)),
            None => Ok(None),
        }
    }

    /// Insert a brand-new alert row.
    pub fn insert(&self, alert: &Alert) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO alerts (fingerprint, alertname, status, severity, labels_json,
                labels_flat, annotations_json, starts_at, ends_at, generator_url,
                created_at, updated_at, first_seen, last_seen, transition_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0)",
        )?
        .execute(params![
            alert.fingerprint,
            alert.name(),
            alert.status.as_str(),
            alert.severity(),
            serde_json::to_string(&alert.labels)?,
            flatten_labels(&alert.labels),
            serde_json::to_string(&alert.annotations)?,
            ts(alert.starts_at),
            alert.ends_at.map(ts),
            alert.generator_url,
            ts(alert.created_at),
            ts(alert.updated_at),
            ts(alert.created_at),
            ts(alert.updated_at),
        ])
        .context("insert alert")?;
        Ok(())
    }

    /// Update an existing row in place. `transition` bumps the episode
    /// counter used for flapping detection.
    pub fn update(&self, alert: &Alert, transition: bool) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached(
                "UPDATE alerts SET status = ?2, severity = ?3, annotations_json = ?4,
                    starts_at = ?5, ends_at = ?6, generator_url = ?7, updated_at = ?8,
                    last_seen = ?8,
                    transition_count = transition_count + ?9
                 WHERE fingerprint = ?1",
            )?
            .execute(params![
                alert.fingerprint,
                alert.status.as_str(),
                alert.severity(),
                serde_json::to_string(&alert.annotations)?,
                ts(alert.starts_at),
                alert.ends_at.map(ts),
                alert.generator_url,
                ts(alert.updated_at),
                if transition { 1i64 } else { 0i64 },
            ])
            .context("update alert")?;
        if changed == 0 {
            warn!(fingerprint = %alert.fingerprint, "update hit no history row");
        }
        Ok(())
    }

    pub fn record_classification(
        &self,
        fingerprint: &str,
        result: &ClassificationResult,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE alerts SET classification_json = ?2 WHERE fingerprint = ?1",
        )?
        .execute(params![fingerprint, serde_json::to_string(result)?])
        .context("record classification")?;
        Ok(())
    }

    /// Latest publishing outcome for the row: published | failed | silenced
    /// | inhibited | blocked | metrics_only.
    pub fn record_publish_outcome(&self, fingerprint: &str, outcome: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE alerts SET last_publish_status = ?2, last_publish_at = ?3
             WHERE fingerprint = ?1",
        )?
        .execute(params![fingerprint, outcome, ts(Utc::now())])
        .context("record publish outcome")?;
        Ok(())
    }

    /// History query over the label-indexed columns. Label equality uses the
    /// flattened column so it never parses JSON per row.
    pub fn query(&self, q: &HistoryQuery) -> Result<Vec<StoredAlert>> {
        let mut sql = String::from(
            "SELECT fingerprint, alertname, status, severity, labels_json, annotations_json,
                    starts_at, ends_at, generator_url, created_at, updated_at, first_seen,
                    last_seen, transition_count, classification_json, last_publish_status,
                    last_publish_at
             FROM alerts WHERE 1=1",
        );
        let mut args: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(status) = q.status {
            sql.push_str(" AND status = ?");
            args.push(status.as_str().to_string().into());
        }
        if let Some(sev) = &q.severity {
            sql.push_str(" AND severity = ?");
            args.push(sev.clone().into());
        }
        if let Some((k, v)) = &q.label {
            sql.push_str(" AND labels_flat LIKE ? ESCAPE '\\'");
            args.push(format!("%\u{1}{}={}\u{1}%", escape_like(k), escape_like(v)).into());
        }
        sql.push_str(" ORDER BY last_seen DESC LIMIT ?");
        args.push((q.limit.max(1) as i64).into());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_stored(row)?);
        }
        Ok(out)
    }

    /// All fingerprints currently firing, for active-set reconciliation.
    pub fn firing_fingerprints(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT fingerprint FROM alerts WHERE status = 'firing'")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // -- shared kv tier ----------------------------------------------------

    pub fn kv_get(&self, key: &str) -> Result<Option<(String, i64)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT value, fetched_at FROM kv_cache WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }

    pub fn kv_put(&self, key: &str, value: &str, fetched_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO kv_cache (key, value, fetched_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, fetched_at = ?3",
        )?
        .execute(params![key, value, fetched_at])
        .context("kv put")?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("DELETE FROM kv_cache WHERE key = ?1")?
            .execute(params![key])
            .context("kv delete")?;
        Ok(())
    }

    /// Keys under a prefix, e.g. the shared active-fingerprint set.
    pub fn kv_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT key FROM kv_cache WHERE key LIKE ?1")?;
        let pattern = format!("{}%", prefix.replace('%', "\\%"));
        let rows = stmt.query_map(params![pattern], |r| r.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Drop cache entries older than the cutoff. Returns deleted count.
    pub fn kv_prune_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn
            .prepare_cached("DELETE FROM kv_cache WHERE fetched_at < ?1")?
            .execute(params![cutoff])
            .context("kv prune")?;
        Ok(deleted)
    }

    // -- inhibition observability -----------------------------------------

    pub fn upsert_inhibition(
        &self,
        target_fingerprint: &str,
        source_fingerprint: &str,
        rule_name: &str,
        inhibited_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO inhibition_state
                (target_fingerprint, source_fingerprint, rule_name, inhibited_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target_fingerprint) DO UPDATE
                SET source_fingerprint = ?2, rule_name = ?3, inhibited_at = ?4",
        )?
        .execute(params![
            target_fingerprint,
            source_fingerprint,
            rule_name,
            inhibited_at
        ])
        .context("upsert inhibition")?;
        Ok(())
    }

    pub fn remove_inhibition(&self, target_fingerprint: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("DELETE FROM inhibition_state WHERE target_fingerprint = ?1")?
            .execute(params![target_fingerprint])
            .context("remove inhibition")?;
        Ok(())
    }

    pub fn list_inhibitions(&self) -> Result<Vec<(String, String, String, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT target_fingerprint, source_fingerprint, rule_name, inhibited_at
             FROM inhibition_state ORDER BY inhibited_at DESC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_stored(row: &rusqlite::Row<'_>) -> Result<StoredAlert> {
    let status_str: String = row.get(2)?;
    let labels_json: String = row.get(4)?;
    let annotations_json: String = row.get(5)?;
    let classification_json: Option<String> = row.get(14)?;

    Ok(StoredAlert {
        fingerprint: row.get(0)?,
        alertname: row.get(1)?,
        status: if status_str == "resolved" {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        },
        severity: row.get(3)?,
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        annotations: serde_json::from_str(&annotations_json).unwrap_or_default(),
        starts_at: from_ts(row.get(6)?),
        ends_at: row.get::<_, Option<i64>>(7)?.map(from_ts),
        generator_url: row.get(8)?,
        created_at: from_ts(row.get(9)?),
        updated_at: from_ts(row.get(10)?),
        first_seen: from_ts(row.get(11)?),
        last_seen: from_ts(row.get(12)?),
        transition_count: row.get(13)?,
        classification: classification_json.and_then(|j| serde_json::from_str(&j).ok()),
        last_publish_status: row.get(15)?,
        last_publish_at: row.get::<_, Option<i64>>(16)?.map(from_ts),
    })
}
