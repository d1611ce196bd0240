//! Rule-set loading.
//!
//! Filters, inhibition rules, and silences live in one TOML file referenced
//! by RULES_FILE. The file is re-read on the discovery refresh tick, so rule
//! edits land without a restart; engines swap the whole set atomically and
//! in-flight requests keep the version they started with.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{InhibitionRule, Matcher, SilenceRule};
use crate::pipeline::filters::{FilterAction, FilterRuleConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub default_action: FilterAction,
    #[serde(default)]
    pub filters: Vec<FilterRuleConfig>,
    #[serde(default)]
    pub inhibition: Vec<InhibitionRule>,
    #[serde(default)]
    pub silences: Vec<SilenceConfig>,
}

/// Silence as written in config; `id` is optional there.
#[derive(Debug, Clone, Deserialize)]
pub struct SilenceConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl SilenceConfig {
    pub fn into_rule(self) -> SilenceRule {
        SilenceRule {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            matchers: self.matchers,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            created_by: self.created_by.unwrap_or_else(|| "config".to_string()),
            comment: self.comment.unwrap_or_default(),
        }
    }
}

impl RulesFile {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {path}"))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse rules file {path}"))
    }

    pub fn silence_rules(&self) -> Vec<SilenceRule> {
        self.silences
            .iter()
            .cloned()
            .map(SilenceConfig::into_rule)
            .collect()
    }
}
