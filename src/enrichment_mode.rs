//! Process-wide enrichment mode with an explicit fallback chain.
//!
//! Resolution order: shared kv store, then the process-local cache (kept
//! fresh by a background refresh every <=30 s), then the ENRICHMENT_MODE
//! environment value, then the built-in default (enriched). The chain lives
//! in the reader, not behind globals; callers get (mode, source) so the API
//! can report where the answer came from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::EnrichmentMode;
use crate::storage::HistoryStore;

const MODE_KEY: &str = "config:enrichment_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSource {
    Store,
    Memory,
    Default,
}

struct CachedMode {
    mode: EnrichmentMode,
    refreshed_at: Instant,
}

pub struct EnrichmentModeManager {
    store: Arc<HistoryStore>,
    cache: RwLock<Option<CachedMode>>,
    cache_ttl: Duration,
    /// Seeded from ENRICHMENT_MODE at startup; the end of the chain.
    default_mode: EnrichmentMode,
}

impl EnrichmentModeManager {
    pub fn new(store: Arc<HistoryStore>, cache_ttl: Duration) -> Self {
        let default_mode = std::env::var("ENRICHMENT_MODE")
            .ok()
            .and_then(|v| EnrichmentMode::parse(&v))
            .unwrap_or_default();
        Self {
            store,
            cache: RwLock::new(None),
            cache_ttl,
            default_mode,
        }
    }

    /// Resolve the current mode. Pipeline entry captures this once per
    /// request; mid-request changes never affect in-flight work.
    pub fn current(&self) -> (EnrichmentMode, ModeSource) {
        match self.store.kv_get(MODE_KEY) {
            Ok(Some((value, _))) => {
                if let Some(mode) = EnrichmentMode::parse(&value) {
                    self.fill_cache(mode);
                    return (mode, ModeSource::Store);
                }
                warn!(value, "Unparseable enrichment mode in store, falling back");
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "Mode store read failed, trying cache");
            }
        }

        if let Some(cached) = self.cache.read().as_ref() {
            if cached.refreshed_at.elapsed() <= self.cache_ttl {
                return (cached.mode, ModeSource::Memory);
            }
        }

        (self.default_mode, ModeSource::Default)
    }

    /// Persist a new mode. Takes effect for requests entering after the
    /// write.
    pub fn set(&self, mode: EnrichmentMode) -> anyhow::Result<()> {
        self.store
            .kv_put(MODE_KEY, mode.as_str(), chrono::Utc::now().timestamp())?;
        self.fill_cache(mode);
        info!(mode = mode.as_str(), "🔀 Enrichment mode updated");
        Ok(())
    }

    /// Background refresh: re-read the store so the memory tier stays
    /// usable if the store later becomes unreachable.
    pub fn refresh(&self) {
        if let Ok(Some((value, _))) = self.store.kv_get(MODE_KEY) {
            if let Some(mode) = EnrichmentMode::parse(&value) {
                self.fill_cache(mode);
            }
        }
    }

    fn fill_cache(&self, mode: EnrichmentMode) {
        *self.cache.write() = Some(CachedMode {
            mode,
            refreshed_at: Instant::now(),
        });
    }
}
