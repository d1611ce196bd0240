//! Process-local TTL cache.
//!
//! Bounded map with per-entry expiry; the oldest entry is evicted when full.
//! Used as the classification L1 tier and the chat dedup-key cache. The
//! shared L2 tier lives in the kv_cache table of the history store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_with_ttl(key, value, self.ttl);
    }

    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_entries {
            // Evict expired entries first, then the oldest insert.
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.into(),
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
