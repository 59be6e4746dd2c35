use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::store::traits::CacheStore;

/// Expired entries are swept after this many inserts
const DEFAULT_SWEEP_EVERY: usize = 256;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-memory cache with per-entry TTL
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    /// Time-to-live used when `set` is called without one
    default_ttl: Duration,
    inserts: Arc<AtomicUsize>,
    sweep_every: usize,
}

impl MemoryCache {
    /// Create a new cache with a 5-minute default TTL
    pub fn new() -> Self {
        Self::with_default_ttl(Duration::from_secs(300))
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
            inserts: Arc::new(AtomicUsize::new(0)),
            sweep_every: DEFAULT_SWEEP_EVERY,
        }
    }

    /// Sweep expired entries every `inserts` calls to `set`
    pub fn with_sweep_every(mut self, inserts: usize) -> Self {
        self.sweep_every = inserts.max(1);
        self
    }

    /// Remove a key from cache
    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Clear all expired entries from cache
    pub async fn clear_expired(&self) {
        let now = Instant::now();
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Entry exists but has expired
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| anyhow!("ttl of {}s for `{}` is out of range", ttl.as_secs(), key))?;

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });

        // Keys that are written and never read again would otherwise stay forever
        let inserts = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserts % self.sweep_every == 0 {
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at > now);
            log::debug!("Cache sweep dropped {} expired entries", before - entries.len());
        }
        Ok(())
    }
}
