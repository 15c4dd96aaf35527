//! TTL cache of resolved streams keyed by `(adapter, content)`.
//!
//! One shared JSON file backs the whole store. Reads never touch disk; every
//! mutation rewrites the file from a fresh snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::StreamDescriptor;
use crate::config::DEFAULT_CACHE_TTL_HOURS;
use crate::error::Result;
use crate::registry::Registry;
use crate::session::hours;
use crate::store::{read_json, write_json};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub adapter_id: String,
    pub content_id: String,
}

impl CacheKey {
    pub fn new(adapter_id: &str, content_id: &str) -> Self {
        Self {
            adapter_id: adapter_id.to_string(),
            content_id: content_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub adapter_id: String,
    pub content_id: String,
    pub descriptor: StreamDescriptor,
    pub last_updated: DateTime<Utc>,
}

impl CacheEntry {
    fn key(&self) -> CacheKey {
        CacheKey::new(&self.adapter_id, &self.content_id)
    }

    /// An entry is expired once its age reaches the TTL.
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_updated >= ttl
    }
}

/// Stream cache with optional file persistence.
pub struct CacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    path: Option<PathBuf>,
    /// Serializes file rewrites so the newest snapshot is written last.
    persist: Mutex<()>,
}

impl CacheStore {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
            persist: Mutex::new(()),
        }
    }

    /// Open the cache file at `path`. A missing or unreadable file starts an
    /// empty cache.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_json::<Vec<CacheEntry>>(&path).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!("Starting with an empty cache, {}: {e}", path.display());
                Vec::new()
            }
        };
        debug!("Loaded {} cache entries from {}", entries.len(), path.display());

        Self {
            entries: RwLock::new(entries.into_iter().map(|e| (e.key(), e)).collect()),
            path: Some(path),
            persist: Mutex::new(()),
        }
    }

    /// Fresh entry for the key, or `None` when absent or expired.
    pub async fn find(
        &self,
        adapter_id: &str,
        content_id: &str,
        ttl: chrono::Duration,
    ) -> Option<CacheEntry> {
        self.find_at(adapter_id, content_id, ttl, Utc::now()).await
    }

    pub async fn find_at(
        &self,
        adapter_id: &str,
        content_id: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        entries
            .get(&CacheKey::new(adapter_id, content_id))
            .filter(|entry| !entry.is_expired(ttl, now))
            .cloned()
    }

    /// Insert or fully replace the entry for the key.
    pub async fn fill(
        &self,
        adapter_id: &str,
        content_id: &str,
        descriptor: StreamDescriptor,
    ) -> Result<()> {
        self.fill_at(adapter_id, content_id, descriptor, Utc::now())
            .await
    }

    pub async fn fill_at(
        &self,
        adapter_id: &str,
        content_id: &str,
        descriptor: StreamDescriptor,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = CacheEntry {
            adapter_id: adapter_id.to_string(),
            content_id: content_id.to_string(),
            descriptor,
            last_updated: at,
        };
        self.entries.write().await.insert(entry.key(), entry);
        self.persist().await
    }

    /// Remove entries whose age reached their adapter's TTL. Adapters without
    /// an entry in `ttls` use the default TTL.
    pub async fn sweep(&self, ttls: &HashMap<String, chrono::Duration>) -> Vec<CacheEntry> {
        self.sweep_at(ttls, Utc::now()).await
    }

    pub async fn sweep_at(
        &self,
        ttls: &HashMap<String, chrono::Duration>,
        now: DateTime<Utc>,
    ) -> Vec<CacheEntry> {
        let expired = self.expired(ttls, now).await;
        if expired.is_empty() {
            return expired;
        }

        let removed = self.remove_unchanged(expired).await;
        if let Err(e) = self.persist().await {
            warn!("Failed to persist cache after sweep: {e}");
        }
        removed
    }

    /// Snapshot of the entries expired at `now`.
    async fn expired(
        &self,
        ttls: &HashMap<String, chrono::Duration>,
        now: DateTime<Utc>,
    ) -> Vec<CacheEntry> {
        let default_ttl = hours(DEFAULT_CACHE_TTL_HOURS);
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| {
                let ttl = ttls.get(&entry.adapter_id).copied().unwrap_or(default_ttl);
                entry.is_expired(ttl, now)
            })
            .cloned()
            .collect()
    }

    /// Remove snapshotted entries that were not refilled in the meantime.
    async fn remove_unchanged(&self, snapshot: Vec<CacheEntry>) -> Vec<CacheEntry> {
        let mut entries = self.entries.write().await;
        let mut removed = Vec::with_capacity(snapshot.len());
        for stale in snapshot {
            let key = stale.key();
            if entries
                .get(&key)
                .is_some_and(|current| current.last_updated == stale.last_updated)
            {
                if let Some(entry) = entries.remove(&key) {
                    removed.push(entry);
                }
            }
        }
        removed
    }

    /// Entries matching the optional filters.
    pub async fn query(&self, adapter_id: Option<&str>, content_id: Option<&str>) -> Vec<CacheEntry> {
        let entries = self.entries.read().await;
        let mut matched: Vec<CacheEntry> = entries
            .values()
            .filter(|e| matches_filter(e, adapter_id, content_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            (&a.adapter_id, &a.content_id).cmp(&(&b.adapter_id, &b.content_id))
        });
        matched
    }

    /// Remove entries matching the optional filters; returns how many.
    pub async fn clear(&self, adapter_id: Option<&str>, content_id: Option<&str>) -> Result<usize> {
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, e| !matches_filter(e, adapter_id, content_id));
            before - entries.len()
        };
        self.persist().await?;
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.persist.lock().await;
        let mut snapshot: Vec<CacheEntry> = self.entries.read().await.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            (&a.adapter_id, &a.content_id).cmp(&(&b.adapter_id, &b.content_id))
        });
        write_json(path, &snapshot).await
    }

    /// Run [`sweep`](Self::sweep) now and then every `interval`, using the
    /// TTLs currently configured in `registry`.
    pub fn spawn_sweeper(self: Arc<Self>, registry: Arc<Registry>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let ttls = registry.ttls().await;
                let removed = self.sweep(&ttls).await;
                if removed.is_empty() {
                    debug!("Cache sweep: nothing expired");
                } else {
                    info!("Cache sweep removed {} entries", removed.len());
                    for entry in &removed {
                        debug!("Evicted {}/{}", entry.adapter_id, entry.content_id);
                    }
                }
            }
        })
    }
}

fn matches_filter(entry: &CacheEntry, adapter_id: Option<&str>, content_id: Option<&str>) -> bool {
    adapter_id.is_none_or(|id| entry.adapter_id == id)
        && content_id.is_none_or(|id| entry.content_id == id)
}
