//! Ordered set of validated adapters and their runtime configuration.
//!
//! Registration order is the fallback order used when a caller resolves
//! content without naming an adapter. Candidates that fail validation are
//! skipped with an error log; the rest of the registry still loads.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::adapter::{Adapter, AdapterDescriptor, ChannelMap};
use crate::config::{AdapterConfig, AppConfig};
use crate::error::{Error, Result};
use crate::store::JsonDirStore;

/// A validated adapter together with its live configuration.
pub struct RegisteredAdapter {
    pub adapter: Arc<dyn Adapter>,
    pub descriptor: AdapterDescriptor,
    config: RwLock<AdapterConfig>,
}

impl RegisteredAdapter {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> AdapterConfig {
        self.config.read().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn config_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, AdapterConfig> {
        self.config.write().await
    }
}

pub struct Registry {
    adapters: Vec<Arc<RegisteredAdapter>>,
    configs: Option<JsonDirStore<AdapterConfig>>,
}

impl Registry {
    /// Validate `candidates` in order and load each survivor's config.
    ///
    /// A missing config file triggers first-run seeding: the operator's
    /// section plus whatever the adapter reports from `channels()`, saved
    /// back to `configs`. A malformed file is logged and replaced in memory
    /// by defaults without overwriting it.
    pub async fn build(
        candidates: Vec<Arc<dyn Adapter>>,
        configs: Option<JsonDirStore<AdapterConfig>>,
        app: &AppConfig,
    ) -> Self {
        let mut adapters: Vec<Arc<RegisteredAdapter>> = Vec::with_capacity(candidates.len());

        for adapter in candidates {
            let descriptor = adapter.descriptor();
            if let Err(reason) = validate(adapter.as_ref(), &descriptor) {
                error!("Skipping adapter {:?}: {reason}", descriptor.id);
                continue;
            }
            if adapters.iter().any(|a| a.id() == descriptor.id) {
                error!("Skipping adapter {:?}: duplicate id", descriptor.id);
                continue;
            }

            let config = load_config(adapter.as_ref(), &descriptor.id, configs.as_ref(), app).await;
            debug!(
                "Registered {} ({} channels)",
                descriptor.id,
                config.channel_map.len()
            );
            adapters.push(Arc::new(RegisteredAdapter {
                adapter,
                descriptor,
                config: RwLock::new(config),
            }));
        }

        info!("Registry loaded {} adapters", adapters.len());
        Self { adapters, configs }
    }

    pub fn ids(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<AdapterDescriptor> {
        self.adapters.iter().map(|a| a.descriptor.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<RegisteredAdapter>> {
        self.adapters.iter().find(|a| a.id() == id).cloned()
    }

    /// Adapters in fallback order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredAdapter>> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub async fn config(&self, id: &str) -> Result<AdapterConfig> {
        let slot = self
            .get(id)
            .ok_or_else(|| Error::AdapterNotFound(id.to_string()))?;
        Ok(slot.config().await)
    }

    /// Replace an adapter's channel map and persist its config.
    pub async fn set_channel_map(&self, id: &str, channel_map: ChannelMap) -> Result<()> {
        let slot = self
            .get(id)
            .ok_or_else(|| Error::AdapterNotFound(id.to_string()))?;

        let updated = {
            let mut config = slot.config.write().await;
            config.channel_map = channel_map;
            config.clone()
        };

        match &self.configs {
            Some(store) => store.save(id, &updated).await,
            None => Ok(()),
        }
    }

    /// Current cache TTL per adapter.
    pub async fn ttls(&self) -> HashMap<String, chrono::Duration> {
        let mut ttls = HashMap::with_capacity(self.adapters.len());
        for slot in &self.adapters {
            ttls.insert(slot.id().to_string(), slot.config.read().await.cache_ttl());
        }
        ttls
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

fn validate(adapter: &dyn Adapter, descriptor: &AdapterDescriptor) -> std::result::Result<(), String> {
    if !valid_id(&descriptor.id) {
        return Err("id must be non-empty lowercase [a-z0-9_-]".to_string());
    }
    if descriptor.name.trim().is_empty() {
        return Err("empty display name".to_string());
    }
    let caps = descriptor.capabilities;
    if caps.has_live && adapter.live_source().is_none() {
        return Err("declares live support without implementing it".to_string());
    }
    if caps.has_vod && adapter.vod_source().is_none() {
        return Err("declares VOD support without implementing it".to_string());
    }
    Ok(())
}

async fn load_config(
    adapter: &dyn Adapter,
    id: &str,
    configs: Option<&JsonDirStore<AdapterConfig>>,
    app: &AppConfig,
) -> AdapterConfig {
    let section = app.adapter(id);
    let Some(store) = configs else {
        return first_run(adapter, id, section).await;
    };

    match store.load(id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            let config = first_run(adapter, id, section).await;
            if let Err(e) = store.save(id, &config).await {
                warn!("Failed to save initial config for {id}: {e}");
            }
            config
        }
        Err(e) => {
            error!("{e}; using defaults for {id}");
            AdapterConfig::seeded(section)
        }
    }
}

async fn first_run(
    adapter: &dyn Adapter,
    id: &str,
    section: Option<&crate::config::AdapterSection>,
) -> AdapterConfig {
    let mut config = AdapterConfig::seeded(section);

    match tokio::time::timeout(config.timeout(), adapter.channels()).await {
        Ok(Ok(reported)) => {
            debug!("{id} reported {} channels", reported.len());
            config.channel_map.extend(reported);
        }
        Ok(Err(Error::NotSupported { .. })) => {}
        Ok(Err(e)) => warn!("Could not list channels for {id}: {e}"),
        Err(_) => warn!("Listing channels for {id} timed out"),
    }
    config
}
