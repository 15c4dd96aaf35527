//! Resolution engine: the single entry point for callers.
//!
//! # Resolution flow
//!
//! ```text
//! resolve(content, adapter?)
//!   ├─ adapter given ──▶ resolve on that adapter
//!   └─ otherwise ─────▶ try each registered adapter in order,
//!                       first success wins, else NoProviderFound
//!
//! resolve on one adapter
//!   1. live capability?          no  → NotSupported
//!   2. content in channel map?   no  → refresh channels once → ChannelNotFound
//!   3. fresh cache entry?        yes → fromCache = true
//!   4. session (login/refresh) → adapter call → cache fill
//! ```
//!
//! Step 4 runs in its own task under the adapter's timeout, so a caller
//! that goes away does not cancel a call that already reached the
//! provider, and the result still lands in the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{
    providers, AdapterDescriptor, ChannelEntry, ChannelMap, Session, StreamDescriptor, VodItem,
    VodListing, VodOptions,
};
use crate::cache::{CacheEntry, CacheStore};
use crate::config::{AdapterConfig, AppConfig};
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::{Error, Result};
use crate::http::UpstreamClient;
use crate::manifest::{ManifestRewriter, Playback};
use crate::registry::{RegisteredAdapter, Registry};
use crate::session::SessionManager;
use crate::store::JsonDirStore;

/// Result of a stream resolution as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub from_cache: bool,
    #[serde(rename = "adapter")]
    pub adapter_id: String,
    pub data: StreamDescriptor,
}

/// What a spawned upstream call should fetch.
#[derive(Debug, Clone)]
enum StreamRequest {
    Live { provider_id: String },
    Episode { show_id: String, episode_id: String },
}

pub struct Engine {
    registry: Arc<Registry>,
    cache: Arc<CacheStore>,
    sessions: Arc<SessionManager>,
    rewriter: ManifestRewriter,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<CacheStore>,
        sessions: Arc<SessionManager>,
        rewriter: ManifestRewriter,
    ) -> Self {
        Self {
            registry,
            cache,
            sessions,
            rewriter,
        }
    }

    /// Wire up the built-in adapters and on-disk stores under the
    /// configured data directory.
    pub async fn bootstrap(app: &AppConfig) -> Result<Self> {
        let data_dir = app.data_dir();
        debug!("Using data directory {}", data_dir.display());

        let client = match &app.user_agent {
            Some(ua) => UpstreamClient::with_user_agent(ua)?,
            None => UpstreamClient::new()?,
        };

        let registry = Arc::new(
            Registry::build(
                providers::builtin(app, &client),
                Some(JsonDirStore::new(data_dir.join("adapters"))),
                app,
            )
            .await,
        );
        let cache = Arc::new(CacheStore::open(data_dir.join("cache.json")).await);
        let credentials = Arc::new(CredentialStore::open(data_dir.join("credentials")));

        Ok(Self::new(
            registry,
            cache,
            Arc::new(SessionManager::new(credentials)),
            ManifestRewriter::new(client),
        ))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Start the periodic cache sweeper.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        self.cache
            .clone()
            .spawn_sweeper(self.registry.clone(), interval)
    }

    pub fn list_adapters(&self) -> Vec<AdapterDescriptor> {
        self.registry.descriptors()
    }

    /// Resolve a live channel, on one adapter or across all of them.
    #[instrument(skip(self))]
    pub async fn resolve(&self, content_id: &str, adapter_id: Option<&str>) -> Result<Resolution> {
        if let Some(id) = adapter_id {
            let slot = self.slot(id)?;
            return self.resolve_on(&slot, content_id).await;
        }

        let mut last = None;
        for slot in self.registry.iter() {
            match self.resolve_on(slot, content_id).await {
                Ok(resolution) => return Ok(resolution),
                Err(e) => {
                    debug!("{} could not resolve {content_id}: {e}", slot.id());
                    last = Some(e);
                }
            }
        }

        Err(Error::NoProviderFound {
            content_id: content_id.to_string(),
            last: last.map(Box::new),
        })
    }

    /// Resolve, then fetch and rewrite the HLS playlist for the stream.
    /// Playlist fetches share the resolving adapter's timeout.
    pub async fn playback(&self, content_id: &str, adapter_id: Option<&str>) -> Result<Playback> {
        let resolution = self.resolve(content_id, adapter_id).await?;
        let config = self.registry.config(&resolution.adapter_id).await?;
        timed(config.timeout(), self.rewriter.rewrite(resolution.data)).await
    }

    pub async fn vod_list(&self, adapter_id: &str, options: &VodOptions) -> Result<Vec<VodItem>> {
        let slot = self.slot(adapter_id)?;
        let vod = vod_capability(&slot, "getVODList")?;
        let config = slot.config().await;
        let session = self
            .sessions
            .session_for(slot.adapter.as_ref(), &config)
            .await?;
        timed(config.timeout(), vod.vod_list(&session, options)).await
    }

    pub async fn vod(
        &self,
        adapter_id: &str,
        show_id: &str,
        options: &VodOptions,
    ) -> Result<VodListing> {
        let slot = self.slot(adapter_id)?;
        let vod = vod_capability(&slot, "getVOD")?;
        let config = slot.config().await;
        let session = self
            .sessions
            .session_for(slot.adapter.as_ref(), &config)
            .await?;
        timed(config.timeout(), vod.vod(show_id, &session, options)).await
    }

    /// Resolve one episode. Cached under `"{show_id}/{episode_id}"`.
    pub async fn vod_episode(
        &self,
        adapter_id: &str,
        show_id: &str,
        episode_id: &str,
    ) -> Result<Resolution> {
        let slot = self.slot(adapter_id)?;
        vod_capability(&slot, "getVODEpisode")?;
        let content_id = format!("{show_id}/{episode_id}");
        self.cached_or_fetch(
            &slot,
            &content_id,
            StreamRequest::Episode {
                show_id: show_id.to_string(),
                episode_id: episode_id.to_string(),
            },
        )
        .await
    }

    /// Store credentials for an adapter after a successful login.
    pub async fn login(
        &self,
        adapter_id: &str,
        username: &str,
        password: &str,
    ) -> Result<CredentialRecord> {
        let slot = self.slot(adapter_id)?;
        if !slot.descriptor.capabilities.auth_required {
            return Err(Error::not_supported(slot.id(), "login"));
        }
        let config = slot.config().await;
        timed(
            config.timeout(),
            self.sessions
                .login(slot.adapter.as_ref(), username, password),
        )
        .await
    }

    /// Ask the adapter for its channel list and make it the channel map.
    pub async fn refresh_channels(&self, adapter_id: &str) -> Result<ChannelMap> {
        let slot = self.slot(adapter_id)?;
        self.refresh_slot(&slot).await
    }

    pub async fn channels(&self, adapter_id: &str) -> Result<ChannelMap> {
        Ok(self.registry.config(adapter_id).await?.channel_map)
    }

    pub async fn cache_query(
        &self,
        adapter_id: Option<&str>,
        content_id: Option<&str>,
    ) -> Vec<CacheEntry> {
        self.cache.query(adapter_id, content_id).await
    }

    pub async fn cache_clear(
        &self,
        adapter_id: Option<&str>,
        content_id: Option<&str>,
    ) -> Result<usize> {
        let removed = self.cache.clear(adapter_id, content_id).await?;
        info!("Cleared {removed} cache entries");
        Ok(removed)
    }

    /// Remove expired entries using each adapter's current TTL.
    pub async fn cache_sweep(&self) -> Vec<CacheEntry> {
        let removed = self.cache.sweep(&self.registry.ttls().await).await;
        if !removed.is_empty() {
            info!("Cache sweep removed {} entries", removed.len());
        }
        removed
    }

    fn slot(&self, adapter_id: &str) -> Result<Arc<RegisteredAdapter>> {
        self.registry
            .get(adapter_id)
            .ok_or_else(|| Error::AdapterNotFound(adapter_id.to_string()))
    }

    async fn resolve_on(&self, slot: &Arc<RegisteredAdapter>, content_id: &str) -> Result<Resolution> {
        if !slot.descriptor.capabilities.has_live || slot.adapter.live_source().is_none() {
            return Err(Error::not_supported(slot.id(), "getLiveChannel"));
        }

        let entry = self.lookup_channel(slot, content_id).await?;
        self.cached_or_fetch(
            slot,
            content_id,
            StreamRequest::Live {
                provider_id: entry.provider_id,
            },
        )
        .await
    }

    async fn lookup_channel(
        &self,
        slot: &Arc<RegisteredAdapter>,
        content_id: &str,
    ) -> Result<ChannelEntry> {
        if let Some(entry) = slot.config().await.channel_map.get(content_id) {
            return Ok(entry.clone());
        }

        debug!("{content_id} not in {} channel map, refreshing", slot.id());
        match self.refresh_slot(slot).await {
            Ok(map) => {
                if let Some(entry) = map.get(content_id) {
                    return Ok(entry.clone());
                }
            }
            Err(Error::NotSupported { .. }) => {}
            Err(e) => warn!("Channel refresh for {} failed: {e}", slot.id()),
        }

        Err(Error::ChannelNotFound {
            adapter_id: slot.id().to_string(),
            content_id: content_id.to_string(),
        })
    }

    async fn refresh_slot(&self, slot: &Arc<RegisteredAdapter>) -> Result<ChannelMap> {
        let config = slot.config().await;
        let map = timed(config.timeout(), slot.adapter.channels()).await?;
        info!("{} reported {} channels", slot.id(), map.len());

        if let Err(e) = self.registry.set_channel_map(slot.id(), map.clone()).await {
            warn!("Failed to save channel map for {}: {e}", slot.id());
        }
        Ok(map)
    }

    async fn cached_or_fetch(
        &self,
        slot: &Arc<RegisteredAdapter>,
        content_id: &str,
        request: StreamRequest,
    ) -> Result<Resolution> {
        let config = slot.config().await;

        if config.cache_enabled {
            if let Some(hit) = self
                .cache
                .find(slot.id(), content_id, config.cache_ttl())
                .await
            {
                debug!("Cache hit for {}/{content_id}", slot.id());
                return Ok(Resolution {
                    from_cache: true,
                    adapter_id: slot.id().to_string(),
                    data: hit.descriptor,
                });
            }
        }

        let task = {
            let slot = slot.clone();
            let cache = self.cache.clone();
            let sessions = self.sessions.clone();
            let content_id = content_id.to_string();
            tokio::spawn(async move {
                let descriptor = fetch_stream(&slot, &sessions, &config, &request).await?;
                if config.cache_enabled {
                    if let Err(e) = cache
                        .fill(slot.id(), &content_id, descriptor.clone())
                        .await
                    {
                        warn!("Failed to persist cache entry {}/{content_id}: {e}", slot.id());
                    }
                }
                Ok::<_, Error>(descriptor)
            })
        };

        let descriptor = task
            .await
            .map_err(|e| Error::upstream(format!("{}: upstream task failed: {e}", slot.id())))??;

        Ok(Resolution {
            from_cache: false,
            adapter_id: slot.id().to_string(),
            data: descriptor,
        })
    }
}

fn vod_capability<'a>(
    slot: &'a RegisteredAdapter,
    operation: &'static str,
) -> Result<&'a dyn crate::adapter::VodSource> {
    if !slot.descriptor.capabilities.has_vod {
        return Err(Error::not_supported(slot.id(), operation));
    }
    slot.adapter
        .vod_source()
        .ok_or_else(|| Error::not_supported(slot.id(), operation))
}

/// Obtain a session and call the adapter. An auth rejection with tokens in
/// hand triggers one fresh login with the stored credentials and a retry.
async fn fetch_stream(
    slot: &RegisteredAdapter,
    sessions: &SessionManager,
    config: &AdapterConfig,
    request: &StreamRequest,
) -> Result<StreamDescriptor> {
    let session = sessions.session_for(slot.adapter.as_ref(), config).await?;

    match timed(config.timeout(), call(slot, request, &session)).await {
        Err(Error::Auth(msg))
            if slot.descriptor.capabilities.auth_required && !session.tokens.is_empty() =>
        {
            warn!("{} rejected session ({msg}), logging in again", slot.id());
            let session =
                timed(config.timeout(), sessions.relogin(slot.adapter.as_ref())).await?;
            timed(config.timeout(), call(slot, request, &session)).await
        }
        other => other,
    }
}

async fn call(
    slot: &RegisteredAdapter,
    request: &StreamRequest,
    session: &Session,
) -> Result<StreamDescriptor> {
    match request {
        StreamRequest::Live { provider_id } => {
            let live = slot
                .adapter
                .live_source()
                .ok_or_else(|| Error::not_supported(slot.id(), "getLiveChannel"))?;
            live.live_channel(provider_id, session).await
        }
        StreamRequest::Episode {
            show_id,
            episode_id,
        } => {
            let vod = slot
                .adapter
                .vod_source()
                .ok_or_else(|| Error::not_supported(slot.id(), "getVODEpisode"))?;
            vod.vod_episode(show_id, episode_id, session).await
        }
    }
}

async fn timed<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::upstream(format!("timed out after {}s", limit.as_secs())))?
}
