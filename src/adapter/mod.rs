//! Adapter contract and the data types adapters exchange with the engine.
//!
//! An [`Adapter`] wraps one content provider. The engine never looks at how
//! an adapter talks to its provider; it only calls the operations below and
//! treats auth tokens as an opaque ordered list.
//!
//! Live and VOD support are separate capability traits reached through
//! [`Adapter::live_source`] and [`Adapter::vod_source`]. An adapter whose
//! descriptor sets `has_live` must return `Some` from `live_source()`, which
//! the registry checks at startup.

pub mod providers;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialRecord;
use crate::error::{Error, Result};

/// Default age after which provider tokens are considered stale.
pub const DEFAULT_TOKEN_MAX_AGE_HOURS: i64 = 6;

/// Capability flags declared by an adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub has_live: bool,
    #[serde(rename = "hasVOD")]
    pub has_vod: bool,
    pub auth_required: bool,
    pub search_enabled: bool,
}

/// Static description of an adapter, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Unique lowercase id (e.g., `"generic"`, `"xtream"`).
    pub id: String,
    /// Human-readable provider name.
    pub name: String,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// One channel as known to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Provider-internal channel id handed back to [`LiveSource::live_channel`].
    pub provider_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ChannelEntry {
    pub fn new(provider_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            name: name.into(),
            image: None,
        }
    }
}

/// Logical channel id → provider channel, in insertion order.
pub type ChannelMap = IndexMap<String, ChannelEntry>;

/// License server metadata forwarded untouched to players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrmInfo {
    #[serde(rename = "licenseURL")]
    pub license_url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    pub language: String,
    pub url: String,
}

/// A resolved, playable stream reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    #[serde(rename = "streamURL")]
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drm: Option<DrmInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<Subtitle>,
    /// Request headers the upstream expects (Referer, Origin, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl StreamDescriptor {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            drm: None,
            subtitles: Vec::new(),
            headers: HashMap::new(),
        }
    }
}

/// Credential view handed to adapters on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub tokens: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Session {
    /// Token at `index`, or an auth error naming the adapter.
    pub fn token(&self, index: usize, adapter_id: &str) -> Result<&str> {
        self.tokens
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::Auth(format!("{adapter_id}: missing session token")))
    }
}

impl From<&CredentialRecord> for Session {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            tokens: record.auth_tokens.clone(),
            last_updated: record.last_updated,
        }
    }
}

/// An entry in a provider's VOD catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VodItem {
    pub id: String,
    pub name: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Paging / filtering knobs for VOD listings. Meaning is adapter-specific.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VodOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VodFilter {
    pub id: String,
    pub name: String,
}

/// Result of opening a show: either its episodes, or a further level of
/// filters (seasons, categories) to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "items")]
pub enum VodListing {
    Episodes(Vec<Episode>),
    Filters(Vec<VodFilter>),
}

/// Contract implemented by every provider adapter.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn descriptor(&self) -> AdapterDescriptor;

    /// Authenticate and return the provider's token list.
    async fn login(&self, username: &str, password: &str) -> Result<Vec<String>>;

    /// Refresh stale tokens. Defaults to a full re-login with the stored
    /// username and password; adapters with partial refresh override this
    /// and may replace only some slots of `record.auth_tokens`.
    async fn refresh(&self, record: &CredentialRecord) -> Result<Vec<String>> {
        if record.username.is_empty() {
            return Err(Error::Auth(format!(
                "{}: no stored credentials to refresh with",
                self.descriptor().id
            )));
        }
        self.login(&record.username, &record.password).await
    }

    /// Age after which tokens count as stale.
    fn token_max_age(&self) -> Duration {
        Duration::hours(DEFAULT_TOKEN_MAX_AGE_HOURS)
    }

    /// Self-reported channel list. Adapters that cannot list their channels
    /// keep the default.
    async fn channels(&self) -> Result<ChannelMap> {
        Err(Error::not_supported(&self.descriptor().id, "getChannels"))
    }

    fn live_source(&self) -> Option<&dyn LiveSource> {
        None
    }

    fn vod_source(&self) -> Option<&dyn VodSource> {
        None
    }
}

#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn live_channel(
        &self,
        provider_channel_id: &str,
        session: &Session,
    ) -> Result<StreamDescriptor>;
}

#[async_trait]
pub trait VodSource: Send + Sync {
    async fn vod_list(&self, session: &Session, options: &VodOptions) -> Result<Vec<VodItem>>;

    async fn vod(&self, show_id: &str, session: &Session, options: &VodOptions)
        -> Result<VodListing>;

    async fn vod_episode(
        &self,
        show_id: &str,
        episode_id: &str,
        session: &Session,
    ) -> Result<StreamDescriptor>;
}
