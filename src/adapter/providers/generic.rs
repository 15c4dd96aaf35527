//! Generic HLS adapter for direct stream URLs and M3U channel lists

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::adapter::{
    Adapter, AdapterDescriptor, Capabilities, ChannelEntry, ChannelMap, LiveSource, Session,
    StreamDescriptor,
};
use crate::config::{AdapterSection, ChannelSeed};
use crate::error::{Error, Result};
use crate::http::UpstreamClient;
use crate::manifest::{has_scheme, resolve_uri};

pub const ID: &str = "generic";

static EXTINF_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z0-9-]+)="([^"]*)""#).expect("valid EXTINF attribute regex"));

/// Channels are either declared statically or listed by a remote M3U file.
/// The provider channel id is the stream URL itself.
pub struct GenericHlsAdapter {
    client: UpstreamClient,
    seeds: Vec<ChannelSeed>,
    playlist_url: Option<String>,
}

impl GenericHlsAdapter {
    pub fn new(client: UpstreamClient, section: Option<&AdapterSection>) -> Self {
        Self {
            client,
            seeds: section.map(|s| s.channels.clone()).unwrap_or_default(),
            playlist_url: section.and_then(|s| s.playlist_url.clone()),
        }
    }
}

#[async_trait]
impl Adapter for GenericHlsAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            id: ID.to_string(),
            name: "Direct HLS".to_string(),
            capabilities: Capabilities {
                has_live: true,
                ..Capabilities::default()
            },
            logo: None,
        }
    }

    async fn login(&self, _username: &str, _password: &str) -> Result<Vec<String>> {
        Err(Error::not_supported(ID, "login"))
    }

    async fn channels(&self) -> Result<ChannelMap> {
        let mut map: ChannelMap = self
            .seeds
            .iter()
            .map(|seed| (seed.id.clone(), seed.entry()))
            .collect();

        if let Some(url) = &self.playlist_url {
            let body = self.client.fetch_text(url, &HashMap::new()).await?;
            let listed = parse_m3u(&body, url);
            debug!("Playlist {url} listed {} channels", listed.len());
            for (id, entry) in listed {
                map.entry(id).or_insert(entry);
            }
        }

        Ok(map)
    }

    fn live_source(&self) -> Option<&dyn LiveSource> {
        Some(self)
    }
}

#[async_trait]
impl LiveSource for GenericHlsAdapter {
    async fn live_channel(
        &self,
        provider_channel_id: &str,
        _session: &Session,
    ) -> Result<StreamDescriptor> {
        if !has_scheme(provider_channel_id) {
            return Err(Error::upstream(format!(
                "{ID}: {provider_channel_id} is not a stream URL"
            )));
        }
        Ok(StreamDescriptor::new(provider_channel_id))
    }
}

/// Parse an extended M3U channel list.
///
/// ```text
/// #EXTINF:-1 tvg-id="news.uk" tvg-logo="http://logo/news.png",News 24
/// http://cdn.example.com/news.m3u8
/// ```
///
/// The logical id is `tvg-id`, else a slug of the display name. Relative
/// stream URLs resolve against `base`. The first occurrence of an id wins.
pub fn parse_m3u(body: &str, base: &str) -> ChannelMap {
    let mut map = ChannelMap::new();
    let mut pending: Option<(String, ChannelEntry)> = None;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            pending = parse_extinf(info);
        } else if line.starts_with('#') {
            continue;
        } else if let Some((id, mut entry)) = pending.take() {
            entry.provider_id = resolve_uri(base, line);
            map.entry(id).or_insert(entry);
        }
    }

    map
}

fn parse_extinf(info: &str) -> Option<(String, ChannelEntry)> {
    let attrs: HashMap<&str, &str> = EXTINF_ATTR
        .captures_iter(info)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    let name = info
        .rsplit_once(',')
        .map(|(_, name)| name.trim())
        .filter(|name| !name.is_empty())
        .or_else(|| attrs.get("tvg-name").copied())?
        .to_string();

    let id = attrs
        .get("tvg-id")
        .filter(|id| !id.is_empty())
        .map_or_else(|| slug(&name), |id| (*id).to_string());
    if id.is_empty() {
        return None;
    }

    let mut entry = ChannelEntry::new(String::new(), name);
    entry.image = attrs
        .get("tvg-logo")
        .filter(|logo| !logo.is_empty())
        .map(|logo| (*logo).to_string());
    Some((id, entry))
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}
