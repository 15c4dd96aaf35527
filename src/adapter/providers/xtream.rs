//! Xtream Codes panel adapter (live channels and series)

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::adapter::{
    Adapter, AdapterDescriptor, Capabilities, Episode, LiveSource, Session, StreamDescriptor,
    VodFilter, VodItem, VodListing, VodOptions, VodSource,
};
use crate::error::{Error, Result};
use crate::http::UpstreamClient;

pub const ID: &str = "xtream";

/// Series per page in [`VodSource::vod_list`].
const PAGE_SIZE: usize = 50;
const DEFAULT_EPISODE_EXTENSION: &str = "mp4";

/// Talks to a panel's `player_api.php`. Session tokens are
/// `[username, password]` since the panel has no separate token.
pub struct XtreamAdapter {
    client: UpstreamClient,
    base_url: String,
}

impl XtreamAdapter {
    pub fn new(client: UpstreamClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn api_url(&self, username: &str, password: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut url = Url::parse(&format!("{}/player_api.php", self.base_url))
            .map_err(|e| Error::Config(format!("{ID}: invalid base_url {}: {e}", self.base_url)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("username", username);
            query.append_pair("password", password);
            for (k, v) in params {
                query.append_pair(k, v);
            }
        }
        Ok(url.into())
    }

    /// Call the API. Panels answer rejected credentials with a bare
    /// `user_info` object instead of the requested payload.
    async fn api<T: DeserializeOwned>(&self, session: &Session, params: &[(&str, &str)]) -> Result<T> {
        let (username, password) = credentials(session)?;
        let url = self.api_url(username, password, params)?;
        let value: Value = self.client.fetch_json(&url, &HashMap::new()).await?;

        if let Some(info) = value.get("user_info") {
            if !is_authorized(info) {
                return Err(Error::Auth(format!("{ID}: panel rejected credentials")));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| Error::upstream(format!("{ID}: unexpected response: {e}")))
    }

    async fn series_detail(&self, show_id: &str, session: &Session) -> Result<BTreeMap<u32, Vec<XEpisode>>> {
        let detail: SeriesDetail = self
            .api(session, &[("action", "get_series_info"), ("series_id", show_id)])
            .await?;
        let seasons = episodes_by_season(detail.episodes)?;
        if seasons.values().all(Vec::is_empty) {
            return Err(Error::ShowNotFound(show_id.to_string()));
        }
        Ok(seasons)
    }

    fn stream_url(&self, kind: &str, session: &Session, id: &str, ext: &str) -> Result<String> {
        let (username, password) = credentials(session)?;
        Ok(format!(
            "{}/{kind}/{}/{}/{id}.{ext}",
            self.base_url,
            urlencoding::encode(username),
            urlencoding::encode(password)
        ))
    }
}

#[async_trait]
impl Adapter for XtreamAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            id: ID.to_string(),
            name: "Xtream Codes".to_string(),
            capabilities: Capabilities {
                has_live: true,
                has_vod: true,
                auth_required: true,
                search_enabled: true,
            },
            logo: None,
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<Vec<String>> {
        let url = self.api_url(username, password, &[])?;
        let info: PlayerInfo = self.client.fetch_json(&url, &HashMap::new()).await?;

        if !is_authorized(&info.user_info) {
            return Err(Error::Auth(format!("{ID}: login rejected for {username}")));
        }
        if let Some(status) = info.user_info.get("status").and_then(Value::as_str) {
            if !status.eq_ignore_ascii_case("active") {
                return Err(Error::Auth(format!("{ID}: account is {status}")));
            }
        }

        debug!("{ID}: logged in as {username}");
        Ok(vec![username.to_string(), password.to_string()])
    }

    fn live_source(&self) -> Option<&dyn LiveSource> {
        Some(self)
    }

    fn vod_source(&self) -> Option<&dyn VodSource> {
        Some(self)
    }
}

#[async_trait]
impl LiveSource for XtreamAdapter {
    async fn live_channel(
        &self,
        provider_channel_id: &str,
        session: &Session,
    ) -> Result<StreamDescriptor> {
        let url = self.stream_url("live", session, provider_channel_id, "m3u8")?;
        Ok(StreamDescriptor::new(url))
    }
}

#[async_trait]
impl VodSource for XtreamAdapter {
    async fn vod_list(&self, session: &Session, options: &VodOptions) -> Result<Vec<VodItem>> {
        let mut params = vec![("action", "get_series")];
        if let Some(category) = options.filter.as_deref() {
            params.push(("category_id", category));
        }
        let series: Vec<XSeries> = self.api(session, &params).await?;

        let query = options.query.as_deref().map(str::to_lowercase);
        let page = options.page.unwrap_or(1).max(1) as usize;

        Ok(series
            .into_iter()
            .filter(|s| {
                query
                    .as_deref()
                    .is_none_or(|q| s.name.to_lowercase().contains(q))
            })
            .skip((page - 1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .map(|s| VodItem {
                link: format!("{}/series/{}", self.base_url, s.series_id),
                id: s.series_id,
                name: s.name,
                image: s.cover.filter(|c| !c.is_empty()),
            })
            .collect())
    }

    async fn vod(&self, show_id: &str, session: &Session, options: &VodOptions) -> Result<VodListing> {
        let mut seasons = self.series_detail(show_id, session).await?;

        let season = match options.filter.as_deref() {
            Some(filter) => filter
                .parse::<u32>()
                .map_err(|_| Error::ShowNotFound(format!("{show_id} season {filter}")))?,
            None if seasons.len() > 1 => {
                return Ok(VodListing::Filters(
                    seasons
                        .keys()
                        .map(|n| VodFilter {
                            id: n.to_string(),
                            name: format!("Season {n}"),
                        })
                        .collect(),
                ));
            }
            None => seasons.keys().next().copied().unwrap_or_default(),
        };

        let episodes = seasons
            .remove(&season)
            .ok_or_else(|| Error::ShowNotFound(format!("{show_id} season {season}")))?;
        Ok(VodListing::Episodes(
            episodes
                .into_iter()
                .map(|e| e.into_episode(season))
                .collect(),
        ))
    }

    async fn vod_episode(
        &self,
        show_id: &str,
        episode_id: &str,
        session: &Session,
    ) -> Result<StreamDescriptor> {
        let seasons = self.series_detail(show_id, session).await?;
        let episode = seasons
            .values()
            .flatten()
            .find(|e| e.id == episode_id)
            .ok_or_else(|| Error::ShowNotFound(format!("{show_id}/{episode_id}")))?;

        let ext = episode
            .container_extension
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_EPISODE_EXTENSION);
        let url = self.stream_url("series", session, episode_id, ext)?;
        Ok(StreamDescriptor::new(url))
    }
}

fn credentials(session: &Session) -> Result<(&str, &str)> {
    Ok((session.token(0, ID)?, session.token(1, ID)?))
}

/// `user_info.auth` comes back as `1`, `"1"` or `0`.
fn is_authorized(user_info: &Value) -> bool {
    match user_info.get("auth") {
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::String(s)) => s == "1",
        _ => false,
    }
}

/// Episodes arrive keyed by season (`{"1": [...]}`), as a list of lists, or
/// as an empty array when the show has none.
fn episodes_by_season(value: Value) -> Result<BTreeMap<u32, Vec<XEpisode>>> {
    let decode = |list: Value| {
        serde_json::from_value::<Vec<XEpisode>>(list)
            .map_err(|e| Error::upstream(format!("{ID}: malformed episode list: {e}")))
    };

    let mut seasons = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (key, list) in map {
                let Ok(season) = key.parse::<u32>() else {
                    debug!("{ID}: skipping season key {key:?}");
                    continue;
                };
                seasons.insert(season, decode(list)?);
            }
        }
        Value::Array(lists) if lists.iter().all(Value::is_array) => {
            for (n, list) in (1u32..).zip(lists) {
                seasons.insert(n, decode(list)?);
            }
        }
        _ => {}
    }
    Ok(seasons)
}

fn number_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(D::Error::custom("expected string or number")),
    }
}

fn optional_number<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct PlayerInfo {
    #[serde(default)]
    user_info: Value,
}

#[derive(Debug, Deserialize)]
struct XSeries {
    #[serde(deserialize_with = "number_as_string")]
    series_id: String,
    name: String,
    #[serde(default)]
    cover: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesDetail {
    #[serde(default)]
    episodes: Value,
}

#[derive(Debug, Deserialize)]
struct XEpisode {
    #[serde(deserialize_with = "number_as_string")]
    id: String,
    #[serde(default, deserialize_with = "optional_number")]
    episode_num: Option<u32>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    container_extension: Option<String>,
    #[serde(default)]
    info: Option<XEpisodeInfo>,
}

#[derive(Debug, Deserialize)]
struct XEpisodeInfo {
    #[serde(default)]
    movie_image: Option<String>,
}

impl XEpisode {
    fn into_episode(self, season: u32) -> Episode {
        Episode {
            name: if self.title.is_empty() {
                format!("Episode {}", self.episode_num.unwrap_or_default())
            } else {
                self.title
            },
            id: self.id,
            season: Some(season),
            episode: self.episode_num,
            image: self
                .info
                .and_then(|i| i.movie_image)
                .filter(|i| !i.is_empty()),
        }
    }
}
