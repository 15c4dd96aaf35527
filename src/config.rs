//! Operator configuration loaded from `~/.config/tvmux/config.toml`, and the
//! per-adapter [`AdapterConfig`] persisted under the data directory.
//!
//! ```toml
//! data_dir = "/var/lib/tvmux"
//! sweep_interval_minutes = 60
//!
//! [adapters.generic]
//! cache_ttl_hours = 2
//! playlist_url = "https://example.com/channels.m3u"
//!
//! [[adapters.generic.channels]]
//! id = "news"
//! name = "News 24"
//! url = "https://cdn.example.com/news/index.m3u8"
//!
//! [adapters.xtream]
//! base_url = "http://panel.example.com:8080"
//! timeout_secs = 15
//!
//! [[adapters.xtream.channels]]
//! id = "sports"
//! provider_id = "1042"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{ChannelEntry, ChannelMap};
use crate::error::{Error, Result};

pub const DEFAULT_CACHE_TTL_HOURS: f64 = 6.0;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 60;

/// Top-level operator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Where credentials, adapter configs and the cache live.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_minutes: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Per-adapter sections keyed by adapter id.
    #[serde(default)]
    pub adapters: HashMap<String, AdapterSection>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sweep_interval_minutes: DEFAULT_SWEEP_INTERVAL_MINUTES,
            user_agent: None,
            adapters: HashMap::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MINUTES
}

/// Operator settings for one adapter. Unset fields fall back to defaults
/// when the adapter is registered for the first time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdapterSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub cache_enabled: Option<bool>,
    #[serde(default)]
    pub cache_ttl_hours: Option<f64>,
    #[serde(default)]
    pub refresh_interval_hours: Option<f64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Provider API root (Xtream panels).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Remote M3U channel list (generic adapter).
    #[serde(default)]
    pub playlist_url: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
}

/// A channel declared by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSeed {
    /// Logical channel id used by callers.
    pub id: String,
    /// Provider-internal id; defaults to `url`, then `id`.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Direct stream URL (generic adapter).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl ChannelSeed {
    pub fn provider_id(&self) -> &str {
        self.provider_id
            .as_deref()
            .or(self.url.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn entry(&self) -> ChannelEntry {
        ChannelEntry {
            provider_id: self.provider_id().to_string(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            image: self.image.clone(),
        }
    }
}

impl AppConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Hour counts must be finite and non-negative.
    fn validate(&self) -> Result<()> {
        for (id, section) in &self.adapters {
            let hours = [
                ("cache_ttl_hours", section.cache_ttl_hours),
                ("refresh_interval_hours", section.refresh_interval_hours),
            ];
            for (field, value) in hours {
                if let Some(v) = value.filter(|v| !v.is_finite() || *v < 0.0) {
                    return Err(Error::Config(format!(
                        "adapters.{id}.{field} must be a finite number of hours >= 0, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tvmux")
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes.max(1) * 60)
    }

    pub fn adapter(&self, id: &str) -> Option<&AdapterSection> {
        self.adapters.get(id)
    }

    /// Adapters are enabled unless their section says otherwise.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.adapter(id).and_then(|s| s.enabled).unwrap_or(true)
    }
}

/// Return the path to the operator config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tvmux")
        .join("config.toml")
}

/// Runtime settings for one adapter, persisted as `adapters/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(rename = "cacheTTLHours", default = "default_ttl")]
    pub cache_ttl_hours: f64,
    #[serde(default)]
    pub channel_map: ChannelMap,
    /// Overrides the adapter's token staleness threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_hours: Option<f64>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_ttl() -> f64 {
    DEFAULT_CACHE_TTL_HOURS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            channel_map: ChannelMap::new(),
            refresh_interval_hours: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl AdapterConfig {
    /// First-run config built from the operator's section.
    pub fn seeded(section: Option<&AdapterSection>) -> Self {
        let defaults = Self::default();
        let Some(section) = section else {
            return defaults;
        };

        Self {
            cache_enabled: section.cache_enabled.unwrap_or(defaults.cache_enabled),
            cache_ttl_hours: section.cache_ttl_hours.unwrap_or(defaults.cache_ttl_hours),
            channel_map: section
                .channels
                .iter()
                .map(|seed| (seed.id.clone(), seed.entry()))
                .collect(),
            refresh_interval_hours: section.refresh_interval_hours,
            timeout_secs: section.timeout_secs.unwrap_or(defaults.timeout_secs),
        }
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        crate::session::hours(self.cache_ttl_hours)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.adapters.is_empty());
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
        assert!(config.is_enabled("anything"));
    }

    #[test]
    fn parse_adapter_sections() {
        let config = AppConfig::parse(
            r#"
sweep_interval_minutes = 15

[adapters.generic]
cache_ttl_hours = 2
playlist_url = "https://example.com/list.m3u"

[[adapters.generic.channels]]
id = "news"
name = "News 24"
url = "https://cdn.example.com/news.m3u8"

[adapters.xtream]
enabled = false
base_url = "http://panel.example.com"
"#,
        )
        .unwrap();

        assert_eq!(config.sweep_interval(), Duration::from_secs(900));
        let generic = config.adapter("generic").unwrap();
        assert_eq!(generic.cache_ttl_hours, Some(2.0));
        assert_eq!(
            generic.channels[0].provider_id(),
            "https://cdn.example.com/news.m3u8"
        );
        assert!(!config.is_enabled("xtream"));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = AppConfig::parse("adapters = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unbounded_or_negative_hours_are_rejected() {
        for value in ["inf", "nan", "-1.0"] {
            let err = AppConfig::parse(&format!("[adapters.generic]\ncache_ttl_hours = {value}\n"))
                .unwrap_err();
            assert!(matches!(err, Error::Config(ref msg) if msg.contains("cache_ttl_hours")));
        }
        let err = AppConfig::parse("[adapters.xtream]\nrefresh_interval_hours = -inf\n").unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("refresh_interval_hours")));

        let config = AppConfig::parse("[adapters.generic]\ncache_ttl_hours = 0\n").unwrap();
        assert_eq!(config.adapter("generic").unwrap().cache_ttl_hours, Some(0.0));
    }

    #[test]
    fn huge_persisted_ttl_saturates() {
        let config = AdapterConfig {
            cache_ttl_hours: 1e300,
            ..AdapterConfig::default()
        };
        assert_eq!(config.cache_ttl(), chrono::Duration::MAX);
    }

    #[test]
    fn seeded_config_uses_overrides_and_keeps_order() {
        let section = AdapterSection {
            cache_enabled: Some(false),
            timeout_secs: Some(5),
            channels: vec![
                ChannelSeed {
                    id: "sports".into(),
                    provider_id: Some("1042".into()),
                    name: None,
                    url: None,
                    image: None,
                },
                ChannelSeed {
                    id: "news".into(),
                    provider_id: None,
                    name: Some("News".into()),
                    url: None,
                    image: None,
                },
            ],
            ..AdapterSection::default()
        };

        let config = AdapterConfig::seeded(Some(&section));
        assert!(!config.cache_enabled);
        assert!((config.cache_ttl_hours - DEFAULT_CACHE_TTL_HOURS).abs() < f64::EPSILON);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        let ids: Vec<_> = config.channel_map.keys().cloned().collect();
        assert_eq!(ids, vec!["sports", "news"]);
        assert_eq!(config.channel_map["sports"].provider_id, "1042");
        assert_eq!(config.channel_map["sports"].name, "sports");
    }

    #[test]
    fn adapter_config_json_shape() {
        let json = serde_json::to_value(AdapterConfig::default()).unwrap();
        assert_eq!(json["cacheEnabled"], true);
        assert_eq!(json["cacheTTLHours"], 6.0);
        assert!(json.get("refreshIntervalHours").is_none());

        let parsed: AdapterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, AdapterConfig::default());
    }
}
