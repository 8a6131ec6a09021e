use std::collections::HashMap;
use std::time::Duration;

use camino::Utf8Path;
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use url::Url;

use unified::source::SourceKind;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Interval between full syncs of all sources, in seconds. The
    /// scheduler clamps this to [5 minutes, 24 hours].
    pub sync_interval: u64,
    /// Deadline for a single source sync, in seconds.
    pub sync_timeout: u64,
    pub max_concurrent_syncs: usize,
    pub max_concurrent_broadcasts: usize,
    /// TTL for entries written to the entity cache, in seconds.
    pub cache_ttl: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub max_entities: usize,
    /// Seconds between LRU sweeps; also the idle age past which an entity
    /// becomes evictable.
    pub cleanup_interval: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub source: SourceKind,
    pub url: Url,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    /// Coarse device-state poll interval, in seconds.
    pub state_poll_interval: Option<u64>,
    /// Fine event poll interval, in seconds.
    pub event_poll_interval: Option<u64>,
    pub auto_reconnect: Option<bool>,
    pub disable_tls_verify: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub hub: HubConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,
}

impl HubConfig {
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }

    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout)
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

impl RegistryConfig {
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sync_interval: 1800,
            sync_timeout: 600,
            max_concurrent_syncs: 3,
            max_concurrent_broadcasts: 5,
            cache_ttl: 300,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_entities: 500,
            cleanup_interval: 60,
        }
    }
}

impl AdapterConfig {
    const DEFAULT_STATE_POLL: Duration = Duration::from_secs(300);
    const DEFAULT_EVENT_POLL: Duration = Duration::from_secs(30);

    #[must_use]
    pub fn state_poll_interval(&self) -> Duration {
        self.state_poll_interval
            .map_or(Self::DEFAULT_STATE_POLL, Duration::from_secs)
    }

    #[must_use]
    pub fn event_poll_interval(&self) -> Duration {
        self.event_poll_interval
            .map_or(Self::DEFAULT_EVENT_POLL, Duration::from_secs)
    }
}

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("hub.sync_interval", 1800)?
        .set_default("hub.sync_timeout", 600)?
        .set_default("hub.max_concurrent_syncs", 3)?
        .set_default("hub.max_concurrent_broadcasts", 5)?
        .set_default("hub.cache_ttl", 300)?
        .set_default("registry.max_entities", 500)?
        .set_default("registry.cleanup_interval", 60)?
        .add_source(config::File::with_name(filename.as_str()))
        .build()?;

    settings.try_deserialize()
}
