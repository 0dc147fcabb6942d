//! Configuration for the connectivity layer.
//!
//! All tunables carry documented defaults and deserialize with `serde`,
//! so they can be loaded from a config file plus `UPLINK_*` environment
//! overrides, or constructed directly in code.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Tunables for the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How often the periodic probe fires, in milliseconds. Default 5000.
    pub probe_interval_ms: u64,
    /// Deadline for a single liveness probe, in milliseconds. Default 5000.
    pub probe_timeout_ms: u64,
    /// Idle time after which the client is flagged inactive, in
    /// milliseconds. Default 30000.
    pub inactivity_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
            probe_timeout_ms: 5_000,
            inactivity_timeout_ms: 30_000,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

/// Tunables for channel supervision.
///
/// Reconnection uses a fixed delay rather than exponential backoff so
/// that worst-case downtime stays predictable: at most
/// `max_reconnect_attempts * reconnect_delay` before a channel gives up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum automatic reconnect attempts per drop. Default 2.
    pub max_reconnect_attempts: u32,
    /// Delay between reconnect attempts, in milliseconds. Default 10000.
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 2,
            reconnect_delay_ms: 10_000,
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Per-instance cache tuning.
///
/// Different data categories use independently configured instances;
/// the presets cover the two common cases.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live for entries, in milliseconds. Default 60000.
    pub ttl_ms: u64,
    /// Maximum number of entries before oldest-first eviction. Default 100.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::short_lived()
    }
}

impl CacheConfig {
    /// Preset for frequently refreshed data: 60 s TTL, 100 entries.
    pub fn short_lived() -> Self {
        Self {
            ttl_ms: 60_000,
            max_entries: 100,
        }
    }

    /// Preset for rarely changing data: 30 min TTL, 10 entries.
    pub fn long_lived() -> Self {
        Self {
            ttl_ms: 1_800_000,
            max_entries: 10,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Top-level configuration for the connectivity layer.
///
/// # Example
///
/// ```
/// use uplink::UplinkConfig;
///
/// let config = UplinkConfig::default();
/// assert_eq!(config.health.probe_interval_ms, 5000);
/// assert_eq!(config.channel.max_reconnect_attempts, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct UplinkConfig {
    /// Backend base URL, e.g. "http://localhost:8080".
    pub endpoint: String,
    pub health: HealthConfig,
    pub channel: ChannelConfig,
}

impl UplinkConfig {
    /// Load configuration from a file, layered with `UPLINK_*`
    /// environment overrides (e.g. `UPLINK_HEALTH__PROBE_INTERVAL_MS`).
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("UPLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
