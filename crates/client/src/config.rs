//! Client configuration.
//!
//! Stored as TOML; every section and field is optional and falls back to
//! its default:
//!
//! ```toml
//! [connection]
//! connect_timeout_ms = 10000
//! request_timeout_ms = 15000
//!
//! [transfer]
//! poll_interval_ms = 1000
//! max_wait_secs = 600
//! max_poll_failures = 10
//!
//! [sync]
//! poll_interval_ms = 500
//! min_keyframes = 10
//! min_sync_ratio = 0.8
//! max_wait_secs = 30
//!
//! [stream]
//! poll_interval_ms = 100
//! max_peek_count = 64
//! history_capacity = 1024
//! ```

use std::path::Path;
use std::time::Duration;

use aurora_device::ChannelOptions;
use aurora_map_sync::SyncCriteria;
use aurora_map_transfer::MonitorOptions;
use aurora_stream::PollerOptions;
use serde::{Deserialize, Serialize};

use crate::ClientError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub transfer: TransferConfig,
    pub sync: SyncConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let defaults = ChannelOptions::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    /// Consecutive failed status polls before the transfer is given up.
    pub max_poll_failures: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let defaults = MonitorOptions::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            max_wait_secs: defaults.max_wait.as_secs(),
            max_poll_failures: defaults.max_poll_failures,
        }
    }
}

impl TransferConfig {
    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: Duration::from_secs(self.max_wait_secs),
            max_poll_failures: self.max_poll_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub min_keyframes: u64,
    pub min_sync_ratio: f64,
    pub max_wait_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let criteria = SyncCriteria::default();
        Self {
            poll_interval_ms: aurora_map_sync::DEFAULT_SYNC_POLL_INTERVAL.as_millis() as u64,
            min_keyframes: criteria.min_keyframes,
            min_sync_ratio: criteria.min_sync_ratio,
            max_wait_secs: criteria.max_wait.as_secs(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn criteria(&self) -> SyncCriteria {
        SyncCriteria {
            min_keyframes: self.min_keyframes,
            min_sync_ratio: self.min_sync_ratio,
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    pub max_peek_count: u32,
    pub history_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let defaults = PollerOptions::default();
        Self {
            poll_interval_ms: defaults.interval.as_millis() as u64,
            max_peek_count: defaults.max_count,
            history_capacity: defaults.history_capacity,
        }
    }
}

impl StreamConfig {
    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_count: self.max_peek_count,
            history_capacity: self.history_capacity,
        }
    }
}

impl ClientConfig {
    /// Reads and validates a config file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ClientError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let positive = [
            ("connection.connect_timeout_ms", self.connection.connect_timeout_ms),
            ("connection.request_timeout_ms", self.connection.request_timeout_ms),
            ("transfer.poll_interval_ms", self.transfer.poll_interval_ms),
            ("transfer.max_wait_secs", self.transfer.max_wait_secs),
            ("transfer.max_poll_failures", u64::from(self.transfer.max_poll_failures)),
            ("sync.poll_interval_ms", self.sync.poll_interval_ms),
            ("sync.max_wait_secs", self.sync.max_wait_secs),
            ("stream.poll_interval_ms", self.stream.poll_interval_ms),
            ("stream.max_peek_count", u64::from(self.stream.max_peek_count)),
            ("stream.history_capacity", self.stream.history_capacity as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ClientError::InvalidConfig(format!("{name} must be positive")));
        }
        if !(0.0..=1.0).contains(&self.sync.min_sync_ratio) {
            return Err(ClientError::InvalidConfig(format!(
                "sync.min_sync_ratio {} outside [0, 1]",
                self.sync.min_sync_ratio
            )));
        }
        Ok(())
    }
}
