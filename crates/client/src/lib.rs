//! One-stop client for an Aurora SLAM device.
//!
//! [`AuroraClient`] wires a device channel to the map transfer, map-data
//! sync, selective fetch and sensor streaming components, configured from a
//! [`ClientConfig`].

mod client;
mod config;

pub use client::AuroraClient;
pub use config::{ClientConfig, ConnectionConfig, StreamConfig, SyncConfig, TransferConfig};

pub use aurora_device::{DeviceApi, DeviceChannel, DeviceError, DeviceLocator};
pub use aurora_map_sync::{
    CacheSnapshot, FetchOptions, MapData, MapDataCache, MapSelector, QueryError, SyncError,
    SyncStatus,
};
pub use aurora_map_transfer::{TransferError, TransferEvent, TransferOutcome, TransferReport};
pub use aurora_stream::StreamError;

use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when unset. Does nothing if a subscriber is already
/// installed.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
