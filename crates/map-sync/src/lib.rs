//! Mirrors the device's growing SLAM map into local, consistent snapshots.
//!
//! - [`SyncTracker`] waits until the device-side map-data mirror has caught
//!   up enough to be worth reading.
//! - [`MapQuery`] fetches keyframes, map points and map descriptors for a
//!   [`MapSelector`] in one device request.
//! - [`MapDataCache`] holds the latest fetched snapshot; readers always see
//!   a complete snapshot.

mod cache;
mod query;
mod tracker;
mod types;

pub use cache::{CacheSnapshot, CachedMap, MapDataCache};
pub use query::{FetchOptions, MapQuery};
pub use tracker::{DEFAULT_SYNC_POLL_INTERVAL, SyncTracker};
pub use types::{IdRange, LoopClosure, MapData, MapInfo, SyncCriteria, SyncStatus};

pub use aurora_protocol::types::{MapId, MapSelector};

use std::time::Duration;

use aurora_device::DeviceError;

/// Errors from waiting on map-data sync. Failed polls are retried until
/// the budget runs out, so device errors surface only as a timeout.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("map data not synced after {waited:?}")]
    Timeout {
        waited: Duration,
        /// Last status seen before giving up.
        last: Option<SyncStatus>,
    },

    #[error("invalid sync criteria: {0}")]
    InvalidCriteria(String),
}

/// Errors from selective map-data fetches. A failed fetch returns no data.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("map data fetch failed: {0}")]
    Device(#[from] DeviceError),

    /// The device answered with data that cannot come from one snapshot of
    /// the requested maps.
    #[error("inconsistent map data: {0}")]
    Inconsistent(String),
}
