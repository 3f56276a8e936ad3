//! Map file transfer between the local filesystem and an Aurora device.
//!
//! A [`MapStorage`] owns at most one live [`TransferSession`] for its device
//! channel. The protocol is pull-based: callers (or [`MapStorage::monitor_session`])
//! poll the device until the session ends, then read the final status once
//! more to learn the outcome.

mod checksum;
mod monitor;
mod progress;
mod session;
mod types;
mod validation;

pub use checksum::{calculate_file_checksum, checksum_bytes};
pub use monitor::{
    DEFAULT_MAX_POLL_FAILURES, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, MonitorOptions,
};
pub use progress::ProgressRate;
pub use session::{MapStorage, TransferSession};
pub use types::{SessionStatus, TransferEvent, TransferOutcome, TransferReport, TransferState};
pub use validation::{validate_download_target, validate_upload_source};

pub use aurora_protocol::types::StorageSessionKind as TransferDirection;

use aurora_device::DeviceError;

/// Errors produced by the map transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The session ended but its final status could not be read.
    #[error("transfer outcome unknown: final status query failed: {0}")]
    Indeterminate(DeviceError),
}
