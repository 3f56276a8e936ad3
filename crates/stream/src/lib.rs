//! Deduplicated sensor streaming on top of device ring-buffer peeks.
//!
//! The device keeps the most recent samples in a fixed-depth ring and
//! answers peeks without consuming them, so consecutive peeks overlap.
//! [`Watermark`] drops everything at or below the newest timestamp already
//! emitted.
//!
//! Loss property: when `poll interval × production rate` exceeds the device
//! ring depth, samples are overwritten on the device before the next peek
//! and are lost for good. No error is raised; [`PollerStats::possible_gaps`]
//! counts the polls where nothing in the batch overlapped what was already
//! seen, which is when such a loss may have happened.

mod buffer;
mod poller;
mod source;
mod watermark;

pub use buffer::{History, SharedHistory};
pub use poller::{PollerOptions, PollerStats, SamplePoller};
pub use source::{ImuSource, LidarSource, SampleSource};
pub use watermark::{Timestamped, Watermark};

use aurora_device::DeviceError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("invalid poller options: {0}")]
    InvalidOptions(String),
}
