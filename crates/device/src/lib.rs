//! Connection layer for Aurora SLAM devices.
//!
//! [`DeviceChannel`] is the request/response seam every higher-level
//! component talks through; [`DeviceApi`] adds typed helpers on top.
//! [`TcpChannel`] is the network implementation and, with the `mock`
//! feature, [`mock::SimulatedDevice`] an in-process one.

pub mod channel;
pub mod error;
pub mod locator;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod tcp;
pub mod wire;

pub use channel::{DeviceApi, DeviceChannel};
pub use error::DeviceError;
pub use locator::DeviceLocator;
pub use tcp::{ChannelOptions, TcpChannel};
