use std::future::Future;
use std::pin::Pin;

use aurora_device::{DeviceApi, DeviceError};
use aurora_protocol::types::{ImuSample, LidarScan};

use crate::watermark::Timestamped;

/// A device ring buffer that can be peeked.
pub trait SampleSource: Send + Sync {
    type Sample: Timestamped + Clone + Send + Sync + 'static;

    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Up to `max_count` of the most recent samples, oldest first. An empty
    /// batch means nothing is available yet.
    fn peek(
        &self,
        max_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Self::Sample>, DeviceError>> + Send + '_>>;
}

pub struct ImuSource {
    api: DeviceApi,
}

impl ImuSource {
    pub fn new(api: DeviceApi) -> Self {
        Self { api }
    }
}

impl SampleSource for ImuSource {
    type Sample = ImuSample;

    fn kind(&self) -> &'static str {
        "imu"
    }

    fn peek(
        &self,
        max_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ImuSample>, DeviceError>> + Send + '_>> {
        Box::pin(self.api.peek_imu(max_count))
    }
}

pub struct LidarSource {
    api: DeviceApi,
}

impl LidarSource {
    pub fn new(api: DeviceApi) -> Self {
        Self { api }
    }
}

impl SampleSource for LidarSource {
    type Sample = LidarScan;

    fn kind(&self) -> &'static str {
        "lidar"
    }

    fn peek(
        &self,
        max_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LidarScan>, DeviceError>> + Send + '_>> {
        Box::pin(self.api.peek_lidar_scans(max_count))
    }
}
