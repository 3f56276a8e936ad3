//! Device channel trait and the typed API built on it.
//!
//! `DeviceChannel` is the transport seam: [`crate::tcp::TcpChannel`] talks
//! to real hardware, [`crate::mock::SimulatedDevice`] (feature `mock`) runs
//! in-process. Everything above this layer goes through [`DeviceApi`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aurora_protocol::constants::MessageType;
use aurora_protocol::envelope::Message;
use aurora_protocol::messages::{
    ImuDataResponse, LidarScansResponse, MapDataRequest, MapDataResponse, MapListResponse,
    PeekRequest, ResyncMapDataRequest, SetMapDataSyncingRequest, StartStorageSessionRequest,
    StorageSessionActiveResponse,
};
use aurora_protocol::types::{
    GlobalMappingInfo, ImuSample, LidarScan, MapDescriptor, StorageSessionKind, StorageStatus,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::DeviceError;

/// Request/response transport to one connected device.
///
/// Implementations must serialize requests: one request is answered before
/// the next is sent.
pub trait DeviceChannel: Send + Sync {
    /// Sends a request and waits for the matching response.
    fn request(
        &self,
        msg_type: MessageType,
        payload: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Message, DeviceError>> + Send + '_>>;

    /// Returns the device's identifier (usually its locator).
    fn device_id(&self) -> &str;

    fn is_connected(&self) -> bool {
        true
    }
}

/// Typed request helpers over a shared [`DeviceChannel`].
#[derive(Clone)]
pub struct DeviceApi {
    channel: Arc<dyn DeviceChannel>,
}

impl DeviceApi {
    pub fn new(channel: Arc<dyn DeviceChannel>) -> Self {
        Self { channel }
    }

    pub fn device_id(&self) -> &str {
        self.channel.device_id()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub async fn get_global_mapping_info(&self) -> Result<GlobalMappingInfo, DeviceError> {
        self.call_required::<(), _>(MessageType::GetGlobalMappingInfo, None)
            .await
    }

    /// Enables or disables background map-data mirroring on the device.
    pub async fn set_map_data_syncing(&self, enable: bool) -> Result<(), DeviceError> {
        let req = SetMapDataSyncingRequest { enable };
        self.call::<_, serde_json::Value>(MessageType::SetMapDataSyncing, Some(&req))
            .await
            .map(|_| ())
    }

    /// Asks the device to restart map-data mirroring from scratch.
    pub async fn resync_map_data(&self, invalidate_cache: bool) -> Result<(), DeviceError> {
        let req = ResyncMapDataRequest { invalidate_cache };
        self.call::<_, serde_json::Value>(MessageType::ResyncMapData, Some(&req))
            .await
            .map(|_| ())
    }

    pub async fn start_storage_session(
        &self,
        kind: StorageSessionKind,
        path: &str,
    ) -> Result<(), DeviceError> {
        let req = StartStorageSessionRequest {
            kind,
            path: path.to_string(),
        };
        self.call::<_, serde_json::Value>(MessageType::StartStorageSession, Some(&req))
            .await
            .map(|_| ())
    }

    pub async fn is_storage_session_active(&self) -> Result<bool, DeviceError> {
        let resp: StorageSessionActiveResponse = self
            .call_required::<(), _>(MessageType::IsStorageSessionActive, None)
            .await?;
        Ok(resp.active)
    }

    pub async fn query_storage_status(&self) -> Result<StorageStatus, DeviceError> {
        self.call_required::<(), _>(MessageType::QueryStorageStatus, None)
            .await
    }

    pub async fn abort_storage_session(&self) -> Result<(), DeviceError> {
        self.call::<(), serde_json::Value>(MessageType::AbortStorageSession, None)
            .await
            .map(|_| ())
    }

    /// Fetches map content from one device-side snapshot.
    pub async fn access_map_data(
        &self,
        req: &MapDataRequest,
    ) -> Result<MapDataResponse, DeviceError> {
        self.call_required(MessageType::AccessMapData, Some(req))
            .await
    }

    pub async fn list_maps(&self) -> Result<Vec<MapDescriptor>, DeviceError> {
        let resp: MapListResponse = self
            .call_required::<(), _>(MessageType::ListMaps, None)
            .await?;
        Ok(resp.maps)
    }

    /// Peeks the device's IMU ring buffer without consuming it.
    ///
    /// Returns an empty batch while the device has no IMU data yet.
    pub async fn peek_imu(&self, max_count: u32) -> Result<Vec<ImuSample>, DeviceError> {
        let req = PeekRequest { max_count };
        match self
            .call_required::<_, ImuDataResponse>(MessageType::PeekImu, Some(&req))
            .await
        {
            Ok(resp) => Ok(resp.samples),
            Err(DeviceError::NotReady(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Peeks recent LiDAR scans; empty while none are available.
    pub async fn peek_lidar_scans(&self, max_count: u32) -> Result<Vec<LidarScan>, DeviceError> {
        let req = PeekRequest { max_count };
        match self
            .call_required::<_, LidarScansResponse>(MessageType::PeekLidarScan, Some(&req))
            .await
        {
            Ok(resp) => Ok(resp.scans),
            Err(DeviceError::NotReady(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn call_required<Req, Resp>(
        &self,
        msg_type: MessageType,
        payload: Option<&Req>,
    ) -> Result<Resp, DeviceError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.call(msg_type, payload).await?.ok_or_else(|| {
            DeviceError::Protocol(format!("empty payload in response to {msg_type:?}"))
        })
    }

    /// Sends one request and checks the response envelope.
    async fn call<Req, Resp>(
        &self,
        msg_type: MessageType,
        payload: Option<&Req>,
    ) -> Result<Option<Resp>, DeviceError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = payload.map(serde_json::to_value).transpose()?;
        trace!(device = %self.device_id(), ?msg_type, "sending request");

        let resp = self.channel.request(msg_type, payload).await?;

        let resp = resp.into_result().map_err(|err| {
            debug!(
                device = %self.device_id(),
                ?msg_type,
                code = i32::from(err.code),
                message = %err.message,
                "device returned error"
            );
            DeviceError::from(err)
        })?;

        if let Some(expected) = msg_type.expected_response()
            && resp.msg_type != expected
        {
            return Err(DeviceError::Protocol(format!(
                "expected {expected:?} in response to {msg_type:?}, got {:?}",
                resp.msg_type
            )));
        }

        Ok(resp.decode_payload::<Resp>()?)
    }
}
