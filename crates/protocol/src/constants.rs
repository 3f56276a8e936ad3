use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TCP port of the Aurora remote server.
pub const DEFAULT_PORT: u16 = 7447;

/// Default locator protocol when only an address is given.
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// Conventional extension of VSLAM map files.
pub const MAP_FILE_EXTENSION: &str = "stcm";

/// Time allowed for establishing the device connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single request/response exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Largest frame accepted on the wire (16 MiB).
///
/// Map data responses for large maps are the biggest messages; anything
/// above this is treated as a corrupt length prefix.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Fetch-flag mask selecting every keyframe attribute.
pub const KEYFRAME_FETCH_ALL: u32 = 0xFFFF_FFFF;

/// Fetch-flag mask selecting every map point attribute.
pub const MAP_POINT_FETCH_ALL: u32 = 0xFFFF_FFFF;

// ---------------------------------------------------------------------------
// Device error codes
// ---------------------------------------------------------------------------

pub const ERROR_OK: i32 = 0;
pub const ERROR_OP_FAILED: i32 = -1;
pub const ERROR_INVALID_ARGUMENT: i32 = -2;
pub const ERROR_NOT_SUPPORTED: i32 = -3;
pub const ERROR_NOT_IMPLEMENTED: i32 = -4;
pub const ERROR_TIMEOUT: i32 = -5;
pub const ERROR_IO: i32 = -6;
pub const ERROR_NOT_READY: i32 = -7;

/// Message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Mapping state
    #[serde(rename = "get_global_mapping_info")]
    GetGlobalMappingInfo,
    #[serde(rename = "set_map_data_syncing")]
    SetMapDataSyncing,
    #[serde(rename = "resync_map_data")]
    ResyncMapData,

    // Map storage sessions
    #[serde(rename = "start_storage_session")]
    StartStorageSession,
    #[serde(rename = "is_storage_session_active")]
    IsStorageSessionActive,
    #[serde(rename = "query_storage_status")]
    QueryStorageStatus,
    #[serde(rename = "abort_storage_session")]
    AbortStorageSession,

    // Map data
    #[serde(rename = "access_map_data")]
    AccessMapData,
    #[serde(rename = "list_maps")]
    ListMaps,

    // Sensor peeks
    #[serde(rename = "peek_imu")]
    PeekImu,
    #[serde(rename = "peek_lidar_scan")]
    PeekLidarScan,

    // Responses
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "global_mapping_info")]
    GlobalMappingInfo,
    #[serde(rename = "storage_session_active")]
    StorageSessionActive,
    #[serde(rename = "storage_status")]
    StorageStatus,
    #[serde(rename = "map_data")]
    MapData,
    #[serde(rename = "map_list")]
    MapList,
    #[serde(rename = "imu_data")]
    ImuData,
    #[serde(rename = "lidar_scans")]
    LidarScans,
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    /// The response type a device answers this request with.
    ///
    /// Returns `None` for types that are themselves responses.
    pub fn expected_response(self) -> Option<MessageType> {
        use MessageType::*;
        match self {
            GetGlobalMappingInfo => Some(GlobalMappingInfo),
            IsStorageSessionActive => Some(StorageSessionActive),
            QueryStorageStatus => Some(StorageStatus),
            AccessMapData => Some(MapData),
            ListMaps => Some(MapList),
            PeekImu => Some(ImuData),
            PeekLidarScan => Some(LidarScans),
            SetMapDataSyncing | ResyncMapData | StartStorageSession | AbortStorageSession => {
                Some(Ack)
            }
            Ack | GlobalMappingInfo | StorageSessionActive | StorageStatus | MapData | MapList
            | ImuData | LidarScans | Error => None,
        }
    }
}
