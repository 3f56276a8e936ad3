use serde::{Deserialize, Serialize};

use crate::constants::{KEYFRAME_FETCH_ALL, MAP_POINT_FETCH_ALL};
use crate::types::{
    ImuSample, Keyframe, LidarScan, MapDescriptor, MapId, MapPoint, MapSelector,
    StorageSessionKind,
};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a map storage session on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStorageSessionRequest {
    pub kind: StorageSessionKind,
    /// Local file the map is streamed into (download) or from (upload).
    pub path: String,
}

/// Requests map content from one consistent device-side snapshot.
///
/// Categories whose flag is `false` are not collected by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDataRequest {
    pub selector: MapSelector,
    pub fetch_keyframes: bool,
    pub fetch_map_points: bool,
    pub fetch_map_info: bool,
    #[serde(default = "default_keyframe_flags")]
    pub keyframe_flags: u32,
    #[serde(default = "default_map_point_flags")]
    pub map_point_flags: u32,
}

fn default_keyframe_flags() -> u32 {
    KEYFRAME_FETCH_ALL
}

fn default_map_point_flags() -> u32 {
    MAP_POINT_FETCH_ALL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekRequest {
    pub max_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMapDataSyncingRequest {
    pub enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncMapDataRequest {
    pub invalidate_cache: bool,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSessionActiveResponse {
    pub active: bool,
}

/// Map content drawn from a single device-side snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDataResponse {
    /// Monotonic identifier of the device snapshot the content came from.
    pub snapshot_seq: u64,
    /// Maps the selector resolved to at snapshot time.
    pub map_ids: Vec<MapId>,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
    #[serde(default)]
    pub map_points: Vec<MapPoint>,
    #[serde(default)]
    pub maps: Vec<MapDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapListResponse {
    pub maps: Vec<MapDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuDataResponse {
    pub samples: Vec<ImuSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LidarScansResponse {
    pub scans: Vec<LidarScan>,
}
