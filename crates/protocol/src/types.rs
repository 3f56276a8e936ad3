use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one map inside the device's map set.
pub type MapId = u32;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Rigid-body pose: translation plus unit quaternion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseSE3 {
    pub translation: Vector3,
    pub rotation: Quaternion,
}

// ---------------------------------------------------------------------------
// Map content
// ---------------------------------------------------------------------------

/// A keyframe of the visual map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub id: u64,
    #[serde(default)]
    pub parent_id: u64,
    pub map_id: MapId,
    /// Seconds since device epoch.
    pub timestamp: f64,
    pub pose: PoseSE3,
    /// Keyframes this one closes a loop with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub looped_frame_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connected_frame_ids: Vec<u64>,
    #[serde(default)]
    pub flags: u32,
}

/// A 3D landmark of the visual map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPoint {
    pub id: u64,
    pub map_id: MapId,
    pub timestamp: f64,
    pub position: Vector3,
    #[serde(default)]
    pub flags: u32,
}

/// Per-map summary as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDescriptor {
    pub map_id: MapId,
    pub map_flags: u32,
    pub keyframe_count: u64,
    pub map_point_count: u64,
    pub keyframe_id_start: u64,
    pub keyframe_id_end: u64,
    pub map_point_id_start: u64,
    pub map_point_id_end: u64,
}

/// Device-wide mapping counters.
///
/// `total_*` are authoritative counts on the device; `fetched_*` count what
/// the device-side SDK cache has already mirrored. Totals grow while the
/// device keeps mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMappingInfo {
    pub last_map_point_count_to_fetch: u64,
    pub last_keyframe_count_to_fetch: u64,
    pub last_map_count_to_fetch: u64,
    pub last_map_point_retrieved: u64,
    pub last_keyframe_retrieved: u64,
    pub total_map_point_count: u64,
    pub total_keyframe_count: u64,
    pub total_map_count: u64,
    pub fetched_map_point_count: u64,
    pub fetched_keyframe_count: u64,
    pub fetched_map_count: u64,
    pub active_map_point_count: u64,
    pub active_keyframe_count: u64,
    pub active_map_id: MapId,
    pub mapping_flags: u32,
    pub sliding_window_start_keyframe_id: u64,
}

/// Which maps a map-data request covers.
///
/// `ActiveOnly` and `AllMaps` are deliberately distinct: an absent map list
/// means "the active map", an explicitly empty one means "every map".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ids", rename_all = "snake_case")]
pub enum MapSelector {
    #[default]
    ActiveOnly,
    AllMaps,
    Specific(BTreeSet<MapId>),
}

impl MapSelector {
    /// Selects exactly the given maps.
    pub fn specific(ids: impl IntoIterator<Item = MapId>) -> Self {
        MapSelector::Specific(ids.into_iter().collect())
    }
}

impl From<Option<Vec<MapId>>> for MapSelector {
    /// `None` selects the active map, `Some(vec![])` every map.
    fn from(ids: Option<Vec<MapId>>) -> Self {
        match ids {
            None => MapSelector::ActiveOnly,
            Some(ids) if ids.is_empty() => MapSelector::AllMaps,
            Some(ids) => MapSelector::Specific(ids.into_iter().collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// Map storage sessions
// ---------------------------------------------------------------------------

/// Direction of a map storage session, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageSessionKind {
    /// Local file → device.
    Upload,
    /// Device → local file.
    Download,
}

impl fmt::Display for StorageSessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSessionKind::Upload => write!(f, "upload"),
            StorageSessionKind::Download => write!(f, "download"),
        }
    }
}

/// Device-side storage session state, encoded as a signed byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum StorageState {
    Idle,
    Working,
    Finished,
    Failed,
    Aborted,
    Rejected,
    Timeout,
}

impl StorageState {
    pub fn code(self) -> i8 {
        match self {
            StorageState::Idle => 0,
            StorageState::Working => 1,
            StorageState::Finished => 2,
            StorageState::Failed => -1,
            StorageState::Aborted => -2,
            StorageState::Rejected => -3,
            StorageState::Timeout => -4,
        }
    }

    /// Human-readable name of the state.
    pub fn status_string(self) -> &'static str {
        match self {
            StorageState::Idle => "Idle",
            StorageState::Working => "Working",
            StorageState::Finished => "Finished",
            StorageState::Failed => "Failed",
            StorageState::Aborted => "Aborted",
            StorageState::Rejected => "Rejected",
            StorageState::Timeout => "Timeout",
        }
    }
}

impl TryFrom<i8> for StorageState {
    type Error = String;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => StorageState::Idle,
            1 => StorageState::Working,
            2 => StorageState::Finished,
            -1 => StorageState::Failed,
            -2 => StorageState::Aborted,
            -3 => StorageState::Rejected,
            -4 => StorageState::Timeout,
            other => return Err(format!("unknown storage state code {other}")),
        })
    }
}

impl From<StorageState> for i8 {
    fn from(state: StorageState) -> Self {
        state.code()
    }
}

/// Status snapshot of the device's storage session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStatus {
    /// Percent complete, 0–100.
    pub progress: f32,
    #[serde(rename = "flags")]
    pub state: StorageState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImuSample {
    pub timestamp_ns: u64,
    pub imu_id: u32,
    /// Acceleration in g.
    pub acc: [f64; 3],
    /// Angular rate in degrees per second.
    pub gyro: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidarPoint {
    pub dist: f32,
    pub angle: f32,
    pub quality: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LidarScan {
    pub timestamp_ns: u64,
    #[serde(default)]
    pub layer_id: u32,
    pub points: Vec<LidarPoint>,
}
