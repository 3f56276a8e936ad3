use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use aurora_protocol::types::{GlobalMappingInfo, Keyframe, MapDescriptor, MapId, MapPoint, MapSelector};

use crate::SyncError;

/// Ratio at which the mirror counts as fully synced.
pub const SYNCED_RATIO: f64 = 0.95;

/// Thresholds used by [`SyncStatus::is_sufficient`].
pub const SUFFICIENT_KEYFRAMES: u64 = 10;
pub const SUFFICIENT_RATIO: f64 = 0.8;

/// Convergence of the device-side map-data mirror at one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub total_keyframes: u64,
    pub fetched_keyframes: u64,
    pub total_map_points: u64,
    pub fetched_map_points: u64,
    pub active_map_id: MapId,
    /// Number of resets (shrinking counts) seen by the tracker so far.
    pub resets: u32,
    /// Raw counters the status was computed from.
    pub info: GlobalMappingInfo,
}

impl SyncStatus {
    pub fn from_info(info: GlobalMappingInfo, resets: u32) -> Self {
        Self {
            total_keyframes: info.total_keyframe_count,
            fetched_keyframes: info.fetched_keyframe_count,
            total_map_points: info.total_map_point_count,
            fetched_map_points: info.fetched_map_point_count,
            active_map_id: info.active_map_id,
            resets,
            info,
        }
    }

    /// `fetched / total` for keyframes, in `[0, 1]`; 0 when nothing exists.
    pub fn sync_ratio(&self) -> f64 {
        ratio(self.fetched_keyframes, self.total_keyframes)
    }

    pub fn map_point_sync_ratio(&self) -> f64 {
        ratio(self.fetched_map_points, self.total_map_points)
    }

    pub fn is_synced(&self) -> bool {
        self.sync_ratio() >= SYNCED_RATIO
    }

    pub fn is_sufficient(&self) -> bool {
        self.total_keyframes >= SUFFICIENT_KEYFRAMES && self.sync_ratio() >= SUFFICIENT_RATIO
    }

    /// An empty map never meets any criteria, however lax.
    pub fn meets(&self, criteria: &SyncCriteria) -> bool {
        self.total_keyframes > 0
            && self.fetched_keyframes >= criteria.min_keyframes
            && self.sync_ratio() >= criteria.min_sync_ratio
    }
}

fn ratio(fetched: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (fetched as f64 / total as f64).min(1.0)
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% synced ({}/{} KF)",
            self.sync_ratio() * 100.0,
            self.fetched_keyframes,
            self.total_keyframes
        )
    }
}

/// When `wait_for_map_data` may stop waiting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCriteria {
    pub min_keyframes: u64,
    /// In `[0, 1]`.
    pub min_sync_ratio: f64,
    pub max_wait: Duration,
}

impl Default for SyncCriteria {
    fn default() -> Self {
        Self {
            min_keyframes: 10,
            min_sync_ratio: 0.8,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl SyncCriteria {
    pub fn validate(&self) -> Result<(), SyncError> {
        if !(0.0..=1.0).contains(&self.min_sync_ratio) {
            return Err(SyncError::InvalidCriteria(format!(
                "min_sync_ratio {} outside [0, 1]",
                self.min_sync_ratio
            )));
        }
        if self.max_wait.is_zero() {
            return Err(SyncError::InvalidCriteria("max_wait must be positive".into()));
        }
        Ok(())
    }
}

/// Inclusive id range; `start == end == 0` when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

/// Summary of one map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub map_id: MapId,
    pub keyframe_count: u64,
    pub map_point_count: u64,
    pub flags: u32,
    pub keyframe_id_range: IdRange,
    pub map_point_id_range: IdRange,
}

impl From<&MapDescriptor> for MapInfo {
    fn from(d: &MapDescriptor) -> Self {
        Self {
            map_id: d.map_id,
            keyframe_count: d.keyframe_count,
            map_point_count: d.map_point_count,
            flags: d.map_flags,
            keyframe_id_range: IdRange {
                start: d.keyframe_id_start,
                end: d.keyframe_id_end,
            },
            map_point_id_range: IdRange {
                start: d.map_point_id_start,
                end: d.map_point_id_end,
            },
        }
    }
}

/// A detected revisit: keyframe `from` closes a loop with keyframe `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopClosure {
    pub from: u64,
    pub to: u64,
}

/// Result of one selective fetch, drawn from a single device snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapData {
    pub selector: MapSelector,
    /// Device snapshot the data came from; `None` when nothing was requested.
    pub snapshot_seq: Option<u64>,
    /// Maps the selector resolved to.
    pub map_ids: BTreeSet<MapId>,
    /// Ordered by keyframe id.
    pub keyframes: Vec<Keyframe>,
    pub map_points: BTreeMap<u64, MapPoint>,
    pub loop_closures: Vec<LoopClosure>,
    pub map_info: BTreeMap<MapId, MapInfo>,
}

impl MapData {
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty() && self.map_points.is_empty() && self.map_info.is_empty()
    }
}
