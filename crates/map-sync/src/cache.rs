//! Local snapshot cache of fetched map data.
//!
//! Writers build a complete new [`CacheSnapshot`] and swap it in under a
//! short write lock; readers clone the `Arc` and keep a consistent view for
//! as long as they hold it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use aurora_protocol::types::{Keyframe, MapId, MapPoint, MapSelector};
use tracing::debug;

use crate::types::{LoopClosure, MapData, MapInfo};

/// One map as of a single device snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMap {
    pub map_id: MapId,
    pub snapshot_seq: u64,
    /// Ordered by keyframe id.
    pub keyframes: Vec<Keyframe>,
    pub map_points: BTreeMap<u64, MapPoint>,
    pub loop_closures: Vec<LoopClosure>,
    pub info: Option<MapInfo>,
}

/// Immutable view of every cached map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    /// Bumped on every store; 0 for the empty initial snapshot.
    pub generation: u64,
    /// Device snapshot of the most recent store.
    pub snapshot_seq: Option<u64>,
    pub maps: BTreeMap<MapId, Arc<CachedMap>>,
}

impl CacheSnapshot {
    pub fn get(&self, map_id: MapId) -> Option<&Arc<CachedMap>> {
        self.maps.get(&map_id)
    }

    pub fn map_ids(&self) -> Vec<MapId> {
        self.maps.keys().copied().collect()
    }

    pub fn keyframe_count(&self) -> usize {
        self.maps.values().map(|m| m.keyframes.len()).sum()
    }

    pub fn map_point_count(&self) -> usize {
        self.maps.values().map(|m| m.map_points.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// Holds the latest [`CacheSnapshot`].
#[derive(Debug, Default)]
pub struct MapDataCache {
    current: RwLock<Arc<CacheSnapshot>>,
}

impl MapDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Later stores do not affect the returned value.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, map_id: MapId) -> Option<Arc<CachedMap>> {
        self.snapshot().get(map_id).cloned()
    }

    pub fn map_ids(&self) -> Vec<MapId> {
        self.snapshot().map_ids()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Merges a fetch result and publishes the new snapshot.
    ///
    /// Every map the fetch resolved to is replaced as a whole. A fetch over
    /// all maps also drops cached maps the device no longer has; other
    /// selectors leave untouched maps in place.
    pub fn store(&self, data: &MapData) -> Arc<CacheSnapshot> {
        let seq = data.snapshot_seq.unwrap_or_default();
        let mut fresh: BTreeMap<MapId, CachedMap> = data
            .map_ids
            .iter()
            .map(|&map_id| {
                (
                    map_id,
                    CachedMap {
                        map_id,
                        snapshot_seq: seq,
                        keyframes: Vec::new(),
                        map_points: BTreeMap::new(),
                        loop_closures: Vec::new(),
                        info: data.map_info.get(&map_id).cloned(),
                    },
                )
            })
            .collect();

        let mut owner = BTreeMap::new();
        for kf in &data.keyframes {
            owner.insert(kf.id, kf.map_id);
            if let Some(map) = fresh.get_mut(&kf.map_id) {
                map.keyframes.push(kf.clone());
            }
        }
        for (id, mp) in &data.map_points {
            if let Some(map) = fresh.get_mut(&mp.map_id) {
                map.map_points.insert(*id, mp.clone());
            }
        }
        for lc in &data.loop_closures {
            if let Some(map_id) = owner.get(&lc.from)
                && let Some(map) = fresh.get_mut(map_id)
            {
                map.loop_closures.push(*lc);
            }
        }

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut maps = match data.selector {
            MapSelector::AllMaps => BTreeMap::new(),
            _ => guard.maps.clone(),
        };
        maps.extend(fresh.into_iter().map(|(id, m)| (id, Arc::new(m))));

        let next = Arc::new(CacheSnapshot {
            generation: guard.generation + 1,
            snapshot_seq: data.snapshot_seq,
            maps,
        });
        *guard = next.clone();
        drop(guard);

        debug!(
            generation = next.generation,
            maps = next.maps.len(),
            keyframes = next.keyframe_count(),
            map_points = next.map_point_count(),
            "map cache updated"
        );
        next
    }

    /// Publishes an empty snapshot.
    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(CacheSnapshot {
            generation: guard.generation + 1,
            ..CacheSnapshot::default()
        });
    }
}
