//! Selective map-data fetches.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use aurora_device::DeviceApi;
use aurora_protocol::constants::{KEYFRAME_FETCH_ALL, MAP_POINT_FETCH_ALL};
use aurora_protocol::messages::{MapDataRequest, MapDataResponse};
use aurora_protocol::types::{MapId, MapSelector};
use tracing::{debug, warn};

use crate::QueryError;
use crate::cache::{CacheSnapshot, MapDataCache};
use crate::types::{LoopClosure, MapData, MapInfo};

/// Which categories a fetch collects.
///
/// A category whose flag is `false` comes back empty and is never asked of
/// the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub fetch_keyframes: bool,
    pub fetch_map_points: bool,
    pub fetch_map_info: bool,
    /// Keyframe attribute mask forwarded to the device.
    pub keyframe_flags: u32,
    /// Map point attribute mask forwarded to the device.
    pub map_point_flags: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            fetch_keyframes: true,
            fetch_map_points: true,
            fetch_map_info: false,
            keyframe_flags: KEYFRAME_FETCH_ALL,
            map_point_flags: MAP_POINT_FETCH_ALL,
        }
    }
}

impl FetchOptions {
    /// Keyframes, map points and map descriptors.
    pub fn everything() -> Self {
        Self {
            fetch_map_info: true,
            ..Self::default()
        }
    }

    pub fn keyframes_only() -> Self {
        Self {
            fetch_keyframes: true,
            fetch_map_points: false,
            fetch_map_info: false,
            ..Self::default()
        }
    }

    pub fn map_points_only() -> Self {
        Self {
            fetch_keyframes: false,
            fetch_map_points: true,
            fetch_map_info: false,
            ..Self::default()
        }
    }

    pub fn map_info_only() -> Self {
        Self {
            fetch_keyframes: false,
            fetch_map_points: false,
            fetch_map_info: true,
            ..Self::default()
        }
    }

    /// No category requested.
    pub fn is_empty(&self) -> bool {
        !(self.fetch_keyframes || self.fetch_map_points || self.fetch_map_info)
    }
}

/// Answers map-data requests against one device.
#[derive(Clone)]
pub struct MapQuery {
    api: DeviceApi,
}

impl MapQuery {
    pub fn new(api: DeviceApi) -> Self {
        Self { api }
    }

    /// Fetches the requested categories for `selector` in a single device
    /// request, so every returned collection comes from the same device
    /// snapshot.
    ///
    /// All-or-nothing: transport failures and inconsistent answers fail the
    /// whole call.
    pub async fn get_map_data(
        &self,
        selector: impl Into<MapSelector>,
        options: FetchOptions,
    ) -> Result<MapData, QueryError> {
        let selector = selector.into();
        if options.is_empty() {
            debug!(device = %self.api.device_id(), ?selector, "no categories requested, skipping fetch");
            return Ok(MapData {
                selector,
                ..MapData::default()
            });
        }

        let req = MapDataRequest {
            selector: selector.clone(),
            fetch_keyframes: options.fetch_keyframes,
            fetch_map_points: options.fetch_map_points,
            fetch_map_info: options.fetch_map_info,
            keyframe_flags: options.keyframe_flags,
            map_point_flags: options.map_point_flags,
        };
        let resp = self.api.access_map_data(&req).await?;

        let data = assemble(selector, &options, resp).inspect_err(|e| {
            warn!(device = %self.api.device_id(), error = %e, "rejecting map data response");
        })?;
        debug!(
            device = %self.api.device_id(),
            maps = data.map_ids.len(),
            keyframes = data.keyframes.len(),
            map_points = data.map_points.len(),
            snapshot = ?data.snapshot_seq,
            "map data fetched"
        );
        Ok(data)
    }

    /// Fetches and atomically replaces the cache's snapshot with the result.
    ///
    /// Returns the snapshot now visible to readers. A fetch that requests
    /// nothing leaves the cache unchanged.
    pub async fn fetch_into(
        &self,
        cache: &MapDataCache,
        selector: impl Into<MapSelector>,
        options: FetchOptions,
    ) -> Result<Arc<CacheSnapshot>, QueryError> {
        let data = self.get_map_data(selector, options).await?;
        if data.snapshot_seq.is_none() {
            return Ok(cache.snapshot());
        }
        Ok(cache.store(&data))
    }
}

/// Checks a device response and turns it into [`MapData`].
fn assemble(
    selector: MapSelector,
    options: &FetchOptions,
    resp: MapDataResponse,
) -> Result<MapData, QueryError> {
    let map_ids: BTreeSet<MapId> = resp.map_ids.iter().copied().collect();

    match &selector {
        MapSelector::ActiveOnly if map_ids.len() > 1 => {
            return Err(QueryError::Inconsistent(format!(
                "active-map fetch resolved to {} maps",
                map_ids.len()
            )));
        }
        MapSelector::Specific(wanted) if !map_ids.is_subset(wanted) => {
            return Err(QueryError::Inconsistent(format!(
                "device returned maps {:?} outside the requested {:?}",
                map_ids.difference(wanted).collect::<Vec<_>>(),
                wanted
            )));
        }
        _ => {}
    }

    if !options.fetch_keyframes && !resp.keyframes.is_empty() {
        return Err(QueryError::Inconsistent("unrequested keyframes in response".into()));
    }
    if !options.fetch_map_points && !resp.map_points.is_empty() {
        return Err(QueryError::Inconsistent("unrequested map points in response".into()));
    }
    if !options.fetch_map_info && !resp.maps.is_empty() {
        return Err(QueryError::Inconsistent("unrequested map info in response".into()));
    }

    let foreign = |kind: &str, map_id: MapId| {
        QueryError::Inconsistent(format!("{kind} from map {map_id} outside resolved set"))
    };

    let mut keyframe_ids = HashSet::with_capacity(resp.keyframes.len());
    for kf in &resp.keyframes {
        if !map_ids.contains(&kf.map_id) {
            return Err(foreign("keyframe", kf.map_id));
        }
        if !keyframe_ids.insert(kf.id) {
            return Err(QueryError::Inconsistent(format!("duplicate keyframe {}", kf.id)));
        }
    }

    let mut map_points = BTreeMap::new();
    for mp in resp.map_points {
        if !map_ids.contains(&mp.map_id) {
            return Err(foreign("map point", mp.map_id));
        }
        let id = mp.id;
        if map_points.insert(id, mp).is_some() {
            return Err(QueryError::Inconsistent(format!("duplicate map point {id}")));
        }
    }

    let mut map_info = BTreeMap::new();
    for desc in &resp.maps {
        if !map_ids.contains(&desc.map_id) {
            return Err(foreign("map info", desc.map_id));
        }
        map_info.insert(desc.map_id, MapInfo::from(desc));
    }

    let mut keyframes = resp.keyframes;
    keyframes.sort_by_key(|k| k.id);
    let loop_closures = keyframes
        .iter()
        .flat_map(|kf| {
            kf.looped_frame_ids.iter().map(|&to| LoopClosure { from: kf.id, to })
        })
        .collect();

    Ok(MapData {
        selector,
        snapshot_seq: Some(resp.snapshot_seq),
        map_ids,
        keyframes,
        map_points,
        loop_closures,
        map_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_device::DeviceError;
    use aurora_device::mock::{MapDataFault, SimulatedDevice};
    use aurora_protocol::constants::MessageType;

    fn setup() -> (Arc<SimulatedDevice>, MapQuery) {
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.grow_map(1, 4, 10);
        dev.grow_map(2, 3, 6);
        dev.grow_map(3, 2, 5);
        dev.set_active_map(2);
        (dev.clone(), MapQuery::new(DeviceApi::new(dev)))
    }

    #[tokio::test]
    async fn unset_selector_means_active_map() {
        let (_dev, query) = setup();
        let data = query
            .get_map_data(None::<Vec<MapId>>, FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(data.map_ids, BTreeSet::from([2]));
        assert_eq!(data.keyframes.len(), 3);
        assert!(data.keyframes.iter().all(|k| k.map_id == 2));
        assert_eq!(data.map_points.len(), 6);
        assert!(data.map_info.is_empty());
    }

    #[tokio::test]
    async fn empty_selector_means_every_map() {
        let (_dev, query) = setup();
        let data = query
            .get_map_data(Some(vec![]), FetchOptions::everything())
            .await
            .unwrap();

        assert_eq!(data.map_ids, BTreeSet::from([1, 2, 3]));
        assert_eq!(data.keyframes.len(), 9);
        assert_eq!(data.map_points.len(), 21);
        assert_eq!(data.map_info.len(), 3);
        assert_eq!(data.map_info[&1].keyframe_count, 4);
    }

    #[tokio::test]
    async fn specific_maps() {
        let (_dev, query) = setup();
        let data = query
            .get_map_data(MapSelector::specific([1, 3, 99]), FetchOptions::everything())
            .await
            .unwrap();
        assert_eq!(data.map_ids, BTreeSet::from([1, 3]));
        assert!(data.keyframes.iter().all(|k| k.map_id != 2));
    }

    #[tokio::test]
    async fn disabled_category_is_empty_and_not_requested() {
        let (dev, query) = setup();
        let data = query
            .get_map_data(MapSelector::AllMaps, FetchOptions::map_points_only())
            .await
            .unwrap();

        assert!(data.keyframes.is_empty());
        assert!(data.loop_closures.is_empty());
        assert_eq!(data.map_points.len(), 21);

        let sent = dev.last_map_data_request().unwrap();
        assert!(!sent.fetch_keyframes);
        assert!(sent.fetch_map_points);
        assert!(!sent.fetch_map_info);
    }

    #[tokio::test]
    async fn one_request_per_fetch_and_none_when_nothing_wanted() {
        let (dev, query) = setup();
        query
            .get_map_data(MapSelector::AllMaps, FetchOptions::everything())
            .await
            .unwrap();
        assert_eq!(dev.request_count(MessageType::AccessMapData), 1);

        let nothing = FetchOptions {
            fetch_keyframes: false,
            fetch_map_points: false,
            fetch_map_info: false,
            ..FetchOptions::default()
        };
        let data = query.get_map_data(MapSelector::AllMaps, nothing).await.unwrap();
        assert!(data.is_empty());
        assert_eq!(data.snapshot_seq, None);
        assert_eq!(dev.request_count(MessageType::AccessMapData), 1);
    }

    #[tokio::test]
    async fn fetch_flags_are_forwarded() {
        let (dev, query) = setup();
        let options = FetchOptions {
            keyframe_flags: 0b101,
            map_point_flags: 0b1,
            ..FetchOptions::default()
        };
        query.get_map_data(MapSelector::ActiveOnly, options).await.unwrap();
        let sent = dev.last_map_data_request().unwrap();
        assert_eq!(sent.keyframe_flags, 0b101);
        assert_eq!(sent.map_point_flags, 0b1);
    }

    #[tokio::test]
    async fn loop_closures_come_from_keyframes() {
        let (dev, query) = setup();
        // Map 1 holds keyframes 1..=4.
        assert!(dev.add_loop_closure(4, 1));
        let data = query
            .get_map_data(MapSelector::specific([1]), FetchOptions::keyframes_only())
            .await
            .unwrap();
        assert_eq!(data.loop_closures, vec![LoopClosure { from: 4, to: 1 }]);
    }

    #[tokio::test]
    async fn foreign_records_are_inconsistent() {
        let (dev, query) = setup();
        dev.inject_map_data_fault(MapDataFault::ForeignRecord);
        let err = query
            .get_map_data(MapSelector::ActiveOnly, FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn unrequested_category_is_inconsistent() {
        let (dev, query) = setup();
        dev.inject_map_data_fault(MapDataFault::UnrequestedCategory);
        let err = query
            .get_map_data(MapSelector::ActiveOnly, FetchOptions::keyframes_only())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn duplicate_map_point_is_inconsistent() {
        let (dev, query) = setup();
        dev.inject_map_data_fault(MapDataFault::DuplicateMapPoint);
        let err = query
            .get_map_data(MapSelector::ActiveOnly, FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn transport_failure_fails_whole_call() {
        let (dev, query) = setup();
        dev.disconnect();
        let err = query
            .get_map_data(MapSelector::AllMaps, FetchOptions::everything())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Device(DeviceError::Connection(_))));
    }

    #[tokio::test]
    async fn fetch_into_replaces_cache_snapshot() {
        let (dev, query) = setup();
        let cache = MapDataCache::new();

        let first = query
            .fetch_into(&cache, MapSelector::AllMaps, FetchOptions::everything())
            .await
            .unwrap();
        assert_eq!(first.map_ids(), vec![1, 2, 3]);

        dev.grow_map(2, 5, 0);
        let second = query
            .fetch_into(&cache, MapSelector::ActiveOnly, FetchOptions::everything())
            .await
            .unwrap();
        assert_eq!(second.get(2).unwrap().keyframes.len(), 8);
        assert_eq!(second.get(1).unwrap().keyframes.len(), 4);
        // The earlier snapshot is untouched.
        assert_eq!(first.get(2).unwrap().keyframes.len(), 3);
        assert_eq!(cache.generation(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_alone() {
        let (dev, query) = setup();
        let cache = MapDataCache::new();
        query
            .fetch_into(&cache, MapSelector::AllMaps, FetchOptions::default())
            .await
            .unwrap();

        dev.inject_map_data_fault(MapDataFault::ForeignRecord);
        assert!(
            query
                .fetch_into(&cache, MapSelector::AllMaps, FetchOptions::default())
                .await
                .is_err()
        );
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.map_ids(), vec![1, 2, 3]);
    }
}
