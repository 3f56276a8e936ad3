//! In-process simulated device.
//!
//! `SimulatedDevice` answers the full request set from in-memory state:
//! a growing multi-map store, a storage session whose progress advances
//! with (tokio) time, IMU/LiDAR ring buffers and scripted mapping counters.
//! Tests script faults through the `&self` setters; the device can be
//! shared behind an `Arc` while a component under test drives it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aurora_protocol::constants::{
    ERROR_INVALID_ARGUMENT, ERROR_NOT_READY, ERROR_OP_FAILED, MessageType,
};
use aurora_protocol::envelope::Message;
use aurora_protocol::messages::{
    ImuDataResponse, LidarScansResponse, MapDataRequest, MapDataResponse, MapListResponse,
    PeekRequest, ResyncMapDataRequest, SetMapDataSyncingRequest, StartStorageSessionRequest,
    StorageSessionActiveResponse,
};
use aurora_protocol::types::{
    GlobalMappingInfo, ImuSample, Keyframe, LidarScan, MapDescriptor, MapId, MapPoint,
    MapSelector, PoseSE3, StorageSessionKind, StorageState, StorageStatus, Vector3,
};
use tokio::time::Instant;
use tracing::debug;

use crate::channel::DeviceChannel;
use crate::error::DeviceError;

/// Magic prefix of simulated map files.
pub const SIM_MAP_MAGIC: &[u8] = b"STCM-SIM\n";

/// Default storage progress rate in percent per second.
const DEFAULT_STORAGE_RATE: f32 = 25.0;

const DEFAULT_RING_CAPACITY: usize = 64;

/// One-shot corruption applied to the next map-data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDataFault {
    /// A keyframe from a map outside the resolved set.
    ForeignRecord,
    /// Map points in a response that did not ask for them.
    UnrequestedCategory,
    /// The same map point twice.
    DuplicateMapPoint,
}

#[derive(Default)]
struct SimMap {
    flags: u32,
    keyframes: Vec<Keyframe>,
    map_points: Vec<MapPoint>,
}

impl SimMap {
    fn descriptor(&self, map_id: MapId) -> MapDescriptor {
        let kf_range = id_range(self.keyframes.iter().map(|k| k.id));
        let mp_range = id_range(self.map_points.iter().map(|p| p.id));
        MapDescriptor {
            map_id,
            map_flags: self.flags,
            keyframe_count: self.keyframes.len() as u64,
            map_point_count: self.map_points.len() as u64,
            keyframe_id_start: kf_range.0,
            keyframe_id_end: kf_range.1,
            map_point_id_start: mp_range.0,
            map_point_id_end: mp_range.1,
        }
    }
}

fn id_range(ids: impl Iterator<Item = u64>) -> (u64, u64) {
    ids.fold(None, |acc: Option<(u64, u64)>, id| match acc {
        None => Some((id, id)),
        Some((lo, hi)) => Some((lo.min(id), hi.max(id))),
    })
    .unwrap_or((0, 0))
}

struct SimStorage {
    kind: StorageSessionKind,
    path: PathBuf,
    started: Instant,
    progress: f32,
    state: StorageState,
    message: String,
    abort_requested: bool,
}

struct SimState {
    maps: BTreeMap<MapId, SimMap>,
    active_map: Option<MapId>,
    snapshot_seq: u64,
    next_keyframe_id: u64,
    next_map_point_id: u64,
    clock: f64,

    mapping_script: VecDeque<GlobalMappingInfo>,
    syncing: bool,
    resync_requests: usize,

    storage: Option<SimStorage>,
    storage_rate: f32,
    reject_next_session: bool,
    fail_storage_at: Option<f32>,
    uploaded_bytes: Option<u64>,

    imu: VecDeque<ImuSample>,
    lidar: VecDeque<LidarScan>,
    ring_capacity: usize,

    request_counts: HashMap<MessageType, usize>,
    injected_errors: HashMap<MessageType, VecDeque<(i32, String)>>,
    map_data_fault: Option<MapDataFault>,
    last_map_data_request: Option<MapDataRequest>,
    latency: Duration,
    disconnected: bool,
    next_reply: u64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            maps: BTreeMap::new(),
            active_map: None,
            snapshot_seq: 0,
            next_keyframe_id: 1,
            next_map_point_id: 1,
            clock: 0.0,
            mapping_script: VecDeque::new(),
            syncing: true,
            resync_requests: 0,
            storage: None,
            storage_rate: DEFAULT_STORAGE_RATE,
            reject_next_session: false,
            fail_storage_at: None,
            uploaded_bytes: None,
            imu: VecDeque::new(),
            lidar: VecDeque::new(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            request_counts: HashMap::new(),
            injected_errors: HashMap::new(),
            map_data_fault: None,
            last_map_data_request: None,
            latency: Duration::ZERO,
            disconnected: false,
            next_reply: 0,
        }
    }
}

/// A device simulated in memory.
pub struct SimulatedDevice {
    id: String,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- map content ------------------------------------------------------

    /// Appends synthetic keyframes and map points to `map_id`, creating the
    /// map (and making it active if none is) when needed.
    pub fn grow_map(&self, map_id: MapId, keyframes: usize, map_points: usize) {
        let mut s = self.lock();
        if s.active_map.is_none() {
            s.active_map = Some(map_id);
        }
        for _ in 0..keyframes {
            s.clock += 0.1;
            let id = s.next_keyframe_id;
            s.next_keyframe_id += 1;
            let timestamp = s.clock;
            let map = s.maps.entry(map_id).or_default();
            let parent_id = map.keyframes.last().map(|k| k.id).unwrap_or(0);
            map.keyframes.push(Keyframe {
                id,
                parent_id,
                map_id,
                timestamp,
                pose: PoseSE3 {
                    translation: Vector3 {
                        x: id as f64 * 0.5,
                        y: 0.0,
                        z: 0.0,
                    },
                    ..PoseSE3::default()
                },
                looped_frame_ids: Vec::new(),
                connected_frame_ids: if parent_id > 0 { vec![parent_id] } else { Vec::new() },
                flags: 0,
            });
        }
        for i in 0..map_points {
            let id = s.next_map_point_id;
            s.next_map_point_id += 1;
            let timestamp = s.clock;
            let map = s.maps.entry(map_id).or_default();
            map.map_points.push(MapPoint {
                id,
                map_id,
                timestamp,
                position: Vector3 {
                    x: id as f64,
                    y: (i % 7) as f64,
                    z: 1.0,
                },
                flags: 0,
            });
        }
        s.maps.entry(map_id).or_default();
        s.snapshot_seq += 1;
    }

    /// Records a loop closure from keyframe `from` to keyframe `to`.
    pub fn add_loop_closure(&self, from: u64, to: u64) -> bool {
        let mut s = self.lock();
        let found = s
            .maps
            .values_mut()
            .flat_map(|m| m.keyframes.iter_mut())
            .find(|k| k.id == from)
            .map(|k| k.looped_frame_ids.push(to))
            .is_some();
        if found {
            s.snapshot_seq += 1;
        }
        found
    }

    pub fn set_active_map(&self, map_id: MapId) {
        let mut s = self.lock();
        s.maps.entry(map_id).or_default();
        s.active_map = Some(map_id);
        s.snapshot_seq += 1;
    }

    pub fn set_map_flags(&self, map_id: MapId, flags: u32) {
        let mut s = self.lock();
        s.maps.entry(map_id).or_default().flags = flags;
        s.snapshot_seq += 1;
    }

    /// Drops every map, as a device-side map reset does.
    pub fn reset_maps(&self) {
        let mut s = self.lock();
        s.maps.clear();
        s.active_map = None;
        s.snapshot_seq += 1;
    }

    pub fn inject_map_data_fault(&self, fault: MapDataFault) {
        self.lock().map_data_fault = Some(fault);
    }

    pub fn last_map_data_request(&self) -> Option<MapDataRequest> {
        self.lock().last_map_data_request.clone()
    }

    // -- mapping counters -------------------------------------------------

    /// Queues mapping-info replies. Each query consumes one entry; the last
    /// entry keeps being returned. Without a script the counters are derived
    /// from the map store.
    pub fn script_mapping_info(&self, infos: impl IntoIterator<Item = GlobalMappingInfo>) {
        let mut s = self.lock();
        s.mapping_script = infos.into_iter().collect();
    }

    pub fn is_syncing(&self) -> bool {
        self.lock().syncing
    }

    pub fn resync_requests(&self) -> usize {
        self.lock().resync_requests
    }

    // -- storage sessions -------------------------------------------------

    /// Storage progress rate in percent per second. Zero stalls the session.
    pub fn set_storage_rate(&self, percent_per_sec: f32) {
        self.lock().storage_rate = percent_per_sec.max(0.0);
    }

    pub fn reject_next_session(&self) {
        self.lock().reject_next_session = true;
    }

    /// Makes the running or next session fail once it reaches `progress`.
    pub fn fail_storage_at(&self, progress: f32) {
        self.lock().fail_storage_at = Some(progress);
    }

    /// Forces the current session into a terminal state.
    pub fn end_storage_session(&self, state: StorageState, message: impl Into<String>) {
        let mut s = self.lock();
        if let Some(storage) = s.storage.as_mut() {
            storage.state = state;
            storage.message = message.into();
        }
    }

    /// Bytes read by the last completed upload.
    pub fn uploaded_bytes(&self) -> Option<u64> {
        self.lock().uploaded_bytes
    }

    // -- sensors ----------------------------------------------------------

    /// Device-side ring depth for IMU samples and LiDAR scans.
    pub fn set_ring_capacity(&self, capacity: usize) {
        let mut s = self.lock();
        s.ring_capacity = capacity.max(1);
        let cap = s.ring_capacity;
        while s.imu.len() > cap {
            s.imu.pop_front();
        }
        while s.lidar.len() > cap {
            s.lidar.pop_front();
        }
    }

    pub fn push_imu(&self, samples: impl IntoIterator<Item = ImuSample>) {
        let mut s = self.lock();
        for sample in samples {
            if s.imu.len() == s.ring_capacity {
                s.imu.pop_front();
            }
            s.imu.push_back(sample);
        }
    }

    pub fn push_lidar(&self, scans: impl IntoIterator<Item = LidarScan>) {
        let mut s = self.lock();
        for scan in scans {
            if s.lidar.len() == s.ring_capacity {
                s.lidar.pop_front();
            }
            s.lidar.push_back(scan);
        }
    }

    // -- transport faults -------------------------------------------------

    /// The next request of `msg_type` is answered with this error code.
    pub fn fail_next(&self, msg_type: MessageType, code: i32, message: impl Into<String>) {
        self.lock()
            .injected_errors
            .entry(msg_type)
            .or_default()
            .push_back((code, message.into()));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    pub fn reconnect(&self) {
        self.lock().disconnected = false;
    }

    pub fn request_count(&self, msg_type: MessageType) -> usize {
        self.lock()
            .request_counts
            .get(&msg_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.lock().request_counts.values().sum()
    }

    // -- request handling -------------------------------------------------

    fn handle(
        &self,
        msg_type: MessageType,
        payload: Option<serde_json::Value>,
    ) -> Result<Message, DeviceError> {
        let mut s = self.lock();
        *s.request_counts.entry(msg_type).or_default() += 1;
        if s.disconnected {
            return Err(DeviceError::Connection("simulated device disconnected".into()));
        }

        s.next_reply += 1;
        let request =
            Message::request(format!("sim-{}", s.next_reply), msg_type, payload.as_ref())?;

        if let Some((code, message)) = s
            .injected_errors
            .get_mut(&msg_type)
            .and_then(|q| q.pop_front())
        {
            return Ok(request.reply_error(code, message));
        }

        let reply = match msg_type {
            MessageType::GetGlobalMappingInfo => {
                let info = s.mapping_info();
                request.reply(MessageType::GlobalMappingInfo, Some(&info))?
            }
            MessageType::SetMapDataSyncing => {
                let req: SetMapDataSyncingRequest = required(&request)?;
                s.syncing = req.enable;
                ack(&request)?
            }
            MessageType::ResyncMapData => {
                let _req: ResyncMapDataRequest = required(&request)?;
                s.resync_requests += 1;
                ack(&request)?
            }
            MessageType::StartStorageSession => {
                let req: StartStorageSessionRequest = required(&request)?;
                match s.start_storage(req) {
                    Ok(()) => ack(&request)?,
                    Err((code, message)) => request.reply_error(code, message),
                }
            }
            MessageType::IsStorageSessionActive => {
                s.advance_storage();
                let active = s
                    .storage
                    .as_ref()
                    .is_some_and(|st| st.state == StorageState::Working);
                request.reply(
                    MessageType::StorageSessionActive,
                    Some(&StorageSessionActiveResponse { active }),
                )?
            }
            MessageType::QueryStorageStatus => {
                s.advance_storage();
                let status = match &s.storage {
                    Some(st) => StorageStatus {
                        progress: st.progress,
                        state: st.state,
                        message: st.message.clone(),
                    },
                    None => StorageStatus {
                        progress: 0.0,
                        state: StorageState::Idle,
                        message: String::new(),
                    },
                };
                request.reply(MessageType::StorageStatus, Some(&status))?
            }
            MessageType::AbortStorageSession => {
                if let Some(st) = s.storage.as_mut()
                    && st.state == StorageState::Working
                {
                    st.abort_requested = true;
                }
                ack(&request)?
            }
            MessageType::AccessMapData => {
                let req: MapDataRequest = required(&request)?;
                let resp = s.map_data(&req);
                s.last_map_data_request = Some(req);
                request.reply(MessageType::MapData, Some(&resp))?
            }
            MessageType::ListMaps => {
                let maps = s
                    .maps
                    .iter()
                    .map(|(id, m)| m.descriptor(*id))
                    .collect();
                request.reply(MessageType::MapList, Some(&MapListResponse { maps }))?
            }
            MessageType::PeekImu => {
                let req: PeekRequest = required(&request)?;
                if s.imu.is_empty() {
                    request.reply_error(ERROR_NOT_READY, "no IMU data yet")
                } else {
                    let samples = tail(&s.imu, req.max_count);
                    request.reply(MessageType::ImuData, Some(&ImuDataResponse { samples }))?
                }
            }
            MessageType::PeekLidarScan => {
                let req: PeekRequest = required(&request)?;
                if s.lidar.is_empty() {
                    request.reply_error(ERROR_NOT_READY, "no LiDAR scan yet")
                } else {
                    let scans = tail(&s.lidar, req.max_count);
                    request.reply(MessageType::LidarScans, Some(&LidarScansResponse { scans }))?
                }
            }
            other => request.reply_error(
                ERROR_INVALID_ARGUMENT,
                format!("{other:?} is not a request"),
            ),
        };
        Ok(reply)
    }
}

impl SimState {
    fn mapping_info(&mut self) -> GlobalMappingInfo {
        if self.mapping_script.len() > 1
            && let Some(info) = self.mapping_script.pop_front()
        {
            return info;
        }
        if let Some(info) = self.mapping_script.front() {
            return info.clone();
        }

        let total_kf: u64 = self.maps.values().map(|m| m.keyframes.len() as u64).sum();
        let total_mp: u64 = self.maps.values().map(|m| m.map_points.len() as u64).sum();
        let total_maps = self.maps.len() as u64;
        let active = self.active_map.and_then(|id| self.maps.get(&id));
        let (fetched_kf, fetched_mp, fetched_maps) = if self.syncing {
            (total_kf, total_mp, total_maps)
        } else {
            (0, 0, 0)
        };
        GlobalMappingInfo {
            total_keyframe_count: total_kf,
            total_map_point_count: total_mp,
            total_map_count: total_maps,
            fetched_keyframe_count: fetched_kf,
            fetched_map_point_count: fetched_mp,
            fetched_map_count: fetched_maps,
            active_keyframe_count: active.map_or(0, |m| m.keyframes.len() as u64),
            active_map_point_count: active.map_or(0, |m| m.map_points.len() as u64),
            active_map_id: self.active_map.unwrap_or(0),
            sliding_window_start_keyframe_id: active
                .and_then(|m| m.keyframes.first())
                .map_or(0, |k| k.id),
            ..GlobalMappingInfo::default()
        }
    }

    fn start_storage(&mut self, req: StartStorageSessionRequest) -> Result<(), (i32, String)> {
        self.advance_storage();
        if self
            .storage
            .as_ref()
            .is_some_and(|st| st.state == StorageState::Working)
        {
            return Err((ERROR_OP_FAILED, "a storage session is already active".into()));
        }
        if std::mem::take(&mut self.reject_next_session) {
            return Err((ERROR_OP_FAILED, "storage request rejected".into()));
        }
        let path = PathBuf::from(&req.path);
        if req.kind == StorageSessionKind::Upload && !path.is_file() {
            return Err((ERROR_INVALID_ARGUMENT, format!("no map file at {}", req.path)));
        }
        debug!(kind = %req.kind, path = %req.path, "simulated storage session started");
        self.storage = Some(SimStorage {
            kind: req.kind,
            path,
            started: Instant::now(),
            progress: 0.0,
            state: StorageState::Working,
            message: String::new(),
            abort_requested: false,
        });
        Ok(())
    }

    /// Brings the storage session up to date with the clock.
    fn advance_storage(&mut self) {
        let rate = self.storage_rate;
        let fail_at = self.fail_storage_at;
        let map_bytes = self.map_file_bytes();
        let Some(st) = self.storage.as_mut() else {
            return;
        };
        if st.state != StorageState::Working {
            return;
        }
        if st.abort_requested {
            st.state = StorageState::Aborted;
            st.message = "aborted by client".into();
            return;
        }

        let target = (st.started.elapsed().as_secs_f32() * rate).min(100.0);
        st.progress = st.progress.max(target);

        if let Some(limit) = fail_at
            && st.progress >= limit
        {
            st.progress = limit;
            st.state = StorageState::Failed;
            st.message = format!("device I/O failure at {limit:.0}%");
            self.fail_storage_at = None;
            return;
        }

        if st.progress >= 100.0 {
            let result = match st.kind {
                StorageSessionKind::Download => std::fs::write(&st.path, &map_bytes),
                StorageSessionKind::Upload => std::fs::metadata(&st.path).map(|m| {
                    self.uploaded_bytes = Some(m.len());
                }),
            };
            match result {
                Ok(()) => {
                    st.state = StorageState::Finished;
                    st.message = "map transfer completed".into();
                }
                Err(e) => {
                    st.state = StorageState::Failed;
                    st.message = format!("{}: {e}", st.path.display());
                }
            }
        }
    }

    fn map_file_bytes(&self) -> Vec<u8> {
        let mut bytes = SIM_MAP_MAGIC.to_vec();
        for (id, map) in &self.maps {
            bytes.extend_from_slice(
                format!(
                    "map {id} keyframes {} points {}\n",
                    map.keyframes.len(),
                    map.map_points.len()
                )
                .as_bytes(),
            );
        }
        bytes
    }

    fn map_data(&mut self, req: &MapDataRequest) -> MapDataResponse {
        let map_ids: Vec<MapId> = match &req.selector {
            MapSelector::ActiveOnly => self
                .active_map
                .filter(|id| self.maps.contains_key(id))
                .into_iter()
                .collect(),
            MapSelector::AllMaps => self.maps.keys().copied().collect(),
            MapSelector::Specific(ids) => ids
                .iter()
                .copied()
                .filter(|id| self.maps.contains_key(id))
                .collect(),
        };

        let mut resp = MapDataResponse {
            snapshot_seq: self.snapshot_seq,
            map_ids: map_ids.clone(),
            ..MapDataResponse::default()
        };
        for id in &map_ids {
            let Some(map) = self.maps.get(id) else {
                continue;
            };
            if req.fetch_keyframes {
                resp.keyframes.extend(map.keyframes.iter().cloned());
            }
            if req.fetch_map_points {
                resp.map_points.extend(map.map_points.iter().cloned());
            }
            if req.fetch_map_info {
                resp.maps.push(map.descriptor(*id));
            }
        }
        resp.map_points.sort_by_key(|p| p.id);

        match self.map_data_fault.take() {
            Some(MapDataFault::ForeignRecord) => {
                let foreign = map_ids.iter().max().map_or(0, |m| m + 1000);
                resp.keyframes.push(Keyframe {
                    id: u64::MAX,
                    parent_id: 0,
                    map_id: foreign,
                    timestamp: self.clock,
                    pose: PoseSE3::default(),
                    looped_frame_ids: Vec::new(),
                    connected_frame_ids: Vec::new(),
                    flags: 0,
                });
            }
            Some(MapDataFault::UnrequestedCategory) => {
                if !req.fetch_map_points {
                    for id in &map_ids {
                        if let Some(map) = self.maps.get(id) {
                            resp.map_points.extend(map.map_points.iter().cloned());
                        }
                    }
                }
            }
            Some(MapDataFault::DuplicateMapPoint) => {
                if let Some(first) = resp.map_points.first().cloned() {
                    resp.map_points.push(first);
                }
            }
            None => {}
        }
        resp
    }
}

fn required<T: serde::de::DeserializeOwned>(request: &Message) -> Result<T, DeviceError> {
    request.decode_payload()?.ok_or_else(|| {
        DeviceError::InvalidArgument(format!("{:?} requires a payload", request.msg_type))
    })
}

fn ack(request: &Message) -> Result<Message, DeviceError> {
    Ok(request.reply::<()>(MessageType::Ack, None)?)
}

fn tail<T: Clone>(ring: &VecDeque<T>, max_count: u32) -> Vec<T> {
    let n = (max_count as usize).min(ring.len());
    ring.iter().skip(ring.len() - n).cloned().collect()
}

impl DeviceChannel for SimulatedDevice {
    fn request(
        &self,
        msg_type: MessageType,
        payload: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Message, DeviceError>> + Send + '_>> {
        Box::pin(async move {
            let latency = self.lock().latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            self.handle(msg_type, payload)
        })
    }

    fn device_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        !self.lock().disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DeviceApi;
    use std::sync::Arc;

    fn device() -> (Arc<SimulatedDevice>, DeviceApi) {
        let dev = Arc::new(SimulatedDevice::new("sim"));
        (dev.clone(), DeviceApi::new(dev))
    }

    #[tokio::test]
    async fn active_only_and_all_maps_differ() {
        let (dev, api) = device();
        dev.grow_map(1, 3, 5);
        dev.grow_map(2, 2, 4);

        let mut req = MapDataRequest {
            selector: MapSelector::ActiveOnly,
            fetch_keyframes: true,
            fetch_map_points: true,
            fetch_map_info: true,
            keyframe_flags: u32::MAX,
            map_point_flags: u32::MAX,
        };
        let active = api.access_map_data(&req).await.unwrap();
        assert_eq!(active.map_ids, vec![1]);
        assert_eq!(active.keyframes.len(), 3);
        assert_eq!(active.maps.len(), 1);

        req.selector = MapSelector::AllMaps;
        let all = api.access_map_data(&req).await.unwrap();
        assert_eq!(all.map_ids, vec![1, 2]);
        assert_eq!(all.map_points.len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn download_session_completes_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.stcm");
        let (dev, api) = device();
        dev.grow_map(1, 2, 2);
        dev.set_storage_rate(50.0);

        api.start_storage_session(StorageSessionKind::Download, path.to_str().unwrap())
            .await
            .unwrap();
        assert!(api.is_storage_session_active().await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        let status = api.query_storage_status().await.unwrap();
        assert_eq!(status.state, StorageState::Working);
        assert!((status.progress - 50.0).abs() < 1.0);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!api.is_storage_session_active().await.unwrap());
        let status = api.query_storage_status().await.unwrap();
        assert_eq!(status.state, StorageState::Finished);
        assert!(std::fs::read(&path).unwrap().starts_with(SIM_MAP_MAGIC));
    }

    #[tokio::test(start_paused = true)]
    async fn second_session_is_rejected_while_working() {
        let (_dev, api) = device();
        api.start_storage_session(StorageSessionKind::Download, "/tmp/sim-a.stcm")
            .await
            .unwrap();
        let err = api
            .start_storage_session(StorageSessionKind::Download, "/tmp/sim-b.stcm")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[tokio::test]
    async fn imu_peek_returns_latest() {
        let (dev, api) = device();
        assert!(api.peek_imu(4).await.unwrap().is_empty());

        dev.set_ring_capacity(3);
        dev.push_imu((1..=5).map(|t| ImuSample {
            timestamp_ns: t,
            imu_id: 0,
            acc: [0.0; 3],
            gyro: [0.0; 3],
        }));
        let ts: Vec<u64> = api
            .peek_imu(10)
            .await
            .unwrap()
            .iter()
            .map(|s| s.timestamp_ns)
            .collect();
        assert_eq!(ts, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn injected_error_and_disconnect() {
        let (dev, api) = device();
        dev.fail_next(MessageType::ListMaps, ERROR_OP_FAILED, "busy");
        assert!(api.list_maps().await.is_err());
        assert!(api.list_maps().await.unwrap().is_empty());

        dev.disconnect();
        assert!(matches!(
            api.list_maps().await,
            Err(DeviceError::Connection(_))
        ));
        assert_eq!(dev.request_count(MessageType::ListMaps), 3);
    }
}
