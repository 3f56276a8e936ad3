//! Convergence tracking of the device-side map-data mirror.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aurora_device::{DeviceApi, DeviceError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::SyncError;
use crate::types::{SyncCriteria, SyncStatus};

/// Default delay between mapping-info polls.
pub const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Default)]
struct TrackerState {
    last: Option<SyncStatus>,
    resets: u32,
}

/// Polls device mapping counters and waits for them to converge.
pub struct SyncTracker {
    api: DeviceApi,
    poll_interval: Duration,
    state: Mutex<TrackerState>,
}

impl SyncTracker {
    pub fn new(api: DeviceApi, poll_interval: Duration) -> Self {
        Self {
            api,
            poll_interval,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Status from the most recent successful poll.
    pub fn last_status(&self) -> Option<SyncStatus> {
        self.lock().last.clone()
    }

    /// Reads the device counters once.
    ///
    /// A total or fetched count lower than in the previous poll counts as a
    /// reset (e.g. the device dropped its map), not as an error.
    pub async fn poll(&self) -> Result<SyncStatus, DeviceError> {
        let info = self.api.get_global_mapping_info().await?;

        let mut state = self.lock();
        if let Some(prev) = &state.last
            && (info.total_keyframe_count < prev.total_keyframes
                || info.fetched_keyframe_count < prev.fetched_keyframes
                || info.total_map_point_count < prev.total_map_points
                || info.fetched_map_point_count < prev.fetched_map_points)
        {
            info!(
                device = %self.api.device_id(),
                prev_total = prev.total_keyframes,
                total = info.total_keyframe_count,
                prev_fetched = prev.fetched_keyframes,
                fetched = info.fetched_keyframe_count,
                "map data counters went backwards, treating as reset"
            );
            state.resets += 1;
        }

        let status = SyncStatus::from_info(info, state.resets);
        state.last = Some(status.clone());
        Ok(status)
    }

    /// Turns background map-data mirroring on the device on or off.
    pub async fn set_syncing(&self, enable: bool) -> Result<(), DeviceError> {
        self.api.set_map_data_syncing(enable).await
    }

    /// Restarts mirroring from scratch; the tracker forgets its last status
    /// so the expected drop in counts is not reported as a reset.
    pub async fn resync(&self, invalidate_cache: bool) -> Result<(), DeviceError> {
        self.api.resync_map_data(invalidate_cache).await?;
        self.lock().last = None;
        info!(device = %self.api.device_id(), invalidate_cache, "map data resync requested");
        Ok(())
    }

    /// Polls until the mirror holds at least `min_keyframes` fetched
    /// keyframes at a sync ratio of at least `min_sync_ratio`, or until
    /// `max_wait` has passed. A device reporting no keyframes at all is
    /// never ready.
    ///
    /// `progress` is called after every successful poll with the elapsed
    /// time. Poll failures are logged and polling continues. Returns
    /// [`SyncError::Timeout`] with the last status seen when the budget runs
    /// out; no single poll may outlive the budget.
    pub async fn wait_for_map_data<F>(
        &self,
        criteria: SyncCriteria,
        mut progress: F,
    ) -> Result<SyncStatus, SyncError>
    where
        F: FnMut(Duration, &SyncStatus),
    {
        criteria.validate()?;
        let started = Instant::now();
        let deadline = started + criteria.max_wait;
        let mut last: Option<SyncStatus> = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                let waited = started.elapsed();
                warn!(
                    device = %self.api.device_id(),
                    waited_ms = waited.as_millis() as u64,
                    last = %last.as_ref().map(|s| s.to_string()).unwrap_or_default(),
                    "map data sync timed out"
                );
                return Err(SyncError::Timeout { waited, last });
            }

            match tokio::time::timeout(deadline - now, self.poll()).await {
                Ok(Ok(status)) => {
                    progress(started.elapsed(), &status);
                    debug!(device = %self.api.device_id(), status = %status, "sync poll");
                    if status.meets(&criteria) {
                        info!(
                            device = %self.api.device_id(),
                            status = %status,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "map data ready"
                        );
                        return Ok(status);
                    }
                    last = Some(status);
                }
                Ok(Err(e)) => {
                    warn!(device = %self.api.device_id(), error = %e, "mapping info poll failed");
                }
                Err(_) => continue,
            }

            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::time::sleep_until(wake).await;
        }
    }
}
