//! Caller-side polling of a running transfer.

use std::path::Path;
use std::time::Duration;

use aurora_protocol::types::StorageSessionKind;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::checksum::calculate_file_checksum;
use crate::progress::ProgressRate;
use crate::session::MapStorage;
use crate::types::{SessionStatus, TransferEvent, TransferOutcome, TransferReport, TransferState};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default budget for one monitored transfer.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Default number of back-to-back failed polls before giving up.
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 10;

/// How [`MapStorage::monitor_session`] polls.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    /// Abort the session once this much time has passed.
    pub max_wait: Duration,
    /// Consecutive failed polls after which the device counts as lost.
    /// Zero behaves like one.
    pub max_poll_failures: u32,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

impl MapStorage {
    /// Polls the current session until it ends, is cancelled or runs out of
    /// time.
    ///
    /// Poll failures are reported as [`TransferEvent::PollFailed`] and
    /// polling continues, up to `max_poll_failures` in a row; past that the
    /// local session is failed and [`TransferError::Indeterminate`] returned.
    /// Once the device reports the session inactive, the status is read one
    /// final time; the transfer succeeded iff that read says `finished`. A
    /// failure of that final read is also [`TransferError::Indeterminate`].
    pub async fn monitor_session(
        &self,
        opts: MonitorOptions,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferOutcome, TransferError> {
        let Some(session) = self.current_session() else {
            return Ok(TransferOutcome::NotStarted);
        };
        let direction = session.direction();
        let deadline = Instant::now() + opts.max_wait;
        let mut rate = ProgressRate::default();
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return self.stop_early(TransferOutcome::Aborted, events).await;
            }
            if Instant::now() >= deadline {
                warn!(device = %self.device_id(), "transfer exceeded max wait, aborting");
                return self.stop_early(TransferOutcome::TimedOut, events).await;
            }

            let polled = match self.is_session_active().await {
                Ok(true) => self.query_session_status().await,
                Ok(false) => break,
                Err(e) => Err(e),
            };
            match polled {
                Ok(status) => {
                    failures = 0;
                    rate.add_sample(status.progress);
                    self.emit(
                        events,
                        TransferEvent::Progress {
                            device_id: self.device_id().to_string(),
                            direction,
                            progress: status.progress,
                            status: status.status_message.clone(),
                            rate: rate.percent_per_second(),
                            eta: rate.eta(status.progress),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    failures += 1;
                    self.report_poll_failure(events, &e).await;
                    if failures >= opts.max_poll_failures.max(1) {
                        warn!(
                            device = %self.device_id(),
                            failures,
                            error = %e,
                            "lost contact with device, giving up on transfer"
                        );
                        session.fail(&format!("lost contact with device: {e}"));
                        return Err(TransferError::Indeterminate(e));
                    }
                }
            }

            let wake = (Instant::now() + opts.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        // Inactivity may be observed before the final status is published.
        let status = self
            .query_session_status()
            .await
            .map_err(TransferError::Indeterminate)?;

        let outcome = if status.finished {
            TransferOutcome::Succeeded
        } else if status.state == TransferState::Aborted {
            TransferOutcome::Aborted
        } else {
            if !status.state.is_terminal() {
                session.fail("session ended without a final status");
            }
            TransferOutcome::Failed
        };

        let status = session.status();
        info!(
            device = %self.device_id(),
            %direction,
            ?outcome,
            progress = status.progress,
            message = %status.status_message,
            "storage session ended"
        );
        self.emit(
            events,
            TransferEvent::Finished {
                device_id: self.device_id().to_string(),
                outcome,
                status,
            },
        )
        .await;
        Ok(outcome)
    }

    /// Starts a download into `path` and monitors it to the end.
    pub async fn download_map(
        &self,
        path: impl AsRef<Path>,
        opts: MonitorOptions,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferReport, TransferError> {
        self.transfer_map(StorageSessionKind::Download, path.as_ref(), opts, cancel, events)
            .await
    }

    /// Starts an upload of `path` and monitors it to the end.
    pub async fn upload_map(
        &self,
        path: impl AsRef<Path>,
        opts: MonitorOptions,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferReport, TransferError> {
        self.transfer_map(StorageSessionKind::Upload, path.as_ref(), opts, cancel, events)
            .await
    }

    async fn transfer_map(
        &self,
        direction: StorageSessionKind,
        path: &Path,
        opts: MonitorOptions,
        cancel: &CancellationToken,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferReport, TransferError> {
        let started = Instant::now();
        let accepted = match direction {
            StorageSessionKind::Download => self.start_download_session(path).await,
            StorageSessionKind::Upload => self.start_upload_session(path).await,
        };
        if !accepted {
            return Ok(TransferReport {
                direction,
                path: path.to_path_buf(),
                outcome: TransferOutcome::NotStarted,
                status: SessionStatus::idle(),
                elapsed: started.elapsed(),
                file_size: None,
                checksum: None,
            });
        }

        let outcome = self.monitor_session(opts, cancel, events).await?;
        let status = self
            .current_session()
            .map(|s| s.status())
            .unwrap_or_else(SessionStatus::idle);

        let (file_size, checksum) = if outcome == TransferOutcome::Succeeded {
            let owned = path.to_path_buf();
            let (digest, size) =
                tokio::task::spawn_blocking(move || calculate_file_checksum(&owned))
                    .await
                    .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;
            debug!(path = %path.display(), size, checksum = %digest, "map file verified");
            (Some(size), Some(digest))
        } else {
            (None, None)
        };

        Ok(TransferReport {
            direction,
            path: path.to_path_buf(),
            outcome,
            status,
            elapsed: started.elapsed(),
            file_size,
            checksum,
        })
    }

    /// Aborts the live session and reports `outcome`.
    async fn stop_early(
        &self,
        outcome: TransferOutcome,
        events: &mpsc::Sender<TransferEvent>,
    ) -> Result<TransferOutcome, TransferError> {
        self.abort_session().await?;
        let status = self
            .current_session()
            .map(|s| s.status())
            .unwrap_or_else(SessionStatus::idle);
        self.emit(
            events,
            TransferEvent::Finished {
                device_id: self.device_id().to_string(),
                outcome,
                status,
            },
        )
        .await;
        Ok(outcome)
    }

    async fn report_poll_failure(
        &self,
        events: &mpsc::Sender<TransferEvent>,
        error: &aurora_device::DeviceError,
    ) {
        warn!(device = %self.device_id(), error = %error, "storage status poll failed");
        self.emit(
            events,
            TransferEvent::PollFailed {
                device_id: self.device_id().to_string(),
                error: error.to_string(),
            },
        )
        .await;
    }

    async fn emit(&self, events: &mpsc::Sender<TransferEvent>, event: TransferEvent) {
        let _ = events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use aurora_device::mock::SimulatedDevice;
    use aurora_device::{DeviceApi, DeviceChannel, DeviceError};
    use aurora_protocol::constants::{ERROR_OP_FAILED, MessageType};
    use aurora_protocol::envelope::Message;
    use aurora_protocol::messages::StorageSessionActiveResponse;

    use crate::checksum::checksum_bytes;

    fn storage_on(dev: &Arc<SimulatedDevice>) -> MapStorage {
        MapStorage::new(DeviceApi::new(dev.clone()))
    }

    fn drain(rx: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn download_succeeds_with_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.stcm");
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.grow_map(1, 5, 20);
        let storage = storage_on(&dev);
        let (tx, mut rx) = mpsc::channel(256);

        let report = storage
            .download_map(&path, MonitorOptions::default(), &CancellationToken::new(), &tx)
            .await
            .unwrap();

        assert!(report.succeeded());
        assert!(report.status.finished);
        assert_eq!(report.status.progress, 100.0);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(report.file_size, Some(bytes.len() as u64));
        assert_eq!(report.checksum.as_deref(), Some(checksum_bytes(&bytes).as_str()));

        let events = drain(&mut rx);
        let progress: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(matches!(
            events.last(),
            Some(TransferEvent::Finished {
                outcome: TransferOutcome::Succeeded,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.stcm");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        let storage = storage_on(&dev);
        let (tx, _rx) = mpsc::channel(256);

        let report = storage
            .upload_map(&path, MonitorOptions::default(), &CancellationToken::new(), &tx)
            .await
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::Succeeded);
        assert_eq!(report.direction, StorageSessionKind::Upload);
        assert_eq!(report.file_size, Some(4096));
        assert_eq!(dev.uploaded_bytes(), Some(4096));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_start_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.reject_next_session();
        let storage = storage_on(&dev);
        let (tx, _rx) = mpsc::channel(16);

        let report = storage
            .download_map(
                dir.path().join("m.stcm"),
                MonitorOptions::default(),
                &CancellationToken::new(),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::NotStarted);
        assert_eq!(dev.request_count(MessageType::IsStorageSessionActive), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_without_session() {
        let dev = Arc::new(SimulatedDevice::new("sim"));
        let storage = storage_on(&dev);
        let (tx, _rx) = mpsc::channel(16);
        let outcome = storage
            .monitor_session(MonitorOptions::default(), &CancellationToken::new(), &tx)
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_within_one_interval() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.set_storage_rate(5.0);
        let storage = Arc::new(storage_on(&dev));
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);

        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(256);
        let task = {
            let storage = storage.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                storage
                    .monitor_session(MonitorOptions::default(), &cancel, &tx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(outcome, TransferOutcome::Aborted);
        assert!(cancelled_at.elapsed() <= DEFAULT_POLL_INTERVAL);
        assert!(!storage.is_session_active().await.unwrap());
        let status = storage.query_session_status().await.unwrap();
        assert_eq!(status.state, TransferState::Aborted);
        assert!(!status.finished);
        assert_eq!(dev.request_count(MessageType::AbortStorageSession), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_times_out_and_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.set_storage_rate(0.0);
        let storage = storage_on(&dev);
        let (tx, _rx) = mpsc::channel(256);
        let opts = MonitorOptions {
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(3),
            ..MonitorOptions::default()
        };

        let started = Instant::now();
        let report = storage
            .download_map(dir.path().join("m.stcm"), opts, &CancellationToken::new(), &tx)
            .await
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::TimedOut);
        assert_eq!(report.status.state, TransferState::Aborted);
        assert!(report.checksum.is_none());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_is_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.fail_storage_at(60.0);
        let storage = storage_on(&dev);
        let (tx, _rx) = mpsc::channel(256);

        let report = storage
            .download_map(
                dir.path().join("m.stcm"),
                MonitorOptions::default(),
                &CancellationToken::new(),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::Failed);
        assert!(!report.status.finished);
        assert!(report.status.progress < 100.0);
        assert!(!report.status.status_message.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failures_do_not_stop_monitoring() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.fail_next(MessageType::QueryStorageStatus, ERROR_OP_FAILED, "busy");
        dev.fail_next(MessageType::IsStorageSessionActive, ERROR_OP_FAILED, "busy");
        let storage = storage_on(&dev);
        let (tx, mut rx) = mpsc::channel(256);

        let report = storage
            .download_map(
                dir.path().join("m.stcm"),
                MonitorOptions::default(),
                &CancellationToken::new(),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::Succeeded);

        let failures = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TransferEvent::PollFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_link_ends_after_bounded_failures() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.set_storage_rate(1.0);
        let storage = storage_on(&dev);
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);
        dev.disconnect();

        let (tx, mut rx) = mpsc::channel(256);
        let opts = MonitorOptions {
            max_poll_failures: 4,
            ..MonitorOptions::default()
        };
        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(24 * 3600),
            storage.monitor_session(opts, &CancellationToken::new(), &tx),
        )
        .await
        .expect("monitor must end on a dead link");

        assert!(matches!(result, Err(TransferError::Indeterminate(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        let failures = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TransferEvent::PollFailed { .. }))
            .count();
        assert_eq!(failures, 4);

        let session = storage.current_session().unwrap();
        assert_eq!(session.state(), TransferState::Failed);
        assert!(session.status().status_message.starts_with("lost contact"));
    }

    #[tokio::test(start_paused = true)]
    async fn default_budget_is_finite() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.set_storage_rate(0.0);
        let storage = storage_on(&dev);
        let (tx, _rx) = mpsc::channel(1024);

        let started = Instant::now();
        let report = storage
            .download_map(
                dir.path().join("m.stcm"),
                MonitorOptions::default(),
                &CancellationToken::new(),
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::TimedOut);
        let waited = started.elapsed();
        assert!(waited >= DEFAULT_MAX_WAIT && waited < DEFAULT_MAX_WAIT + DEFAULT_POLL_INTERVAL);
    }

    /// Loses the connection right after the device reports inactivity.
    struct DropsAfterInactive {
        inner: Arc<SimulatedDevice>,
        saw_inactive: AtomicBool,
    }

    impl DeviceChannel for DropsAfterInactive {
        fn request(
            &self,
            msg_type: MessageType,
            payload: Option<serde_json::Value>,
        ) -> Pin<Box<dyn Future<Output = Result<Message, DeviceError>> + Send + '_>> {
            Box::pin(async move {
                if self.saw_inactive.load(Ordering::SeqCst) {
                    return Err(DeviceError::Connection("link dropped".into()));
                }
                let resp = self.inner.request(msg_type, payload).await?;
                if msg_type == MessageType::IsStorageSessionActive {
                    let body: StorageSessionActiveResponse = resp.decode_payload()?.unwrap();
                    if !body.active {
                        self.saw_inactive.store(true, Ordering::SeqCst);
                    }
                }
                Ok(resp)
            })
        }

        fn device_id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_final_query_is_indeterminate() {
        let dir = tempfile::tempdir().unwrap();
        let dev = Arc::new(SimulatedDevice::new("sim"));
        let channel = Arc::new(DropsAfterInactive {
            inner: dev,
            saw_inactive: AtomicBool::new(false),
        });
        let storage = MapStorage::new(DeviceApi::new(channel));
        let (tx, _rx) = mpsc::channel(256);

        let result = storage
            .download_map(
                dir.path().join("m.stcm"),
                MonitorOptions::default(),
                &CancellationToken::new(),
                &tx,
            )
            .await;
        assert!(matches!(result, Err(TransferError::Indeterminate(_))));
    }
}
