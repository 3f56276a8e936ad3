use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use aurora_device::{DeviceApi, DeviceError};
use aurora_protocol::types::{StorageSessionKind, StorageState, StorageStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{SessionStatus, TransferState};
use crate::validation::{validate_download_target, validate_upload_source};

/// One map upload or download (thread-safe).
///
/// A session never leaves a terminal state; another transfer needs a new
/// session.
pub struct TransferSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    direction: StorageSessionKind,
    path: PathBuf,
    state: TransferState,
    progress: f32,
    status_message: String,
    created_at: Instant,
    completed_at: Option<Instant>,
}

impl TransferSession {
    /// Creates an idle session.
    pub fn new(direction: StorageSessionKind, path: PathBuf) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                direction,
                path,
                state: TransferState::Idle,
                progress: 0.0,
                status_message: String::new(),
                created_at: Instant::now(),
                completed_at: None,
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the session as accepted by the device. Progress restarts at 0.
    pub fn start(&self) {
        let mut s = self.write();
        if s.state == TransferState::Idle {
            s.state = TransferState::Started;
            s.progress = 0.0;
        }
    }

    /// Folds a device status report into the local state.
    ///
    /// Reports arriving after a terminal state are ignored. Progress never
    /// decreases.
    pub fn apply(&self, status: &StorageStatus) -> TransferState {
        let mut s = self.write();
        let next = match status.state {
            StorageState::Idle => s.state,
            StorageState::Working => TransferState::InProgress,
            StorageState::Finished => TransferState::Finished,
            StorageState::Failed | StorageState::Rejected | StorageState::Timeout => {
                TransferState::Failed
            }
            StorageState::Aborted => TransferState::Aborted,
        };
        if !s.state.can_advance_to(next) {
            return s.state;
        }

        let progress = status.progress.clamp(0.0, 100.0);
        if progress > s.progress {
            s.progress = progress;
        }

        let message = match status.state {
            StorageState::Rejected | StorageState::Timeout if status.message.is_empty() => {
                status.state.status_string().to_string()
            }
            StorageState::Rejected | StorageState::Timeout => {
                format!("{}: {}", status.state.status_string(), status.message)
            }
            _ => status.message.clone(),
        };
        if !message.is_empty() {
            s.status_message = message;
        }

        if next != s.state {
            debug!(from = ?s.state, to = ?next, progress = s.progress, "transfer state change");
            s.state = next;
            if next.is_terminal() {
                s.completed_at = Some(Instant::now());
            }
        }
        s.state
    }

    /// Moves a live session to `Aborted`.
    pub fn abort(&self) {
        self.finish_with(TransferState::Aborted, "aborted by client");
    }

    /// Moves a live session to `Failed` with `reason`.
    pub fn fail(&self, reason: &str) {
        self.finish_with(TransferState::Failed, reason);
    }

    fn finish_with(&self, state: TransferState, reason: &str) {
        let mut s = self.write();
        if s.state.is_terminal() {
            return;
        }
        s.state = state;
        s.status_message = reason.to_string();
        s.completed_at = Some(Instant::now());
    }

    pub fn status(&self) -> SessionStatus {
        let s = self.read();
        SessionStatus {
            progress: s.progress,
            status_message: s.status_message.clone(),
            finished: s.state == TransferState::Finished,
            state: s.state,
        }
    }

    pub fn direction(&self) -> StorageSessionKind {
        self.read().direction
    }

    pub fn path(&self) -> PathBuf {
        self.read().path.clone()
    }

    pub fn state(&self) -> TransferState {
        self.read().state
    }

    pub fn progress(&self) -> f32 {
        self.read().progress
    }

    /// Returns `true` while the session is started or in progress.
    pub fn is_active(&self) -> bool {
        self.read().state.is_active()
    }

    /// Time from creation to the terminal state (or now).
    pub fn elapsed(&self) -> std::time::Duration {
        let s = self.read();
        s.completed_at
            .unwrap_or_else(Instant::now)
            .duration_since(s.created_at)
    }
}

/// Map storage endpoint of one device channel.
///
/// Holds at most one live [`TransferSession`]; starting another while it is
/// active fails immediately.
pub struct MapStorage {
    pub(crate) api: DeviceApi,
    session: RwLock<Option<Arc<TransferSession>>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl MapStorage {
    pub fn new(api: DeviceApi) -> Self {
        Self {
            api,
            session: RwLock::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn device_id(&self) -> &str {
        self.api.device_id()
    }

    /// The most recently started session, live or finished.
    pub fn current_session(&self) -> Option<Arc<TransferSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts streaming the device's map into `path`.
    ///
    /// Returns `false` if a session is active, `path` is not writable, or the
    /// device rejects the request.
    pub async fn start_download_session(&self, path: impl AsRef<Path>) -> bool {
        self.start_session(StorageSessionKind::Download, path.as_ref())
            .await
    }

    /// Starts streaming the map file at `path` to the device.
    ///
    /// Returns `false` if a session is active, `path` is not a readable map
    /// file, or the device rejects the request.
    pub async fn start_upload_session(&self, path: impl AsRef<Path>) -> bool {
        self.start_session(StorageSessionKind::Upload, path.as_ref())
            .await
    }

    async fn start_session(&self, direction: StorageSessionKind, path: &Path) -> bool {
        let _guard = self.start_lock.lock().await;
        let device = self.device_id().to_string();

        if let Some(current) = self.current_session()
            && current.is_active()
            && !self.confirm_ended(&current).await
        {
            warn!(
                device = %device,
                %direction,
                active = %current.path().display(),
                "storage session already active"
            );
            return false;
        }

        let validated = match direction {
            StorageSessionKind::Download => validate_download_target(path),
            StorageSessionKind::Upload => validate_upload_source(path),
        };
        if let Err(e) = validated {
            warn!(device = %device, %direction, error = %e, "map path rejected");
            return false;
        }

        let Some(path_str) = path.to_str() else {
            warn!(device = %device, path = %path.display(), "map path is not UTF-8");
            return false;
        };

        if let Err(e) = self.api.start_storage_session(direction, path_str).await {
            warn!(device = %device, %direction, error = %e, "device refused storage session");
            return false;
        }

        let session = Arc::new(TransferSession::new(direction, path.to_path_buf()));
        session.start();
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        info!(device = %device, %direction, path = %path_str, "storage session started");
        true
    }

    /// Whether a transfer is still running.
    ///
    /// Answers `false` without a device round trip when no session exists or
    /// the local session already ended. When the device reports the session
    /// over, the local session picks up the device's last status.
    pub async fn is_session_active(&self) -> Result<bool, DeviceError> {
        let Some(session) = self.current_session() else {
            return Ok(false);
        };
        if !session.is_active() {
            return Ok(false);
        }
        let active = self.api.is_storage_session_active().await?;
        if !active {
            self.refresh_ended(&session).await;
        }
        Ok(active)
    }

    /// Folds the device's last status into a session the device no longer
    /// runs. Failures leave the session as it was.
    async fn refresh_ended(&self, session: &TransferSession) {
        match self.api.query_storage_status().await {
            Ok(report) => {
                session.apply(&report);
            }
            Err(e) => {
                debug!(device = %self.device_id(), error = %e, "final status refresh failed");
            }
        }
    }

    /// Asks the device whether a locally live session is over. If so, the
    /// session is moved to a terminal state and `true` returned.
    async fn confirm_ended(&self, session: &TransferSession) -> bool {
        match self.api.is_storage_session_active().await {
            Ok(true) => false,
            Ok(false) => {
                self.refresh_ended(session).await;
                session.fail("session ended without a final status");
                true
            }
            Err(e) => {
                warn!(
                    device = %self.device_id(),
                    error = %e,
                    "could not confirm storage session state"
                );
                false
            }
        }
    }

    /// Reads the session status, refreshing it from the device while the
    /// session is live.
    ///
    /// With no intervening device change two calls return the same values.
    pub async fn query_session_status(&self) -> Result<SessionStatus, DeviceError> {
        let Some(session) = self.current_session() else {
            return Ok(SessionStatus::idle());
        };
        if session.state().is_terminal() {
            return Ok(session.status());
        }

        let report = self.api.query_storage_status().await?;
        session.apply(&report);
        Ok(session.status())
    }

    /// Requests cancellation of the live session.
    ///
    /// Cooperative: the device stops within one of its own polling
    /// intervals. The local state becomes `Aborted` once the device has
    /// accepted the request.
    pub async fn abort_session(&self) -> Result<(), DeviceError> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };
        if !session.is_active() {
            return Ok(());
        }

        self.api.abort_storage_session().await?;
        session.abort();
        info!(device = %self.device_id(), "storage session aborted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_device::mock::SimulatedDevice;
    use aurora_protocol::constants::{ERROR_OP_FAILED, MessageType};

    fn storage() -> (Arc<SimulatedDevice>, MapStorage) {
        let dev = Arc::new(SimulatedDevice::new("sim"));
        dev.grow_map(1, 4, 8);
        let storage = MapStorage::new(DeviceApi::new(dev.clone()));
        (dev, storage)
    }

    fn report(progress: f32, state: StorageState, message: &str) -> StorageStatus {
        StorageStatus {
            progress,
            state,
            message: message.into(),
        }
    }

    #[test]
    fn apply_keeps_progress_monotonic() {
        let session = TransferSession::new(StorageSessionKind::Download, "a.stcm".into());
        session.start();
        assert_eq!(session.state(), TransferState::Started);

        session.apply(&report(40.0, StorageState::Working, "receiving"));
        session.apply(&report(30.0, StorageState::Working, ""));
        assert_eq!(session.progress(), 40.0);
        assert_eq!(session.status().status_message, "receiving");
        assert_eq!(session.state(), TransferState::InProgress);
    }

    #[test]
    fn terminal_state_is_final() {
        let session = TransferSession::new(StorageSessionKind::Upload, "a.stcm".into());
        session.start();
        session.apply(&report(100.0, StorageState::Finished, "done"));
        assert!(session.status().finished);

        session.apply(&report(10.0, StorageState::Working, "again"));
        session.abort();
        let status = session.status();
        assert_eq!(status.state, TransferState::Finished);
        assert_eq!(status.progress, 100.0);
        assert_eq!(status.status_message, "done");
    }

    #[test]
    fn rejected_maps_to_failed_with_reason() {
        let session = TransferSession::new(StorageSessionKind::Download, "a.stcm".into());
        session.start();
        session.apply(&report(0.0, StorageState::Rejected, "storage busy"));
        let status = session.status();
        assert_eq!(status.state, TransferState::Failed);
        assert!(!status.finished);
        assert_eq!(status.status_message, "Rejected: storage busy");
    }

    #[test]
    fn device_timeout_without_message() {
        let session = TransferSession::new(StorageSessionKind::Download, "a.stcm".into());
        session.start();
        session.apply(&report(12.0, StorageState::Timeout, ""));
        assert_eq!(session.state(), TransferState::Failed);
        assert_eq!(session.status().status_message, "Timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn start_download_installs_session() {
        let dir = tempfile::tempdir().unwrap();
        let (_dev, storage) = storage();

        assert!(!storage.is_session_active().await.unwrap());
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);

        let session = storage.current_session().unwrap();
        assert_eq!(session.direction(), StorageSessionKind::Download);
        assert_eq!(session.state(), TransferState::Started);
        assert!(storage.is_session_active().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_fails_and_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.stcm");
        let (dev, storage) = storage();

        assert!(storage.start_download_session(&first).await);
        let before = storage.current_session().unwrap();

        assert!(!storage.start_download_session(dir.path().join("second.stcm")).await);
        let after = storage.current_session().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.path(), first);
        assert_eq!(after.state(), TransferState::Started);
        assert_eq!(dev.request_count(MessageType::StartStorageSession), 1);
    }

    #[tokio::test]
    async fn upload_of_missing_file_never_reaches_device() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, storage) = storage();

        assert!(!storage.start_upload_session(dir.path().join("absent.stcm")).await);
        assert!(storage.current_session().is_none());
        assert_eq!(dev.request_count(MessageType::StartStorageSession), 0);
    }

    #[tokio::test]
    async fn device_rejection_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, storage) = storage();
        dev.reject_next_session();

        assert!(!storage.start_download_session(dir.path().join("m.stcm")).await);
        assert!(storage.current_session().is_none());

        dev.fail_next(MessageType::StartStorageSession, ERROR_OP_FAILED, "no space");
        assert!(!storage.start_download_session(dir.path().join("m.stcm")).await);
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_idempotent_without_device_change() {
        let dir = tempfile::tempdir().unwrap();
        let (_dev, storage) = storage();
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);

        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        let a = storage.query_session_status().await.unwrap();
        let b = storage.query_session_status().await.unwrap();
        assert_eq!(a.progress, b.progress);
        assert_eq!(a.status_message, b.status_message);
        assert_eq!(a.state, TransferState::InProgress);
    }

    #[tokio::test]
    async fn status_without_session_is_idle() {
        let (dev, storage) = storage();
        let status = storage.query_session_status().await.unwrap();
        assert_eq!(status, SessionStatus::idle());
        assert_eq!(dev.total_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_ends_session_locally() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, storage) = storage();
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        storage.query_session_status().await.unwrap();

        storage.abort_session().await.unwrap();
        assert!(!storage.is_session_active().await.unwrap());
        let status = storage.query_session_status().await.unwrap();
        assert_eq!(status.state, TransferState::Aborted);
        assert!(!status.finished);
        assert_eq!(dev.request_count(MessageType::AbortStorageSession), 1);

        // A new session may start once the old one is terminal.
        assert!(storage.start_download_session(dir.path().join("n.stcm")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_answer_frees_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, storage) = storage();
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);

        tokio::time::advance(std::time::Duration::from_secs(600)).await;
        assert!(!storage.is_session_active().await.unwrap());
        let first = storage.current_session().unwrap();
        assert_eq!(first.state(), TransferState::Finished);

        assert!(storage.start_download_session(dir.path().join("n.stcm")).await);
        assert!(!Arc::ptr_eq(&first, &storage.current_session().unwrap()));
        assert_eq!(dev.request_count(MessageType::StartStorageSession), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_confirms_stale_session_with_device() {
        let dir = tempfile::tempdir().unwrap();
        let (_dev, storage) = storage();
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);
        let first = storage.current_session().unwrap();

        tokio::time::advance(std::time::Duration::from_secs(600)).await;
        assert!(first.is_active());
        assert!(storage.start_download_session(dir.path().join("n.stcm")).await);
        assert_eq!(first.state(), TransferState::Finished);
        assert_eq!(first.progress(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_device_keeps_slot_taken() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, storage) = storage();
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);

        dev.disconnect();
        assert!(!storage.start_download_session(dir.path().join("n.stcm")).await);
        assert!(storage.current_session().unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_abort_keeps_session_live() {
        let dir = tempfile::tempdir().unwrap();
        let (dev, storage) = storage();
        assert!(storage.start_download_session(dir.path().join("m.stcm")).await);

        dev.disconnect();
        assert!(storage.abort_session().await.is_err());
        assert!(storage.current_session().unwrap().is_active());
    }
}
