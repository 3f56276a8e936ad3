use std::path::PathBuf;
use std::time::Duration;

use aurora_protocol::types::StorageSessionKind;

/// Local lifecycle of a transfer session.
///
/// Transitions only move forward:
/// `Idle → Started → InProgress → {Finished | Failed | Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Started,
    InProgress,
    Finished,
    Failed,
    Aborted,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Finished | TransferState::Failed | TransferState::Aborted
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TransferState::Started | TransferState::InProgress)
    }

    fn rank(self) -> u8 {
        match self {
            TransferState::Idle => 0,
            TransferState::Started => 1,
            TransferState::InProgress => 2,
            TransferState::Finished | TransferState::Failed | TransferState::Aborted => 3,
        }
    }

    /// Whether moving from `self` to `next` goes forward.
    pub(crate) fn can_advance_to(self, next: TransferState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// Snapshot returned by `query_session_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    /// Percent complete, 0–100.
    pub progress: f32,
    pub status_message: String,
    /// `true` only when the transfer completed successfully.
    pub finished: bool,
    pub state: TransferState,
}

impl SessionStatus {
    /// Status reported when no session was ever started.
    pub fn idle() -> Self {
        Self {
            progress: 0.0,
            status_message: String::new(),
            finished: false,
            state: TransferState::Idle,
        }
    }
}

/// How a monitored transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    Failed,
    /// Aborted on request (cancellation token or another caller).
    Aborted,
    /// `max_wait` expired; the session was aborted.
    TimedOut,
    /// No session was running (or the start was refused).
    NotStarted,
}

/// Events emitted while a transfer is monitored.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Progress update from a status poll.
    Progress {
        device_id: String,
        direction: StorageSessionKind,
        progress: f32,
        status: String,
        /// Percent per second over the recent window.
        rate: f64,
        eta: Option<Duration>,
    },
    /// A poll failed; monitoring continues.
    PollFailed { device_id: String, error: String },
    /// Monitoring ended.
    Finished {
        device_id: String,
        outcome: TransferOutcome,
        status: SessionStatus,
    },
}

/// Result of a blocking `download_map` / `upload_map`.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub direction: StorageSessionKind,
    pub path: PathBuf,
    pub outcome: TransferOutcome,
    pub status: SessionStatus,
    pub elapsed: Duration,
    /// Size of the local map file, on success.
    pub file_size: Option<u64>,
    /// SHA-256 hex digest of the local map file, on success.
    pub checksum: Option<String>,
}

impl TransferReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == TransferOutcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_do_not_advance() {
        assert!(!TransferState::Finished.can_advance_to(TransferState::InProgress));
        assert!(!TransferState::Aborted.can_advance_to(TransferState::Finished));
        assert!(!TransferState::Failed.can_advance_to(TransferState::Failed));
    }

    #[test]
    fn forward_transitions() {
        assert!(TransferState::Started.can_advance_to(TransferState::InProgress));
        assert!(TransferState::Started.can_advance_to(TransferState::Aborted));
        assert!(TransferState::InProgress.can_advance_to(TransferState::InProgress));
        assert!(!TransferState::InProgress.can_advance_to(TransferState::Started));
    }

    #[test]
    fn active_states() {
        assert!(TransferState::Started.is_active());
        assert!(TransferState::InProgress.is_active());
        assert!(!TransferState::Idle.is_active());
        assert!(!TransferState::Aborted.is_active());
    }
}
