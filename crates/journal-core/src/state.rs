//! Backup and restore state reported to the host.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::auth::AuthError;
use crate::error::Error;

/// Notes processed so far out of the whole pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub synced_notes: usize,
    pub total_notes: usize,
}

/// Category of a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Authorization is missing or was rejected after one refresh.
    Authentication,
    /// The request never got a response.
    Network,
    /// The drive answered with an error status.
    Remote,
    /// Local store or filesystem failure.
    Local,
    /// The backup document could not be parsed.
    Format,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&Error> for SyncFailure {
    fn from(error: &Error) -> Self {
        let kind = match error {
            Error::Auth(AuthError::Http(_)) | Error::Http(_) => FailureKind::Network,
            Error::Auth(_) => FailureKind::Authentication,
            Error::Remote { .. } => FailureKind::Remote,
            Error::Serialization(_) => FailureKind::Format,
            Error::Cancelled => FailureKind::Cancelled,
            Error::Database(_)
            | Error::LibSql(_)
            | Error::Io(_)
            | Error::NotFound(_)
            | Error::InvalidInput(_)
            | Error::Storage(_) => FailureKind::Local,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Observable state of a backup or restore pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running { progress: SyncProgress },
    Success,
    Failure(SyncFailure),
}

impl SyncState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure(_))
    }
}

/// Emits the states of one pass.
///
/// Progress only moves forward, and exactly one terminal state is sent: the
/// finishing methods consume the reporter, and a reporter dropped without
/// finishing reports the pass as cancelled.
pub(crate) struct ProgressReporter {
    sender: UnboundedSender<SyncState>,
    total: usize,
    synced: usize,
    finished: bool,
}

impl ProgressReporter {
    pub(crate) const fn new(sender: UnboundedSender<SyncState>) -> Self {
        Self {
            sender,
            total: 0,
            synced: 0,
            finished: false,
        }
    }

    pub(crate) fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    /// Report one more note done.
    pub(crate) fn advance(&mut self) {
        if self.synced >= self.total {
            tracing::warn!(
                "Ignoring progress past {} of {} notes",
                self.synced,
                self.total
            );
            return;
        }
        self.synced += 1;
        self.send(SyncState::Running {
            progress: SyncProgress {
                synced_notes: self.synced,
                total_notes: self.total,
            },
        });
    }

    pub(crate) fn succeed(mut self) {
        self.finish(SyncState::Success);
    }

    pub(crate) fn fail(mut self, error: &Error) {
        self.finish(SyncState::Failure(SyncFailure::from(error)));
    }

    fn finish(&mut self, state: SyncState) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.send(state);
    }

    fn send(&self, state: SyncState) {
        // The host may have stopped listening; the pass still runs to completion
        self.sender.send(state).ok();
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(SyncState::Failure(SyncFailure::from(&Error::Cancelled)));
        }
    }
}
