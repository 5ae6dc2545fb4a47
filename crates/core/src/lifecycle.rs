//! Batch lifecycle finite-state machine.
//!
//! Pure functions only: [`validate_intent`] decides whether a user command
//! may be sent, and [`transition`] folds a server-confirmed event into the
//! client's [`BatchState`]. Neither applies a command's effect locally;
//! status only ever changes through server-reported events.

use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchStatus};
use crate::error::CoreError;
use crate::progress::ProgressSnapshot;
use crate::types::DbId;

/// A user-issued lifecycle command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleIntent {
    Pause,
    Resume,
    Cancel,
}

impl LifecycleIntent {
    /// Path segment of the command endpoint (`/batches/{id}/pause`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

    /// Statuses from which this intent may be issued.
    pub fn allowed_from(&self) -> &'static [BatchStatus] {
        match self {
            Self::Pause => &[BatchStatus::Pending, BatchStatus::Processing],
            Self::Resume => &[BatchStatus::Paused],
            Self::Cancel => &[
                BatchStatus::Pending,
                BatchStatus::Processing,
                BatchStatus::Paused,
            ],
        }
    }
}

impl std::fmt::Display for LifecycleIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether `intent` may be issued while the batch is in `status`.
///
/// Terminal statuses reject every intent with [`CoreError::Terminal`];
/// other mismatches yield [`CoreError::InvalidTransition`].
pub fn validate_intent(status: BatchStatus, intent: LifecycleIntent) -> Result<(), CoreError> {
    if status.is_terminal() {
        return Err(CoreError::Terminal(status));
    }
    if intent.allowed_from().contains(&status) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: status,
            intent,
        })
    }
}

/// The client's confirmed view of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchState {
    pub batch_id: DbId,
    pub status: BatchStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

impl BatchState {
    /// Initial state for a freshly created batch.
    pub fn new(batch_id: DbId) -> Self {
        Self {
            batch_id,
            status: BatchStatus::Pending,
            total_rows: 0,
            processed_rows: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&Batch> for BatchState {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id,
            status: batch.status,
            total_rows: batch.total_rows,
            processed_rows: batch.processed_rows,
            success_count: batch.success_count,
            failure_count: batch.failure_count,
        }
    }
}

/// Server-confirmed facts that can move a [`BatchState`].
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A snapshot pushed on the progress stream.
    Snapshot(ProgressSnapshot),
    /// An explicit `GET /batches/{id}` result.
    Refetched(Batch),
}

/// Fold one event into the current state.
///
/// - Snapshots set the status; counters never move backwards while the
///   batch is active, so a counter-less notice (such as the cancellation
///   frame) or a stale frame cannot erase progress. The total is taken only
///   once the server knows it.
/// - A refetch is authoritative and replaces the state wholesale.
/// - Once terminal, the status never changes. Snapshots are ignored, and a
///   refetch reporting the same terminal status only refreshes the counters
///   (corrections move rows between success and failure after completion).
pub fn transition(state: &BatchState, event: &LifecycleEvent) -> BatchState {
    if !accepts(state, event) {
        return state.clone();
    }
    match event {
        LifecycleEvent::Snapshot(snap) => BatchState {
            batch_id: state.batch_id,
            status: snap.status,
            total_rows: if snap.total > 0 {
                snap.total
            } else {
                state.total_rows
            },
            processed_rows: state.processed_rows.max(snap.processed),
            success_count: state.success_count.max(snap.success),
            failure_count: state.failure_count.max(snap.failed),
        },
        LifecycleEvent::Refetched(batch) => BatchState::from(batch),
    }
}

fn accepts(state: &BatchState, event: &LifecycleEvent) -> bool {
    match event {
        LifecycleEvent::Snapshot(_) => !state.is_terminal(),
        LifecycleEvent::Refetched(batch) => {
            batch.id == state.batch_id && (!state.is_terminal() || batch.status == state.status)
        }
    }
}
