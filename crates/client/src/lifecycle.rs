//! Batch lifecycle controller.
//!
//! Owns the client's confirmed [`BatchState`] for one batch and issues
//! pause/resume/cancel commands. A command never changes the local status
//! by itself: the state only moves when a stream snapshot or an explicit
//! refetch reports what the server actually did.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cleanflow_core::batch::{Batch, BatchStatus};
use cleanflow_core::error::CoreError;
use cleanflow_core::lifecycle::{transition, validate_intent, BatchState, LifecycleEvent, LifecycleIntent};
use cleanflow_core::progress::ProgressSnapshot;
use cleanflow_core::types::DbId;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, CleanflowApi};
use crate::events::{Invalidation, InvalidationBus};

/// Recoverable lifecycle failures. None of them change the local status.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The intent is not valid from the current status.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    /// Another command from this controller has not resolved yet.
    #[error("A lifecycle command is already in flight")]
    Busy,

    /// The server did not accept the command.
    #[error("Failed to {intent} batch: {source}")]
    Command {
        intent: LifecycleIntent,
        #[source]
        source: ApiError,
    },

    #[error("Failed to refresh batch: {0}")]
    Refresh(#[source] ApiError),

    /// The refetched batch reports more settled rows than it has.
    #[error("Server returned inconsistent batch counts: {0}")]
    Inconsistent(#[source] CoreError),
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BatchLifecycleController {
    api: CleanflowApi,
    state: watch::Sender<BatchState>,
    in_flight: AtomicBool,
    /// Set when a correction may have shifted the summary counts.
    stale: AtomicBool,
}

impl BatchLifecycleController {
    /// Controller for a batch just returned by an upload (status `Pending`).
    pub fn new(api: CleanflowApi, batch_id: DbId) -> Self {
        Self::with_state(api, BatchState::new(batch_id))
    }

    /// Controller seeded from a fetched batch.
    pub fn from_batch(api: CleanflowApi, batch: &Batch) -> Self {
        Self::with_state(api, BatchState::from(batch))
    }

    fn with_state(api: CleanflowApi, state: BatchState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            api,
            state,
            in_flight: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        }
    }

    pub fn batch_id(&self) -> DbId {
        self.state.borrow().batch_id
    }

    pub fn status(&self) -> BatchStatus {
        self.state.borrow().status
    }

    pub fn state(&self) -> BatchState {
        self.state.borrow().clone()
    }

    /// Receiver notified whenever the confirmed state changes.
    pub fn watch(&self) -> watch::Receiver<BatchState> {
        self.state.subscribe()
    }

    /// Whether a command is currently awaiting the server.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the summary counts were invalidated and not refetched yet.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Fold a server-confirmed event into the state and return the result.
    pub fn apply(&self, event: &LifecycleEvent) -> BatchState {
        let batch_id = self.batch_id();
        self.state.send_if_modified(|state| {
            let next = transition(state, event);
            if next == *state {
                return false;
            }
            if next.status != state.status {
                tracing::info!(
                    batch_id,
                    from = %state.status,
                    to = %next.status,
                    "Batch status changed",
                );
            }
            *state = next;
            true
        });
        self.state()
    }

    pub fn apply_snapshot(&self, snapshot: &ProgressSnapshot) -> BatchState {
        self.apply(&LifecycleEvent::Snapshot(snapshot.clone()))
    }

    /// Refetch the batch and reconcile with it.
    ///
    /// Counts that exceed the batch's total are rejected and leave the
    /// state untouched.
    pub async fn refresh(&self) -> Result<BatchState, LifecycleError> {
        let batch_id = self.batch_id();
        let batch = self
            .api
            .get_batch(batch_id)
            .await
            .map_err(LifecycleError::Refresh)?;
        if let Err(e) = batch.check_counts() {
            tracing::warn!(batch_id, error = %e, "Ignoring refetched batch");
            return Err(LifecycleError::Inconsistent(e));
        }
        self.stale.store(false, Ordering::Release);
        Ok(self.apply(&LifecycleEvent::Refetched(batch)))
    }

    /// Refetch this batch whenever `bus` reports its summary counts stale.
    ///
    /// The task holds only a weak reference and ends when the controller is
    /// dropped, the bus closes or `cancel` fires.
    pub fn follow_invalidations(
        self: &Arc<Self>,
        bus: &InvalidationBus,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let weak = Arc::downgrade(self);
        let batch_id = self.batch_id();

        tokio::spawn(async move {
            loop {
                let relevant = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(Invalidation::BatchSummary { batch_id: id }) => id == batch_id,
                        Ok(_) => false,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(batch_id, skipped, "Invalidation receiver lagged");
                            true
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                if !relevant {
                    continue;
                }

                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.stale.store(true, Ordering::Release);
                if let Err(e) = controller.refresh().await {
                    tracing::warn!(batch_id, error = %e, "Failed to refresh invalidated batch summary");
                }
            }
            tracing::debug!(batch_id, "Stopped following invalidations");
        })
    }

    pub async fn pause(&self) -> Result<(), LifecycleError> {
        self.issue(LifecycleIntent::Pause).await
    }

    pub async fn resume(&self) -> Result<(), LifecycleError> {
        self.issue(LifecycleIntent::Resume).await
    }

    /// Ask the server to cancel. Advisory: the batch is not treated as
    /// cancelled until the server confirms it.
    pub async fn cancel(&self) -> Result<(), LifecycleError> {
        self.issue(LifecycleIntent::Cancel).await
    }

    async fn issue(&self, intent: LifecycleIntent) -> Result<(), LifecycleError> {
        let batch_id = self.batch_id();

        if let Err(e) = validate_intent(self.status(), intent) {
            tracing::debug!(batch_id, %intent, error = %e, "Lifecycle intent rejected locally");
            return Err(e.into());
        }

        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(LifecycleError::Busy)?;

        match self.api.send_command(batch_id, intent).await {
            Ok(()) => {
                tracing::info!(batch_id, %intent, "Lifecycle command accepted, awaiting confirmation");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(batch_id, %intent, error = %source, "Lifecycle command failed");
                Err(LifecycleError::Command { intent, source })
            }
        }
    }
}
