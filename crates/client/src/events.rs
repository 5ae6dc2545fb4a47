//! In-process invalidation bus backed by a `tokio::sync::broadcast` channel.
//!
//! Mutations that change server state (commit, rollback) publish an
//! [`Invalidation`] for every read model they make stale. Caches subscribe
//! and drop the affected entries.

use cleanflow_core::types::DbId;
use tokio::sync::broadcast;

/// A read model that must be refetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invalidation {
    /// Every cached record page of a batch.
    Records { batch_id: DbId },
    /// Success/failure counts of a batch.
    BatchSummary { batch_id: DbId },
    /// The version list of a record.
    History { record_id: DbId },
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus for [`Invalidation`]s, shared via `Arc` or by cloning.
#[derive(Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<Invalidation>,
}

impl InvalidationBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Receivers that fall more than `capacity` messages behind observe
    /// `RecvError::Lagged` and should treat everything as stale.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers.
    pub fn publish(&self, invalidation: Invalidation) {
        tracing::debug!(?invalidation, "Publishing invalidation");
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(invalidation);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.sender.subscribe()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
