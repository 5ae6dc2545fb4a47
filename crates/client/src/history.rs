//! Read model over the server's append-only edit log.

use std::collections::HashMap;

use cleanflow_core::diff::FieldDiff;
use cleanflow_core::types::DbId;
use cleanflow_core::version::{sort_newest_first, RecordVersion, RollbackKind};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;

use crate::api::{ApiError, CleanflowApi};
use crate::events::{Invalidation, InvalidationBus};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Api(#[from] ApiError),
}

struct HistoryState {
    versions: HashMap<DbId, Vec<RecordVersion>>,
    generations: HashMap<DbId, u64>,
    /// Bumped when invalidations were lost.
    epoch: u64,
    rx: broadcast::Receiver<Invalidation>,
}

impl HistoryState {
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Invalidation::History { record_id }) => self.invalidate(record_id),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => {
                    self.versions.clear();
                    self.epoch += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn invalidate(&mut self, record_id: DbId) {
        self.versions.remove(&record_id);
        *self.generations.entry(record_id).or_default() += 1;
    }

    fn generation(&self, record_id: DbId) -> u64 {
        self.epoch + self.generations.get(&record_id).copied().unwrap_or(0)
    }
}

/// Cached, newest-first version lists keyed by record.
pub struct VersionHistoryStore {
    api: CleanflowApi,
    state: Mutex<HistoryState>,
}

impl VersionHistoryStore {
    pub fn new(api: CleanflowApi, bus: &InvalidationBus) -> Self {
        Self {
            api,
            state: Mutex::new(HistoryState {
                versions: HashMap::new(),
                generations: HashMap::new(),
                epoch: 0,
                rx: bus.subscribe(),
            }),
        }
    }

    /// Versions of `record_id`, newest first (ties broken by id).
    pub async fn list(&self, record_id: DbId) -> Result<Vec<RecordVersion>, HistoryError> {
        let generation = {
            let mut state = self.state.lock().await;
            state.drain();
            if let Some(versions) = state.versions.get(&record_id) {
                return Ok(versions.clone());
            }
            state.generation(record_id)
        };

        let mut versions = self.api.record_history(record_id).await?;
        sort_newest_first(&mut versions);
        tracing::debug!(record_id, count = versions.len(), "Fetched record history");

        let mut state = self.state.lock().await;
        state.drain();
        if state.generation(record_id) == generation {
            state.versions.insert(record_id, versions.clone());
        }
        Ok(versions)
    }

    /// Drop the cached list and fetch it again.
    pub async fn refresh(&self, record_id: DbId) -> Result<Vec<RecordVersion>, HistoryError> {
        self.state.lock().await.invalidate(record_id);
        self.list(record_id).await
    }

    /// Correct the free-text reason of a version in place.
    ///
    /// Idempotent. Creates no new version and leaves `before`/`after`
    /// untouched, so cached lists are patched rather than invalidated.
    pub async fn update_reason(&self, version_id: DbId, reason: &str) -> Result<(), HistoryError> {
        self.api.update_version_reason(version_id, reason).await?;

        let mut state = self.state.lock().await;
        state.drain();
        for versions in state.versions.values_mut() {
            if let Some(version) = versions.iter_mut().find(|v| v.id == version_id) {
                version.reason = reason.to_string();
            }
        }
        tracing::info!(version_id, "Version reason updated");
        Ok(())
    }

    /// Predicted rollback kind for a version, from the cached list.
    pub async fn rollback_kind(&self, record_id: DbId, version_id: DbId) -> Result<Option<RollbackKind>, HistoryError> {
        let versions = self.list(record_id).await?;
        Ok(RollbackKind::predict(version_id, &versions))
    }

    /// Per-field diff of one version.
    pub fn diff(version: &RecordVersion) -> Vec<FieldDiff> {
        version.diff()
    }
}
