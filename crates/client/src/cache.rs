//! Page-scoped, read-only record cache.
//!
//! Pages are keyed by `(batch_id, RecordQuery)` and dropped whenever an
//! [`Invalidation::Records`] for their batch is published. The cache never
//! decides writes; it only saves refetching pages nobody has changed.

use std::collections::HashMap;

use cleanflow_core::record::{RecordPage, RecordQuery};
use cleanflow_core::types::DbId;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;

use crate::api::{ApiError, CleanflowApi};
use crate::events::{Invalidation, InvalidationBus};

struct CacheState {
    pages: HashMap<(DbId, RecordQuery), RecordPage>,
    /// Bumped on every invalidation of a batch, so a fetch that started
    /// before an invalidation does not store its stale result.
    generations: HashMap<DbId, u64>,
    /// Bumped when invalidations were lost; part of every batch's
    /// generation, including batches not seen yet.
    epoch: u64,
    rx: broadcast::Receiver<Invalidation>,
}

impl CacheState {
    /// Apply every invalidation published since the last call.
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Invalidation::Records { batch_id }) => self.invalidate(batch_id),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Record cache lagged, clearing");
                    self.pages.clear();
                    self.epoch += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn invalidate(&mut self, batch_id: DbId) {
        self.pages.retain(|(id, _), _| *id != batch_id);
        *self.generations.entry(batch_id).or_default() += 1;
    }

    fn generation(&self, batch_id: DbId) -> u64 {
        self.epoch + self.generations.get(&batch_id).copied().unwrap_or(0)
    }
}

pub struct RecordPageCache {
    state: Mutex<CacheState>,
}

impl RecordPageCache {
    pub fn new(bus: &InvalidationBus) -> Self {
        Self {
            state: Mutex::new(CacheState {
                pages: HashMap::new(),
                generations: HashMap::new(),
                epoch: 0,
                rx: bus.subscribe(),
            }),
        }
    }

    /// Cached page, if still valid.
    pub async fn get(&self, batch_id: DbId, query: &RecordQuery) -> Option<RecordPage> {
        let key = (batch_id, query.clone().normalized());
        let mut state = self.state.lock().await;
        state.drain();
        state.pages.get(&key).cloned()
    }

    /// Drop every page of `batch_id`.
    pub async fn invalidate(&self, batch_id: DbId) {
        let mut state = self.state.lock().await;
        state.drain();
        state.invalidate(batch_id);
    }

    /// Return the cached page or fetch and cache it.
    pub async fn fetch(
        &self,
        api: &CleanflowApi,
        batch_id: DbId,
        query: &RecordQuery,
    ) -> Result<RecordPage, ApiError> {
        let query = query.clone().normalized();
        let generation = {
            let mut state = self.state.lock().await;
            state.drain();
            if let Some(page) = state.pages.get(&(batch_id, query.clone())) {
                return Ok(page.clone());
            }
            state.generation(batch_id)
        };

        let page = api.list_records(batch_id, &query).await?;

        let mut state = self.state.lock().await;
        state.drain();
        if state.generation(batch_id) == generation {
            state.pages.insert((batch_id, query), page.clone());
        }
        Ok(page)
    }

    /// Number of cached pages (after applying pending invalidations).
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.drain();
        state.pages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(total: u64) -> RecordPage {
        RecordPage {
            data: Vec::new(),
            total,
        }
    }

    async fn seed(cache: &RecordPageCache, batch_id: DbId, query: RecordQuery, total: u64) {
        cache.state.lock().await.pages.insert((batch_id, query), page(total));
    }

    #[tokio::test]
    async fn records_invalidation_drops_only_that_batch() {
        let bus = InvalidationBus::default();
        let cache = RecordPageCache::new(&bus);
        let query = RecordQuery::default();
        seed(&cache, 1, query.clone(), 10).await;
        seed(&cache, 2, query.clone(), 20).await;

        bus.publish(Invalidation::Records { batch_id: 1 });

        assert!(cache.get(1, &query).await.is_none());
        assert_eq!(cache.get(2, &query).await.map(|p| p.total), Some(20));
    }

    #[tokio::test]
    async fn other_invalidations_keep_pages() {
        let bus = InvalidationBus::default();
        let cache = RecordPageCache::new(&bus);
        seed(&cache, 1, RecordQuery::default(), 10).await;

        bus.publish(Invalidation::History { record_id: 5 });
        bus.publish(Invalidation::BatchSummary { batch_id: 1 });

        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn lagging_receiver_clears_everything() {
        let bus = InvalidationBus::new(1);
        let cache = RecordPageCache::new(&bus);
        seed(&cache, 1, RecordQuery::default(), 10).await;

        bus.publish(Invalidation::History { record_id: 1 });
        bus.publish(Invalidation::History { record_id: 2 });

        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn lag_moves_generation_of_unseen_batches() {
        let bus = InvalidationBus::new(1);
        let cache = RecordPageCache::new(&bus);
        let before = cache.state.lock().await.generation(9);

        bus.publish(Invalidation::History { record_id: 1 });
        bus.publish(Invalidation::History { record_id: 2 });

        let mut state = cache.state.lock().await;
        state.drain();
        assert_ne!(state.generation(9), before);
    }
}
