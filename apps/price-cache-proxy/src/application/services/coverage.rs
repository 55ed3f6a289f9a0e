//! Coverage Tracker
//!
//! Keeps the coverage set of each instrument key in memory, loading it
//! from the [`CoverageStore`] on first use. All reads and writes of one
//! key go through that key's async mutex, so concurrent merges on the same
//! key apply in some serial order while different keys never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::application::ports::{CoverageStore, StoreError};
use crate::domain::coverage::CoverageSet;
use crate::domain::market::{InstrumentKey, TimeRange};

type KeySlot = Arc<AsyncMutex<Option<CoverageSet>>>;

/// Cached, persisted coverage per instrument key.
pub struct CoverageTracker {
    store: Arc<dyn CoverageStore>,
    slots: Mutex<HashMap<InstrumentKey, KeySlot>>,
}

impl CoverageTracker {
    /// Create a tracker backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CoverageStore>) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &InstrumentKey) -> KeySlot {
        Arc::clone(self.slots.lock().entry(key.clone()).or_default())
    }

    /// Uncovered sub-ranges of `request` for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the coverage set has to be loaded and loading fails.
    pub async fn compute_gaps(
        &self,
        key: &InstrumentKey,
        request: &TimeRange,
    ) -> Result<Vec<TimeRange>, StoreError> {
        let slot = self.slot(key);
        let mut cached = slot.lock().await;
        let set = self.loaded(key, &mut *cached).await?;
        Ok(set.gaps(request))
    }

    /// Merge `range` into the coverage of `key` and persist the result.
    ///
    /// Returns `true` when the stored set changed. On a store failure the
    /// in-memory set is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or saving the coverage set fails.
    pub async fn merge_coverage(
        &self,
        key: &InstrumentKey,
        range: TimeRange,
    ) -> Result<bool, StoreError> {
        let slot = self.slot(key);
        let mut cached = slot.lock().await;
        let current = self.loaded(key, &mut *cached).await?;

        let mut updated = current.clone();
        if !updated.merge(range) {
            return Ok(false);
        }

        self.store.save_coverage(key, &updated).await?;
        tracing::debug!(
            key = %key,
            range = %range,
            intervals = updated.len(),
            "Coverage merged"
        );
        *cached = Some(updated);
        Ok(true)
    }

    /// Snapshot of the coverage set of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the coverage set has to be loaded and loading fails.
    pub async fn coverage(&self, key: &InstrumentKey) -> Result<CoverageSet, StoreError> {
        let slot = self.slot(key);
        let mut cached = slot.lock().await;
        Ok(self.loaded(key, &mut *cached).await?.clone())
    }

    async fn loaded<'a>(
        &self,
        key: &InstrumentKey,
        cached: &'a mut Option<CoverageSet>,
    ) -> Result<&'a CoverageSet, StoreError> {
        if cached.is_none() {
            *cached = Some(self.store.load_coverage(key).await?);
        }
        Ok(cached.get_or_insert_with(CoverageSet::new))
    }
}

// =============================================================================
// Tests
// =============================================================================
