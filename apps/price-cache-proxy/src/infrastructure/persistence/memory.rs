//! In-memory bar, coverage and asset store.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{AssetStore, BarStore, CoverageStore, StoreError};
use crate::domain::asset::{Asset, unseen_assets};
use crate::domain::coverage::CoverageSet;
use crate::domain::market::{Bar, InstrumentKey};

/// Bars, coverage and assets held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    bars: RwLock<HashMap<InstrumentKey, BTreeMap<DateTime<Utc>, Bar>>>,
    coverage: RwLock<HashMap<InstrumentKey, CoverageSet>>,
    assets: RwLock<Vec<Asset>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored bars across all keys.
    #[must_use]
    pub fn bar_count(&self) -> usize {
        self.bars.read().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl BarStore for InMemoryStore {
    async fn append(&self, bars: &[Bar]) -> Result<usize, StoreError> {
        let mut stored = self.bars.write();
        let mut inserted = 0;
        for bar in bars {
            let series = stored.entry(bar.key()).or_default();
            if !series.contains_key(&bar.timestamp) {
                series.insert(bar.timestamp, bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn query(
        &self,
        key: &InstrumentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .bars
            .read()
            .get(key)
            .map(|series| series.range(start..=end).map(|(_, bar)| bar.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest(&self, key: &InstrumentKey) -> Result<Option<Bar>, StoreError> {
        Ok(self
            .bars
            .read()
            .get(key)
            .and_then(|series| series.values().next_back().cloned()))
    }
}

#[async_trait]
impl CoverageStore for InMemoryStore {
    async fn load_coverage(&self, key: &InstrumentKey) -> Result<CoverageSet, StoreError> {
        Ok(self.coverage.read().get(key).cloned().unwrap_or_default())
    }

    async fn save_coverage(
        &self,
        key: &InstrumentKey,
        set: &CoverageSet,
    ) -> Result<(), StoreError> {
        self.coverage.write().insert(key.clone(), set.clone());
        Ok(())
    }
}

#[async_trait]
impl AssetStore for InMemoryStore {
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        Ok(self.assets.read().clone())
    }

    async fn insert_new_assets(&self, assets: &[Asset]) -> Result<usize, StoreError> {
        let mut stored = self.assets.write();
        let known: HashSet<_> = stored.iter().map(|asset| asset.instrument_id).collect();
        let fresh = unseen_assets(&known, assets.to_vec());
        let inserted = fresh.len();
        stored.extend(fresh);
        Ok(inserted)
    }
}
