//! Storage Ports (Driven Ports)
//!
//! Bars are append-only and unique by `(instrument, provider, timestamp)`.
//! Coverage is stored as the full normalized interval set of one key.
//! Assets are insert-if-new by instrument id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::asset::Asset;
use crate::domain::coverage::CoverageSet;
use crate::domain::market::{Bar, InstrumentKey};

/// Storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the database.
    #[error("Storage connection error: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("Storage query error: {0}")]
    Query(String),

    /// A stored row could not be decoded.
    #[error("Corrupt stored row: {0}")]
    Corrupt(String),
}

/// Durable bar storage.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Insert bars, ignoring ones already stored.
    ///
    /// Returns the number of newly inserted rows.
    async fn append(&self, bars: &[Bar]) -> Result<usize, StoreError>;

    /// Bars for `key` with `start <= timestamp <= end`, ascending.
    async fn query(
        &self,
        key: &InstrumentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError>;

    /// Most recent bar for `key`.
    async fn latest(&self, key: &InstrumentKey) -> Result<Option<Bar>, StoreError>;
}

/// Persisted coverage intervals.
#[async_trait]
pub trait CoverageStore: Send + Sync {
    /// Load the interval set of `key` (empty if never stored).
    async fn load_coverage(&self, key: &InstrumentKey) -> Result<CoverageSet, StoreError>;

    /// Replace the interval set of `key`.
    async fn save_coverage(
        &self,
        key: &InstrumentKey,
        set: &CoverageSet,
    ) -> Result<(), StoreError>;
}

/// Persisted instrument catalog.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Every stored asset, in insertion order.
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError>;

    /// Insert assets whose instrument id is not stored yet.
    ///
    /// Returns the number of newly inserted assets.
    async fn insert_new_assets(&self, assets: &[Asset]) -> Result<usize, StoreError>;
}
