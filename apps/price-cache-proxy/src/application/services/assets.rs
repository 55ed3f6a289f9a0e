//! Asset Service
//!
//! Keeps the local instrument catalog in step with upstream. A sync walks
//! every upstream page and stores instruments not seen before; existing
//! entries are never rewritten.

use std::sync::Arc;

use crate::application::ports::{AssetStore, InstrumentCatalog, ProviderError, StoreError};
use crate::domain::asset::Asset;

/// Asset service tuning.
#[derive(Debug, Clone, Copy)]
pub struct AssetServiceConfig {
    /// Upper bound on pages walked by one sync.
    pub max_pages: u32,
}

impl Default for AssetServiceConfig {
    fn default() -> Self {
        Self { max_pages: 500 }
    }
}

/// Asset service error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetServiceError {
    /// Upstream catalog lookup failed; nothing was stored.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] ProviderError),

    /// Local catalog could not be read or written.
    #[error("catalog store error: {0}")]
    Store(#[from] StoreError),
}

/// Instrument catalog use cases.
pub struct AssetService {
    catalog: Arc<dyn InstrumentCatalog>,
    store: Arc<dyn AssetStore>,
    config: AssetServiceConfig,
}

impl AssetService {
    /// Create a new asset service.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn InstrumentCatalog>,
        store: Arc<dyn AssetStore>,
        config: AssetServiceConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            config,
        }
    }

    /// Every stored asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list(&self) -> Result<Vec<Asset>, AssetServiceError> {
        Ok(self.store.list_assets().await?)
    }

    /// Pull the full upstream catalog, store new instruments, and return
    /// the resulting catalog.
    ///
    /// # Errors
    ///
    /// - `UpstreamUnavailable` if any page fails; nothing is stored
    /// - `Store` if the catalog cannot be written or read back
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> Result<Vec<Asset>, AssetServiceError> {
        let mut fetched = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .catalog
                .list_instruments(page)
                .await
                .inspect_err(|e| {
                    tracing::warn!(page, error = %e, "Instrument page fetch failed, aborting sync");
                })?;
            fetched.extend(response.assets);

            if page >= response.pages {
                break;
            }
            if page >= self.config.max_pages {
                tracing::warn!(
                    pages = response.pages,
                    max_pages = self.config.max_pages,
                    "Instrument catalog truncated at page limit"
                );
                break;
            }
            page += 1;
        }

        let inserted = self.store.insert_new_assets(&fetched).await?;
        tracing::info!(pages = page, fetched = fetched.len(), inserted, "Asset catalog synced");

        self.list().await
    }
}
