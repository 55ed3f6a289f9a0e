//! Market Data Port (Driven Port)
//!
//! Interfaces for fetching historical bars and the instrument catalog from
//! the upstream provider.

use async_trait::async_trait;

use crate::domain::asset::Asset;
use crate::domain::market::{Bar, InstrumentKey, Periodicity, TimeRange};

/// Upstream market data error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network error (connection refused, timeout, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Upstream returned a non-retryable error status.
    #[error("Upstream API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Upstream kept rejecting with rate limits.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Every retry attempt failed.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Last error observed.
        last_error: String,
    },
}

/// Port for the upstream historical bar API.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Bars for `key` covering `range` at `interval` × `periodicity`.
    async fn get_bars(
        &self,
        key: &InstrumentKey,
        interval: u32,
        periodicity: Periodicity,
        range: TimeRange,
    ) -> Result<Vec<Bar>, ProviderError>;

    /// The `count` most recent bars for `key`.
    async fn get_latest_bars(
        &self,
        key: &InstrumentKey,
        interval: u32,
        periodicity: Periodicity,
        count: u32,
    ) -> Result<Vec<Bar>, ProviderError>;
}

/// One page of the upstream instrument catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentPage {
    /// Instruments on this page.
    pub assets: Vec<Asset>,
    /// 1-based page number.
    pub page: u32,
    /// Total page count reported by upstream.
    pub pages: u32,
}

/// Port for the upstream instrument catalog.
#[async_trait]
pub trait InstrumentCatalog: Send + Sync {
    /// Instruments on 1-based `page`.
    async fn list_instruments(&self, page: u32) -> Result<InstrumentPage, ProviderError>;
}
