//! Price Service
//!
//! Answers historical range queries from the local bar cache, fetching
//! only the uncovered gaps from upstream at the base granularity, and
//! serves the current price with a freshness window.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::application::ports::{BarStore, Clock, MarketDataProvider, ProviderError, StoreError};
use crate::application::services::CoverageTracker;
use crate::domain::aggregation::resample;
use crate::domain::market::{AggregatedBar, BASE_PERIODICITY, Bar, InstrumentKey, Periodicity, TimeRange};

// =============================================================================
// Configuration
// =============================================================================

/// Price service tuning.
#[derive(Debug, Clone)]
pub struct PriceServiceConfig {
    /// Interval multiplier used for current-price lookups.
    pub latest_interval: u32,
    /// Cached latest bar younger than this is served without upstream calls.
    pub freshness: TimeDelta,
    /// Default range end is `now - end_lag`.
    pub end_lag: TimeDelta,
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        Self {
            latest_interval: 1,
            freshness: TimeDelta::hours(2),
            end_lag: TimeDelta::minutes(1),
        }
    }
}

// =============================================================================
// Requests & Responses
// =============================================================================

/// Historical range query.
#[derive(Debug, Clone)]
pub struct RangeRequest {
    /// Instrument and provider.
    pub key: InstrumentKey,
    /// Interval multiplier passed to upstream fetches.
    pub interval: u32,
    /// Output periodicity.
    pub periodicity: Periodicity,
    /// Range start (inclusive).
    pub start: DateTime<Utc>,
    /// Range end; defaults to `now - end_lag`.
    pub end: Option<DateTime<Utc>>,
}

/// Range query result.
#[derive(Debug, Clone, Default)]
pub struct PriceRange {
    /// Aggregated bars, ascending.
    pub bars: Vec<AggregatedBar>,
    /// A store write failed; the cache did not advance for this query.
    pub degraded: bool,
    /// Number of gaps fetched from upstream.
    pub gaps_fetched: usize,
    /// Number of bars received from upstream.
    pub bars_fetched: usize,
}

/// Price service error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PriceServiceError {
    /// Start is not before end.
    #[error("invalid range: start {start} is not before end {end}")]
    InvalidRange {
        /// Requested start.
        start: DateTime<Utc>,
        /// Effective end.
        end: DateTime<Utc>,
    },

    /// Upstream fetch failed during gap fill.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] ProviderError),

    /// Local cache could not be read.
    #[error("cache error: {0}")]
    Store(#[from] StoreError),
}

// =============================================================================
// Service
// =============================================================================

/// Gap-filling price query orchestrator.
pub struct PriceService {
    bars: Arc<dyn BarStore>,
    coverage: Arc<CoverageTracker>,
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    config: PriceServiceConfig,
}

impl PriceService {
    /// Create a new price service.
    #[must_use]
    pub fn new(
        bars: Arc<dyn BarStore>,
        coverage: Arc<CoverageTracker>,
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        config: PriceServiceConfig,
    ) -> Self {
        Self {
            bars,
            coverage,
            provider,
            clock,
            config,
        }
    }

    /// Bars for `request`, fetching uncovered gaps from upstream first.
    ///
    /// Coverage is advanced to the full requested range only when at
    /// least one gap returned bars and every store append succeeded.
    ///
    /// # Errors
    ///
    /// - `InvalidRange` if the start is not before the effective end
    /// - `UpstreamUnavailable` if any gap fetch fails (nothing is marked covered)
    /// - `Store` if the cache cannot be read
    #[tracing::instrument(
        skip(self, request),
        fields(key = %request.key, periodicity = %request.periodicity)
    )]
    pub async fn get_range(&self, request: RangeRequest) -> Result<PriceRange, PriceServiceError> {
        let end = request
            .end
            .unwrap_or_else(|| self.clock.now() - self.config.end_lag);
        let range = TimeRange::new(request.start, end);
        if range.is_empty() {
            return Err(PriceServiceError::InvalidRange {
                start: request.start,
                end,
            });
        }

        let key = &request.key;
        let gaps = self.coverage.compute_gaps(key, &range).await?;

        let mut result = PriceRange {
            gaps_fetched: gaps.len(),
            ..PriceRange::default()
        };

        for gap in &gaps {
            let fetched = self
                .provider
                .get_bars(key, request.interval, BASE_PERIODICITY, *gap)
                .await
                .inspect_err(|e| {
                    tracing::warn!(gap = %gap, error = %e, "Upstream fetch failed, aborting gap fill");
                })?;

            if fetched.is_empty() {
                tracing::debug!(gap = %gap, "Upstream returned no bars for gap");
                continue;
            }

            result.bars_fetched += fetched.len();
            match self.bars.append(&fetched).await {
                Ok(inserted) => {
                    tracing::debug!(gap = %gap, fetched = fetched.len(), inserted, "Gap filled");
                }
                Err(e) => {
                    tracing::error!(gap = %gap, error = %e, "Failed to store fetched bars");
                    result.degraded = true;
                }
            }
        }

        if result.bars_fetched > 0 && !result.degraded {
            if let Err(e) = self.coverage.merge_coverage(key, range).await {
                tracing::error!(range = %range, error = %e, "Failed to record coverage");
                result.degraded = true;
            }
        }

        let stored = self.bars.query(key, range.start, range.end).await?;
        result.bars = resample(&stored, request.periodicity);

        tracing::debug!(
            gaps = result.gaps_fetched,
            fetched = result.bars_fetched,
            returned = result.bars.len(),
            degraded = result.degraded,
            "Range query served"
        );

        Ok(result)
    }

    /// Most recent price bar for `key`.
    ///
    /// A cached bar within the freshness window is returned directly.
    /// Otherwise one upstream latest-bar lookup is attempted; if that
    /// yields nothing (or fails), the stale cached bar is returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache cannot be read.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn get_current(&self, key: &InstrumentKey) -> Result<Option<Bar>, PriceServiceError> {
        let cached = self.bars.latest(key).await?;

        if let Some(bar) = &cached {
            if self.clock.now() - bar.timestamp < self.config.freshness {
                return Ok(cached);
            }
        }

        match self
            .provider
            .get_latest_bars(key, self.config.latest_interval, BASE_PERIODICITY, 1)
            .await
        {
            Ok(bars) => {
                if let Some(latest) = bars.into_iter().max_by_key(|bar| bar.timestamp) {
                    return Ok(Some(latest));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Latest bar lookup failed, using cached value");
            }
        }

        Ok(cached)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::hours(hours)
    }

    fn key() -> InstrumentKey {
        InstrumentKey::new(Uuid::from_u128(7), "oanda")
    }

    fn bar(hour: i64, close: i64) -> Bar {
        Bar {
            instrument_id: key().instrument_id,
            provider: key().provider,
            timestamp: t(hour),
            open: Decimal::from(close),
            high: Decimal::from(close + 1),
            low: Decimal::from(close - 1),
            close: Decimal::from(close),
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Serves hourly bars for any requested range and records calls.
    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<TimeRange>>,
        latest_calls: Mutex<u32>,
        fail: bool,
        fail_from: Option<DateTime<Utc>>,
        empty: bool,
        latest: Option<Bar>,
    }

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        async fn get_bars(
            &self,
            _key: &InstrumentKey,
            _interval: u32,
            periodicity: Periodicity,
            range: TimeRange,
        ) -> Result<Vec<Bar>, ProviderError> {
            assert_eq!(periodicity, Periodicity::Hour);
            self.calls.lock().push(range);
            if self.fail || self.fail_from.is_some_and(|from| range.start >= from) {
                return Err(ProviderError::Network("connection refused".to_string()));
            }
            if self.empty {
                return Ok(vec![]);
            }
            let base = t(0);
            let first = (range.start - base).num_hours();
            let last = (range.end - base).num_hours();
            Ok((first..last).map(|h| bar(h, 100 + h)).collect())
        }

        async fn get_latest_bars(
            &self,
            _key: &InstrumentKey,
            _interval: u32,
            _periodicity: Periodicity,
            count: u32,
        ) -> Result<Vec<Bar>, ProviderError> {
            assert_eq!(count, 1);
            *self.latest_calls.lock() += 1;
            if self.fail {
                return Err(ProviderError::Network("connection refused".to_string()));
            }
            Ok(self.latest.clone().into_iter().collect())
        }
    }

    /// Bar store whose appends always fail.
    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl BarStore for ReadOnlyStore {
        async fn append(&self, _bars: &[Bar]) -> Result<usize, StoreError> {
            Err(StoreError::Query("disk full".to_string()))
        }

        async fn query(
            &self,
            key: &InstrumentKey,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Bar>, StoreError> {
            self.0.query(key, start, end).await
        }

        async fn latest(&self, key: &InstrumentKey) -> Result<Option<Bar>, StoreError> {
            self.0.latest(key).await
        }
    }

    struct Harness {
        service: PriceService,
        store: Arc<InMemoryStore>,
        coverage: Arc<CoverageTracker>,
        provider: Arc<FakeProvider>,
    }

    fn harness(provider: FakeProvider, now: DateTime<Utc>) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let coverage = Arc::new(CoverageTracker::new(store.clone()));
        let provider = Arc::new(provider);
        let service = PriceService::new(
            store.clone(),
            Arc::clone(&coverage),
            provider.clone(),
            Arc::new(FixedClock(now)),
            PriceServiceConfig::default(),
        );
        Harness {
            service,
            store,
            coverage,
            provider,
        }
    }

    fn request(start: i64, end: Option<i64>, periodicity: Periodicity) -> RangeRequest {
        RangeRequest {
            key: key(),
            interval: 1,
            periodicity,
            start: t(start),
            end: end.map(t),
        }
    }

    #[tokio::test]
    async fn cold_cache_fetches_whole_range_and_marks_coverage() {
        let h = harness(FakeProvider::default(), t(100));

        let out = h
            .service
            .get_range(request(0, Some(5), Periodicity::Hour))
            .await
            .unwrap();

        assert_eq!(out.gaps_fetched, 1);
        assert_eq!(out.bars.len(), 5);
        assert!(!out.degraded);
        assert_eq!(h.provider.calls.lock().as_slice(), &[TimeRange::new(t(0), t(5))]);
        assert_eq!(
            h.coverage.coverage(&key()).await.unwrap().intervals(),
            &[TimeRange::new(t(0), t(5))]
        );
    }

    #[tokio::test]
    async fn warm_cache_only_fetches_gaps() {
        let h = harness(FakeProvider::default(), t(100));
        h.service
            .get_range(request(10, Some(20), Periodicity::Hour))
            .await
            .unwrap();
        h.provider.calls.lock().clear();

        let out = h
            .service
            .get_range(request(5, Some(25), Periodicity::Hour))
            .await
            .unwrap();

        assert_eq!(
            h.provider.calls.lock().as_slice(),
            &[TimeRange::new(t(5), t(10)), TimeRange::new(t(20), t(25))]
        );
        assert_eq!(out.gaps_fetched, 2);
        assert_eq!(out.bars.len(), 20);
        assert_eq!(
            h.coverage.coverage(&key()).await.unwrap().intervals(),
            &[TimeRange::new(t(5), t(25))]
        );
    }

    #[tokio::test]
    async fn covered_range_makes_no_upstream_calls() {
        let h = harness(FakeProvider::default(), t(100));
        h.service
            .get_range(request(0, Some(24), Periodicity::Hour))
            .await
            .unwrap();
        h.provider.calls.lock().clear();

        let out = h
            .service
            .get_range(request(2, Some(20), Periodicity::Day))
            .await
            .unwrap();

        assert!(h.provider.calls.lock().is_empty());
        assert_eq!(out.gaps_fetched, 0);
        assert_eq!(out.bars.len(), 1);
        assert_eq!(out.bars[0].open, Decimal::from(102));
        assert_eq!(out.bars[0].close, Decimal::from(120));
    }

    #[tokio::test]
    async fn inclusive_end_returns_boundary_bar() {
        let h = harness(FakeProvider::default(), t(100));
        h.store.append(&[bar(5, 1)]).await.unwrap();

        let out = h
            .service
            .get_range(request(0, Some(5), Periodicity::Hour))
            .await
            .unwrap();

        assert_eq!(out.bars.last().unwrap().timestamp, t(5));
        assert_eq!(out.bars.len(), 6);
    }

    #[tokio::test]
    async fn upstream_failure_aborts_without_coverage() {
        let h = harness(
            FakeProvider {
                fail: true,
                ..FakeProvider::default()
            },
            t(100),
        );

        let err = h
            .service
            .get_range(request(0, Some(5), Periodicity::Hour))
            .await
            .unwrap_err();

        assert!(matches!(err, PriceServiceError::UpstreamUnavailable(_)));
        assert!(h.coverage.coverage(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_gap_failure_keeps_coverage_unchanged() {
        let h = harness(
            FakeProvider {
                fail_from: Some(t(20)),
                ..FakeProvider::default()
            },
            t(100),
        );
        h.service
            .get_range(request(10, Some(20), Periodicity::Hour))
            .await
            .unwrap();
        h.provider.calls.lock().clear();

        let err = h
            .service
            .get_range(request(5, Some(25), Periodicity::Hour))
            .await
            .unwrap_err();

        assert!(matches!(err, PriceServiceError::UpstreamUnavailable(_)));
        assert_eq!(
            h.provider.calls.lock().as_slice(),
            &[TimeRange::new(t(5), t(10)), TimeRange::new(t(20), t(25))]
        );
        // First gap's bars were stored, but the range is not marked covered.
        assert_eq!(h.store.latest(&key()).await.unwrap().unwrap().timestamp, t(19));
        assert_eq!(h.store.query(&key(), t(5), t(9)).await.unwrap().len(), 5);
        assert_eq!(
            h.coverage.coverage(&key()).await.unwrap().intervals(),
            &[TimeRange::new(t(10), t(20))]
        );
        assert_eq!(
            h.coverage
                .compute_gaps(&key(), &TimeRange::new(t(5), t(25)))
                .await
                .unwrap(),
            vec![TimeRange::new(t(5), t(10)), TimeRange::new(t(20), t(25))]
        );
    }

    #[tokio::test]
    async fn empty_upstream_response_does_not_mark_coverage() {
        let h = harness(
            FakeProvider {
                empty: true,
                ..FakeProvider::default()
            },
            t(100),
        );

        let out = h
            .service
            .get_range(request(0, Some(5), Periodicity::Hour))
            .await
            .unwrap();

        assert!(out.bars.is_empty());
        assert!(h.coverage.coverage(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_write_failure_degrades_without_coverage() {
        let backing = Arc::new(InMemoryStore::new());
        let coverage = Arc::new(CoverageTracker::new(backing.clone()));
        let service = PriceService::new(
            Arc::new(ReadOnlyStore(InMemoryStore::new())),
            Arc::clone(&coverage),
            Arc::new(FakeProvider::default()),
            Arc::new(FixedClock(t(100))),
            PriceServiceConfig::default(),
        );

        let out = service
            .get_range(request(0, Some(5), Periodicity::Hour))
            .await
            .unwrap();

        assert!(out.degraded);
        assert!(coverage.coverage(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let h = harness(FakeProvider::default(), t(100));

        let err = h
            .service
            .get_range(request(5, Some(5), Periodicity::Hour))
            .await
            .unwrap_err();

        assert!(matches!(err, PriceServiceError::InvalidRange { .. }));
        assert!(h.provider.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_end_defaults_to_one_minute_ago() {
        let now = t(10) + TimeDelta::minutes(30);
        let h = harness(FakeProvider::default(), now);

        h.service
            .get_range(request(8, None, Periodicity::Hour))
            .await
            .unwrap();

        assert_eq!(
            h.provider.calls.lock().as_slice(),
            &[TimeRange::new(t(8), now - TimeDelta::minutes(1))]
        );
    }

    #[tokio::test]
    async fn fresh_cached_bar_skips_upstream() {
        let h = harness(FakeProvider::default(), t(11));
        h.store.append(&[bar(10, 150)]).await.unwrap();

        let current = h.service.get_current(&key()).await.unwrap().unwrap();

        assert_eq!(current.close, Decimal::from(150));
        assert_eq!(*h.provider.latest_calls.lock(), 0);
    }

    #[tokio::test]
    async fn bar_exactly_at_freshness_limit_is_refreshed() {
        let h = harness(
            FakeProvider {
                latest: Some(bar(12, 160)),
                ..FakeProvider::default()
            },
            t(12),
        );
        h.store.append(&[bar(10, 150)]).await.unwrap();

        let current = h.service.get_current(&key()).await.unwrap().unwrap();

        assert_eq!(current.close, Decimal::from(160));
        assert_eq!(*h.provider.latest_calls.lock(), 1);
    }

    #[tokio::test]
    async fn stale_cached_bar_is_refreshed_from_upstream() {
        let h = harness(
            FakeProvider {
                latest: Some(bar(20, 175)),
                ..FakeProvider::default()
            },
            t(21),
        );
        h.store.append(&[bar(10, 150)]).await.unwrap();

        let current = h.service.get_current(&key()).await.unwrap().unwrap();

        assert_eq!(current.close, Decimal::from(175));
        assert_eq!(*h.provider.latest_calls.lock(), 1);
    }

    #[tokio::test]
    async fn upstream_error_falls_back_to_stale_bar() {
        let h = harness(
            FakeProvider {
                fail: true,
                ..FakeProvider::default()
            },
            t(21),
        );
        h.store.append(&[bar(10, 150)]).await.unwrap();

        let current = h.service.get_current(&key()).await.unwrap().unwrap();

        assert_eq!(current.timestamp, t(10));
    }

    #[tokio::test]
    async fn no_data_anywhere_is_absent() {
        let h = harness(FakeProvider::default(), t(21));

        assert!(h.service.get_current(&key()).await.unwrap().is_none());
    }
}
