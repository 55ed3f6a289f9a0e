//! Market Data Types
//!
//! Instrument identity, OHLC bars and the periodicities the cache can serve.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identity
// =============================================================================

/// Upstream identifier of a tradable instrument.
pub type InstrumentId = Uuid;

/// Name of the upstream data provider (e.g. `"oanda"`, `"simulation"`).
pub type Provider = String;

/// Cache key: bars and coverage are tracked per instrument and provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentKey {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Data provider name.
    pub provider: Provider,
}

impl InstrumentKey {
    /// Create a new key.
    #[must_use]
    pub fn new(instrument_id: InstrumentId, provider: impl Into<Provider>) -> Self {
        Self {
            instrument_id,
            provider: provider.into(),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.instrument_id, self.provider)
    }
}

// =============================================================================
// Periodicity
// =============================================================================

/// Bar periodicity, ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Periodicity {
    /// One-minute bars.
    Minute,
    /// One-hour bars.
    Hour,
    /// Daily bars (UTC midnight).
    Day,
    /// Weekly bars starting Sunday 00:00 UTC.
    Week,
    /// Monthly bars starting on the 1st at 00:00 UTC.
    Month,
}

/// Granularity at which bars are fetched from upstream and stored.
pub const BASE_PERIODICITY: Periodicity = Periodicity::Hour;

impl Periodicity {
    /// Wire name used by the upstream API and the query surface.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Whether bars stored at [`BASE_PERIODICITY`] already satisfy this
    /// periodicity without bucketing.
    #[must_use]
    pub fn is_base_or_finer(self) -> bool {
        self <= BASE_PERIODICITY
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a periodicity name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown periodicity: {0}")]
pub struct UnknownPeriodicity(pub String);

impl FromStr for Periodicity {
    type Err = UnknownPeriodicity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => Err(UnknownPeriodicity(s.to_string())),
        }
    }
}

// =============================================================================
// Time Range
// =============================================================================

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range. No ordering check is performed; see [`Self::is_empty`].
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True when the range contains no instant (`start >= end`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Length of the range, zero when empty.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        if self.is_empty() {
            TimeDelta::zero()
        } else {
            self.end - self.start
        }
    }

    /// Strict overlap: shares at least one instant with `other`.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlapping or touching end-to-start.
    #[must_use]
    pub fn touches(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Whether `other` lies entirely inside this range.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// =============================================================================
// Bars
// =============================================================================

/// OHLC bar at the base fetch granularity.
///
/// `(instrument_id, provider, timestamp)` identifies a bar uniquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Data provider name.
    pub provider: Provider,
    /// Bar open time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
}

impl Bar {
    /// Cache key this bar belongs to.
    #[must_use]
    pub fn key(&self) -> InstrumentKey {
        InstrumentKey::new(self.instrument_id, self.provider.clone())
    }
}

/// Bar resampled into a periodicity bucket. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBar {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Data provider name.
    pub provider: Provider,
    /// Bucket start (UTC).
    pub timestamp: DateTime<Utc>,
    /// Open of the first bar in the bucket.
    pub open: Decimal,
    /// Highest high in the bucket.
    pub high: Decimal,
    /// Lowest low in the bucket.
    pub low: Decimal,
    /// Close of the last bar in the bucket.
    pub close: Decimal,
}

impl From<Bar> for AggregatedBar {
    fn from(bar: Bar) -> Self {
        Self {
            instrument_id: bar.instrument_id,
            provider: bar.provider,
            timestamp: bar.timestamp,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn periodicity_parses_case_insensitively() {
        assert_eq!("hour".parse::<Periodicity>(), Ok(Periodicity::Hour));
        assert_eq!("WEEK".parse::<Periodicity>(), Ok(Periodicity::Week));
        assert_eq!("Month".parse::<Periodicity>(), Ok(Periodicity::Month));
        assert!("fortnight".parse::<Periodicity>().is_err());
    }

    #[test]
    fn periodicity_ordering_follows_granularity() {
        assert!(Periodicity::Minute < Periodicity::Hour);
        assert!(Periodicity::Day < Periodicity::Week);
        assert!(Periodicity::Minute.is_base_or_finer());
        assert!(Periodicity::Hour.is_base_or_finer());
        assert!(!Periodicity::Day.is_base_or_finer());
    }

    #[test]
    fn periodicity_serializes_lowercase() {
        let json = serde_json::to_string(&Periodicity::Day).unwrap();
        assert_eq!(json, "\"day\"");
    }

    #[test]
    fn time_range_empty_and_duration() {
        assert!(TimeRange::new(at(5), at(5)).is_empty());
        assert!(TimeRange::new(at(6), at(5)).is_empty());
        assert_eq!(TimeRange::new(at(6), at(5)).duration(), TimeDelta::zero());
        assert_eq!(TimeRange::new(at(1), at(4)).duration(), TimeDelta::hours(3));
    }

    #[test]
    fn adjacent_ranges_touch_but_do_not_intersect() {
        let a = TimeRange::new(at(0), at(10));
        let b = TimeRange::new(at(10), at(20));
        assert!(!a.intersects(&b));
        assert!(a.touches(&b));
        assert!(TimeRange::new(at(0), at(20)).contains(&b));
    }

    #[test]
    fn instrument_key_display() {
        let key = InstrumentKey::new(Uuid::nil(), "oanda");
        assert_eq!(key.to_string(), "00000000-0000-0000-0000-000000000000@oanda");
    }
}
