//! Periodicity Aggregation
//!
//! Resamples base-granularity bars into coarser buckets. Buckets are keyed
//! by the truncated bar timestamp; a week starts Sunday 00:00 UTC and a
//! month on the 1st at 00:00 UTC.

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeDelta, Timelike, Utc};

use crate::domain::market::{AggregatedBar, Bar, Periodicity};

/// Start of the bucket that `timestamp` falls into for `periodicity`.
#[must_use]
pub fn bucket_start(timestamp: DateTime<Utc>, periodicity: Periodicity) -> DateTime<Utc> {
    let date = timestamp.date_naive();
    let midnight = date.and_time(NaiveTime::MIN).and_utc();

    match periodicity {
        Periodicity::Minute => {
            midnight
                + TimeDelta::hours(i64::from(timestamp.hour()))
                + TimeDelta::minutes(i64::from(timestamp.minute()))
        }
        Periodicity::Hour => midnight + TimeDelta::hours(i64::from(timestamp.hour())),
        Periodicity::Day => midnight,
        Periodicity::Week => {
            let back = u64::from(date.weekday().num_days_from_sunday());
            (date - Days::new(back)).and_time(NaiveTime::MIN).and_utc()
        }
        Periodicity::Month => {
            let back = u64::from(date.day0());
            (date - Days::new(back)).and_time(NaiveTime::MIN).and_utc()
        }
    }
}

/// Resample `bars` into `periodicity` buckets, ascending by bucket start.
///
/// Within a bucket the open comes from the first bar, the close from the
/// last, and high/low are the extremes. When `periodicity` is at or below
/// the base granularity the bars are returned sorted and otherwise
/// untouched.
#[must_use]
pub fn resample(bars: &[Bar], periodicity: Periodicity) -> Vec<AggregatedBar> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|bar| bar.timestamp);

    if periodicity.is_base_or_finer() {
        return sorted.into_iter().cloned().map(AggregatedBar::from).collect();
    }

    let mut buckets: Vec<AggregatedBar> = Vec::new();

    for bar in sorted {
        let bucket = bucket_start(bar.timestamp, periodicity);

        match buckets.last_mut() {
            Some(current) if current.timestamp == bucket => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
            }
            _ => buckets.push(AggregatedBar {
                instrument_id: bar.instrument_id,
                provider: bar.provider.clone(),
                timestamp: bucket,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
            }),
        }
    }

    buckets
}

// =============================================================================
// Tests
// =============================================================================
