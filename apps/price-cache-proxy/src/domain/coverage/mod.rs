//! Coverage Tracking
//!
//! Bookkeeping of which half-open time ranges are already cached for one
//! instrument key, and the gap computation that decides what still has to
//! be fetched from upstream.
//!
//! # Invariants
//!
//! A [`CoverageSet`] is always sorted by start, pairwise disjoint and
//! minimal: no two stored intervals overlap or touch. Merging a range that
//! overlaps or abuts existing intervals coalesces them into one.

use serde::{Deserialize, Serialize};

use crate::domain::market::TimeRange;

/// Sorted, disjoint, non-touching set of cached intervals for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSet {
    intervals: Vec<TimeRange>,
}

impl CoverageSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// Build a set from arbitrary intervals, coalescing as needed.
    ///
    /// Stored rows are trusted to be normalized already, but this keeps the
    /// invariant even when they are not.
    #[must_use]
    pub fn from_intervals(intervals: impl IntoIterator<Item = TimeRange>) -> Self {
        let mut set = Self::new();
        for interval in intervals {
            set.merge(interval);
        }
        set
    }

    /// Stored intervals in ascending order.
    #[must_use]
    pub fn intervals(&self) -> &[TimeRange] {
        &self.intervals
    }

    /// Number of stored intervals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Whether `range` is entirely covered.
    #[must_use]
    pub fn covers(&self, range: &TimeRange) -> bool {
        range.is_empty() || self.intervals.iter().any(|iv| iv.contains(range))
    }

    /// Uncovered sub-ranges of `request`, ascending and disjoint.
    ///
    /// An empty or inverted request yields no gaps.
    #[must_use]
    pub fn gaps(&self, request: &TimeRange) -> Vec<TimeRange> {
        compute_gaps(&self.intervals, request)
    }

    /// Merge `range` into the set, coalescing overlapping or touching
    /// intervals.
    ///
    /// Returns `true` when the set changed. Empty ranges are ignored.
    pub fn merge(&mut self, range: TimeRange) -> bool {
        if range.is_empty() || self.covers(&range) {
            return false;
        }

        let mut merged = range;
        self.intervals.retain(|existing| {
            if existing.touches(&merged) {
                merged.start = merged.start.min(existing.start);
                merged.end = merged.end.max(existing.end);
                false
            } else {
                true
            }
        });

        let position = self
            .intervals
            .partition_point(|existing| existing.start < merged.start);
        self.intervals.insert(position, merged);
        true
    }
}

/// Compute the uncovered parts of `request` given cached `intervals`.
///
/// Only intervals that strictly intersect the request are considered. The
/// input does not need to be sorted or disjoint.
#[must_use]
pub fn compute_gaps(intervals: &[TimeRange], request: &TimeRange) -> Vec<TimeRange> {
    if request.is_empty() {
        return Vec::new();
    }

    let mut relevant: Vec<&TimeRange> = intervals
        .iter()
        .filter(|iv| iv.intersects(request))
        .collect();

    if relevant.is_empty() {
        return vec![*request];
    }

    relevant.sort_by_key(|iv| iv.start);

    let mut gaps = Vec::new();
    let mut cursor = request.start;

    for interval in relevant {
        if interval.start > cursor {
            gaps.push(TimeRange::new(cursor, interval.start));
        }
        cursor = cursor.max(interval.end);
    }

    if cursor < request.end {
        gaps.push(TimeRange::new(cursor, request.end));
    }

    gaps
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use proptest::prelude::*;

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::hours(hours)
    }

    fn r(start: i64, end: i64) -> TimeRange {
        TimeRange::new(t(start), t(end))
    }

    fn covered(ranges: &[(i64, i64)]) -> CoverageSet {
        CoverageSet::from_intervals(ranges.iter().map(|&(s, e)| r(s, e)))
    }

    #[test]
    fn gaps_around_single_interval() {
        let set = covered(&[(10, 20)]);
        assert_eq!(set.gaps(&r(5, 25)), vec![r(5, 10), r(20, 25)]);
    }

    #[test]
    fn fully_covered_request_has_no_gaps() {
        let set = covered(&[(10, 20)]);
        assert!(set.gaps(&r(12, 18)).is_empty());
        assert!(set.gaps(&r(10, 20)).is_empty());
    }

    #[test]
    fn disjoint_request_is_one_gap() {
        let set = covered(&[(10, 20)]);
        assert_eq!(set.gaps(&r(25, 30)), vec![r(25, 30)]);
    }

    #[test]
    fn adjacent_request_is_one_gap() {
        let set = covered(&[(10, 20)]);
        assert_eq!(set.gaps(&r(20, 30)), vec![r(20, 30)]);
        assert_eq!(set.gaps(&r(0, 10)), vec![r(0, 10)]);
    }

    #[test]
    fn gaps_between_multiple_intervals() {
        let set = covered(&[(0, 5), (10, 15), (20, 25)]);
        assert_eq!(set.gaps(&r(3, 22)), vec![r(5, 10), r(15, 20)]);
    }

    #[test]
    fn empty_set_returns_whole_request() {
        let set = CoverageSet::new();
        assert_eq!(set.gaps(&r(1, 2)), vec![r(1, 2)]);
    }

    #[test]
    fn inverted_or_empty_request_has_no_gaps() {
        let set = CoverageSet::new();
        assert!(set.gaps(&r(5, 5)).is_empty());
        assert!(set.gaps(&r(6, 5)).is_empty());
    }

    #[test]
    fn compute_gaps_tolerates_unsorted_overlapping_input() {
        let gaps = compute_gaps(&[r(12, 18), r(0, 6), r(4, 8)], &r(0, 20));
        assert_eq!(gaps, vec![r(8, 12), r(18, 20)]);
    }

    #[test]
    fn merge_coalesces_touching_and_overlapping() {
        let mut set = covered(&[(0, 10)]);
        set.merge(r(10, 20));
        assert_eq!(set.intervals(), &[r(0, 20)]);

        set.merge(r(5, 25));
        assert_eq!(set.intervals(), &[r(0, 25)]);
    }

    #[test]
    fn merge_bridges_several_intervals() {
        let mut set = covered(&[(0, 2), (4, 6), (8, 10), (20, 30)]);
        set.merge(r(1, 9));
        assert_eq!(set.intervals(), &[r(0, 10), r(20, 30)]);
    }

    #[test]
    fn merge_keeps_separate_intervals_sorted() {
        let mut set = covered(&[(20, 30)]);
        set.merge(r(0, 5));
        set.merge(r(40, 50));
        set.merge(r(10, 12));
        assert_eq!(set.intervals(), &[r(0, 5), r(10, 12), r(20, 30), r(40, 50)]);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = covered(&[(0, 3)]);
        assert!(once.merge(r(5, 10)));
        let mut twice = once.clone();
        assert!(!twice.merge(r(5, 10)));
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_ignores_empty_range() {
        let mut set = CoverageSet::new();
        assert!(!set.merge(r(3, 3)));
        assert!(set.is_empty());
    }

    #[test]
    fn merge_then_gaps_is_empty_for_merged_range() {
        let mut set = covered(&[(10, 20)]);
        set.merge(r(5, 25));
        assert!(set.gaps(&r(5, 25)).is_empty());
        assert_eq!(set.len(), 1);
    }

    fn assert_normalized(set: &CoverageSet) {
        for interval in set.intervals() {
            assert!(!interval.is_empty());
        }
        for pair in set.intervals().windows(2) {
            assert!(pair[0].end < pair[1].start, "touching or overlapping: {pair:?}");
        }
    }

    proptest! {
        #[test]
        fn merges_keep_set_sorted_disjoint_and_minimal(
            ranges in prop::collection::vec((0i64..200, 1i64..30), 0..40)
        ) {
            let mut set = CoverageSet::new();
            for (start, len) in ranges {
                set.merge(r(start, start + len));
                assert_normalized(&set);
            }
        }

        #[test]
        fn merge_order_does_not_matter(
            ranges in prop::collection::vec((0i64..200, 1i64..30), 0..20)
        ) {
            let forward = CoverageSet::from_intervals(ranges.iter().map(|&(s, l)| r(s, s + l)));
            let backward = CoverageSet::from_intervals(ranges.iter().rev().map(|&(s, l)| r(s, s + l)));
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn gaps_partition_the_uncovered_request(
            ranges in prop::collection::vec((0i64..200, 1i64..30), 0..20),
            req_start in 0i64..220,
            req_len in 1i64..60,
        ) {
            let set = CoverageSet::from_intervals(ranges.iter().map(|&(s, l)| r(s, s + l)));
            let request = r(req_start, req_start + req_len);
            let gaps = set.gaps(&request);

            for gap in &gaps {
                prop_assert!(!gap.is_empty());
                prop_assert!(request.contains(gap));
                prop_assert!(set.intervals().iter().all(|iv| !iv.intersects(gap)));
            }
            for pair in gaps.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }

            let gap_total: TimeDelta = gaps.iter().map(TimeRange::duration).sum();
            let covered_total: TimeDelta = set
                .intervals()
                .iter()
                .map(|iv| TimeRange::new(iv.start.max(request.start), iv.end.min(request.end)).duration())
                .sum();
            prop_assert_eq!(gap_total + covered_total, request.duration());

            let mut filled = set.clone();
            filled.merge(request);
            prop_assert!(filled.gaps(&request).is_empty());
        }
    }
}
