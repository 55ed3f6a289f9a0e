//! Domain Layer - Core caching and distribution logic.
//!
//! Pure types and algorithms with no I/O. Everything here is synchronous
//! and can be exercised directly from unit tests.

/// Market data types (instruments, bars, periodicities, ranges).
pub mod market;

/// Cached time-range bookkeeping and gap computation.
pub mod coverage;

/// Resampling of base bars into coarser periodicities.
pub mod aggregation;

/// Live subscription tracking between connections and instruments.
pub mod subscription;

/// Instrument catalog entries.
pub mod asset;
