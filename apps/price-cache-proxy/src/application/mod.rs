//! Application Layer - Use cases and port definitions.
//!
//! Services here compose the domain with the outside world through the
//! port traits; adapters live in the infrastructure layer.

/// Port interfaces for storage, upstream data and live subscriptions.
pub mod ports;

/// Range query orchestration, coverage tracking and live dispatch.
pub mod services;
