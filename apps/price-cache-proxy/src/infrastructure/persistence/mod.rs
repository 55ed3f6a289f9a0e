//! Persistence Adapters
//!
//! Implementations of [`BarStore`](crate::application::ports::BarStore) and
//! [`CoverageStore`](crate::application::ports::CoverageStore).
//!
//! - `InMemoryStore`: process-local maps, used for tests and ephemeral runs
//! - `SqliteStore`: durable storage through `sqlx`

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
