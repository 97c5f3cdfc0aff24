//! Storage layer for outflow
//!
//! Per-entity store traits with two backends: PostgreSQL (sqlx) for
//! production and an in-memory implementation with identical semantics for
//! deterministic tests. Safety under concurrent workers comes from
//! conditional row-level claims (leases), not process-wide locks.

mod error;
mod memory;
mod pg;
mod traits;
mod types;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use pg::PgStorage;
pub use traits::*;
pub use types::*;
