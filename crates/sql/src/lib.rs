#![allow(clippy::result_large_err)]
//! testbed-sql: relational table management for testbed.
//!
//! [`RelationalTableManager`] creates, loads and drops tables by issuing SQL
//! through a [`QueryExecutor`]. [`MemoryServer`] is an in-memory executor
//! backend that understands the statements the manager issues, for tests
//! and demos.

pub mod definition;
pub mod loader;
pub mod manager;
pub mod memory;
pub mod query;

// ── Convenience re-exports ───────────────────────────────────────────

pub use definition::{RelationalDefinitionBuilder, RELATIONAL_DEFINITION_KIND};
pub use loader::{InsertLoader, BATCH_ROWS, ROWS_PER_INSERT};
pub use manager::{memory_registry, register_relational, RelationalTableManager, RELATIONAL_TYPE_TAG};
pub use memory::{LoggedStatement, MemoryConnection, MemoryServer};
pub use query::{QueryError, QueryExecutor, QueryResult};
