//! SQLite storage layer
//!
//! Two logical tables: `turns` and `llm_calls`, keyed by opaque string ids.
//! The store is the only mutable shared resource in the system; every write
//! is a single-row insert or update, so atomic single-statement commits are
//! all the coordination it needs.

pub mod repo;
pub mod schema;

pub use repo::Database;
