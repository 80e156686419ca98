//! Execution persistence boundary.
//!
//! The registry persists whole `Execution` records through this narrow
//! interface; the storage engine is a deployment choice.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryExecutionStore;
pub use postgres::PostgresExecutionStore;
pub use r#trait::{ExecutionStore, StoreError};
