//! Storage layer: case/movement contracts, in-memory store, DuckDB store.

mod error;
mod memory;
mod repo;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use repo::{CaseChangeset, CaseStore, MovementStore, NewMovement, ReconcileStore};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
