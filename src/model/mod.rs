//! Model persistence
//!
//! Storage for state that outlives one migration run. Today that is the calculation
//! record store shared by successive runs against one output directory.

pub mod store;

pub use store::{CalculationDocument, CalculationStore, JsonFileStore, MemoryStore, StoreError};
