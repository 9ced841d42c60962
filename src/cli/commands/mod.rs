//! CLI command implementations

pub mod migrate;
