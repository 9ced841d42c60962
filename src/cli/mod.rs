//! Command-line front end (`cli` feature)

pub mod commands;
pub mod error;

pub use error::CliError;
