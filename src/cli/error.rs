//! CLI-specific error types

use crate::config::ConfigError;
use crate::convert::MigrationError;
use crate::import::ImportError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read file {0}: {1}")]
    FileReadError(PathBuf, String),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("Import error: {0}")]
    ImportError(#[from] ImportError),

    #[error("Migration error: {0}")]
    MigrationError(#[from] MigrationError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
