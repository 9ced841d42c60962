//! Conversion module
//!
//! Turns the logical tables produced by the import layer into a finished semantic
//! model: table and partition deduplication, formula translation, calculation reference
//! resolution and the end-to-end workbook pipeline.

pub mod calculations;
pub mod dedup;
pub mod migrator;
pub mod translation;

pub use calculations::{CalculationResolver, Resolution, ResolutionState};
pub use dedup::{TableDeduplicator, TableRenames, deduplicate_partitions, jaccard};
pub use migrator::WorkbookMigrator;
pub use translation::{
    ExpressionTranslator, IdentityTranslator, RetryPolicy, TranslationClient, TranslationError,
    TranslationKind, TranslationRequest, TranslationResponse,
};

use crate::config::ConfigError;
use crate::import::ImportError;
use crate::model::store::StoreError;

/// Fatal error of a migration run
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}
