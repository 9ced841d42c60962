//! Validation functionality
//!
//! Provides validation logic for:
//! - Table validation (name uniqueness, member identifiers)
//! - Relationship validation (referential integrity, ambiguous filter paths)

pub mod relationships;
pub mod tables;

pub use relationships::{
    IntegrityReport, RelationshipValidationResult, RelationshipValidator,
};
pub use tables::{TableValidationResult, TableValidator};
