//! Relationship model for the SDK

use super::enums::{Cardinality, CrossFilterBehavior};
use serde::{Deserialize, Serialize};

/// Directed relationship between two table columns
///
/// The "from" side is the many side by default; the "to" side is always one.
///
/// # Example
///
/// ```rust
/// use bi_migration_sdk::models::{CrossFilterBehavior, Relationship};
///
/// let rel = Relationship::new("Orders", "Customer ID", "Customers", "ID");
/// assert!(rel.is_active);
/// assert_eq!(rel.cross_filter_behavior, CrossFilterBehavior::OneDirection);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub cross_filter_behavior: CrossFilterBehavior,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Relationship {
    pub fn new(from_table: &str, from_column: &str, to_table: &str, to_column: &str) -> Self {
        Self {
            from_table: from_table.to_string(),
            from_column: from_column.to_string(),
            to_table: to_table.to_string(),
            to_column: to_column.to_string(),
            cardinality: Cardinality::Many,
            cross_filter_behavior: CrossFilterBehavior::OneDirection,
            is_active: true,
        }
    }

    /// Identity used to suppress exact duplicates
    pub fn key(&self) -> (String, String, String, String) {
        (
            self.from_table.clone(),
            self.from_column.clone(),
            self.to_table.clone(),
            self.to_column.clone(),
        )
    }
}
