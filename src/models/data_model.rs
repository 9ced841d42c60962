//! SemanticModel for the SDK

use super::relationship::Relationship;
use super::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Semantic model handed to the template-rendering collaborator
///
/// A `SemanticModel` is the final `{tables, relationships}` structure produced for one
/// workbook.
///
/// # Example
///
/// ```rust
/// use bi_migration_sdk::models::{SemanticModel, Table};
///
/// let mut model = SemanticModel::new("Superstore".to_string());
/// model.tables.push(Table::new("Orders".to_string()));
/// assert!(model.table("orders").is_some());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticModel {
    /// Model name, usually the workbook name
    pub name: String,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    pub created_at: DateTime<Utc>,
}

impl SemanticModel {
    pub fn new(name: String) -> Self {
        Self {
            name,
            tables: Vec::new(),
            relationships: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Look up a table by case-insensitive name
    pub fn table(&self, name: &str) -> Option<&Table> {
        let key = name.to_lowercase();
        self.tables
            .iter()
            .find(|t| t.source_name.to_lowercase() == key)
    }

    /// Lower-cased names of every table
    pub fn table_names(&self) -> HashSet<String> {
        self.tables
            .iter()
            .map(|t| t.source_name.to_lowercase())
            .collect()
    }
}
