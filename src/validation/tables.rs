//! Table validation functionality
//!
//! Checks the invariants a finished table set must hold: unique table names, unique
//! member names within each table, and calculated members that carry an internal
//! identifier distinct from their display name.

use crate::models::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of table validation.
#[derive(Debug, Default, Serialize, Deserialize)]
#[must_use = "validation results should be checked for conflicts and violations"]
pub struct TableValidationResult {
    /// Tables sharing a case-insensitive name
    pub naming_conflicts: Vec<NamingConflict>,
    /// Member-level violations
    pub member_violations: Vec<MemberViolation>,
}

impl TableValidationResult {
    pub fn is_valid(&self) -> bool {
        self.naming_conflicts.is_empty() && self.member_violations.is_empty()
    }
}

/// Two tables with the same case-insensitive name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingConflict {
    pub table_name: String,
    pub existing_table_name: String,
}

/// A column or measure that breaks a table invariant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberViolation {
    pub table_name: String,
    pub member_name: String,
    pub message: String,
}

/// Table validator
#[derive(Default)]
pub struct TableValidator;

impl TableValidator {
    /// Create a new table validator
    ///
    /// # Example
    ///
    /// ```rust
    /// use bi_migration_sdk::validation::tables::TableValidator;
    ///
    /// let validator = TableValidator::new();
    /// ```
    pub fn new() -> Self {
        Self
    }

    /// Detect tables whose names collide case-insensitively
    ///
    /// # Example
    ///
    /// ```rust
    /// use bi_migration_sdk::validation::tables::TableValidator;
    /// use bi_migration_sdk::models::Table;
    ///
    /// let tables = vec![Table::new("Orders".to_string()), Table::new("orders".to_string())];
    /// let conflicts = TableValidator::new().detect_duplicate_names(&tables);
    /// assert_eq!(conflicts.len(), 1);
    /// ```
    pub fn detect_duplicate_names(&self, tables: &[Table]) -> Vec<NamingConflict> {
        let mut seen: HashMap<String, &Table> = HashMap::new();
        let mut conflicts = Vec::new();
        for table in tables {
            let key = table.source_name.to_lowercase();
            match seen.get(&key) {
                Some(existing) => conflicts.push(NamingConflict {
                    table_name: table.source_name.clone(),
                    existing_table_name: existing.source_name.clone(),
                }),
                None => {
                    seen.insert(key, table);
                }
            }
        }
        conflicts
    }

    /// Detect duplicate member names and calculated members without a usable identifier
    pub fn detect_member_violations(&self, tables: &[Table]) -> Vec<MemberViolation> {
        let mut violations = Vec::new();
        for table in tables {
            let mut names: HashMap<String, usize> = HashMap::new();
            for name in table
                .columns
                .iter()
                .map(|c| c.key())
                .chain(table.measures.iter().map(|m| m.key()))
            {
                *names.entry(name).or_default() += 1;
            }
            let mut duplicated: Vec<_> = names.into_iter().filter(|(_, n)| *n > 1).collect();
            duplicated.sort();
            for (name, count) in duplicated {
                violations.push(MemberViolation {
                    table_name: table.source_name.clone(),
                    member_name: name,
                    message: format!("Name used by {} members", count),
                });
            }

            for column in table.columns.iter().filter(|c| c.is_calculated) {
                let valid = column
                    .tableau_name
                    .as_deref()
                    .is_some_and(|id| !id.is_empty() && id != column.source_name);
                if !valid {
                    violations.push(MemberViolation {
                        table_name: table.source_name.clone(),
                        member_name: column.source_name.clone(),
                        message: "Calculated column without a distinct identifier".to_string(),
                    });
                }
            }
            for measure in &table.measures {
                if measure.tableau_name.is_empty() || measure.tableau_name == measure.source_name {
                    violations.push(MemberViolation {
                        table_name: table.source_name.clone(),
                        member_name: measure.source_name.clone(),
                        message: "Measure without a distinct identifier".to_string(),
                    });
                }
            }
        }
        violations
    }

    /// Run every table check
    pub fn validate(&self, tables: &[Table]) -> TableValidationResult {
        TableValidationResult {
            naming_conflicts: self.detect_duplicate_names(tables),
            member_violations: self.detect_member_violations(tables),
        }
    }
}
