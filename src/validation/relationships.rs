//! Relationship validation functionality
//!
//! Two passes run over the relationships of a finished model:
//!
//! - referential integrity: both endpoint tables must exist. A missing endpoint is either
//!   synthesized as a stub table or the relationship is discarded.
//! - ambiguity: the target model allows one active filter path between two tables, so a
//!   relationship that closes an undirected cycle (or loops back to its own table) is
//!   marked inactive. Relationships are processed in input order; earlier ones stay active.

use crate::models::{Column, DataType, Relationship, Table};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Description given to synthesized endpoint tables
pub const STUB_TABLE_DESCRIPTION: &str = "Stub table for relationship endpoint";

/// Result of relationship validation.
#[derive(Debug, Default, Serialize, Deserialize)]
#[must_use = "validation results should be checked for missing endpoints and ambiguous paths"]
pub struct RelationshipValidationResult {
    /// Endpoint table names that do not exist in the table set
    pub missing_endpoints: Vec<MissingEndpoint>,
    /// Active relationships that close a cycle
    pub ambiguous_paths: Vec<AmbiguousPath>,
}

impl RelationshipValidationResult {
    pub fn is_valid(&self) -> bool {
        self.missing_endpoints.is_empty() && self.ambiguous_paths.is_empty()
    }
}

/// Relationship endpoint that names an unknown table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingEndpoint {
    pub relationship_index: usize,
    pub table_name: String,
}

/// Relationship whose tables were already connected by earlier active relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousPath {
    pub relationship_index: usize,
    pub from_table: String,
    pub to_table: String,
}

/// What referential integrity enforcement changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Names of synthesized stub tables
    pub stub_tables: Vec<String>,
    /// Relationships removed because an endpoint was missing
    pub discarded: Vec<Relationship>,
}

/// Relationship validator
#[derive(Default)]
pub struct RelationshipValidator;

impl RelationshipValidator {
    /// Create a new relationship validator
    ///
    /// # Example
    ///
    /// ```rust
    /// use bi_migration_sdk::validation::relationships::RelationshipValidator;
    ///
    /// let validator = RelationshipValidator::new();
    /// ```
    pub fn new() -> Self {
        Self
    }

    /// Report problems without changing anything
    pub fn validate(
        &self,
        tables: &[Table],
        relationships: &[Relationship],
    ) -> RelationshipValidationResult {
        let names = table_index(tables);
        let mut missing_endpoints = Vec::new();
        for (index, rel) in relationships.iter().enumerate() {
            for table in [&rel.from_table, &rel.to_table] {
                if !names.contains_key(&table.to_lowercase()) {
                    missing_endpoints.push(MissingEndpoint {
                        relationship_index: index,
                        table_name: table.clone(),
                    });
                }
            }
        }
        RelationshipValidationResult {
            missing_endpoints,
            ambiguous_paths: self.find_ambiguous_paths(relationships),
        }
    }

    /// Make every relationship point at existing tables
    ///
    /// Endpoint names are rewritten to the exact table name (and column name, when the
    /// table has it). With `synthesize_stubs` a missing endpoint becomes a stub table
    /// carrying the referenced columns; otherwise the relationship is dropped.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bi_migration_sdk::validation::relationships::RelationshipValidator;
    /// use bi_migration_sdk::models::{Relationship, Table};
    ///
    /// let mut tables = vec![Table::new("Orders".to_string())];
    /// let mut rels = vec![Relationship::new("orders", "CustomerId", "Customers", "Id")];
    ///
    /// let report = RelationshipValidator::new()
    ///     .enforce_referential_integrity(&mut tables, &mut rels, false);
    /// assert!(rels.is_empty());
    /// assert_eq!(report.discarded.len(), 1);
    /// ```
    pub fn enforce_referential_integrity(
        &self,
        tables: &mut Vec<Table>,
        relationships: &mut Vec<Relationship>,
        synthesize_stubs: bool,
    ) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut kept = Vec::with_capacity(relationships.len());

        for mut rel in relationships.drain(..) {
            let mut index = table_index(tables);
            let missing: Vec<(String, String)> = [
                (rel.from_table.clone(), rel.from_column.clone()),
                (rel.to_table.clone(), rel.to_column.clone()),
            ]
            .into_iter()
            .filter(|(t, _)| !index.contains_key(&t.to_lowercase()))
            .collect();

            if !missing.is_empty() {
                if !synthesize_stubs {
                    warn!(
                        "Discarding relationship {}.{} -> {}.{}: unknown table",
                        rel.from_table, rel.from_column, rel.to_table, rel.to_column
                    );
                    report.discarded.push(rel);
                    continue;
                }
                for (table_name, column_name) in missing {
                    let key = table_name.to_lowercase();
                    match index.get(&key) {
                        // both endpoints name the same missing table
                        Some(&i) => {
                            if !tables[i].has_column(&column_name) {
                                tables[i].add_column(Column::new(column_name, DataType::String));
                            }
                        }
                        None => {
                            info!("Synthesizing stub table '{}'", table_name);
                            let mut stub = Table::new(table_name.clone());
                            stub.description = Some(STUB_TABLE_DESCRIPTION.to_string());
                            stub.add_column(Column::new(column_name, DataType::String));
                            index.insert(key, tables.len());
                            tables.push(stub);
                            report.stub_tables.push(table_name);
                        }
                    }
                }
            }

            canonicalize_endpoint(tables, &index, &mut rel.from_table, &mut rel.from_column);
            canonicalize_endpoint(tables, &index, &mut rel.to_table, &mut rel.to_column);
            kept.push(rel);
        }

        *relationships = kept;
        report
    }

    /// Mark relationships that close an undirected cycle, or loop on one table, inactive.
    /// Returns the indices that were deactivated.
    pub fn deactivate_ambiguous_paths(&self, relationships: &mut [Relationship]) -> Vec<usize> {
        let ambiguous = self.find_ambiguous_paths(relationships);
        for path in &ambiguous {
            let rel = &mut relationships[path.relationship_index];
            debug!(
                "Deactivating relationship {}.{} -> {}.{}: tables already connected",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column
            );
            rel.is_active = false;
        }
        ambiguous.into_iter().map(|p| p.relationship_index).collect()
    }

    fn find_ambiguous_paths(&self, relationships: &[Relationship]) -> Vec<AmbiguousPath> {
        let mut nodes: HashMap<String, usize> = HashMap::new();
        for rel in relationships {
            for table in [&rel.from_table, &rel.to_table] {
                let next = nodes.len();
                nodes.entry(table.to_lowercase()).or_insert(next);
            }
        }

        let mut components = UnionFind::<usize>::new(nodes.len());
        let mut ambiguous = Vec::new();
        for (index, rel) in relationships.iter().enumerate() {
            if !rel.is_active {
                continue;
            }
            let from = nodes[&rel.from_table.to_lowercase()];
            let to = nodes[&rel.to_table.to_lowercase()];
            if from == to || !components.union(from, to) {
                ambiguous.push(AmbiguousPath {
                    relationship_index: index,
                    from_table: rel.from_table.clone(),
                    to_table: rel.to_table.clone(),
                });
            }
        }
        ambiguous
    }
}

/// Lower-cased table name to index
fn table_index(tables: &[Table]) -> HashMap<String, usize> {
    tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.source_name.to_lowercase(), i))
        .collect()
}

fn canonicalize_endpoint(
    tables: &[Table],
    index: &HashMap<String, usize>,
    table_name: &mut String,
    column_name: &mut String,
) {
    let Some(&i) = index.get(&table_name.to_lowercase()) else {
        return;
    };
    let table = &tables[i];
    *table_name = table.source_name.clone();
    let key = column_name.to_lowercase();
    match table.columns.iter().find(|c| c.key() == key) {
        Some(column) => *column_name = column.source_name.clone(),
        None => debug!("Column '{}' not found on table '{}'", column_name, table_name),
    }
}
