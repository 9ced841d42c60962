//! Table model for the SDK

use super::column::{Column, Measure};
use super::partition::Partition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Namespace for deterministic lineage tags (UUIDv5)
const LINEAGE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d4e_8a3b_4c5d_9e0f_1a2b_3c4d_5e6f);

/// One level of a drill-down hierarchy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyLevel {
    pub name: String,
    /// Name of the column the level is built on
    pub column: String,
}

/// Ordered drill-down path over columns of one table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hierarchy {
    pub name: String,
    pub levels: Vec<HierarchyLevel>,
}

/// Table model representing one logical table of the target semantic model
///
/// `source_name` is the identity key. Before deduplication several tables may share a
/// name; afterwards it is unique across the model.
///
/// # Example
///
/// ```rust
/// use bi_migration_sdk::models::{Column, DataType, Table};
///
/// let mut table = Table::new("Orders".to_string());
/// table.add_column(Column::new("Order ID".to_string(), DataType::Int64));
/// table.add_column(Column::new("order id".to_string(), DataType::String));
///
/// assert_eq!(table.columns[1].source_name, "order id_1");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub source_name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub hierarchies: Vec<Hierarchy>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
    /// Deterministic lineage tag, assigned once the model is final
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage_tag: Option<Uuid>,
}

impl Table {
    /// Create an empty table with the given name
    pub fn new(source_name: String) -> Self {
        Self {
            source_name,
            ..Default::default()
        }
    }

    /// Whether the table carries nothing worth emitting
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.measures.is_empty() && self.partitions.is_empty()
    }

    /// Lower-cased names of every column and measure
    pub fn member_names(&self) -> HashSet<String> {
        self.columns
            .iter()
            .map(Column::key)
            .chain(self.measures.iter().map(Measure::key))
            .collect()
    }

    /// Lower-cased column names, the input of similarity checks
    pub fn column_name_set(&self) -> HashSet<String> {
        self.columns.iter().map(Column::key).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.columns.iter().any(|c| c.key() == key)
    }

    /// Number of columns plus measures, used to rank merge candidates
    pub fn weight(&self) -> usize {
        self.columns.len() + self.measures.len()
    }

    /// Add a column, suffixing its name (`_1`, `_2`, ...) when it collides with an
    /// existing column or measure name.
    pub fn add_column(&mut self, mut column: Column) {
        let taken = self.member_names();
        column.source_name = unique_name(&column.source_name, &taken);
        self.columns.push(column);
    }

    /// Add a measure, suffixing its name on collision like [`Table::add_column`]
    pub fn add_measure(&mut self, mut measure: Measure) {
        let taken = self.member_names();
        measure.source_name = unique_name(&measure.source_name, &taken);
        self.measures.push(measure);
    }

    /// Deterministic UUIDv5 derived from a table (and optionally column) name
    pub fn generate_lineage_tag(table_name: &str, column_name: Option<&str>) -> Uuid {
        let key = match column_name {
            Some(column) => format!("{}[{}]", table_name.to_lowercase(), column.to_lowercase()),
            None => table_name.to_lowercase(),
        };
        Uuid::new_v5(&LINEAGE_NAMESPACE, key.as_bytes())
    }

    /// Assign lineage tags to the table and all of its columns
    pub fn assign_lineage_tags(&mut self) {
        self.lineage_tag = Some(Self::generate_lineage_tag(&self.source_name, None));
        for column in &mut self.columns {
            column.lineage_tag = Some(Self::generate_lineage_tag(
                &self.source_name,
                Some(&column.source_name),
            ));
        }
    }
}

/// Return `name`, or `name_1`, `name_2`, ... whichever is first absent from `taken`.
///
/// `taken` holds lower-cased names.
pub fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&name.to_lowercase()) {
        return name.to_string();
    }
    let mut suffix = 1;
    loop {
        let candidate = format!("{}_{}", name, suffix);
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;

    #[test]
    fn unique_name_skips_taken_suffixes() {
        let taken: HashSet<String> = ["orders", "orders_1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_name("Orders", &taken), "Orders_2");
        assert_eq!(unique_name("Customers", &taken), "Customers");
    }

    #[test]
    fn empty_table_detection() {
        let mut table = Table::new("t".to_string());
        assert!(table.is_empty());
        table.add_column(Column::new("a".to_string(), DataType::String));
        assert!(!table.is_empty());
    }

    #[test]
    fn lineage_tags_are_deterministic() {
        let a = Table::generate_lineage_tag("Orders", Some("ID"));
        let b = Table::generate_lineage_tag("orders", Some("id"));
        assert_eq!(a, b);
        assert_ne!(a, Table::generate_lineage_tag("Orders", None));
    }
}
