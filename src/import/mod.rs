//! Import functionality
//!
//! Reads workbook datasources into logical tables:
//! - Document tree and declarative attribute resolution
//! - Datasource classification by structural shape
//! - Column, measure and hierarchy extraction
//! - Table mapping per datasource category
//! - Partition and relationship extraction

pub mod attributes;
pub mod classifier;
pub mod columns;
pub mod connections;
pub mod datasource;
pub mod datatypes;
pub mod partitions;
pub mod relationships;
pub mod tables;
pub mod tree;

pub use attributes::{AttributeResolver, AttributeSpec, AttributeValue, Coercion};
pub use classifier::DatasourceClassifier;
pub use columns::{ColumnCandidate, ColumnExtractor, ExtractedColumns};
pub use connections::{ConnectionHandler, ConnectionInfo, ConnectionRegistry};
pub use datasource::{Datasource, RelationInfo};
pub use partitions::{PartitionExtractor, RelationPartition};
pub use relationships::RelationshipExtractor;
pub use tables::{MappedTable, TableMapper};
pub use tree::XmlNode;

/// Error during import
#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum ImportError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Datasource '{datasource}' has no usable connection")]
    MissingConnection { datasource: String },
    #[error("No connection handler for class '{class}' (datasource '{datasource}')")]
    UnsupportedConnection { class: String, datasource: String },
}

/// Datasources of a workbook, in document order.
///
/// Only `workbook/datasources/datasource` entries count; datasource references nested in
/// worksheets are ignored. A bare `datasource` root is returned as the single entry.
pub fn workbook_datasources(root: &XmlNode) -> Vec<&XmlNode> {
    if root.name == "datasource" {
        return vec![root];
    }
    root.children_named("datasources")
        .flat_map(|ds| ds.children_named("datasource"))
        .collect()
}
