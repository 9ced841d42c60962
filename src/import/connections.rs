//! Connection handlers
//!
//! Per-connection logic is a strategy table keyed by [`ConnectionCategory`]. Each handler
//! decides whether it supports a connection class, extracts relation-declared columns and
//! builds the partition for a relation by asking the translation collaborator for a
//! physical-access expression.

use super::ImportError;
use super::attributes::{AttributeResolver, specs};
use super::columns::{ColumnCandidate, relation_columns};
use super::datasource::RelationInfo;
use super::tree::XmlNode;
use crate::convert::translation::{TranslationClient, TranslationError, TranslationRequest, error_marker};
use crate::models::{ConnectionCategory, Partition, PartitionMetadata};
use serde_json::json;
use tracing::{debug, warn};

/// Expression emitted when the collaborator produces nothing for a relation
pub const PLACEHOLDER_EXPRESSION: &str = "let\n    Source = #table({}, {})\nin\n    Source";

/// Length of the query prefix that takes part in the relation key
const RELATION_KEY_QUERY_PREFIX: usize = 50;

/// Attributes of a `connection` element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    pub class: String,
    pub server: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub filename: Option<String>,
}

impl ConnectionInfo {
    pub fn from_node(node: &XmlNode) -> Self {
        Self {
            class: AttributeResolver::text(node, &specs::CONNECTION_CLASS).unwrap_or_default(),
            server: AttributeResolver::text(node, &specs::SERVER),
            database: AttributeResolver::text(node, &specs::DATABASE),
            schema: AttributeResolver::text(node, &specs::SCHEMA),
            filename: AttributeResolver::text(node, &specs::FILENAME),
        }
    }
}

/// Identity of a relation for partition deduplication:
/// lower-cased `name|table|query50|server|database|schema`
pub fn relation_key(relation: &RelationInfo, connection: &ConnectionInfo) -> String {
    [
        relation.name.clone(),
        relation.table.clone().unwrap_or_default(),
        relation.query_prefix(RELATION_KEY_QUERY_PREFIX),
        connection.server.clone().unwrap_or_default(),
        connection.database.clone().unwrap_or_default(),
        connection.schema.clone().unwrap_or_default(),
    ]
    .join("|")
    .to_lowercase()
}

pub fn partition_metadata(relation: &RelationInfo, connection: &ConnectionInfo) -> PartitionMetadata {
    PartitionMetadata {
        relation_key: relation_key(relation, connection),
        connection_class: Some(connection.class.clone()).filter(|c| !c.is_empty()),
        server: connection.server.clone(),
        database: connection.database.clone(),
        schema: connection.schema.clone(),
        has_query: relation.is_query(),
    }
}

/// Per-category connection strategy
pub trait ConnectionHandler: Send + Sync {
    fn category(&self) -> ConnectionCategory;

    /// Whether this handler understands the given connection class
    fn supports(&self, class: &str) -> bool;

    /// Columns declared on a relation, owned by the relation name
    fn extract_columns(&self, relation: &XmlNode) -> Vec<ColumnCandidate> {
        let info = RelationInfo::from_node(relation);
        relation_columns(relation, &info.name)
    }

    /// Descriptor sent to the translation collaborator
    fn connection_payload(
        &self,
        relation: &RelationInfo,
        connection: &ConnectionInfo,
    ) -> serde_json::Value;

    /// Build the partition for one relation.
    ///
    /// An empty answer yields a placeholder partition; a failed translation yields a
    /// partition whose expression carries an inline error marker.
    fn extract_partition(
        &self,
        relation: &RelationInfo,
        connection: &ConnectionInfo,
        table_name: &str,
        client: &TranslationClient,
    ) -> Partition {
        let request = TranslationRequest::connection(
            self.category(),
            self.connection_payload(relation, connection).to_string(),
            table_name,
        );
        let metadata = partition_metadata(relation, connection);
        let name = if relation.name.is_empty() {
            table_name.to_string()
        } else {
            relation.name.clone()
        };

        match client.translate(&request) {
            Ok(expression) => Partition::new(name, expression, metadata),
            Err(TranslationError::EmptyResponse) => {
                debug!("No partition expression for '{}', using placeholder", name);
                placeholder_partition(&name, metadata)
            }
            Err(e) => {
                warn!("Partition expression for '{}' failed: {}", name, e);
                Partition::new(name, error_marker(&e.to_string()), metadata)
            }
        }
    }
}

/// Generic partition used when nothing better is known
pub fn placeholder_partition(name: &str, metadata: PartitionMetadata) -> Partition {
    let mut partition = Partition::new(name.to_string(), PLACEHOLDER_EXPRESSION.to_string(), metadata);
    partition.description = Some("Placeholder partition".to_string());
    partition
}

/// Spreadsheet and flat-file connections
pub struct SpreadsheetHandler;

impl ConnectionHandler for SpreadsheetHandler {
    fn category(&self) -> ConnectionCategory {
        ConnectionCategory::Spreadsheet
    }

    fn supports(&self, class: &str) -> bool {
        matches!(class, "excel-direct" | "excel" | "textscan")
    }

    fn connection_payload(
        &self,
        relation: &RelationInfo,
        connection: &ConnectionInfo,
    ) -> serde_json::Value {
        json!({
            "class": connection.class,
            "filename": connection.filename.clone().or_else(|| connection.server.clone()),
            "sheet": relation.physical_name().trim_end_matches('$'),
        })
    }
}

/// SQL engines
pub struct RelationalHandler;

const RELATIONAL_CLASSES: &[&str] = &[
    "sqlserver",
    "postgres",
    "mysql",
    "oracle",
    "snowflake",
    "redshift",
    "bigquery",
    "teradata",
    "databricks",
    "db2",
    "hive",
    "presto",
    "vertica",
    "sqlite",
    "greenplum",
    "azure_sql_dw",
    "azure_sqldb",
];

impl ConnectionHandler for RelationalHandler {
    fn category(&self) -> ConnectionCategory {
        ConnectionCategory::Relational
    }

    fn supports(&self, class: &str) -> bool {
        RELATIONAL_CLASSES.contains(&class)
    }

    fn connection_payload(
        &self,
        relation: &RelationInfo,
        connection: &ConnectionInfo,
    ) -> serde_json::Value {
        json!({
            "class": connection.class,
            "server": connection.server,
            "database": connection.database,
            "schema": connection.schema,
            "table": relation.table,
            "query": relation.query,
        })
    }
}

/// Catch-all for any other named connection class
pub struct GenericHandler;

impl ConnectionHandler for GenericHandler {
    fn category(&self) -> ConnectionCategory {
        ConnectionCategory::Generic
    }

    fn supports(&self, class: &str) -> bool {
        !class.is_empty() && class != "federated"
    }

    fn connection_payload(
        &self,
        relation: &RelationInfo,
        connection: &ConnectionInfo,
    ) -> serde_json::Value {
        json!({
            "class": connection.class,
            "server": connection.server,
            "database": connection.database,
            "relation": relation.name,
            "table": relation.table,
            "query": relation.query,
        })
    }
}

/// Ordered handler table; the first handler that supports a class wins
pub struct ConnectionRegistry {
    handlers: Vec<Box<dyn ConnectionHandler>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ConnectionRegistry {
    /// Empty registry; every lookup fails until handlers are registered
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Spreadsheet, relational and generic handlers, in that order
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SpreadsheetHandler));
        registry.register(Box::new(RelationalHandler));
        registry.register(Box::new(GenericHandler));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn ConnectionHandler>) {
        self.handlers.push(handler);
    }

    /// Handler for a connection class.
    ///
    /// # Errors
    ///
    /// `MissingConnection` for an empty class, `UnsupportedConnection` when no handler
    /// supports it. Both are fatal for the datasource.
    pub fn handler_for(
        &self,
        class: &str,
        datasource: &str,
    ) -> Result<&dyn ConnectionHandler, ImportError> {
        let class = class.trim().to_lowercase();
        if class.is_empty() {
            return Err(ImportError::MissingConnection {
                datasource: datasource.to_string(),
            });
        }
        self.handlers
            .iter()
            .find(|h| h.supports(&class))
            .map(|h| h.as_ref())
            .ok_or_else(|| ImportError::UnsupportedConnection {
                class,
                datasource: datasource.to_string(),
            })
    }
}
