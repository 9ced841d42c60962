//! Partition model

use serde::{Deserialize, Serialize};

/// Connection and relation facts describing where a partition's data comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMetadata {
    /// Synthesized identity of the source relation, the unit of deduplication
    pub relation_key: String,
    /// Connection class of the source (`sqlserver`, `excel-direct`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Whether the relation is a raw query rather than a table reference
    #[serde(default)]
    pub has_query: bool,
}

impl PartitionMetadata {
    /// Number of populated descriptive fields (`has_query` is scored separately)
    pub fn field_count(&self) -> usize {
        let optional = [
            &self.connection_class,
            &self.server,
            &self.database,
            &self.schema,
        ];
        let populated = optional
            .iter()
            .filter(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
            .count();
        populated + usize::from(!self.relation_key.is_empty())
    }
}

/// Physical-access definition bound to a table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub name: String,
    /// Opaque physical-access text produced by the expression collaborator
    pub expression: String,
    pub metadata: PartitionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Partition {
    pub fn new(name: String, expression: String, metadata: PartitionMetadata) -> Self {
        Self {
            name,
            expression,
            metadata,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_populated_metadata_fields() {
        let meta = PartitionMetadata {
            relation_key: "orders|[dbo].[orders]||srv|db|dbo".to_string(),
            connection_class: Some("sqlserver".to_string()),
            server: Some("srv".to_string()),
            database: Some(String::new()),
            schema: None,
            has_query: true,
        };
        assert_eq!(meta.field_count(), 3);
    }
}
