//! Partition extraction
//!
//! One partition per leaf relation of a datasource. Expression text comes from the
//! connection handler chosen by connection class; the relation key computed here is the
//! unit of later partition deduplication.

use super::ImportError;
use super::connections::{ConnectionRegistry, placeholder_partition};
use super::datasource::{Datasource, RelationInfo};
use super::tables::MappedTable;
use crate::convert::translation::TranslationClient;
use crate::models::{Partition, PartitionMetadata};
use tracing::debug;

/// A partition together with the relation it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPartition {
    pub relation_name: String,
    /// Physical table name, or the datasource caption for query relations
    pub physical_name: String,
    pub partition: Partition,
}

pub struct PartitionExtractor<'a> {
    registry: &'a ConnectionRegistry,
    client: &'a TranslationClient,
}

impl<'a> PartitionExtractor<'a> {
    pub fn new(registry: &'a ConnectionRegistry, client: &'a TranslationClient) -> Self {
        Self { registry, client }
    }

    /// Build a partition for every table and query relation of the datasource.
    ///
    /// # Errors
    ///
    /// A relation without a connection, or whose connection class no handler supports,
    /// fails the whole datasource.
    pub fn extract(&self, ds: &Datasource<'_>) -> Result<Vec<RelationPartition>, ImportError> {
        let caption = ds.caption();
        let mut out = Vec::new();

        for node in ds.leaf_relations() {
            let info = RelationInfo::from_node(node);
            let connection =
                ds.connection_for(&info)
                    .ok_or_else(|| ImportError::MissingConnection {
                        datasource: caption.clone(),
                    })?;
            let handler = self.registry.handler_for(&connection.class, &caption)?;

            let physical_name = if info.is_query() {
                caption.clone()
            } else {
                info.physical_name().trim_end_matches('$').to_string()
            };
            let mut partition =
                handler.extract_partition(&info, &connection, &physical_name, self.client);
            if info.is_query() && partition.description.is_none() {
                partition.description = Some(format!("Custom SQL query partition for {}", caption));
            }
            debug!(
                "Partition '{}' ({}) for relation '{}'",
                partition.name,
                handler.category(),
                info.name
            );
            out.push(RelationPartition {
                relation_name: info.name,
                physical_name,
                partition,
            });
        }
        Ok(out)
    }
}

/// Attach extracted partitions to the mapped tables that read from their relations.
///
/// A table whose category implies a partition but that matched none gets a placeholder.
pub fn attach_partitions(tables: &mut [MappedTable], partitions: &[RelationPartition]) {
    for mapped in tables.iter_mut() {
        let matched: Vec<Partition> = partitions
            .iter()
            .filter(|p| {
                mapped
                    .relations
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(&p.relation_name))
            })
            .map(|p| p.partition.clone())
            .collect();

        if matched.is_empty() {
            if mapped.needs_partition {
                let name = mapped.table.source_name.clone();
                let metadata = PartitionMetadata {
                    relation_key: name.to_lowercase(),
                    ..Default::default()
                };
                mapped.table.partitions.push(placeholder_partition(&name, metadata));
            }
        } else {
            mapped.table.partitions.extend(matched);
        }
    }
}
