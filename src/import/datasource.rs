//! Read-only view over a datasource element
//!
//! Wraps a `datasource` node and exposes the pieces the extractors need: connection,
//! relations (leaf, join and query relations), calculated and parameter columns,
//! metadata records and drill paths.

use super::attributes::{AttributeResolver, specs};
use super::connections::ConnectionInfo;
use super::tree::XmlNode;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_BRACKET_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[((?:[^\]]|\]\])*)\]").expect("Invalid regex"));

/// Name of the workbook-level datasource that holds parameters
pub const PARAMETERS_DATASOURCE: &str = "Parameters";

/// Whether an element is a relation (plain or namespaced by newer document versions)
pub fn is_relation(node: &XmlNode) -> bool {
    node.name == "relation" || node.name.ends_with(".relation")
}

/// One relation (table reference, raw query, join or collection)
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInfo {
    pub name: String,
    /// `type` attribute: `table`, `text`, `join`, `collection`
    pub kind: String,
    /// Table reference such as `[dbo].[Orders]`
    pub table: Option<String>,
    /// Raw query text for `text` relations
    pub query: Option<String>,
    /// Named connection the relation reads from (federated datasources)
    pub connection: Option<String>,
}

impl RelationInfo {
    pub fn from_node(node: &XmlNode) -> Self {
        let kind = node
            .attr("type")
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| "table".to_string());
        let query = if kind == "text" {
            AttributeResolver::text(node, &specs::RELATION_QUERY)
        } else {
            None
        };
        Self {
            name: AttributeResolver::text(node, &specs::RELATION_NAME).unwrap_or_default(),
            kind,
            table: AttributeResolver::text(node, &specs::RELATION_TABLE),
            query,
            connection: node.attr("connection").map(str::to_string),
        }
    }

    pub fn is_query(&self) -> bool {
        self.kind == "text"
    }

    /// Last segment of the table reference (`[dbo].[Orders]` gives `Orders`), or the
    /// relation name when there is no reference.
    pub fn physical_name(&self) -> String {
        match &self.table {
            Some(table) => last_identifier_segment(table),
            None => self.name.clone(),
        }
    }

    /// First `limit` characters of the query with all whitespace removed
    pub fn query_prefix(&self, limit: usize) -> String {
        self.query
            .as_deref()
            .map(|q| {
                q.chars()
                    .filter(|c| !c.is_whitespace())
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Table name for a relation name (`Sheet1$` becomes `Sheet1`)
pub fn relation_table_name(relation_name: &str) -> String {
    relation_name.trim_end_matches('$').to_string()
}

/// Last identifier of a possibly qualified, possibly bracketed reference
pub fn last_identifier_segment(reference: &str) -> String {
    let segments: Vec<String> = RE_BRACKET_SEGMENT
        .captures_iter(reference)
        .filter_map(|c| c.get(1).map(|m| m.as_str().replace("]]", "]")))
        .collect();
    match segments.last() {
        Some(last) => last.clone(),
        None => reference
            .rsplit('.')
            .next()
            .map(|s| s.trim_matches(|c| c == '"' || c == '`').to_string())
            .unwrap_or_default(),
    }
}

/// Read-only view over a `datasource` element
#[derive(Debug, Clone, Copy)]
pub struct Datasource<'a> {
    pub node: &'a XmlNode,
}

impl<'a> Datasource<'a> {
    pub fn new(node: &'a XmlNode) -> Self {
        Self { node }
    }

    /// Internal name (`federated.0abc...`)
    pub fn name(&self) -> String {
        AttributeResolver::text(self.node, &specs::DATASOURCE_NAME).unwrap_or_default()
    }

    /// Caption, falling back to the internal name
    pub fn caption(&self) -> String {
        AttributeResolver::text(self.node, &specs::DATASOURCE_CAPTION).unwrap_or_default()
    }

    pub fn connection(&self) -> Option<&'a XmlNode> {
        self.node.child("connection")
    }

    pub fn connection_class(&self) -> Option<String> {
        self.connection()
            .and_then(|c| AttributeResolver::text(c, &specs::CONNECTION_CLASS))
    }

    pub fn is_parameters_datasource(&self) -> bool {
        self.name() == PARAMETERS_DATASOURCE
    }

    /// Relations directly under the connection
    pub fn top_relations(&self) -> Vec<&'a XmlNode> {
        self.connection()
            .map(|c| c.children.iter().filter(|n| is_relation(n)).collect())
            .unwrap_or_default()
    }

    /// Every relation under the connection, at any depth, in document order
    pub fn all_relations(&self) -> Vec<&'a XmlNode> {
        self.connection()
            .map(|c| c.descendants().into_iter().filter(|n| is_relation(n)).collect())
            .unwrap_or_default()
    }

    /// Table and query relations (joins and collections are walked through)
    pub fn leaf_relations(&self) -> Vec<&'a XmlNode> {
        self.all_relations()
            .into_iter()
            .filter(|n| {
                let kind = RelationInfo::from_node(n).kind;
                kind == "table" || kind == "text"
            })
            .collect()
    }

    pub fn relations_of_kind(&self, kind: &str) -> Vec<&'a XmlNode> {
        self.all_relations()
            .into_iter()
            .filter(|n| RelationInfo::from_node(n).kind == kind)
            .collect()
    }

    /// Named connections of a federated connection
    pub fn named_connections(&self) -> Vec<&'a XmlNode> {
        self.connection()
            .and_then(|c| c.child("named-connections"))
            .map(|nc| nc.children_named("named-connection").collect())
            .unwrap_or_default()
    }

    /// Connection a relation reads from: its named connection when it references one,
    /// otherwise the datasource connection. A federated relation without a reference
    /// reads from the first named connection.
    pub fn connection_for(&self, relation: &RelationInfo) -> Option<ConnectionInfo> {
        let named = self.named_connections();
        if let Some(reference) = &relation.connection
            && let Some(inner) = named
                .iter()
                .find(|nc| nc.attr("name") == Some(reference.as_str()))
                .and_then(|nc| nc.child("connection"))
        {
            return Some(ConnectionInfo::from_node(inner));
        }
        let own = self.connection().map(ConnectionInfo::from_node)?;
        if own.class.eq_ignore_ascii_case("federated")
            && let Some(inner) = named.first().and_then(|nc| nc.child("connection"))
        {
            return Some(ConnectionInfo::from_node(inner));
        }
        Some(own)
    }

    /// Datasource-level `column` elements (calculations, parameters, overrides)
    pub fn column_nodes(&self) -> Vec<&'a XmlNode> {
        self.node.children_named("column").collect()
    }

    /// Columns that carry a parameter domain
    pub fn parameter_columns(&self) -> Vec<&'a XmlNode> {
        self.column_nodes()
            .into_iter()
            .filter(|c| AttributeResolver::text(c, &specs::PARAMETER_DOMAIN).is_some())
            .collect()
    }

    /// `metadata-record` elements describing columns
    pub fn metadata_records(&self) -> Vec<&'a XmlNode> {
        self.node
            .descendants_named("metadata-record")
            .into_iter()
            .filter(|r| r.attr("class").is_none_or(|c| c == "column"))
            .collect()
    }

    pub fn drill_paths(&self) -> Vec<&'a XmlNode> {
        self.node.descendants_named("drill-path")
    }
}
