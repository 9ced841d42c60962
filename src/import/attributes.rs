//! Declarative attribute resolution
//!
//! An [`AttributeSpec`] is an ordered list of lookup paths plus a coercion. The
//! [`AttributeResolver`] walks the paths in order and returns the first value that is
//! present, non-empty and coerces cleanly, falling back to the declared default.
//!
//! Path syntax (a small XPath subset):
//! - `@name` - attribute of the current node
//! - `child/grandchild` - text of a nested element
//! - `child/@name` - attribute of a nested element
//! - `//name/@attr` - first matching descendant at any depth
//! - `.` - text of the current node

use super::tree::XmlNode;
use super::datatypes;
use crate::models::DataType;

/// How a raw string is turned into a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Keep the trimmed text
    Text,
    /// Strip one layer of `[...]` brackets
    StripBrackets,
    /// `true`/`false`/`yes`/`no`/`1`/`0`
    Boolean,
    /// Signed integer
    Integer,
    /// Source datatype name mapped to a target type
    DataType,
    /// Numeric remote-type code mapped to a target type
    RemoteTypeCode,
}

/// Resolved, coerced value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Boolean(bool),
    Integer(i64),
    DataType(DataType),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered lookup strategies for one logical attribute
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec<'a> {
    pub paths: &'a [&'a str],
    pub coercion: Coercion,
    pub default: Option<&'a str>,
}

impl<'a> AttributeSpec<'a> {
    pub const fn text(paths: &'a [&'a str]) -> Self {
        Self {
            paths,
            coercion: Coercion::Text,
            default: None,
        }
    }

    pub const fn with(paths: &'a [&'a str], coercion: Coercion) -> Self {
        Self {
            paths,
            coercion,
            default: None,
        }
    }
}

/// Specs used throughout the extractors
pub mod specs {
    use super::{AttributeSpec, Coercion};

    pub const DATASOURCE_NAME: AttributeSpec<'static> =
        AttributeSpec::with(&["@name"], Coercion::StripBrackets);
    pub const DATASOURCE_CAPTION: AttributeSpec<'static> =
        AttributeSpec::with(&["@caption", "@name"], Coercion::StripBrackets);
    pub const CONNECTION_CLASS: AttributeSpec<'static> = AttributeSpec::text(&["@class"]);
    pub const SERVER: AttributeSpec<'static> =
        AttributeSpec::text(&["@server", "@host", "@directory"]);
    pub const DATABASE: AttributeSpec<'static> =
        AttributeSpec::text(&["@dbname", "@database", "@project", "@catalog"]);
    pub const SCHEMA: AttributeSpec<'static> = AttributeSpec::text(&["@schema", "@dataset"]);
    pub const FILENAME: AttributeSpec<'static> = AttributeSpec::text(&["@filename"]);

    pub const RELATION_NAME: AttributeSpec<'static> =
        AttributeSpec::with(&["@name", "@table"], Coercion::StripBrackets);
    pub const RELATION_TABLE: AttributeSpec<'static> = AttributeSpec::text(&["@table"]);
    pub const RELATION_QUERY: AttributeSpec<'static> = AttributeSpec::text(&["."]);

    pub const COLUMN_NAME: AttributeSpec<'static> =
        AttributeSpec::with(&["@name"], Coercion::StripBrackets);
    pub const COLUMN_CAPTION: AttributeSpec<'static> = AttributeSpec::text(&["@caption"]);
    pub const COLUMN_DATATYPE: AttributeSpec<'static> = AttributeSpec {
        paths: &["@datatype", "@type"],
        coercion: Coercion::DataType,
        default: Some("string"),
    };
    pub const COLUMN_ROLE: AttributeSpec<'static> = AttributeSpec::text(&["@role"]);
    pub const COLUMN_HIDDEN: AttributeSpec<'static> = AttributeSpec {
        paths: &["@hidden"],
        coercion: Coercion::Boolean,
        default: Some("false"),
    };
    pub const COLUMN_AGGREGATION: AttributeSpec<'static> =
        AttributeSpec::text(&["@aggregation"]);
    pub const COLUMN_DESCRIPTION: AttributeSpec<'static> =
        AttributeSpec::text(&["desc/formatted-text/run", "desc"]);
    pub const CALCULATION_FORMULA: AttributeSpec<'static> =
        AttributeSpec::text(&["calculation/@formula"]);
    pub const PARAMETER_DOMAIN: AttributeSpec<'static> =
        AttributeSpec::text(&["@param-domain-type"]);
    pub const PARAMETER_VALUE: AttributeSpec<'static> = AttributeSpec::text(&["@value"]);

    pub const REMOTE_NAME: AttributeSpec<'static> = AttributeSpec::text(&["remote-name"]);
    pub const LOCAL_NAME: AttributeSpec<'static> =
        AttributeSpec::with(&["local-name", "remote-alias"], Coercion::StripBrackets);
    pub const PARENT_NAME: AttributeSpec<'static> =
        AttributeSpec::with(&["parent-name"], Coercion::StripBrackets);
    pub const LOCAL_TYPE: AttributeSpec<'static> =
        AttributeSpec::with(&["local-type"], Coercion::DataType);
    pub const REMOTE_TYPE: AttributeSpec<'static> =
        AttributeSpec::with(&["remote-type"], Coercion::RemoteTypeCode);
    pub const RAW_TYPE: AttributeSpec<'static> =
        AttributeSpec::with(&["@type"], Coercion::DataType);

    pub const JOIN_TYPE: AttributeSpec<'static> = AttributeSpec::text(&["@join"]);
}

/// Stateless evaluator for [`AttributeSpec`]s
pub struct AttributeResolver;

impl AttributeResolver {
    /// Resolve a spec against a node
    pub fn resolve(node: &XmlNode, spec: &AttributeSpec<'_>) -> Option<AttributeValue> {
        for path in spec.paths {
            if let Some(raw) = evaluate_path(node, path)
                && let Some(value) = coerce(&raw, spec.coercion)
            {
                return Some(value);
            }
        }
        spec.default.and_then(|d| coerce(d, spec.coercion))
    }

    /// Resolve a textual spec
    pub fn text(node: &XmlNode, spec: &AttributeSpec<'_>) -> Option<String> {
        match Self::resolve(node, spec)? {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            AttributeValue::Integer(i) => Some(i.to_string()),
            AttributeValue::DataType(d) => Some(d.to_string()),
        }
    }

    pub fn boolean(node: &XmlNode, spec: &AttributeSpec<'_>) -> bool {
        matches!(
            Self::resolve(node, spec),
            Some(AttributeValue::Boolean(true))
        )
    }

    pub fn datatype(node: &XmlNode, spec: &AttributeSpec<'_>) -> Option<DataType> {
        match Self::resolve(node, spec)? {
            AttributeValue::DataType(d) => Some(d),
            _ => None,
        }
    }
}

/// Evaluate one path and return the raw, trimmed, non-empty string it points at
fn evaluate_path(node: &XmlNode, path: &str) -> Option<String> {
    if path == "." {
        return non_empty(node.text());
    }
    if let Some(rest) = path.strip_prefix("//") {
        let (first, remainder) = split_first_step(rest);
        return node
            .descendants_named(first)
            .into_iter()
            .find_map(|n| evaluate_steps(n, remainder));
    }
    evaluate_steps(node, Some(path))
}

fn split_first_step(path: &str) -> (&str, Option<&str>) {
    match path.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (path, None),
    }
}

fn evaluate_steps(node: &XmlNode, path: Option<&str>) -> Option<String> {
    let Some(path) = path else {
        return non_empty(node.text());
    };
    if let Some(attr) = path.strip_prefix('@') {
        return node.attr(attr).and_then(non_empty);
    }
    let (first, remainder) = split_first_step(path);
    node.children_named(first)
        .find_map(|child| evaluate_steps(child, remainder))
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn coerce(raw: &str, coercion: Coercion) -> Option<AttributeValue> {
    match coercion {
        Coercion::Text => Some(AttributeValue::Text(raw.trim().to_string())),
        Coercion::StripBrackets => non_empty(&strip_brackets(raw)).map(AttributeValue::Text),
        Coercion::Boolean => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(AttributeValue::Boolean(true)),
            "false" | "no" | "0" => Some(AttributeValue::Boolean(false)),
            _ => None,
        },
        Coercion::Integer => raw.trim().parse().ok().map(AttributeValue::Integer),
        Coercion::DataType => DataType::from_source_name(raw).map(AttributeValue::DataType),
        Coercion::RemoteTypeCode => raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(datatypes::remote_type_category)
            .map(AttributeValue::DataType),
    }
}

/// Remove one layer of surrounding `[...]`, unescaping `]]`.
///
/// `[Orders]` becomes `Orders`; text without brackets is returned trimmed.
pub fn strip_brackets(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        Some(inner) => inner.replace("]]", "]"),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> XmlNode {
        XmlNode::new("metadata-record")
            .with_attr("class", "column")
            .with_child(XmlNode::new("remote-name").with_text("order_id"))
            .with_child(XmlNode::new("remote-type").with_text("3"))
            .with_child(XmlNode::new("local-name").with_text("[Order ID]"))
    }

    #[test]
    fn falls_back_through_paths() {
        let node = XmlNode::new("datasource").with_attr("name", "federated.1x2y");
        assert_eq!(
            AttributeResolver::text(&node, &specs::DATASOURCE_CAPTION).as_deref(),
            Some("federated.1x2y")
        );
        let node = node.with_attr("caption", "Sales");
        assert_eq!(
            AttributeResolver::text(&node, &specs::DATASOURCE_CAPTION).as_deref(),
            Some("Sales")
        );
    }

    #[test]
    fn resolves_child_text_and_coerces() {
        let node = record();
        assert_eq!(
            AttributeResolver::text(&node, &specs::LOCAL_NAME).as_deref(),
            Some("Order ID")
        );
        assert_eq!(
            AttributeResolver::datatype(&node, &specs::REMOTE_TYPE),
            Some(DataType::Int64)
        );
        assert_eq!(AttributeResolver::datatype(&node, &specs::LOCAL_TYPE), None);
    }

    #[test]
    fn applies_default_when_nothing_matches() {
        let node = XmlNode::new("column");
        assert_eq!(
            AttributeResolver::datatype(&node, &specs::COLUMN_DATATYPE),
            Some(DataType::String)
        );
        assert!(!AttributeResolver::boolean(&node, &specs::COLUMN_HIDDEN));
    }

    #[test]
    fn unmappable_values_fall_through() {
        let node = XmlNode::new("column")
            .with_attr("datatype", "spatial")
            .with_attr("type", "integer");
        assert_eq!(
            AttributeResolver::datatype(&node, &specs::COLUMN_DATATYPE),
            Some(DataType::Int64)
        );
    }

    #[test]
    fn descendant_paths() {
        let node = XmlNode::new("workbook").with_child(
            XmlNode::new("datasources")
                .with_child(XmlNode::new("datasource").with_attr("name", "first")),
        );
        let spec = AttributeSpec::text(&["//datasource/@name"]);
        assert_eq!(AttributeResolver::text(&node, &spec).as_deref(), Some("first"));
    }

    #[test]
    fn strips_escaped_brackets() {
        assert_eq!(strip_brackets("[Sales [USD]]]"), "Sales [USD]");
        assert_eq!(strip_brackets(" plain "), "plain");
    }
}
