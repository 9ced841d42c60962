//! Relationship extraction from join clauses
//!
//! Join relations carry their conditions as expression trees:
//!
//! ```xml
//! <relation join='inner' type='join'>
//!   <clause type='join'>
//!     <expression op='='>
//!       <expression op='[Orders].[Customer ID]' />
//!       <expression op='[Customers].[Customer ID]' />
//!     </expression>
//!   </clause>
//!   ...
//! </relation>
//! ```
//!
//! Every equality with exactly two `[Table].[Column]` operands becomes a relationship from
//! the left operand (many side) to the right operand.

use super::datasource::{Datasource, RelationInfo, last_identifier_segment, relation_table_name};
use super::tree::XmlNode;
use super::attributes::{AttributeResolver, specs};
use crate::models::{CrossFilterBehavior, Relationship};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{ObjectName, SetExpr, Statement, TableFactor};
use sqlparser::dialect::{Dialect, GenericDialect, MsSqlDialect};
use sqlparser::parser::Parser;
use std::collections::HashSet;
use tracing::debug;

static RE_QUALIFIED_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[((?:[^\]]|\]\])+)\]\.\[((?:[^\]]|\]\])+)\]$").expect("Invalid regex")
});
static RE_QUERY_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^custom sql query( \(\d+\))?$").expect("Invalid regex"));
static RE_FROM_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bFROM\s+([\[\]\w\."`]+)"#).expect("Invalid regex"));

/// Split `[Table].[Column]` into its unescaped segments
pub fn parse_qualified_field(operand: &str) -> Option<(String, String)> {
    let caps = RE_QUALIFIED_FIELD.captures(operand.trim())?;
    Some((
        caps.get(1)?.as_str().replace("]]", "]"),
        caps.get(2)?.as_str().replace("]]", "]"),
    ))
}

/// First table named in a query's FROM clause.
///
/// The query is parsed with `sqlparser` (T-SQL dialect first for bracketed identifiers);
/// when it does not parse, a regex over the text is used.
pub fn recover_query_table(sql: &str) -> Option<String> {
    let dialects: [&dyn Dialect; 2] = [&MsSqlDialect {}, &GenericDialect {}];
    for dialect in dialects {
        if let Ok(statements) = Parser::parse_sql(dialect, sql)
            && let Some(name) = statements.iter().find_map(first_from_table)
        {
            return Some(name);
        }
    }
    RE_FROM_TABLE
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| last_identifier_segment(m.as_str()))
        .filter(|s| !s.is_empty())
}

fn first_from_table(statement: &Statement) -> Option<String> {
    let Statement::Query(query) = statement else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    select.from.iter().find_map(|twj| match &twj.relation {
        TableFactor::Table { name, .. } => Some(object_name_to_string(name)),
        _ => None,
    })
}

fn object_name_to_string(name: &ObjectName) -> String {
    let raw = name
        .0
        .last()
        .map(|part| part.to_string())
        .unwrap_or_else(|| name.to_string());
    raw.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_string()
}

/// Resolves join operand table segments to table names
pub struct TableNameResolver {
    /// (relation name, query text) of every query relation
    queries: Vec<(String, String)>,
}

impl TableNameResolver {
    pub fn new(ds: &Datasource<'_>) -> Self {
        let queries = ds
            .relations_of_kind("text")
            .into_iter()
            .map(RelationInfo::from_node)
            .filter_map(|r| r.query.map(|q| (r.name, q)))
            .collect();
        Self { queries }
    }

    /// Whether a segment names a raw-query relation rather than a table
    pub fn is_placeholder(&self, segment: &str) -> bool {
        RE_QUERY_PLACEHOLDER.is_match(segment.trim())
            || self
                .queries
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(segment))
    }

    /// Table name for a segment; placeholders are replaced by the query's FROM table and
    /// spreadsheet sheet names lose their trailing `$`
    pub fn resolve(&self, segment: &str) -> String {
        if !self.is_placeholder(segment) {
            return relation_table_name(segment);
        }
        let query = self
            .queries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(segment))
            .or(if self.queries.len() == 1 {
                self.queries.first()
            } else {
                None
            })
            .map(|(_, q)| q.as_str());
        match query.and_then(recover_query_table) {
            Some(table) => {
                debug!("Resolved query placeholder '{}' to table '{}'", segment, table);
                table
            }
            None => segment.to_string(),
        }
    }
}

pub struct RelationshipExtractor;

impl RelationshipExtractor {
    /// Relationships declared by every join of a datasource, duplicates suppressed
    pub fn extract(ds: &Datasource<'_>) -> Vec<Relationship> {
        let resolver = TableNameResolver::new(ds);
        let mut out = Vec::new();
        for join in ds.relations_of_kind("join") {
            let behavior = CrossFilterBehavior::from_join_type(
                AttributeResolver::text(join, &specs::JOIN_TYPE).as_deref(),
            );
            for (left, right) in join_equalities(join) {
                let mut rel = Relationship::new(
                    &resolver.resolve(&left.0),
                    &left.1,
                    &resolver.resolve(&right.0),
                    &right.1,
                );
                rel.cross_filter_behavior = behavior;
                out.push(rel);
            }
        }
        Self::dedup(out)
    }

    /// Distinct table names appearing in join equalities, in first-seen order
    pub fn join_table_names(ds: &Datasource<'_>) -> Vec<String> {
        let resolver = TableNameResolver::new(ds);
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for join in ds.relations_of_kind("join") {
            for (left, right) in join_equalities(join) {
                for segment in [left.0, right.0] {
                    let name = resolver.resolve(&segment);
                    if seen.insert(name.to_lowercase()) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    /// Drop exact `(from_table, from_column, to_table, to_column)` duplicates, keeping the
    /// first occurrence
    pub fn dedup(relationships: Vec<Relationship>) -> Vec<Relationship> {
        let mut seen = HashSet::new();
        relationships
            .into_iter()
            .filter(|r| seen.insert(r.key()))
            .collect()
    }
}

type FieldRef = (String, String);

/// Equality operand pairs of a join's own clauses (nested joins are visited separately)
fn join_equalities(join: &XmlNode) -> Vec<(FieldRef, FieldRef)> {
    join.children_named("clause")
        .flat_map(|clause| clause.descendants_named("expression"))
        .filter(|e| e.attr("op") == Some("="))
        .filter_map(|e| {
            let operands: Vec<&XmlNode> = e.children_named("expression").collect();
            if operands.len() != 2 {
                debug!("Join equality with {} operands skipped", operands.len());
                return None;
            }
            let left = operands[0].attr("op").and_then(parse_qualified_field);
            let right = operands[1].attr("op").and_then(parse_qualified_field);
            match (left, right) {
                (Some(l), Some(r)) => Some((l, r)),
                _ => {
                    debug!(
                        "Join equality with unqualified operand skipped: {:?} = {:?}",
                        operands[0].attr("op"),
                        operands[1].attr("op")
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equality(left: &str, right: &str) -> XmlNode {
        XmlNode::new("expression")
            .with_attr("op", "=")
            .with_child(XmlNode::new("expression").with_attr("op", left))
            .with_child(XmlNode::new("expression").with_attr("op", right))
    }

    fn join(kind: &str, expressions: Vec<XmlNode>, relations: Vec<XmlNode>) -> XmlNode {
        let clause = expressions
            .into_iter()
            .fold(XmlNode::new("clause").with_attr("type", "join"), |c, e| c.with_child(e));
        relations.into_iter().fold(
            XmlNode::new("relation")
                .with_attr("type", "join")
                .with_attr("join", kind)
                .with_child(clause),
            |j, r| j.with_child(r),
        )
    }

    fn datasource(relation: XmlNode) -> XmlNode {
        XmlNode::new("datasource").with_attr("name", "ds").with_child(
            XmlNode::new("connection")
                .with_attr("class", "sqlserver")
                .with_child(relation),
        )
    }

    #[test]
    fn parses_qualified_operands() {
        assert_eq!(
            parse_qualified_field("[Orders].[Customer ID]"),
            Some(("Orders".to_string(), "Customer ID".to_string()))
        );
        assert_eq!(
            parse_qualified_field("[Sales [EU]]].[Net]"),
            Some(("Sales [EU]".to_string(), "Net".to_string()))
        );
        assert_eq!(parse_qualified_field("[Customer ID]"), None);
        assert_eq!(parse_qualified_field("Orders.Customer"), None);
    }

    #[test]
    fn extracts_and_dedups_join_relationships() {
        let node = datasource(join(
            "inner",
            vec![
                equality("[Orders].[Customer ID]", "[Customers].[Customer ID]"),
                equality("[Orders].[Customer ID]", "[Customers].[Customer ID]"),
                equality("[Orders].[Region]", "'West'"),
                XmlNode::new("expression")
                    .with_attr("op", "=")
                    .with_child(XmlNode::new("expression").with_attr("op", "[Orders].[X]")),
            ],
            vec![],
        ));
        let rels = RelationshipExtractor::extract(&Datasource::new(&node));
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].from_table, "Orders");
        assert_eq!(rels[0].to_column, "Customer ID");
        assert_eq!(rels[0].cross_filter_behavior, CrossFilterBehavior::BothDirections);
        assert!(rels[0].is_active);
    }

    #[test]
    fn left_join_is_one_direction() {
        let node = datasource(join(
            "left",
            vec![equality("[A].[k]", "[B].[k]")],
            vec![],
        ));
        let rels = RelationshipExtractor::extract(&Datasource::new(&node));
        assert_eq!(rels[0].cross_filter_behavior, CrossFilterBehavior::OneDirection);
    }

    #[test]
    fn resolves_query_placeholders_through_from_clause() {
        let query = XmlNode::new("relation")
            .with_attr("type", "text")
            .with_attr("name", "Custom SQL Query")
            .with_text("SELECT p.id, p.name FROM dbo.People p WHERE p.active = 1");
        let node = datasource(join(
            "inner",
            vec![equality("[Orders].[Person]", "[Custom SQL Query].[id]")],
            vec![query],
        ));
        let ds = Datasource::new(&node);
        let rels = RelationshipExtractor::extract(&ds);
        assert_eq!(rels[0].to_table, "People");
        assert_eq!(
            RelationshipExtractor::join_table_names(&ds),
            vec!["Orders".to_string(), "People".to_string()]
        );
    }

    #[test]
    fn from_recovery_falls_back_to_regex() {
        assert_eq!(
            recover_query_table("SELECT * FROM [dbo].[Orders]").as_deref(),
            Some("Orders")
        );
        assert_eq!(
            recover_query_table("SELECT TOP 5 * FROM Sales.Invoices WITH (NOLOCK) <<garbage").as_deref(),
            Some("Invoices")
        );
        assert_eq!(recover_query_table("EXEC dbo.Refresh"), None);
    }
}
