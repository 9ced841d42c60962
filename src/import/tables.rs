//! Table mapping
//!
//! Turns one classified datasource into logical tables. Each category has its own
//! strategy; they all funnel into [`TableMapper::distribute`], which hands extracted
//! columns and measures to the tables that own them.
//!
//! Tables named after a datasource (single table, query, parameter) are disambiguated
//! against every name the mapper has already produced, in first-seen order. Tables named
//! after a physical relation keep their name so the deduplicator can reconcile them.

use super::ImportError;
use super::attributes::{AttributeResolver, specs};
use super::classifier::DatasourceClassifier;
use super::columns::{ColumnCandidate, ColumnExtractor, ExtractedColumns};
use super::connections::ConnectionRegistry;
use super::datasource::{Datasource, RelationInfo, is_relation, relation_table_name};
use super::relationships::{RelationshipExtractor, TableNameResolver};
use super::tree::XmlNode;
use crate::models::table::unique_name;
use crate::models::{Column, DatasourceCategory, Measure, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

static RE_TABLE_QUALIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[((?:[^\]]|\]\])+)\]\.\[").expect("Invalid regex"));

/// Prefix of the description carried by query tables
pub const QUERY_DESCRIPTION_PREFIX: &str = "Custom SQL query: ";

/// A logical table plus the relations it reads from
#[derive(Debug, Clone, PartialEq)]
pub struct MappedTable {
    pub table: Table,
    /// Names of the relations whose partitions belong to this table
    pub relations: Vec<String>,
    pub category: DatasourceCategory,
    /// Whether the table must end up with at least one partition
    pub needs_partition: bool,
}

/// A table under construction
struct Slot {
    table: Table,
    relations: Vec<String>,
}

impl Slot {
    fn new(name: String, relations: Vec<String>) -> Self {
        Self {
            table: Table::new(name),
            relations,
        }
    }

    fn owns(&self, reference: &str) -> bool {
        self.table.source_name.eq_ignore_ascii_case(reference)
            || self.relations.iter().any(|r| {
                r.eq_ignore_ascii_case(reference)
                    || relation_table_name(r).eq_ignore_ascii_case(reference)
            })
    }
}

pub struct TableMapper<'r> {
    registry: &'r ConnectionRegistry,
    preview_length: usize,
    seen: HashSet<String>,
}

impl<'r> TableMapper<'r> {
    pub fn new(registry: &'r ConnectionRegistry, preview_length: usize) -> Self {
        Self {
            registry,
            preview_length,
            seen: HashSet::new(),
        }
    }

    /// Names produced so far (lower-cased)
    pub fn seen_names(&self) -> &HashSet<String> {
        &self.seen
    }

    /// Classify and map one datasource
    pub fn map(&mut self, node: &XmlNode) -> Result<Vec<MappedTable>, ImportError> {
        let category = DatasourceClassifier::classify(node);
        self.map_as(node, category)
    }

    /// Map a datasource with a known category
    pub fn map_as(
        &mut self,
        node: &XmlNode,
        category: DatasourceCategory,
    ) -> Result<Vec<MappedTable>, ImportError> {
        let ds = Datasource::new(node);
        let tables = match category {
            DatasourceCategory::Federated => return self.map_federated(node),
            DatasourceCategory::Parameter => self.map_parameters(&ds),
            _ => {
                let extracted = ColumnExtractor::new(self.registry).extract(&ds)?;
                let slots = match category {
                    DatasourceCategory::SqlQuery => self.query_slots(&ds),
                    DatasourceCategory::MultiTableJoin => self.join_slots(&ds),
                    DatasourceCategory::MultiTable => self.relation_slots(&ds),
                    _ => self.single_slot(&ds, category),
                };
                Self::distribute(extracted, slots)
                    .into_iter()
                    .map(|slot| MappedTable {
                        table: slot.table,
                        relations: slot.relations,
                        category,
                        needs_partition: true,
                    })
                    .collect()
            }
        };
        debug!(
            "Datasource '{}' ({}) mapped to {} table(s)",
            ds.caption(),
            category,
            tables.len()
        );
        Ok(tables)
    }

    /// Reserve a datasource-derived name, suffixing it when already taken
    fn claim(&mut self, name: &str) -> String {
        let name = unique_name(name, &self.seen);
        self.seen.insert(name.to_lowercase());
        name
    }

    /// Record a relation-derived name without renaming it
    fn note(&mut self, name: &str) -> String {
        self.seen.insert(name.to_lowercase());
        name.to_string()
    }

    fn single_slot(&mut self, ds: &Datasource<'_>, category: DatasourceCategory) -> Vec<Slot> {
        let leaves = ds.leaf_relations();
        let relations: Vec<String> = leaves
            .iter()
            .map(|n| RelationInfo::from_node(n).name)
            .collect();
        let sheet = (category == DatasourceCategory::Excel)
            .then(|| leaves.first().map(|n| RelationInfo::from_node(n).physical_name()))
            .flatten()
            .map(|s| relation_table_name(&s))
            .filter(|s| !s.is_empty());
        let name = self.claim(&sheet.unwrap_or_else(|| ds.caption()));
        vec![Slot::new(name, relations)]
    }

    /// One table per query relation. A query that takes part in a join is named after its
    /// FROM table so join relationships line up; the join's table relations get their own
    /// tables.
    fn query_slots(&mut self, ds: &Datasource<'_>) -> Vec<Slot> {
        let resolver = TableNameResolver::new(ds);
        let joined: HashSet<String> = ds
            .relations_of_kind("join")
            .into_iter()
            .flat_map(|j| j.descendants())
            .filter(|n| is_relation(n))
            .map(|n| RelationInfo::from_node(n).name)
            .collect();

        let mut slots = Vec::new();
        for node in ds.relations_of_kind("text") {
            let info = RelationInfo::from_node(node);
            let name = if joined.contains(&info.name) {
                self.note(&resolver.resolve(&info.name))
            } else {
                self.claim(&ds.caption())
            };
            let mut slot = Slot::new(name, vec![info.name.clone()]);
            slot.table.description = Some(format!(
                "{}{}",
                QUERY_DESCRIPTION_PREFIX,
                query_preview(info.query.as_deref().unwrap_or_default(), self.preview_length)
            ));
            slots.push(slot);
        }
        for node in ds.relations_of_kind("table") {
            let info = RelationInfo::from_node(node);
            if joined.contains(&info.name) {
                let name = self.note(&relation_table_name(&info.name));
                slots.push(Slot::new(name, vec![info.name]));
            }
        }
        slots
    }

    fn relation_slots(&mut self, ds: &Datasource<'_>) -> Vec<Slot> {
        ds.leaf_relations()
            .into_iter()
            .map(RelationInfo::from_node)
            .filter(|info| !info.name.is_empty())
            .map(|info| {
                let name = self.note(&relation_table_name(&info.name));
                Slot::new(name, vec![info.name])
            })
            .collect()
    }

    /// Tables named by the join equalities, plus leaf relations no equality mentions.
    /// Without any parsable equality the join is mapped like independent relations.
    fn join_slots(&mut self, ds: &Datasource<'_>) -> Vec<Slot> {
        let names = RelationshipExtractor::join_table_names(ds);
        if names.is_empty() {
            debug!(
                "No join equality parsed in '{}', mapping leaf relations",
                ds.caption()
            );
            return self.relation_slots(ds);
        }
        let leaves: Vec<RelationInfo> = ds
            .leaf_relations()
            .into_iter()
            .map(RelationInfo::from_node)
            .collect();

        let mut slots: Vec<Slot> = names
            .iter()
            .map(|name| {
                let relations = leaves
                    .iter()
                    .filter(|r| relation_table_name(&r.name).eq_ignore_ascii_case(name))
                    .map(|r| r.name.clone())
                    .collect();
                Slot::new(self.note(name), relations)
            })
            .collect();
        for leaf in &leaves {
            if !slots.iter().any(|s| s.owns(&leaf.name)) && !leaf.name.is_empty() {
                let name = self.note(&relation_table_name(&leaf.name));
                slots.push(Slot::new(name, vec![leaf.name.clone()]));
            }
        }
        slots
    }

    /// One synthetic table per parameter column
    fn map_parameters(&mut self, ds: &Datasource<'_>) -> Vec<MappedTable> {
        ds.parameter_columns()
            .into_iter()
            .filter_map(|node| {
                let caption = AttributeResolver::text(node, &specs::COLUMN_CAPTION)
                    .or_else(|| AttributeResolver::text(node, &specs::COLUMN_NAME))?;
                let datatype =
                    AttributeResolver::datatype(node, &specs::COLUMN_DATATYPE).unwrap_or_default();
                let mut column = Column::new(caption.clone(), datatype);
                if let Some(domain) = AttributeResolver::text(node, &specs::PARAMETER_DOMAIN) {
                    column.annotations.insert("ParameterDomain".to_string(), domain);
                }
                if let Some(value) = AttributeResolver::text(node, &specs::PARAMETER_VALUE) {
                    column.annotations.insert("ParameterValue".to_string(), value);
                }
                let mut table = Table::new(self.claim(&caption));
                table.add_column(column);
                Some(MappedTable {
                    table,
                    relations: Vec::new(),
                    category: DatasourceCategory::Parameter,
                    needs_partition: false,
                })
            })
            .collect()
    }

    /// Federated datasources hold one named connection per member source. Each member
    /// becomes a sub-datasource with the relations that read from it and is mapped by its
    /// own shape. Calculated fields go to the first member only.
    fn map_federated(&mut self, node: &XmlNode) -> Result<Vec<MappedTable>, ImportError> {
        let ds = Datasource::new(node);
        let mut tables = Vec::new();
        let mut calculations_assigned = false;

        for named in ds.named_connections() {
            let Some(member) = named.attr("name") else {
                continue;
            };
            let Some(sub) = member_datasource(&ds, named, member, !calculations_assigned) else {
                continue;
            };
            calculations_assigned = true;
            let category = DatasourceClassifier::classify_shape(&sub);
            debug!("Federated member '{}' of '{}' is {}", member, ds.caption(), category);
            tables.extend(self.map_as(&sub, category)?);
        }

        if tables.is_empty() {
            let category = DatasourceClassifier::classify_shape(node);
            info!(
                "No federated member matched in '{}', extracting directly as {}",
                ds.caption(),
                category
            );
            return self.map_as(node, category);
        }
        Ok(tables)
    }

    /// Hand columns, measures and hierarchies to the tables that own them.
    ///
    /// Columns go to the table owning their relation, then to the table named by a
    /// `[Table].[Column]` qualifier in their expression. Whatever is left goes to every
    /// table that received nothing, or to the first table when all received something.
    fn distribute(extracted: ExtractedColumns, mut slots: Vec<Slot>) -> Vec<Slot> {
        if slots.is_empty() {
            return slots;
        }
        let mut unassigned_columns: Vec<Column> = Vec::new();
        let mut unassigned_measures: Vec<Measure> = Vec::new();

        for ColumnCandidate { column, owner } in extracted.columns {
            match owning_slot(&slots, owner.as_deref(), &column.source_expression) {
                Some(i) => slots[i].table.add_column(column),
                None => unassigned_columns.push(column),
            }
        }
        for measure in extracted.measures {
            match owning_slot(&slots, None, &measure.expression) {
                Some(i) => slots[i].table.add_measure(measure),
                None => unassigned_measures.push(measure),
            }
        }

        if !unassigned_columns.is_empty() || !unassigned_measures.is_empty() {
            let unclaimed: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.table.columns.is_empty() && s.table.measures.is_empty())
                .map(|(i, _)| i)
                .collect();
            let targets = if unclaimed.is_empty() { vec![0] } else { unclaimed };
            for i in targets {
                for column in &unassigned_columns {
                    slots[i].table.add_column(column.clone());
                }
                for measure in &unassigned_measures {
                    slots[i].table.add_measure(measure.clone());
                }
            }
        }

        for hierarchy in extracted.hierarchies {
            if let Some(slot) = slots.iter_mut().find(|s| {
                hierarchy
                    .levels
                    .iter()
                    .all(|level| s.table.has_column(&level.column))
            }) {
                slot.table.hierarchies.push(hierarchy);
            }
        }
        slots
    }
}

fn owning_slot(slots: &[Slot], owner: Option<&str>, expression: &str) -> Option<usize> {
    if let Some(owner) = owner
        && let Some(i) = slots.iter().position(|s| s.owns(owner))
    {
        return Some(i);
    }
    if slots.len() == 1 && owner.is_none() {
        return Some(0);
    }
    RE_TABLE_QUALIFIER
        .captures(expression)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("]]", "]"))
        .and_then(|table| slots.iter().position(|s| s.owns(&table)))
}

/// Build the sub-datasource for one federated member, or `None` when no relation reads
/// from it
fn member_datasource(
    ds: &Datasource<'_>,
    named: &XmlNode,
    member: &str,
    with_calculations: bool,
) -> Option<XmlNode> {
    let relations: Vec<&XmlNode> = ds
        .top_relations()
        .into_iter()
        .filter(|r| references_member(r, member))
        .collect();
    if relations.is_empty() {
        return None;
    }

    let relation_names: HashSet<String> = relations
        .iter()
        .flat_map(|r| std::iter::once(*r).chain(r.descendants()))
        .filter(|n| is_relation(n))
        .map(|n| RelationInfo::from_node(n).name.to_lowercase())
        .collect();

    let mut connection = named.child("connection").cloned()?;
    connection.children.extend(relations.into_iter().cloned());
    let records: Vec<XmlNode> = ds
        .metadata_records()
        .into_iter()
        .filter(|record| {
            AttributeResolver::text(record, &specs::PARENT_NAME)
                .is_none_or(|parent| relation_names.contains(&parent.to_lowercase()))
        })
        .cloned()
        .collect();
    if !records.is_empty() {
        connection.children.push(XmlNode {
            name: "metadata-records".to_string(),
            children: records,
            ..Default::default()
        });
    }

    let mut sub = XmlNode::new("datasource");
    for key in ["name", "caption"] {
        if let Some(value) = ds.node.attr(key) {
            sub = sub.with_attr(key, value);
        }
    }
    sub = sub.with_child(connection);
    for column in ds.column_nodes() {
        let is_calculation = column.child("calculation").is_some();
        if is_calculation && !with_calculations {
            continue;
        }
        sub = sub.with_child(column.clone());
    }
    if let Some(drill_paths) = ds.node.child("drill-paths") {
        sub = sub.with_child(drill_paths.clone());
    }
    Some(sub)
}

fn references_member(relation: &XmlNode, member: &str) -> bool {
    std::iter::once(relation)
        .chain(relation.descendants())
        .any(|n| is_relation(n) && n.attr("connection") == Some(member))
}

/// Collapse whitespace and truncate to `max_len` characters, appending `...` when cut
pub fn query_preview(query: &str, max_len: usize) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_len {
        let cut: String = collapsed.chars().take(max_len).collect();
        format!("{}...", cut.trim_end())
    } else {
        collapsed
    }
}
