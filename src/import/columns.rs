//! Column extraction
//!
//! Three independent strategies run over one datasource:
//!
//! - calculated fields (`column` elements with a `calculation`), producing calculated
//!   columns and measures
//! - columns declared on tabular relations
//! - `metadata-record` catalog entries
//!
//! Results are merged in that priority order, first writer wins by lower-cased name.
//! Plain datasource `column` elements then act as overrides (caption, hidden flag,
//! description, explicit aggregation) on the merged candidates.

use super::ImportError;
use super::attributes::{AttributeResolver, specs, strip_brackets};
use super::connections::ConnectionRegistry;
use super::datasource::{Datasource, RelationInfo};
use super::datatypes::metadata_record_type;
use super::tree::XmlNode;
use crate::models::column::default_summarize_by;
use crate::models::{Column, DataType, Hierarchy, HierarchyLevel, Measure, SummarizeBy};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Formula prefixes that mark a calculation as an aggregate measure
const AGGREGATE_PREFIXES: &[&str] = &[
    "SUM(", "AVERAGE(", "AVG(", "COUNT(", "MIN(", "MAX(", "COUNTD(", "ATTR(",
];

/// A column plus the relation it was declared on, when known
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCandidate {
    pub column: Column,
    /// Name of the owning relation
    pub owner: Option<String>,
}

impl ColumnCandidate {
    pub fn new(column: Column, owner: Option<String>) -> Self {
        Self { column, owner }
    }
}

/// Merged output of all strategies for one datasource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedColumns {
    pub columns: Vec<ColumnCandidate>,
    pub measures: Vec<Measure>,
    pub hierarchies: Vec<Hierarchy>,
}

impl ExtractedColumns {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.measures.is_empty()
    }

    /// Internal identifiers of every calculated column and measure
    pub fn calculation_ids(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|c| c.column.tableau_name.clone())
            .chain(self.measures.iter().map(|m| m.tableau_name.clone()))
            .collect()
    }
}

/// Whether a formula starts with a recognized aggregate function
pub fn is_aggregate_formula(formula: &str) -> bool {
    let upper = formula.trim_start().to_uppercase();
    AGGREGATE_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub struct ColumnExtractor<'r> {
    registry: &'r ConnectionRegistry,
}

impl<'r> ColumnExtractor<'r> {
    pub fn new(registry: &'r ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Run every strategy over a datasource and merge the results.
    ///
    /// # Errors
    ///
    /// Fails only when a relation's connection class has no handler.
    pub fn extract(&self, ds: &Datasource<'_>) -> Result<ExtractedColumns, ImportError> {
        let (calculated, measures) = calculated_fields(ds);
        let relation = self.relation_strategy(ds)?;
        let metadata = metadata_columns(ds);

        let mut columns = merge_candidates([calculated, relation, metadata]);

        // A measure whose caption is already taken by a column is dropped
        let mut taken: HashSet<String> = columns.iter().map(|c| c.column.key()).collect();
        let measures = measures
            .into_iter()
            .filter(|m| {
                let fresh = taken.insert(m.key());
                if !fresh {
                    debug!("Measure '{}' shadowed by an earlier column", m.source_name);
                }
                fresh
            })
            .collect();

        apply_overrides(ds, &mut columns);
        let hierarchies = hierarchies(ds, &columns);

        Ok(ExtractedColumns {
            columns,
            measures,
            hierarchies,
        })
    }

    fn relation_strategy(&self, ds: &Datasource<'_>) -> Result<Vec<ColumnCandidate>, ImportError> {
        let mut out = Vec::new();
        for node in ds.leaf_relations() {
            if node.child("columns").is_none() {
                continue;
            }
            let info = RelationInfo::from_node(node);
            let class = ds
                .connection_for(&info)
                .map(|c| c.class)
                .unwrap_or_default();
            let handler = self.registry.handler_for(&class, &ds.caption())?;
            out.extend(handler.extract_columns(node));
        }
        Ok(out)
    }
}

/// Calculated-field strategy: calculated columns and measures.
///
/// Candidates without a caption, with a caption equal to the internal identifier, or with
/// an identifier already seen are rejected with a warning.
pub fn calculated_fields(ds: &Datasource<'_>) -> (Vec<ColumnCandidate>, Vec<Measure>) {
    let mut columns = Vec::new();
    let mut measures = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for node in ds.column_nodes() {
        if AttributeResolver::text(node, &specs::PARAMETER_DOMAIN).is_some() {
            continue;
        }
        let Some(formula) = AttributeResolver::text(node, &specs::CALCULATION_FORMULA) else {
            continue;
        };
        let Some(id) = AttributeResolver::text(node, &specs::COLUMN_NAME) else {
            warn!("Calculated field without internal identifier skipped: {}", formula);
            continue;
        };
        let Some(caption) = AttributeResolver::text(node, &specs::COLUMN_CAPTION) else {
            warn!("Calculated field '{}' has no caption, skipped", id);
            continue;
        };
        if caption == id {
            warn!("Calculated field '{}' has no identifier distinct from its caption, skipped", id);
            continue;
        }
        if !seen_ids.insert(id.clone()) {
            warn!("Duplicate calculated field identifier '{}' skipped", id);
            continue;
        }

        let description = AttributeResolver::text(node, &specs::COLUMN_DESCRIPTION);
        let hidden = AttributeResolver::boolean(node, &specs::COLUMN_HIDDEN);
        let is_measure = AttributeResolver::text(node, &specs::COLUMN_ROLE)
            .is_some_and(|r| r.eq_ignore_ascii_case("measure"))
            || is_aggregate_formula(&formula);

        if is_measure {
            let mut measure = Measure::new(caption, formula, id);
            measure.description = description;
            measure.is_hidden = hidden;
            measures.push(measure);
        } else {
            let datatype =
                AttributeResolver::datatype(node, &specs::COLUMN_DATATYPE).unwrap_or_default();
            let mut column = Column::calculated(caption, datatype, formula, id);
            column.description = description;
            column.is_hidden = hidden;
            columns.push(ColumnCandidate::new(column, None));
        }
    }
    (columns, measures)
}

/// Relation-column strategy: `columns/column` entries declared on one relation
pub fn relation_columns(relation: &XmlNode, owner: &str) -> Vec<ColumnCandidate> {
    let Some(columns) = relation.child("columns") else {
        return Vec::new();
    };
    columns
        .children_named("column")
        .filter_map(|node| {
            let name = AttributeResolver::text(node, &specs::COLUMN_NAME)?;
            let datatype =
                AttributeResolver::datatype(node, &specs::COLUMN_DATATYPE).unwrap_or_default();
            let owner = Some(owner.to_string()).filter(|o| !o.is_empty());
            Some(ColumnCandidate::new(Column::new(name, datatype), owner))
        })
        .collect()
}

/// Metadata-record strategy: display name from `local-name`, source name from
/// `remote-name`, owner from `parent-name`
pub fn metadata_columns(ds: &Datasource<'_>) -> Vec<ColumnCandidate> {
    ds.metadata_records()
        .into_iter()
        .filter_map(|record| {
            let remote = AttributeResolver::text(record, &specs::REMOTE_NAME);
            let local = AttributeResolver::text(record, &specs::LOCAL_NAME);
            let display = local.clone().or_else(|| remote.clone())?;
            let mut column = Column::new(display.clone(), metadata_record_type(record));
            column.source_expression = remote.unwrap_or(display);
            let owner = AttributeResolver::text(record, &specs::PARENT_NAME);
            Some(ColumnCandidate::new(column, owner))
        })
        .collect()
}

/// Merge strategy outputs, first writer wins.
///
/// Two candidates with the same name but different known owners are both kept: they are
/// distinct physical columns and the table mapper separates them. Physical candidates
/// with the same owner and source expression are collapsed even when display names
/// differ.
pub fn merge_candidates<const N: usize>(sources: [Vec<ColumnCandidate>; N]) -> Vec<ColumnCandidate> {
    let mut merged: Vec<ColumnCandidate> = Vec::new();
    for candidate in sources.into_iter().flatten() {
        let key = candidate.column.key();
        let duplicate = merged.iter().any(|existing| {
            let same_owner = match (&existing.owner, &candidate.owner) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            };
            if !same_owner {
                return false;
            }
            existing.column.key() == key
                || (!existing.column.is_calculated
                    && !candidate.column.is_calculated
                    && existing.column.source_expression.to_lowercase()
                        == candidate.column.source_expression.to_lowercase())
        });
        if duplicate {
            continue;
        }
        merged.push(candidate);
    }
    merged
}

/// Apply plain datasource `column` elements to matching physical candidates
fn apply_overrides(ds: &Datasource<'_>, columns: &mut [ColumnCandidate]) {
    for node in ds.column_nodes() {
        if node.child("calculation").is_some()
            || AttributeResolver::text(node, &specs::PARAMETER_DOMAIN).is_some()
        {
            continue;
        }
        let Some(name) = AttributeResolver::text(node, &specs::COLUMN_NAME) else {
            continue;
        };
        let key = name.to_lowercase();
        for candidate in columns.iter_mut().filter(|c| {
            !c.column.is_calculated
                && (c.column.key() == key || c.column.source_expression.to_lowercase() == key)
        }) {
            let column = &mut candidate.column;
            if let Some(caption) = AttributeResolver::text(node, &specs::COLUMN_CAPTION) {
                column.source_name = caption;
            }
            if AttributeResolver::boolean(node, &specs::COLUMN_HIDDEN) {
                column.is_hidden = true;
            }
            if let Some(description) = AttributeResolver::text(node, &specs::COLUMN_DESCRIPTION) {
                column.description = Some(description);
            }
            if column.datatype == DataType::String
                && let Some(datatype) = node
                    .attr("datatype")
                    .and_then(DataType::from_source_name)
            {
                column.datatype = datatype;
                column.summarize_by = default_summarize_by(datatype, false);
            }
            if let Some(summarize_by) = AttributeResolver::text(node, &specs::COLUMN_AGGREGATION)
                .as_deref()
                .and_then(SummarizeBy::from_aggregation)
            {
                column.set_explicit_summarization(summarize_by);
            }
        }
    }
}

/// Hierarchies from `drill-path` elements. Levels refer to candidate columns by display
/// name; paths with an unknown field are dropped.
fn hierarchies(ds: &Datasource<'_>, columns: &[ColumnCandidate]) -> Vec<Hierarchy> {
    ds.drill_paths()
        .into_iter()
        .filter_map(|path| {
            let name = path.attr("name").map(strip_brackets)?;
            let levels: Option<Vec<HierarchyLevel>> = path
                .children_named("field")
                .map(|field| {
                    let reference = strip_brackets(field.text()).to_lowercase();
                    columns
                        .iter()
                        .find(|c| {
                            c.column.key() == reference
                                || c.column.source_expression.to_lowercase() == reference
                        })
                        .map(|c| HierarchyLevel {
                            name: c.column.source_name.clone(),
                            column: c.column.source_name.clone(),
                        })
                })
                .collect();
            match levels {
                Some(levels) if !levels.is_empty() => Some(Hierarchy { name, levels }),
                _ => {
                    debug!("Drill path '{}' references unknown fields, skipped", name);
                    None
                }
            }
        })
        .collect()
}
