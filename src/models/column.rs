//! Column and measure models

use super::enums::{DataType, SummarizeBy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Annotation recording whether `summarize_by` was chosen by a user or derived
pub const SUMMARIZATION_SET_BY: &str = "SummarizationSetBy";

/// Column model representing a field in a table
///
/// Physical columns carry the raw source name in `source_expression`; calculated columns
/// carry their (resolved) formula and must have a `tableau_name` distinct from the
/// display name.
///
/// # Example
///
/// ```rust
/// use bi_migration_sdk::models::{Column, DataType, SummarizeBy};
///
/// let column = Column::new("Sales".to_string(), DataType::Double);
/// assert_eq!(column.source_expression, "Sales");
/// assert_eq!(column.summarize_by, SummarizeBy::Sum);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Display name of the column
    pub source_name: String,
    /// Target data type
    pub datatype: DataType,
    /// Raw column name, or the formula of a calculated column
    pub source_expression: String,
    /// Whether the column is computed from a formula
    #[serde(default)]
    pub is_calculated: bool,
    /// Default aggregation
    #[serde(default)]
    pub summarize_by: SummarizeBy,
    /// Internal calculation identifier (calculated columns only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tableau_name: Option<String>,
    /// Column description/documentation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the column is hidden from report authors
    #[serde(default)]
    pub is_hidden: bool,
    /// Deterministic lineage tag, assigned once the owning table is final
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage_tag: Option<Uuid>,
    /// Open key/value annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Column {
    /// Create a physical column whose source expression is its own name.
    ///
    /// `summarize_by` defaults to `sum` for numeric types and `none` otherwise.
    pub fn new(source_name: String, datatype: DataType) -> Self {
        let summarize_by = default_summarize_by(datatype, false);
        let mut annotations = BTreeMap::new();
        annotations.insert(SUMMARIZATION_SET_BY.to_string(), "Automatic".to_string());
        Self {
            source_expression: source_name.clone(),
            source_name,
            datatype,
            is_calculated: false,
            summarize_by,
            tableau_name: None,
            description: None,
            is_hidden: false,
            lineage_tag: None,
            annotations,
        }
    }

    /// Create a calculated column from a formula
    pub fn calculated(
        source_name: String,
        datatype: DataType,
        formula: String,
        tableau_name: String,
    ) -> Self {
        let mut column = Self::new(source_name, datatype);
        column.source_expression = formula;
        column.is_calculated = true;
        column.summarize_by = SummarizeBy::None;
        column.tableau_name = Some(tableau_name);
        column
    }

    /// Apply an explicit aggregation chosen in the source document
    pub fn set_explicit_summarization(&mut self, summarize_by: SummarizeBy) {
        self.summarize_by = summarize_by;
        self.annotations
            .insert(SUMMARIZATION_SET_BY.to_string(), "User".to_string());
    }

    /// Lower-cased name used for every name comparison
    pub fn key(&self) -> String {
        self.source_name.to_lowercase()
    }
}

/// `sum` for numeric physical columns, `none` for everything else
pub fn default_summarize_by(datatype: DataType, is_calculated: bool) -> SummarizeBy {
    if datatype.is_numeric() && !is_calculated {
        SummarizeBy::Sum
    } else {
        SummarizeBy::None
    }
}

/// Measure model: an aggregate expression evaluated in filter context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    /// Display name of the measure
    pub source_name: String,
    /// Target-language formula
    pub expression: String,
    /// Internal calculation identifier; always present and distinct from `source_name`
    pub tableau_name: String,
    /// Formula as written in the source workbook
    #[serde(default)]
    pub formula_source: String,
    /// Measure description/documentation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the measure is hidden from report authors
    #[serde(default)]
    pub is_hidden: bool,
}

impl Measure {
    /// Create a measure whose expression starts out as the source formula
    pub fn new(source_name: String, formula: String, tableau_name: String) -> Self {
        Self {
            source_name,
            expression: formula.clone(),
            tableau_name,
            formula_source: formula,
            description: None,
            is_hidden: false,
        }
    }

    /// Lower-cased name used for every name comparison
    pub fn key(&self) -> String {
        self.source_name.to_lowercase()
    }
}
