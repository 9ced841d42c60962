//! Enums for the semantic model
//!
//! # Serde Casing Conventions
//!
//! The enums in this module use different serde `rename_all` strategies based on where
//! their values end up:
//!
//! - `camelCase`: values written into the target semantic model (DataType, SummarizeBy,
//!   CrossFilterBehavior, Cardinality)
//! - `snake_case`: internal classification values (DatasourceCategory, ConnectionCategory)
//! - `lowercase`: persisted lifecycle states (CalculationStatus)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target column data type.
///
/// `String` doubles as the "unknown" type: it is the fallback whenever a source type can
/// not be mapped, and any other type displaces it when tables are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    #[default]
    String,
    Int64,
    Double,
    Decimal,
    DateTime,
    Boolean,
}

impl DataType {
    /// Whether values of this type can be summed
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Double | DataType::Decimal)
    }

    /// Map a source datatype name (`integer`, `real`, `datetime`, ...) to a target type.
    ///
    /// Returns `None` for names that have no mapping so callers can fall through to the
    /// next type source.
    pub fn from_source_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "string" | "str" | "wstr" | "text" => Some(DataType::String),
            "integer" | "int" | "int64" | "i8" | "i4" | "i2" | "long" => Some(DataType::Int64),
            "real" | "double" | "float" | "r8" | "r4" => Some(DataType::Double),
            "decimal" | "numeric" | "currency" | "number" => Some(DataType::Decimal),
            "date" | "datetime" | "date_time" | "timestamp" | "time" => Some(DataType::DateTime),
            "boolean" | "bool" => Some(DataType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::String => "string",
            DataType::Int64 => "int64",
            DataType::Double => "double",
            DataType::Decimal => "decimal",
            DataType::DateTime => "dateTime",
            DataType::Boolean => "boolean",
        };
        write!(f, "{}", s)
    }
}

/// Default aggregation applied to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SummarizeBy {
    Sum,
    #[default]
    None,
    Count,
    Min,
    Max,
    Average,
    DistinctCount,
}

impl SummarizeBy {
    /// Parse a source aggregation keyword (`Sum`, `Avg`, `CountD`, ...)
    pub fn from_aggregation(aggregation: &str) -> Option<Self> {
        match aggregation.trim().to_lowercase().as_str() {
            "sum" => Some(SummarizeBy::Sum),
            "none" | "attr" => Some(SummarizeBy::None),
            "count" | "cnt" => Some(SummarizeBy::Count),
            "min" => Some(SummarizeBy::Min),
            "max" => Some(SummarizeBy::Max),
            "avg" | "average" => Some(SummarizeBy::Average),
            "countd" | "distinctcount" | "cntd" => Some(SummarizeBy::DistinctCount),
            _ => None,
        }
    }
}

/// Cardinality of the "from" side of a relationship. The "to" side is always one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    #[default]
    Many,
    One,
}

/// How filters propagate across a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrossFilterBehavior {
    #[default]
    OneDirection,
    BothDirections,
}

impl CrossFilterBehavior {
    /// Derive the behaviour from a join type attribute (`inner`, `left`, ...)
    pub fn from_join_type(join_type: Option<&str>) -> Self {
        match join_type.map(|j| j.trim().to_lowercase()) {
            Some(ref j) if j == "inner" => CrossFilterBehavior::BothDirections,
            _ => CrossFilterBehavior::OneDirection,
        }
    }
}

/// Structural shape of a datasource, in classification priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceCategory {
    Federated,
    Parameter,
    SqlQuery,
    MultiTableJoin,
    MultiTable,
    Excel,
    SingleTable,
}

impl fmt::Display for DatasourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatasourceCategory::Federated => "federated",
            DatasourceCategory::Parameter => "parameter",
            DatasourceCategory::SqlQuery => "sql_query",
            DatasourceCategory::MultiTableJoin => "multi_table_join",
            DatasourceCategory::MultiTable => "multi_table",
            DatasourceCategory::Excel => "excel",
            DatasourceCategory::SingleTable => "single_table",
        };
        write!(f, "{}", s)
    }
}

/// Family of a physical connection, used to pick a connection handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionCategory {
    Spreadsheet,
    Relational,
    Generic,
}

impl fmt::Display for ConnectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionCategory::Spreadsheet => "spreadsheet",
            ConnectionCategory::Relational => "relational",
            ConnectionCategory::Generic => "generic",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a calculation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationStatus {
    #[default]
    Extracted,
    Converted,
    Failed,
}
