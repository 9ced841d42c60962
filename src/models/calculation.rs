//! Calculation record model
//!
//! A calculation record tracks one calculated field from extraction through translation.
//! Records are keyed by `(table_name, tableau_name)` and persisted by a
//! [`CalculationStore`](crate::model::store::CalculationStore).

use super::enums::CalculationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite key of a calculation record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalculationKey {
    pub table_name: String,
    pub tableau_name: String,
}

impl CalculationKey {
    pub fn new(table_name: &str, tableau_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            tableau_name: tableau_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculationRecord {
    pub table_name: String,
    /// Internal identifier, e.g. `Calculation_1234`
    pub tableau_name: String,
    /// Display caption in the source workbook
    pub caption: String,
    pub formula_source: String,
    /// Translated formula; empty until translation succeeds
    #[serde(default)]
    pub formula_target: String,
    /// Name the calculation carries in the target model
    #[serde(default)]
    pub target_name: String,
    #[serde(default)]
    pub status: CalculationStatus,
    #[serde(default)]
    pub is_measure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CalculationRecord {
    /// Create a freshly extracted record. The target name defaults to the caption.
    pub fn extracted(
        table_name: &str,
        tableau_name: &str,
        caption: &str,
        formula_source: &str,
        is_measure: bool,
    ) -> Self {
        Self {
            table_name: table_name.to_string(),
            tableau_name: tableau_name.to_string(),
            caption: caption.to_string(),
            formula_source: formula_source.to_string(),
            formula_target: String::new(),
            target_name: caption.to_string(),
            status: CalculationStatus::Extracted,
            is_measure,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn key(&self) -> CalculationKey {
        CalculationKey::new(&self.table_name, &self.tableau_name)
    }

    pub fn mark_converted(&mut self, formula_target: String) {
        self.formula_target = formula_target;
        self.status = CalculationStatus::Converted;
        self.updated_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error_expression: String) {
        self.formula_target = error_expression;
        self.status = CalculationStatus::Failed;
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut record =
            CalculationRecord::extracted("Orders", "Calculation_1", "Margin", "[A]/[B]", false);
        assert_eq!(record.status, CalculationStatus::Extracted);
        assert_eq!(record.target_name, "Margin");

        record.mark_converted("DIVIDE([A], [B])".to_string());
        assert_eq!(record.status, CalculationStatus::Converted);
        assert_eq!(record.formula_target, "DIVIDE([A], [B])");
    }

    #[test]
    fn deserializes_minimal_record() {
        let json = r#"{
            "table_name": "Orders",
            "tableau_name": "Calculation_7",
            "caption": "Profit Ratio",
            "formula_source": "SUM([Profit])/SUM([Sales])",
            "status": "converted"
        }"#;
        let record: CalculationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, CalculationStatus::Converted);
        assert!(record.formula_target.is_empty());
        assert!(record.updated_at.is_none());
    }
}
