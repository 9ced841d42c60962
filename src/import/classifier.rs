//! Datasource classification
//!
//! Assigns each datasource one of seven structural categories. Rules are evaluated in a
//! fixed priority order and the first match wins:
//!
//! 1. connection class `federated`
//! 2. a parameter-domain column (or the workbook `Parameters` datasource)
//! 3. a raw-query (`text`) relation
//! 4. a join relation
//! 5. more than one table relation
//! 6. a spreadsheet-direct connection class
//! 7. single table

use super::datasource::Datasource;
use super::tree::XmlNode;
use crate::models::DatasourceCategory;
use tracing::debug;

/// Connection classes read as a single spreadsheet sheet
const SPREADSHEET_DIRECT_CLASSES: &[&str] = &["excel-direct", "excel"];

pub struct DatasourceClassifier;

impl DatasourceClassifier {
    /// Classify a datasource node. Never mutates the input.
    pub fn classify(node: &XmlNode) -> DatasourceCategory {
        let ds = Datasource::new(node);
        let category = if ds
            .connection_class()
            .is_some_and(|c| c.eq_ignore_ascii_case("federated"))
        {
            DatasourceCategory::Federated
        } else {
            Self::classify_view(&ds)
        };
        debug!("Classified datasource '{}' as {}", ds.caption(), category);
        category
    }

    /// Classify by relation shape only, skipping the federated rule.
    ///
    /// Used for federated members and for the direct-extraction fallback.
    pub fn classify_shape(node: &XmlNode) -> DatasourceCategory {
        Self::classify_view(&Datasource::new(node))
    }

    fn classify_view(ds: &Datasource<'_>) -> DatasourceCategory {
        if ds.is_parameters_datasource() || !ds.parameter_columns().is_empty() {
            return DatasourceCategory::Parameter;
        }
        if !ds.relations_of_kind("text").is_empty() {
            return DatasourceCategory::SqlQuery;
        }
        if !ds.relations_of_kind("join").is_empty() {
            return DatasourceCategory::MultiTableJoin;
        }
        if ds.relations_of_kind("table").len() > 1 {
            return DatasourceCategory::MultiTable;
        }
        if ds.connection_class().is_some_and(|class| {
            SPREADSHEET_DIRECT_CLASSES
                .iter()
                .any(|c| class.eq_ignore_ascii_case(c))
        }) {
            return DatasourceCategory::Excel;
        }
        DatasourceCategory::SingleTable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datasource(class: &str, relations: Vec<XmlNode>) -> XmlNode {
        let connection = relations
            .into_iter()
            .fold(XmlNode::new("connection").with_attr("class", class), |c, r| {
                c.with_child(r)
            });
        XmlNode::new("datasource")
            .with_attr("name", "ds")
            .with_child(connection)
    }

    fn table(name: &str) -> XmlNode {
        XmlNode::new("relation")
            .with_attr("name", name)
            .with_attr("type", "table")
            .with_attr("table", &format!("[dbo].[{}]", name))
    }

    #[test]
    fn federated_wins_over_everything() {
        let node = datasource("federated", vec![table("A"), table("B")]);
        assert_eq!(
            DatasourceClassifier::classify(&node),
            DatasourceCategory::Federated
        );
        assert_eq!(
            DatasourceClassifier::classify_shape(&node),
            DatasourceCategory::MultiTable
        );
    }

    #[test]
    fn parameter_column_wins_over_query() {
        let node = datasource(
            "sqlserver",
            vec![XmlNode::new("relation")
                .with_attr("type", "text")
                .with_text("SELECT 1")],
        )
        .with_child(
            XmlNode::new("column")
                .with_attr("name", "[Parameter 1]")
                .with_attr("param-domain-type", "list"),
        );
        assert_eq!(
            DatasourceClassifier::classify(&node),
            DatasourceCategory::Parameter
        );
    }

    #[test]
    fn query_inside_join_is_sql_query() {
        let join = XmlNode::new("relation")
            .with_attr("type", "join")
            .with_child(table("A"))
            .with_child(
                XmlNode::new("relation")
                    .with_attr("type", "text")
                    .with_attr("name", "Custom SQL Query")
                    .with_text("SELECT * FROM B"),
            );
        let node = datasource("postgres", vec![join]);
        assert_eq!(
            DatasourceClassifier::classify(&node),
            DatasourceCategory::SqlQuery
        );
    }

    #[test]
    fn join_then_multi_then_excel_then_single() {
        let join = XmlNode::new("relation")
            .with_attr("type", "join")
            .with_child(table("A"))
            .with_child(table("B"));
        assert_eq!(
            DatasourceClassifier::classify(&datasource("sqlserver", vec![join])),
            DatasourceCategory::MultiTableJoin
        );
        assert_eq!(
            DatasourceClassifier::classify(&datasource("sqlserver", vec![table("A"), table("B")])),
            DatasourceCategory::MultiTable
        );
        assert_eq!(
            DatasourceClassifier::classify(&datasource("excel-direct", vec![table("Sheet1$")])),
            DatasourceCategory::Excel
        );
        assert_eq!(
            DatasourceClassifier::classify(&datasource("sqlserver", vec![table("A")])),
            DatasourceCategory::SingleTable
        );
    }
}
