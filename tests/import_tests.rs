//! Import module tests

use bi_migration_sdk::import::relationships::recover_query_table;
use bi_migration_sdk::import::{
    ConnectionRegistry, Datasource, DatasourceClassifier, ImportError, RelationshipExtractor,
    TableMapper, XmlNode, workbook_datasources,
};
use bi_migration_sdk::models::{CrossFilterBehavior, DataType, DatasourceCategory, SummarizeBy};

const ORDER_FACTS: &str = r#"
<datasource name="federated.q1" caption="Order Facts">
  <connection class="postgres" server="pg01" dbname="sales">
    <relation type="join" join="left">
      <clause type="join">
        <expression op="=">
          <expression op="[Custom SQL Query].[customer_id]"/>
          <expression op="[customers].[id]"/>
        </expression>
      </clause>
      <relation name="Custom SQL Query" type="text">SELECT o.order_id, o.customer_id, o.amount
        FROM public.orders o WHERE o.amount &gt; 0</relation>
      <relation name="customers" type="table" table="[public].[customers]">
        <columns>
          <column name="id" datatype="integer"/>
          <column name="name" datatype="string"/>
        </columns>
      </relation>
    </relation>
    <metadata-records>
      <metadata-record class="column">
        <remote-name>order_id</remote-name>
        <local-name>[order_id]</local-name>
        <parent-name>[Custom SQL Query]</parent-name>
        <local-type>integer</local-type>
      </metadata-record>
      <metadata-record class="column">
        <remote-name>customer_id</remote-name>
        <local-name>[customer_id]</local-name>
        <parent-name>[Custom SQL Query]</parent-name>
        <local-type>integer</local-type>
      </metadata-record>
      <metadata-record class="column">
        <remote-name>amount</remote-name>
        <local-name>[amount]</local-name>
        <parent-name>[Custom SQL Query]</parent-name>
        <local-type>real</local-type>
      </metadata-record>
    </metadata-records>
  </connection>
</datasource>"#;

fn single_table(caption: &str, relation: &str, columns: &[&str]) -> String {
    let cols: String = columns
        .iter()
        .map(|c| format!(r#"<column name="{}" datatype="string"/>"#, c))
        .collect();
    format!(
        r#"<datasource name="federated.{caption}" caption="{caption}">
             <connection class="sqlserver" server="db" dbname="shop">
               <relation name="{relation}" type="table" table="[dbo].[{relation}]">
                 <columns>{cols}</columns>
               </relation>
             </connection>
           </datasource>"#
    )
}

mod classification_tests {
    use super::*;

    #[test]
    fn query_datasource_is_sql_query() {
        let node = XmlNode::parse(ORDER_FACTS).unwrap();
        assert_eq!(DatasourceClassifier::classify(&node), DatasourceCategory::SqlQuery);
    }

    #[test]
    fn shapes_are_classified_by_priority() {
        let excel = XmlNode::parse(
            r#"<datasource name="x" caption="Sheet">
                 <connection class="excel-direct" filename="C:/book.xlsx">
                   <relation name="Sheet1$" type="table" table="[Sheet1$]"/>
                 </connection>
               </datasource>"#,
        )
        .unwrap();
        assert_eq!(DatasourceClassifier::classify(&excel), DatasourceCategory::Excel);

        let single = XmlNode::parse(&single_table("Orders", "Orders", &["id"])).unwrap();
        assert_eq!(DatasourceClassifier::classify(&single), DatasourceCategory::SingleTable);

        let params = XmlNode::parse(r#"<datasource name="Parameters" hasconnection="false"/>"#).unwrap();
        assert_eq!(DatasourceClassifier::classify(&params), DatasourceCategory::Parameter);
    }

    #[test]
    fn classification_does_not_mutate_input() {
        let node = XmlNode::parse(ORDER_FACTS).unwrap();
        let before = node.clone();
        let _ = DatasourceClassifier::classify(&node);
        assert_eq!(node, before);
    }
}

mod table_mapping_tests {
    use super::*;

    #[test]
    fn standalone_query_table_carries_preview() {
        let node = XmlNode::parse(
            r#"<datasource name="federated.q2" caption="Big Orders">
                 <connection class="sqlserver" server="db" dbname="shop">
                   <relation name="Custom SQL Query" type="text">SELECT   id,
                     amount FROM dbo.Orders</relation>
                 </connection>
               </datasource>"#,
        )
        .unwrap();
        let registry = ConnectionRegistry::with_defaults();
        let mut mapper = TableMapper::new(&registry, 200);
        let tables = mapper.map(&node).unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].category, DatasourceCategory::SqlQuery);
        assert_eq!(tables[0].table.source_name, "Big Orders");
        assert_eq!(
            tables[0].table.description.as_deref(),
            Some("Custom SQL query: SELECT id, amount FROM dbo.Orders")
        );
    }

    #[test]
    fn joined_query_is_named_after_its_from_table() {
        let node = XmlNode::parse(ORDER_FACTS).unwrap();
        let registry = ConnectionRegistry::with_defaults();
        let mut mapper = TableMapper::new(&registry, 200);
        let tables = mapper.map(&node).unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.table.source_name.as_str()).collect();
        assert_eq!(names, vec!["orders", "customers"]);
        let orders = &tables[0].table;
        assert!(orders.has_column("order_id"));
        assert!(orders.has_column("amount"));
        assert!(
            orders
                .description
                .as_deref()
                .is_some_and(|d| d.starts_with("Custom SQL query: SELECT o.order_id"))
        );
        assert!(tables[1].table.has_column("name"));
    }

    #[test]
    fn same_caption_is_suffixed() {
        let registry = ConnectionRegistry::with_defaults();
        let mut mapper = TableMapper::new(&registry, 200);
        let first = XmlNode::parse(&single_table("Orders", "Orders", &["id"])).unwrap();
        let second = XmlNode::parse(&single_table("Orders", "OrdersArchive", &["id"])).unwrap();

        assert_eq!(mapper.map(&first).unwrap()[0].table.source_name, "Orders");
        assert_eq!(mapper.map(&second).unwrap()[0].table.source_name, "Orders_1");
    }

    #[test]
    fn numeric_physical_columns_summarize_by_sum() {
        let node = XmlNode::parse(ORDER_FACTS).unwrap();
        let registry = ConnectionRegistry::with_defaults();
        let tables = TableMapper::new(&registry, 200).map(&node).unwrap();
        let amount = tables[0]
            .table
            .columns
            .iter()
            .find(|c| c.source_name == "amount")
            .unwrap();
        assert_eq!(amount.datatype, DataType::Double);
        assert_eq!(amount.summarize_by, SummarizeBy::Sum);
    }

    #[test]
    fn empty_connection_class_is_an_error() {
        let node = XmlNode::parse(
            r#"<datasource name="x" caption="Odd">
                 <connection class="">
                   <relation name="T" type="table" table="[T]"><columns><column name="a"/></columns></relation>
                 </connection>
               </datasource>"#,
        )
        .unwrap();
        let registry = ConnectionRegistry::with_defaults();
        let result = TableMapper::new(&registry, 200).map(&node);
        assert!(matches!(result, Err(ImportError::MissingConnection { .. })));
    }
}

mod relationship_tests {
    use super::*;

    #[test]
    fn query_placeholder_resolves_through_from_clause() {
        let node = XmlNode::parse(ORDER_FACTS).unwrap();
        let rels = RelationshipExtractor::extract(&Datasource::new(&node));
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].from_table, "orders");
        assert_eq!(rels[0].from_column, "customer_id");
        assert_eq!(rels[0].to_table, "customers");
        assert_eq!(rels[0].cross_filter_behavior, CrossFilterBehavior::OneDirection);
        assert!(rels[0].is_active);
    }

    #[test]
    fn from_table_recovery() {
        assert_eq!(
            recover_query_table("SELECT * FROM [dbo].[Sales Data] s").as_deref(),
            Some("Sales Data")
        );
        assert_eq!(
            recover_query_table("SELECT * FROM sales.events e WHERE e.kind = 1").as_deref(),
            Some("events")
        );
        assert_eq!(
            recover_query_table("SELEKT nonsense FROM [raw].[Clicks] WHERE ((").as_deref(),
            Some("Clicks")
        );
    }

    #[test]
    fn malformed_operands_are_skipped() {
        let node = XmlNode::parse(
            r#"<datasource name="x" caption="J">
                 <connection class="sqlserver">
                   <relation type="join" join="inner">
                     <clause type="join">
                       <expression op="=">
                         <expression op="[A].[x]"/>
                         <expression op="y"/>
                       </expression>
                     </clause>
                     <relation name="A" type="table" table="[A]"/>
                     <relation name="B" type="table" table="[B]"/>
                   </relation>
                 </connection>
               </datasource>"#,
        )
        .unwrap();
        assert!(RelationshipExtractor::extract(&Datasource::new(&node)).is_empty());
    }
}

#[test]
fn workbook_datasources_in_document_order() {
    let xml = format!(
        "<workbook><datasources>{}{}</datasources></workbook>",
        single_table("A", "A", &["x"]),
        single_table("B", "B", &["y"])
    );
    let root = XmlNode::parse(&xml).unwrap();
    let captions: Vec<String> = workbook_datasources(&root)
        .into_iter()
        .map(|n| Datasource::new(n).caption())
        .collect();
    assert_eq!(captions, vec!["A".to_string(), "B".to_string()]);
}
