//! Calculation store and configuration tests

use bi_migration_sdk::config::{CONFIG_FILENAME, sample_config};
use bi_migration_sdk::models::{CalculationKey, CalculationRecord, CalculationStatus};
use bi_migration_sdk::{
    CalculationResolver, CalculationStore, IdentityTranslator, JsonFileStore, MigrationConfig,
    WorkbookMigrator, XmlNode,
};
use tempfile::tempdir;

const WORKBOOK: &str = r#"<workbook><datasources>
  <datasource name="federated.orders" caption="Orders">
    <connection class="sqlserver" server="db" dbname="shop">
      <relation name="Orders" type="table" table="[dbo].[Orders]">
        <columns><column name="Amount" datatype="real"/></columns>
      </relation>
    </connection>
    <column name="[Calculation_1]" caption="Total" role="measure">
      <calculation class="tableau" formula="SUM([Amount])"/>
    </column>
  </datasource>
</datasources></workbook>"#;

mod store_tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn resolver_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("calculations.json"));

        let mut resolver = CalculationResolver::default();
        let mut record =
            CalculationRecord::extracted("Orders", "Calculation_1", "Total", "SUM([Amount])", true);
        record.mark_converted("SUM('Orders'[Amount])".to_string());
        resolver.upsert(record);
        resolver.save(&store).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(document["calculations"].as_array().unwrap().len(), 1);

        let mut reloaded = CalculationResolver::default();
        assert_eq!(reloaded.load(&store).unwrap(), 1);
        let record = reloaded
            .get(&CalculationKey::new("Orders", "Calculation_1"))
            .unwrap();
        assert_eq!(record.status, CalculationStatus::Converted);
        assert_eq!(record.formula_target, "SUM('Orders'[Amount])");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calculations.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::new(&path).load().is_err());
    }

    #[test]
    fn successive_runs_share_the_store() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("calculations.json"));
        let root = XmlNode::parse(WORKBOOK).unwrap();
        let migrator =
            WorkbookMigrator::new(MigrationConfig::default(), Box::new(IdentityTranslator));

        let first = migrator.migrate_with_store("Sales", &root, &store).unwrap();
        let second = migrator.migrate_with_store("Sales", &root, &store).unwrap();

        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CalculationStatus::Converted);
        assert_eq!(
            first.tables[0].measures[0].expression,
            second.tables[0].measures[0].expression
        );
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn sample_config_parses_to_defaults() {
        let parsed = MigrationConfig::parse(sample_config()).unwrap();
        let defaults = MigrationConfig::default();
        assert_eq!(
            parsed.extraction.query_preview_length,
            defaults.extraction.query_preview_length
        );
        assert_eq!(parsed.dedup.jaccard_threshold, defaults.dedup.jaccard_threshold);
        assert_eq!(parsed.resolution.max_depth, defaults.resolution.max_depth);
        assert_eq!(parsed.store.calculations_file, defaults.store.calculations_file);
        assert!(parsed.translation.endpoint.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed = MigrationConfig::parse("[dedup]\njaccard_threshold = 0.9\n").unwrap();
        assert_eq!(parsed.dedup.jaccard_threshold, 0.9);
        assert_eq!(parsed.resolution.max_depth, 10);
        assert!(parsed.extraction.synthesize_stub_tables);
    }

    #[test]
    fn load_reads_the_directory_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[resolution]\nmax_depth = 4\n[store]\ncalculations_file = \"calcs.json\"\n",
        )
        .unwrap();
        let config = MigrationConfig::load(dir.path()).unwrap();
        assert_eq!(config.resolution.max_depth, 4);
        assert_eq!(
            config.calculations_path(dir.path()),
            dir.path().join("calcs.json")
        );
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[dedup]\njaccard_threshold = 1.5\n",
        )
        .unwrap();
        assert!(MigrationConfig::load(dir.path()).is_err());
    }
}
