//! End-to-end workbook migration
//!
//! Runs the pipeline over every datasource of a workbook:
//!
//! 1. classify and map tables, extract and attach partitions, extract join relationships
//! 2. deduplicate relationships and tables
//! 3. enforce referential integrity and deactivate ambiguous relationship paths
//! 4. register calculation records, translate new formulas, resolve references
//! 5. assign lineage tags

use super::MigrationError;
use super::calculations::CalculationResolver;
use super::dedup::TableDeduplicator;
use super::translation::{
    ExpressionTranslator, IdentityTranslator, TranslationClient, TranslationRequest,
    error_marker,
};
use crate::config::MigrationConfig;
use crate::import::partitions::attach_partitions;
use crate::import::{
    ConnectionRegistry, Datasource, DatasourceClassifier, ImportError, PartitionExtractor,
    RelationshipExtractor, TableMapper, XmlNode, workbook_datasources,
};
use crate::model::store::CalculationStore;
use crate::models::{
    CalculationKey, CalculationRecord, CalculationStatus, DatasourceCategory, Relationship,
    SemanticModel, Table,
};
use crate::validation::{RelationshipValidator, TableValidator};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A calculated column or measure awaiting translation
struct CalculatedMember {
    tableau_name: String,
    name: String,
    formula: String,
    is_measure: bool,
}

/// Workbook-to-semantic-model pipeline
pub struct WorkbookMigrator {
    config: MigrationConfig,
    registry: ConnectionRegistry,
    client: TranslationClient,
}

impl WorkbookMigrator {
    /// Create a migrator around a translation backend, retried per the configuration
    pub fn new(config: MigrationConfig, translator: Box<dyn ExpressionTranslator>) -> Self {
        let client = TranslationClient::new(translator, config.retry_policy());
        Self {
            config,
            registry: ConnectionRegistry::with_defaults(),
            client,
        }
    }

    /// Create a migrator whose backend follows the configuration: the HTTP translator
    /// when an endpoint is set and the `api-backend` feature is enabled, otherwise the
    /// identity translator.
    pub fn from_config(config: MigrationConfig) -> Self {
        #[cfg(feature = "api-backend")]
        {
            if let Some(endpoint) = config.translation.endpoint.clone() {
                info!("Translating formulas through {}", endpoint);
                let translator = super::translation::HttpTranslator::new(&endpoint);
                return Self::new(config, Box::new(translator));
            }
        }
        if config.translation.endpoint.is_some() {
            warn!("Translation endpoint configured but HTTP support is not compiled in");
        }
        info!("Using identity translation (formulas are copied unchanged)");
        Self::new(config, Box::new(IdentityTranslator))
    }

    /// Replace the connection handler table
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load records from `store`, migrate, and save the records back
    pub fn migrate_with_store(
        &self,
        name: &str,
        root: &XmlNode,
        store: &dyn CalculationStore,
    ) -> Result<SemanticModel, MigrationError> {
        let mut resolver = CalculationResolver::new(self.config.resolution.max_depth);
        resolver.load(store)?;
        let model = self.migrate(name, root, &mut resolver)?;
        resolver.save(store)?;
        Ok(model)
    }

    /// Migrate a workbook (or a single `datasource` element)
    ///
    /// # Errors
    ///
    /// A datasource without a connection, or whose connection class has no handler, fails
    /// the whole run. Translation failures only mark the affected expression.
    pub fn migrate(
        &self,
        name: &str,
        root: &XmlNode,
        resolver: &mut CalculationResolver,
    ) -> Result<SemanticModel, MigrationError> {
        let mut mapper = TableMapper::new(&self.registry, self.config.extraction.query_preview_length);
        let partitions = PartitionExtractor::new(&self.registry, &self.client);
        let mut tables: Vec<(usize, Table)> = Vec::new();
        let mut relationships: Vec<(usize, Relationship)> = Vec::new();

        for (origin, node) in workbook_datasources(root).into_iter().enumerate() {
            let ds = Datasource::new(node);
            let category = DatasourceClassifier::classify(node);
            if category == DatasourceCategory::Parameter {
                let mapped = mapper.map_as(node, category)?;
                tables.extend(mapped.into_iter().map(|m| (origin, m.table)));
                continue;
            }
            if ds.connection().is_none() {
                return Err(ImportError::MissingConnection {
                    datasource: ds.caption(),
                }
                .into());
            }

            let mut mapped = mapper.map_as(node, category)?;
            let extracted = partitions.extract(&ds)?;
            attach_partitions(&mut mapped, &extracted);
            relationships.extend(
                RelationshipExtractor::extract(&ds)
                    .into_iter()
                    .map(|r| (origin, r)),
            );
            info!(
                "Datasource '{}' ({}): {} table(s), {} partition(s)",
                ds.caption(),
                category,
                mapped.len(),
                extracted.len()
            );
            tables.extend(mapped.into_iter().map(|m| (origin, m.table)));
        }

        let relationship_tables: HashSet<String> = relationships
            .iter()
            .flat_map(|(_, r)| [r.from_table.clone(), r.to_table.clone()])
            .collect();
        let (mut tables, renames) = TableDeduplicator::new(self.config.dedup.jaccard_threshold)
            .deduplicate_sourced(tables, &relationship_tables);
        // Renamed tables take the relationships of their own datasource with them
        let mut relationships = RelationshipExtractor::dedup(
            relationships
                .into_iter()
                .map(|(origin, mut r)| {
                    renames.apply(origin, &mut r);
                    r
                })
                .collect(),
        );

        self.validate(&mut tables, &mut relationships)?;
        self.convert_calculations(&mut tables, resolver);

        for table in &mut tables {
            table.assign_lineage_tags();
        }

        let mut model = SemanticModel::new(name.to_string());
        model.tables = tables;
        model.relationships = relationships;
        info!(
            "Model '{}': {} table(s), {} relationship(s)",
            model.name,
            model.tables.len(),
            model.relationships.len()
        );
        Ok(model)
    }

    fn validate(
        &self,
        tables: &mut Vec<Table>,
        relationships: &mut Vec<Relationship>,
    ) -> Result<(), MigrationError> {
        let validator = RelationshipValidator::new();
        let report = validator.enforce_referential_integrity(
            tables,
            relationships,
            self.config.extraction.synthesize_stub_tables,
        );
        if !report.discarded.is_empty() {
            warn!(
                "{} relationship(s) discarded for unknown tables",
                report.discarded.len()
            );
        }
        let deactivated = validator.deactivate_ambiguous_paths(relationships);
        if !deactivated.is_empty() {
            info!("{} relationship(s) marked inactive", deactivated.len());
        }

        let result = TableValidator::new().validate(tables);
        if let Some(conflict) = result.naming_conflicts.first() {
            return Err(MigrationError::InvalidModel(format!(
                "Duplicate table name '{}' (conflicts with '{}')",
                conflict.table_name, conflict.existing_table_name
            )));
        }
        for violation in &result.member_violations {
            warn!(
                "{}.{}: {}",
                violation.table_name, violation.member_name, violation.message
            );
        }
        Ok(())
    }

    /// Register, translate and resolve every calculated member
    fn convert_calculations(&self, tables: &mut [Table], resolver: &mut CalculationResolver) {
        let mut pending: Vec<CalculationKey> = Vec::new();

        for table in tables.iter() {
            for member in calculated_members(table) {
                let key = CalculationKey::new(&table.source_name, &member.tableau_name);
                let reusable = resolver
                    .get(&key)
                    .filter(|r| {
                        r.status == CalculationStatus::Converted && r.formula_source == member.formula
                    })
                    .or_else(|| resolver.converted_with_formula(&member.formula))
                    .map(|r| r.formula_target.clone());

                let mut record = CalculationRecord::extracted(
                    &table.source_name,
                    &member.tableau_name,
                    &member.name,
                    &member.formula,
                    member.is_measure,
                );
                match reusable {
                    Some(target) => {
                        debug!("Reusing translation of '{}'", member.tableau_name);
                        record.mark_converted(target);
                    }
                    None => pending.push(key),
                }
                resolver.upsert(record);
            }
        }

        let dependencies = resolver.dependencies();
        for key in &pending {
            let Some(record) = resolver.get_mut(key) else {
                continue;
            };
            let request = TranslationRequest::formula(
                &record.formula_source,
                &record.table_name,
                dependencies.clone(),
            );
            match self.client.translate(&request) {
                Ok(expression) => record.mark_converted(expression),
                Err(e) => {
                    warn!(
                        "Translation of '{}.{}' failed: {}",
                        record.table_name, record.caption, e
                    );
                    record.mark_failed(error_marker(&e.to_string()));
                }
            }
        }
        info!(
            "{} calculation(s) translated, {} reused",
            pending.len(),
            resolver.len().saturating_sub(pending.len())
        );

        for table in tables.iter_mut() {
            let table_name = table.source_name.clone();
            for measure in &mut table.measures {
                let key = CalculationKey::new(&table_name, &measure.tableau_name);
                if let Some(resolution) = resolver.resolve_record(&key) {
                    measure.expression = resolution.expression;
                }
            }
            for column in table.columns.iter_mut().filter(|c| c.is_calculated) {
                let Some(id) = column.tableau_name.as_deref() else {
                    continue;
                };
                let key = CalculationKey::new(&table_name, id);
                if let Some(resolution) = resolver.resolve_record(&key) {
                    column.source_expression = resolution.expression;
                }
            }
        }
    }
}

fn calculated_members(table: &Table) -> Vec<CalculatedMember> {
    let columns = table.columns.iter().filter_map(|c| {
        let id = c.tableau_name.as_ref().filter(|_| c.is_calculated)?;
        Some(CalculatedMember {
            tableau_name: id.clone(),
            name: c.source_name.clone(),
            formula: c.source_expression.clone(),
            is_measure: false,
        })
    });
    let measures = table.measures.iter().map(|m| CalculatedMember {
        tableau_name: m.tableau_name.clone(),
        name: m.source_name.clone(),
        formula: m.formula_source.clone(),
        is_measure: true,
    });
    columns.chain(measures).collect()
}
