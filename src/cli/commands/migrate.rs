//! Migrate command implementation

use crate::cli::error::CliError;
use crate::config::MigrationConfig;
use crate::convert::{IdentityTranslator, WorkbookMigrator};
use crate::import::XmlNode;
use crate::model::store::{JsonFileStore, MemoryStore};
use crate::models::SemanticModel;
use std::path::{Path, PathBuf};

/// Name of the model document written to the output directory
pub const MODEL_FILENAME: &str = "model.json";

/// Arguments for the migrate command
#[derive(Debug, Clone)]
pub struct MigrateArgs {
    pub workbook: PathBuf,
    pub out: PathBuf,
    /// Directory holding `.bi-migration.toml`; defaults to the output directory
    pub config_dir: Option<PathBuf>,
    /// Copy formulas unchanged and leave the calculation store untouched
    pub dry_run: bool,
    pub pretty: bool,
}

/// What a run produced
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    pub model_path: PathBuf,
    pub store_path: Option<PathBuf>,
    pub tables: usize,
    pub relationships: usize,
    pub measures: usize,
}

/// Model name derived from the workbook file name
fn model_name(workbook: &Path) -> String {
    workbook
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Model".to_string())
}

fn write_model(model: &SemanticModel, path: &Path, pretty: bool) -> Result<(), CliError> {
    let content = if pretty {
        serde_json::to_string_pretty(model)
    } else {
        serde_json::to_string(model)
    }
    .map_err(|e| CliError::FileWriteError(path.to_path_buf(), e.to_string()))?;
    std::fs::write(path, content).map_err(|e| CliError::FileWriteError(path.to_path_buf(), e.to_string()))
}

/// Handle the migrate command
pub fn handle_migrate(args: &MigrateArgs) -> Result<MigrationSummary, CliError> {
    if !args.workbook.exists() {
        return Err(CliError::FileNotFound(args.workbook.clone()));
    }
    let content = std::fs::read_to_string(&args.workbook)
        .map_err(|e| CliError::FileReadError(args.workbook.clone(), e.to_string()))?;
    let root = XmlNode::parse(&content)?;

    std::fs::create_dir_all(&args.out)
        .map_err(|e| CliError::FileWriteError(args.out.clone(), e.to_string()))?;
    let config = MigrationConfig::load(args.config_dir.as_deref().unwrap_or(&args.out))?;
    let name = model_name(&args.workbook);

    let (model, store_path) = if args.dry_run {
        let migrator = WorkbookMigrator::new(config, Box::new(IdentityTranslator));
        let model = migrator.migrate_with_store(&name, &root, &MemoryStore::new())?;
        (model, None)
    } else {
        let store_path = config.calculations_path(&args.out);
        let migrator = WorkbookMigrator::from_config(config);
        let model = migrator.migrate_with_store(&name, &root, &JsonFileStore::new(&store_path))?;
        (model, Some(store_path))
    };

    let model_path = args.out.join(MODEL_FILENAME);
    write_model(&model, &model_path, args.pretty)?;

    Ok(MigrationSummary {
        model_path,
        store_path,
        tables: model.tables.len(),
        relationships: model.relationships.len(),
        measures: model.tables.iter().map(|t| t.measures.len()).sum(),
    })
}
