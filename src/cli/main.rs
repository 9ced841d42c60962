//! CLI binary entry point for bi-migrate

#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use bi_migration_sdk::cli::commands::migrate::{MigrateArgs, handle_migrate};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "bi-migrate")]
#[command(about = "Migrate workbook metadata into a semantic model")]
#[command(version)]
struct Cli {
    /// Workbook file (.twb)
    workbook: PathBuf,
    /// Output directory for model.json and the calculation store
    #[arg(short, long, default_value = "out")]
    out: PathBuf,
    /// Directory containing .bi-migration.toml (defaults to the output directory)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,
    /// Copy formulas unchanged and do not touch the calculation store
    #[arg(long)]
    dry_run: bool,
    /// Pretty-print the model JSON
    #[arg(short, long)]
    pretty: bool,
    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[cfg(feature = "cli")]
fn run(cli: Cli) -> anyhow::Result<()> {
    let args = MigrateArgs {
        workbook: cli.workbook,
        out: cli.out,
        config_dir: cli.config_dir,
        dry_run: cli.dry_run,
        pretty: cli.pretty,
    };
    let summary = handle_migrate(&args)
        .with_context(|| format!("Failed to migrate {}", args.workbook.display()))?;

    println!(
        "Migrated {} table(s), {} relationship(s), {} measure(s)",
        summary.tables, summary.relationships, summary.measures
    );
    println!("Model written to {}", summary.model_path.display());
    if let Some(store) = summary.store_path {
        println!("Calculations saved to {}", store.display());
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
