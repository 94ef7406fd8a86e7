//! sweepforge - fork-combination experiment generation and batch completion tracking
//!
//! Command line entry point.
//!
//! # Execution Flow
//!
//! 1. Parse arguments ([`Cli`])
//! 2. Load settings from `<config-dir>/sweepforge.yaml` and `SWEEPFORGE__*` variables
//! 3. Initialize logging -> `<log_dir>/<log_prefix>.<date>` (plus stderr)
//! 4. Run the subcommand; results go to stdout
//!
//! # Subcommands
//!
//! - `generate`: load an app definition (plus config values and aux definitions)
//!   and write one fork-preserving document or one document per combination
//! - `combinations`: print the number of fork combinations
//! - `count` / `status` / `clean`: inspect or reset the units of a batch descriptor

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use clap::Parser;
use sweepforge::cli::{Cli, Commands, ExperimentSource};
use sweepforge::models::{SaveMode, Settings};
use sweepforge::services::BatchWriter;
use sweepforge::{APP_NAME, ConfigManager, ExperimentGenerator, UnitStatusTracker, VERSION};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut settings = config_manager.load_settings()?;
    if cli.debug {
        settings.logging.debug_mode = true;
    }

    let _guard = sweepforge::logging::init(&settings.logging)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    match cli.command {
        Commands::Generate {
            source,
            out,
            name,
            mode,
            batch,
        } => {
            let batch = batch.map(|path| {
                path.unwrap_or_else(|| out.join(&settings.output.batch_file_name))
            });
            generate(&settings, &source, &out, name, mode.into(), batch.as_deref())
        }
        Commands::Combinations { source } => {
            let generator = load_experiment(&source, None)?;
            let total = generator
                .total_combinations()
                .context("Failed to count combinations")?;
            println!("{}", total);
            Ok(())
        }
        Commands::Count { batch, select } => {
            let tracker = UnitStatusTracker::new(settings.sidecars.clone());
            let count = tracker
                .try_count_by_selection(&batch, select.into())
                .with_context(|| format!("Failed to count units of {}", batch))?;
            println!("{}", count);
            Ok(())
        }
        Commands::Status { batch } => {
            let tracker = UnitStatusTracker::new(settings.sidecars.clone());
            let statuses = tracker
                .unit_statuses(&batch)
                .with_context(|| format!("Failed to read {}", batch))?;

            for (unit, status) in &statuses {
                println!("{}\t{}", status, unit.path);
            }
            tracing::info!("{} units listed from {}", statuses.len(), batch);
            Ok(())
        }
        Commands::Clean { batch } => {
            let tracker = UnitStatusTracker::new(settings.sidecars.clone());
            let report = tracker
                .try_delete_log_files(&batch)
                .with_context(|| format!("Failed to clean {}", batch))?;

            println!("{}", report.deleted);
            if !report.failures.is_empty() {
                bail!(
                    "{} log files could not be deleted (first: {}: {})",
                    report.failures.len(),
                    report.failures[0].path,
                    report.failures[0].message
                );
            }
            Ok(())
        }
    }
}

/// Load an experiment and every aux definitions document given for it.
fn load_experiment(source: &ExperimentSource, name: Option<String>) -> Result<ExperimentGenerator> {
    let name = name.unwrap_or_else(|| source.app.file_stem().unwrap_or("experiment").to_string());

    let mut generator = ExperimentGenerator::load(&source.app, source.config.as_deref(), &name)
        .with_context(|| format!("Failed to load app definition {}", source.app))?;

    for aux in &source.aux {
        let categories = generator
            .load_aux_definitions(aux)
            .with_context(|| format!("Failed to load aux definitions {}", aux))?;
        tracing::debug!("Loaded {} aux categories from {}", categories, aux);
    }

    Ok(generator)
}

fn generate(
    settings: &Settings,
    source: &ExperimentSource,
    out: &Utf8Path,
    name: Option<String>,
    mode: SaveMode,
    batch_path: Option<&Utf8Path>,
) -> Result<()> {
    let mut generator = load_experiment(source, name)?;
    if !generator.validate() {
        tracing::warn!("{} has invalid values, saving anyway", generator.name());
    }

    let written = generator
        .save_all(out, mode, &settings.sidecars.experiment_extension)
        .with_context(|| format!("Failed to save experiments to {}", out))?;
    for path in &written {
        println!("{}", path);
    }

    if let Some(batch_path) = batch_path {
        let batch = BatchWriter::single_experiment(generator.name(), &written)
            .context("Failed to resolve generated experiment paths")?;
        BatchWriter::write(&batch, batch_path)
            .with_context(|| format!("Failed to write batch {}", batch_path))?;
    }

    Ok(())
}
