//! # ami-cli
//!
//! Binary entry point for the AMI reduce driver.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading with command-line overrides
//! - `ami-reduce files`: list the datasets `reduce` knows about
//! - `ami-reduce group`: group datasets by pointing
//! - `ami-reduce process`: run a reduction script over datasets and write UVFITS

use ami_adapters::{SessionState, Transport};
use ami_core::{AmiConfig, DatasetRegistry, GroupingOutcome, ReduceDriver};
use ami_proto::{DatasetId, Error};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for programmatic access
    Json,
}

/// Drive the AMI `reduce` tool from scripts
#[derive(Parser, Debug)]
#[command(name = "ami-reduce", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "ami.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Array to reduce for (overrides the config file)
    #[arg(long, global = true)]
    array: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the datasets available to reduce
    Files(FilesArgs),

    /// Group datasets observed at the same pointing
    Group(GroupArgs),

    /// Reduce datasets with a command script and write UVFITS output
    Process(ProcessArgs),
}

/// Arguments for the files subcommand.
#[derive(Parser, Debug)]
struct FilesArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

/// Arguments for the group subcommand.
#[derive(Parser, Debug)]
struct GroupArgs {
    /// Grouping tolerance in degrees (overrides the config file)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Save the dataset registry as JSON
    #[arg(long)]
    save: Option<PathBuf>,
}

/// Arguments for the process subcommand.
#[derive(Parser, Debug)]
struct ProcessArgs {
    /// Datasets to process (default: every listed dataset)
    datasets: Vec<String>,

    /// File of reduce commands to run on each dataset, one per line
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Directory for the UVFITS output
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Directory for per-dataset transcripts (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Output format for the summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Save the dataset registry as JSON
    #[arg(long)]
    save: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli.config, cli.array.as_deref())?;

    match cli.command {
        Commands::Files(args) => files_command(config, args).await,
        Commands::Group(args) => group_command(config, args).await,
        Commands::Process(args) => process_command(config, args).await,
    }
}

/// Loads the config file (defaults if it does not exist) and applies overrides.
///
/// Validation happens once, when the driver starts.
fn load_config(path: &Path, array: Option<&str>) -> Result<AmiConfig> {
    let mut config = if path.exists() {
        AmiConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?
    } else {
        warn!("Config file {:?} not found, using defaults", path);
        AmiConfig::default()
    };

    if let Some(array) = array {
        config.array = array.to_string();
    }
    Ok(config)
}

async fn start_driver(config: AmiConfig) -> Result<ReduceDriver<ami_adapters::PtyTransport>> {
    ReduceDriver::start(config)
        .await
        .context("Failed to start reduce")
}

async fn files_command(config: AmiConfig, args: FilesArgs) -> Result<()> {
    let driver = start_driver(config).await?;
    let output = render_files(driver.registry(), args.format)?;
    driver.close().await.context("Failed to close reduce")?;
    print!("{output}");
    Ok(())
}

async fn group_command(config: AmiConfig, args: GroupArgs) -> Result<()> {
    let tolerance = args.tolerance.unwrap_or(config.grouping.tolerance_deg);
    let mut driver = start_driver(config).await?;

    let outcome = driver
        .group_pointings(tolerance)
        .await
        .context("Failed to group pointings")?;
    if let Some(path) = &args.save {
        save_registry(driver.registry(), path)?;
    }
    driver.close().await.context("Failed to close reduce")?;

    print!("{}", render_groups(&outcome, args.format)?);
    Ok(())
}

async fn process_command(config: AmiConfig, args: ProcessArgs) -> Result<()> {
    let script = match &args.script {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {:?}", path))?,
        None => String::new(),
    };

    let mut driver = start_driver(config).await?;
    let datasets: Vec<DatasetId> = if args.datasets.is_empty() {
        driver.registry().ids().cloned().collect()
    } else {
        args.datasets.iter().map(|d| DatasetId::new(d.trim())).collect()
    };

    let failures = process_datasets(
        &mut driver,
        &datasets,
        &script,
        args.output_dir.as_deref(),
        args.log_dir.as_deref(),
    )
    .await;

    if let Some(path) = &args.save {
        save_registry(driver.registry(), path)?;
    }
    let summary = render_registry(driver.registry(), args.format)?;
    let stalled = driver.session_state() == SessionState::Stalled;
    if !stalled {
        driver.close().await.context("Failed to close reduce")?;
    }

    print!("{summary}");
    let failures = failures?;
    if !failures.is_empty() {
        anyhow::bail!(
            "{} of {} dataset(s) failed: {}",
            failures.len(),
            datasets.len(),
            failures
                .iter()
                .map(DatasetId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

/// Runs the full reduction for each dataset in turn.
///
/// Per-dataset problems (parse failures, missing calibrators) are logged and
/// the dataset is reported back as failed. A stalled session ends the run.
async fn process_datasets<T: Transport>(
    driver: &mut ReduceDriver<T>,
    datasets: &[DatasetId],
    script: &str,
    output_dir: Option<&Path>,
    log_dir: Option<&Path>,
) -> Result<Vec<DatasetId>> {
    let mut failures = Vec::new();

    for id in datasets {
        match process_one(driver, id, script, output_dir, log_dir).await {
            Ok(()) => info!(dataset = %id, "Processed"),
            Err(e @ Error::ProtocolStall { .. }) => {
                return Err(e).with_context(|| format!("reduce stalled while processing {id}"));
            }
            Err(e) => {
                warn!(dataset = %id, error = %e, "Skipping dataset");
                failures.push(id.clone());
            }
        }
    }

    Ok(failures)
}

async fn process_one<T: Transport>(
    driver: &mut ReduceDriver<T>,
    id: &DatasetId,
    script: &str,
    output_dir: Option<&Path>,
    log_dir: Option<&Path>,
) -> ami_proto::Result<()> {
    driver.set_active_file(id.as_str(), log_dir).await?;
    driver.run_script(script).await?;
    driver.update_flagging_info().await?;
    if let Some(dir) = output_dir {
        driver.write_files(id, dir).await?;
    }
    Ok(())
}

fn save_registry(registry: &DatasetRegistry, path: &Path) -> Result<()> {
    registry
        .save(path)
        .with_context(|| format!("Failed to save registry to {:?}", path))?;
    info!(path = %path.display(), "Saved dataset registry");
    Ok(())
}

fn render_files(registry: &DatasetRegistry, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(format!("{}\n", registry.to_json()?));
    }

    let width = id_width(registry);
    let mut out = String::new();
    for (id, record) in registry.iter() {
        let comment = record.comment.as_deref().unwrap_or("");
        writeln!(out, "{:<width$}  {comment}", id.as_str())?;
    }
    writeln!(out, "{} dataset(s)", registry.len())?;
    Ok(out)
}

fn render_groups(outcome: &GroupingOutcome, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(outcome)?));
    }

    let mut out = String::new();
    for group in outcome.groups.values() {
        writeln!(out, "{}  ({})", group.name, group.pointing)?;
        for member in &group.members {
            writeln!(out, "    {member}")?;
        }
    }
    for name in &outcome.collisions {
        writeln!(out, "warning: group name '{name}' used by more than one pointing")?;
    }
    Ok(out)
}

fn render_registry(registry: &DatasetRegistry, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(format!("{}\n", registry.to_json()?));
    }

    let width = id_width(registry).max("DATASET".len());
    let mut out = String::new();
    writeln!(
        out,
        "{:<width$}  {:>8}  {:>8}  {:>8}  {:>10}",
        "DATASET", "RAIN", "FLAG MAX", "FLAG END", "NOISE mJy"
    )?;
    for (id, record) in registry.iter() {
        writeln!(
            out,
            "{:<width$}  {:>8}  {:>8}  {:>8}  {:>10}",
            id.as_str(),
            fmt_opt(record.rain_correction, 3),
            fmt_opt(record.flagged_max, 1),
            fmt_opt(record.flagged_final, 1),
            fmt_opt(record.estimated_noise.map(|jy| jy * 1000.0), 2),
        )?;
    }
    Ok(out)
}

fn id_width(registry: &DatasetRegistry) -> usize {
    registry.ids().map(|id| id.as_str().len()).max().unwrap_or(0)
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_core::FieldUpdate;
    use ami_core::testing::MockTool;
    use ami_proto::Pointing;

    fn registry() -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        for id in ["A-130101.raw", "LONGNAME-130101.raw"] {
            registry.discover(id.into());
        }
        registry
            .apply(&"A-130101.raw".into(), FieldUpdate::Comment("flare".into()))
            .unwrap();
        registry
            .apply(&"A-130101.raw".into(), FieldUpdate::EstimatedNoise(0.0312))
            .unwrap();
        registry
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.yml"), None).unwrap();
        assert_eq!(config.array, "LA");
    }

    #[test]
    fn test_load_config_array_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ami.yml");
        std::fs::write(&path, "array: LA\n").unwrap();

        let config = load_config(&path, Some("SA")).unwrap();
        assert_eq!(config.array, "SA");

        // Bad overrides are caught when the driver validates the config
        let config = load_config(&path, Some("XA")).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'LA' or 'SA'"));
    }

    #[test]
    fn test_render_files_table() {
        let out = render_files(&registry(), OutputFormat::Table).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("A-130101.raw "));
        assert!(lines[0].ends_with("  flare"));
        assert_eq!(lines[1].trim_end(), "LONGNAME-130101.raw");
        assert_eq!(lines[2], "2 dataset(s)");
    }

    #[test]
    fn test_render_registry_table() {
        let out = render_registry(&registry(), OutputFormat::Table).unwrap();
        let row = out.lines().nth(1).unwrap();
        assert!(row.starts_with("A-130101.raw"));
        assert!(row.ends_with("31.20"));
        assert!(out.lines().nth(2).unwrap().ends_with('-'));
    }

    #[test]
    fn test_render_groups_json() {
        let mut registry = DatasetRegistry::new();
        registry.discover("A-1.raw".into());
        registry
            .apply(
                &"A-1.raw".into(),
                FieldUpdate::Pointing(Pointing::new("00 00 00", "00 00 00")),
            )
            .unwrap();
        let outcome = ami_core::PointingGrouper::new(0.5)
            .group(&registry)
            .unwrap();

        let json = render_groups(&outcome, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["groups"]["A"]["members"][0], "A-1.raw");
        assert_eq!(value["collisions"].as_array().unwrap().len(), 0);
    }

    fn tool() -> MockTool {
        MockTool::new()
            .on("list files", "\n A-1.raw\n B-1.raw\n\n\n Total\n")
            .on(
                "list observation A-1.raw",
                "\n Tracking    : 00 00 00   00 00 00  J2000\n Observed with calibrator 3C286\n",
            )
            .on(
                "list observation B-1.raw",
                "\n Tracking    : 01 00 00   10 00 00  J2000\n",
            )
            .on("show flagging", "Total of 5 out of 100 samples flagged (5.0%)")
    }

    fn config() -> AmiConfig {
        let mut config = AmiConfig::default();
        config.logging.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_process_datasets_reports_failures() {
        // B has no calibrator, so writing its output fails
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let tool = tool().writes_fits_to(work.path());
        let mut config = config();
        config.working_dir = Some(work.path().to_path_buf());
        let mut driver = ReduceDriver::with_transport(tool, config).await.unwrap();
        let datasets: Vec<DatasetId> = vec!["A-1.raw".into(), "B-1.raw".into()];

        let failures = process_datasets(&mut driver, &datasets, "", Some(out.path()), None)
            .await
            .unwrap();

        assert_eq!(failures, vec![DatasetId::new("B-1.raw")]);
        assert!(out.path().join("A-1.fits").exists());
        assert!(out.path().join("3C286-1C.fits").exists());
        let a = driver.registry().get(&"A-1.raw".into()).unwrap();
        assert_eq!(a.flagged_final, Some(5.0));
    }

    #[tokio::test]
    async fn test_process_datasets_runs_script() {
        let tool = tool().on("rain", "Mean amplitude correction factor 1.01");
        let observer = tool.clone();
        let mut driver = ReduceDriver::with_transport(tool, config()).await.unwrap();

        let failures = process_datasets(&mut driver, &["A-1.raw".into()], "rain \\ \n", None, None)
            .await
            .unwrap();

        assert!(failures.is_empty());
        assert!(observer.commands().contains(&r"rain \ ".to_string()));
        let a = driver.registry().get(&"A-1.raw".into()).unwrap();
        assert_eq!(a.rain_correction, Some(1.01));
    }

    #[tokio::test]
    async fn test_process_datasets_stops_on_stall() {
        let tool = tool().stall_on("rain");
        let observer = tool.clone();
        let mut driver = ReduceDriver::with_transport(tool, config()).await.unwrap();
        let datasets: Vec<DatasetId> = vec!["A-1.raw".into(), "B-1.raw".into()];

        let err = process_datasets(&mut driver, &datasets, "rain \\ \n", None, None)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("stalled while processing A-1.raw"));
        assert!(!observer.commands().iter().any(|c| c.contains("B-1.raw \\")));
    }
}
