use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tenderlink_pipeline::{report_markdown, Pipeline, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tenderlink")]
#[command(about = "Resolve procurement announcements into projects and link tenders to awards")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Group and link one cleaned record file, writing a new report directory.
    Run {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        reports_dir: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        no_customer_slices: bool,
    },
    /// Print a markdown index of recent runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        reports_dir: Option<PathBuf>,
    },
    /// Validate the resolve configuration and print the effective values.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Run {
        input: None,
        reports_dir: None,
        config: None,
        threshold: None,
        no_customer_slices: false,
    }) {
        Commands::Run {
            input,
            reports_dir,
            config: config_path,
            threshold,
            no_customer_slices,
        } => {
            if let Some(input) = input {
                config.input_path = input;
            }
            if let Some(dir) = reports_dir {
                config.reports_dir = dir;
            }
            if config_path.is_some() {
                config.config_path = config_path;
            }
            if threshold.is_some() {
                config.threshold_override = threshold;
            }
            if no_customer_slices {
                config.write_customer_slices = false;
            }
            let summary = Pipeline::new(config)?.run_once().await?;
            println!(
                "run complete: run_id={} records={} projects={} linked_pairs={} reports={}",
                summary.run_id, summary.records, summary.projects, summary.linked_pairs, summary.reports_dir
            );
        }
        Commands::Report { runs, reports_dir } => {
            let dir = reports_dir.unwrap_or(config.reports_dir);
            println!("{}", report_markdown(runs, &dir)?);
        }
        Commands::CheckConfig { config: config_path } => {
            if config_path.is_some() {
                config.config_path = config_path;
            }
            let resolve = config.load_resolve_config()?;
            resolve.validate().context("invalid resolve configuration")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&resolve).context("serializing resolve configuration")?
            );
        }
    }

    Ok(())
}
