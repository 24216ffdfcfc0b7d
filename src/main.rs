//! Toolpath Pipeline CLI
//!
//! Runs the configured items through SLICE / PREVIEW / EXPORT against the
//! simulated worker.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolpath_pipeline::{build_runtime, run_pipeline, Config, Item, Stage};

#[derive(Parser)]
#[command(name = "toolpath-pipeline")]
#[command(about = "Slice, preview and export items through the stage pipeline", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Tokio worker threads (defaults to the number of CPUs)
    #[arg(long, global = true)]
    worker_threads: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run {
        /// Last stage to run; prerequisites run first
        #[arg(short, long, value_enum, default_value_t = StageArg::Export)]
        stage: StageArg,

        /// Write the preview layers as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageArg {
    Slice,
    Preview,
    Export,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Slice => Stage::Slice,
            StageArg::Preview => Stage::Preview,
            StageArg::Export => Stage::Export,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => {
            run_command(cli.config, cli.worker_threads, StageArg::Export, None)?;
        }

        Some(Commands::Run { stage, output }) => {
            run_command(cli.config, cli.worker_threads, stage, output)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn run_command(
    config_path: PathBuf,
    worker_threads: Option<usize>,
    stage: StageArg,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;

    let runtime = build_runtime(worker_threads)?;
    let report = runtime.block_on(async { run_pipeline(config, stage.into()).await })?;

    if let Some(path) = output {
        match &report.output {
            Some(layers) => {
                std::fs::write(&path, serde_json::to_string_pretty(layers.as_ref())?)?;
                tracing::info!("Preview layers written to {}", path.display());
            }
            None => tracing::warn!("No preview output for {} runs", report.target),
        }
    }

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!(
        "Configuration is valid ({} items, {} extruders)",
        config.items.len(),
        config.device.extruders
    );
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let mut config = Config::default();
    config.items = vec![
        Item::new("bracket", 12_000),
        Item::new("gear", 4_000),
        Item::new("spacer", 800),
    ];

    let yaml = format!(
        "# Toolpath Pipeline Configuration\n\
         #\n\
         # device.extruders > 1 makes repeated preview requests cycle preview modes.\n\
         # process.mode: fdm | sla | cam | laser\n\
         # worker.* configures the simulated worker used by CLI runs.\n\n{}",
        config.to_yaml()?
    );

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
