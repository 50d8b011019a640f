//! Filterkit CLI - build, persist and run stage pipelines
//!
//! Command-line front end for the filterkit runtime.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use filterkit_core::HostConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::pipeline::PipelineCommand;
use commands::stages::StagesCommand;

#[derive(Parser)]
#[command(
    name = "filterkit",
    version,
    about = "Pluggable image pipeline runtime",
    long_about = "Discover stage types, assemble them into pipelines and run them on a\n\
                  dedicated engine thread. Manifest directories can be watched so edited\n\
                  stages are swapped into a running pipeline.",
    after_help = "EXAMPLES:\n  \
                  # List all available stage types\n  \
                  filterkit stages\n\n  \
                  # Assemble a pipeline from stage names and save it\n  \
                  filterkit pipeline --stage toolbox.TestPattern --stage toolbox.ShowFps --save demo.yaml\n\n  \
                  # Run a saved pipeline at 30 fps, reloading edited manifests\n  \
                  filterkit pipeline --load demo.yaml --fps 30 --watch --run\n\n  \
                  # Run the demo pipeline of a provider and ask on startup\n  \
                  filterkit pipeline --provider toolbox.QueryDemo --event save_image --run"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Host configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered stage types
    Stages(StagesCommand),

    /// Assemble, save and run a pipeline
    Pipeline(PipelineCommand),
}

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig> {
    let config = match path {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HostConfig::default(),
    };
    config.with_env().context("Invalid environment override")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Listing output stays clean unless something is wrong
    let log_level = match &cli.command {
        Commands::Stages(_) => Level::WARN,
        _ => {
            if cli.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            }
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Stages(cmd) => cmd.execute(config).await,
        Commands::Pipeline(cmd) => cmd.execute(config).await,
    }
}
