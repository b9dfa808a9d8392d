//! Derma CLI - calibrated hybrid skin-condition classification.
//!
//! Every image runs through a temperature-calibrated closed-set classifier and
//! an open-set CLIP-style scorer; a fixed arbitration policy picks the verdict.
//!
//! # Usage
//!
//! ```bash
//! # Classify a single image
//! derma predict lesion.jpg
//!
//! # Classify a directory, streaming JSONL
//! derma predict ./photos/ --format jsonl --output results.jsonl
//!
//! # Fit the temperature from validation logits
//! derma calibrate validation.json
//!
//! # Fetch the open-set encoders
//! derma models download
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Derma - calibrated hybrid skin-condition classification.
#[derive(Parser, Debug)]
#[command(name = "derma")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "DERMA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify images and emit verdicts
    Predict(cli::predict::PredictArgs),

    /// Fit the calibration temperature from validation data
    Calibrate(cli::calibrate::CalibrateArgs),

    /// Show the closed-set labels and severity markers
    Labels(cli::labels::LabelsArgs),

    /// Manage the open-set encoder models
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(cli::expand_path);

    // Any config problem is fatal, including one at the default location.
    let config = cli::load_config(config_path.as_deref())?;
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Derma v{}", derma_core::VERSION);

    match cli.command {
        Commands::Predict(args) => cli::predict::execute(args, config).await,
        Commands::Calibrate(args) => cli::calibrate::execute(args, config).await,
        Commands::Labels(args) => cli::labels::execute(args, config).await,
        Commands::Models(args) => cli::models::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, config, config_path).await,
    }
}
