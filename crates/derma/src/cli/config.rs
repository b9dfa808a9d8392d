//! The `derma config` command for configuration management.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use derma_core::Config;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,

    /// Show config file path
    Path,

    /// Show where the label map, temperature and models are expected
    Artifacts,

    /// Initialize a new config file with defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Execute the config command.
///
/// `config_path` is the `--config` override, if any.
pub async fn execute(
    args: ConfigArgs,
    config: Config,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(Config::default_path);

    match args.command {
        ConfigCommand::Show => {
            println!("{}", config.to_toml()?);
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Artifacts => {
            let status = |p: &Path| if p.exists() { "ready" } else { "missing" };
            let label_map = config.label_map_path();
            let temperature = config.temperature_path();
            println!("  {:14} {:8} {}", "label map", status(&label_map), label_map.display());
            println!("  {:14} {:8} {}", "temperature", status(&temperature), temperature.display());
            for source in &config.classifier.sources {
                let model = config.source_model_path(source);
                println!(
                    "  {:14} {:8} {} (weight {})",
                    source.name,
                    status(&model),
                    model.display(),
                    source.weight
                );
            }
            let open_set = config.open_set_model_dir();
            println!("  {:14} {:8} {}", "open-set", status(&open_set), open_set.display());
        }

        ConfigCommand::Init { force } => {
            init(&path, force)?;
            tracing::info!("Config file created at: {}", path.display());
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

/// Write the default config to `path`.
fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, Config::default().to_toml()?)?;
    Ok(())
}
