//! Logging initialization.
//!
//! Log output goes to stderr; stdout is reserved for prediction records.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging subsystem.
///
/// `RUST_LOG` overrides the level when set.
pub fn init(verbose: bool, json_format: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Initialize logging from the `[logging]` section, with CLI overrides.
pub fn init_from_config(config: &derma_core::Config, verbose_override: bool, json_override: bool) {
    let level = config.logging.level.to_lowercase();
    let verbose = verbose_override || level == "debug" || level == "trace";
    let json_format = json_override || config.logging.format.eq_ignore_ascii_case("json");
    init(verbose, json_format);
}
