//! Subcommand implementations.

pub mod calibrate;
pub mod config;
pub mod decode;
pub mod labels;
pub mod models;
pub mod predict;

use std::path::{Path, PathBuf};

use derma_core::Config;

/// Expand `~` in a user-supplied path.
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&path_str).into_owned())
}

/// Load the config from `path`, or from the default location when unset.
///
/// Any read, parse, or validation failure is an error; defaults are used only
/// when no file exists at the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    load_config_with_default(path, &Config::default_path())
}

fn load_config_with_default(path: Option<&Path>, default_path: &Path) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => Config::load_or_default(default_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load config {}: {e}\n\n  Hint: fix the file, or remove it to use defaults.",
                default_path.display()
            )
        })?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_leaves_absolute_paths() {
        let path = Path::new("/tmp/derma/config.toml");
        assert_eq!(expand_path(path), path);
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[arbitration]\ngeneral_threshold = 0.9\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.arbitration.general_threshold, 0.9);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/derma.toml"))).is_err());
    }

    #[test]
    fn test_load_config_invalid_default_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("config.toml");
        std::fs::write(&default_path, "[arbitration]\ngeneral_threshold = 1.5\n").unwrap();

        let err = load_config_with_default(None, &default_path).unwrap_err();
        assert!(err.to_string().contains("general_threshold"), "{err}");
    }

    #[test]
    fn test_load_config_missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_with_default(None, &dir.path().join("config.toml")).unwrap();
        assert_eq!(config.arbitration.general_threshold, 0.75);
    }
}
