//! Configuration management for Derma.
//!
//! Configuration is loaded from a TOML file in the platform config directory.
//! Every section has defaults matching the shipped models; the persisted
//! artifacts the configuration points at (label map, temperature) have no
//! defaults and must exist.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Derma.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Persisted artifact file names
    pub artifacts: ArtifactsConfig,

    /// Input tensor settings
    pub input: InputConfig,

    /// Closed-set classifier sources
    pub classifier: ClassifierConfig,

    /// Open-set semantic scorer settings
    pub open_set: OpenSetConfig,

    /// Arbitration thresholds
    pub arbitration: ArbitrationConfig,

    /// Temperature fitting settings
    pub calibration: CalibrationConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_default(&Self::default_path())
    }

    /// Load from `path`, or return defaults when no file exists there.
    ///
    /// A file that exists but fails to read, parse, or validate is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.derma.derma/config.toml
    /// - Linux: ~/.config/derma/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\derma\config\config.toml
    ///
    /// Falls back to ~/.derma/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "derma", "derma")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".derma").join("config.toml")
            })
    }

    /// Resolved artifact directory (with ~ expansion).
    pub fn artifact_dir(&self) -> PathBuf {
        expand(&self.general.artifact_dir)
    }

    /// Resolved model directory (with ~ expansion).
    pub fn model_dir(&self) -> PathBuf {
        expand(&self.general.model_dir)
    }

    /// Directory of the configured open-set encoder.
    pub fn open_set_model_dir(&self) -> PathBuf {
        self.model_dir().join(&self.open_set.model)
    }

    /// Path of the label ↔ index mapping file.
    pub fn label_map_path(&self) -> PathBuf {
        self.artifact_dir().join(&self.artifacts.label_map)
    }

    /// Path of the scalar temperature file.
    pub fn temperature_path(&self) -> PathBuf {
        self.artifact_dir().join(&self.artifacts.temperature)
    }

    /// Path of the ONNX file for a closed-set source.
    pub fn source_model_path(&self, source: &SourceConfig) -> PathBuf {
        self.artifact_dir().join(&source.model)
    }

    /// Cache directory for encoded prompt banks.
    ///
    /// Co-located with the models directory: if `model_dir` is `~/.derma/models`,
    /// the cache lands at `~/.derma/cache`.
    pub fn cache_dir(&self) -> PathBuf {
        let model_dir = self.model_dir();
        model_dir.parent().unwrap_or(&model_dir).join("cache")
    }

    /// Resolved open-set vocabulary file, if configured.
    pub fn vocabulary_file(&self) -> Option<PathBuf> {
        self.open_set.vocabulary_file.as_deref().map(expand)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.arbitration.general_threshold, 0.75);
        assert_eq!(config.arbitration.severity_threshold, 0.25);
        assert_eq!(config.arbitration.top_k, 5);
        assert_eq!(config.classifier.sources.len(), 1);
        assert_eq!(config.open_set.labels.len(), 14);
    }

    #[test]
    fn test_config_to_toml_roundtrips() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[arbitration]"));
        assert!(toml.contains("[[classifier.sources]]"));

        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(parsed.open_set.prompt_template, config.open_set.prompt_template);
        assert_eq!(parsed.classifier.sources[0].name, "cnn");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [arbitration]
            general_threshold = 0.8
            severity_labels = ["Melanoma"]
            "#,
        )
        .unwrap();
        assert_eq!(config.arbitration.general_threshold, 0.8);
        assert_eq!(config.arbitration.top_k, 5);
        assert_eq!(config.calibration.max_temperature, 5.0);
    }

    #[test]
    fn test_multiple_sources_parse() {
        let config = Config::from_toml(
            r#"
            [[classifier.sources]]
            name = "cnn"
            model = "cnn.onnx"
            weight = 0.7

            [[classifier.sources]]
            name = "vit"
            model = "vit.onnx"
            weight = 0.3
            layout = "nchw"
            output = "logits"
            "#,
        )
        .unwrap();
        assert_eq!(config.classifier.sources.len(), 2);
        assert_eq!(config.classifier.sources[1].output, OutputKind::Logits);
    }

    #[test]
    fn test_artifact_paths_join_artifact_dir() {
        let mut config = Config::default();
        config.general.artifact_dir = PathBuf::from("/srv/derma");
        assert_eq!(config.label_map_path(), PathBuf::from("/srv/derma/classes.json"));
        assert_eq!(
            config.temperature_path(),
            PathBuf::from("/srv/derma/temperature.txt")
        );
    }

    #[test]
    fn test_cache_dir_sits_next_to_models() {
        let mut config = Config::default();
        config.general.model_dir = PathBuf::from("/opt/derma/models");
        assert_eq!(config.cache_dir(), PathBuf::from("/opt/derma/cache"));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.arbitration.top_k, 5);

        std::fs::write(&path, "[arbitration]\ntop_k = 0\n").unwrap();
        let err = Config::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        std::fs::write(&path, "[arbitration\n").unwrap();
        assert!(matches!(
            Config::load_or_default(&path).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }
}
