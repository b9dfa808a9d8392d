//! The temperature scalar and its on-disk artifact.
//!
//! The artifact is a UTF-8 text file holding one decimal number, written by
//! `derma calibrate` and read once at startup.

use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A positive, finite temperature.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Temperature(f64);

impl Temperature {
    /// T = 1, the identity calibration.
    pub const IDENTITY: Temperature = Temperature(1.0);

    /// Construct, rejecting zero, negative, and non-finite values.
    pub fn new(value: f64) -> Result<Self, ConfigError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "temperature must be positive and finite, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// The raw scalar.
    pub fn value(self) -> f64 {
        self.0
    }

    /// Parse the artifact format: one number, optional surrounding whitespace.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let trimmed = content.trim();
        let value: f64 = trimmed.parse().map_err(|_| {
            ConfigError::ValidationError(format!("'{trimmed}' is not a number"))
        })?;
        Self::new(value)
    }

    /// Load the temperature artifact. Missing or malformed files are fatal.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::artifact(path, format!("cannot read temperature file: {e}"))
        })?;
        let temperature =
            Self::parse(&content).map_err(|e| ConfigError::artifact(path, e.to_string()))?;
        tracing::info!("Loaded temperature {:.4} from {:?}", temperature.0, path);
        Ok(temperature)
    }

    /// Load the temperature artifact and reject values outside `bounds`.
    ///
    /// The fitter only searches inside the configured range, so anything
    /// outside it was not produced by `derma calibrate` for this config.
    pub fn load_within(path: &Path, bounds: &RangeInclusive<f64>) -> Result<Self, ConfigError> {
        let temperature = Self::load(path)?;
        if !bounds.contains(&temperature.0) {
            return Err(ConfigError::artifact(
                path,
                format!(
                    "temperature {} is outside the calibration range [{}, {}]",
                    temperature.0,
                    bounds.start(),
                    bounds.end()
                ),
            ));
        }
        Ok(temperature)
    }

    /// Write the artifact, creating parent directories as needed.
    ///
    /// Writes to a sibling temp file first and renames it into place so a
    /// concurrent reader never sees a partial value.
    pub fn save(self, path: &Path) -> Result<(), ConfigError> {
        let write_err =
            |e: std::io::Error| ConfigError::artifact(path, format!("cannot write temperature file: {e}"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, format!("{}\n", self.0)).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        tracing::info!("Saved temperature {:.4} to {:?}", self.0, path);
        Ok(())
    }
}

impl TryFrom<f64> for Temperature {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Temperature> for f64 {
    fn from(t: Temperature) -> f64 {
        t.0
    }
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive() {
        assert!(Temperature::new(0.0).is_err());
        assert!(Temperature::new(-1.0).is_err());
        assert!(Temperature::new(f64::INFINITY).is_err());
        assert!(Temperature::new(f64::NAN).is_err());
        assert!(Temperature::new(1.5).is_ok());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(Temperature::parse("  1.4375\n").unwrap().value(), 1.4375);
        assert!(Temperature::parse("").is_err());
        assert!(Temperature::parse("warm").is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("temperature.txt");
        Temperature::new(2.125).unwrap().save(&path).unwrap();
        assert_eq!(Temperature::load(&path).unwrap().value(), 2.125);
    }

    #[test]
    fn test_load_missing_file_is_artifact_error() {
        let err = Temperature::load(Path::new("/nonexistent/temperature.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::Artifact { .. }));
    }

    #[test]
    fn test_load_negative_value_is_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.txt");
        std::fs::write(&path, "-0.5").unwrap();
        let err = Temperature::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Artifact { .. }));
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn test_load_within_rejects_out_of_range_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature.txt");
        let bounds = 0.5..=5.0;

        // Positive and finite, but softmax underflows to all zeros at this value.
        std::fs::write(&path, "1e-310").unwrap();
        let err = Temperature::load_within(&path, &bounds).unwrap_err();
        assert!(matches!(err, ConfigError::Artifact { .. }));
        assert!(err.to_string().contains("outside the calibration range"));

        std::fs::write(&path, "12.0").unwrap();
        assert!(Temperature::load_within(&path, &bounds).is_err());

        std::fs::write(&path, "5.0").unwrap();
        assert_eq!(Temperature::load_within(&path, &bounds).unwrap().value(), 5.0);
    }
}
