//! Configuration validation with range checks.
//!
//! Checks that need the loaded label set (severity labels being a subset of
//! it) happen in [`crate::arbitration::ArbitrationPolicy::new`].

use std::collections::HashSet;

use crate::error::ConfigError;

use super::Config;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn check_unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{name} must be between 0.0 and 1.0")));
    }
    Ok(())
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let arb = &self.arbitration;
        check_unit_interval("arbitration.general_threshold", arb.general_threshold)?;
        check_unit_interval("arbitration.severity_threshold", arb.severity_threshold)?;
        if arb.top_k == 0 {
            return Err(invalid("arbitration.top_k must be > 0"));
        }
        if arb.severity_threshold > arb.general_threshold {
            tracing::warn!(
                "arbitration.severity_threshold is above general_threshold; \
                 severity override will never fire before the general rules"
            );
        }

        if self.input.image_size == 0 {
            return Err(invalid("input.image_size must be > 0"));
        }
        if self.input.supported_formats.is_empty() {
            return Err(invalid("input.supported_formats must not be empty"));
        }

        let sources = &self.classifier.sources;
        if sources.is_empty() {
            return Err(invalid("classifier.sources must list at least one source"));
        }
        let mut names = HashSet::new();
        for source in sources {
            if !names.insert(source.name.as_str()) {
                return Err(invalid(format!(
                    "classifier.sources: duplicate source name '{}'",
                    source.name
                )));
            }
            if !source.weight.is_finite() || source.weight < 0.0 {
                return Err(invalid(format!(
                    "classifier.sources.{}.weight must be finite and >= 0",
                    source.name
                )));
            }
            if source.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                return Err(invalid(format!(
                    "classifier.sources.{}.std entries must be non-zero",
                    source.name
                )));
            }
        }
        if sources.iter().map(|s| s.weight).sum::<f64>() <= 0.0 {
            return Err(invalid("classifier.sources weights must not all be zero"));
        }

        let open = &self.open_set;
        if !open.prompt_template.contains("{}") {
            return Err(invalid("open_set.prompt_template must contain '{}'"));
        }
        if open.labels.is_empty() && open.vocabulary_file.is_none() {
            return Err(invalid(
                "open_set.labels must not be empty when no vocabulary_file is set",
            ));
        }
        if !open.logit_scale.is_finite() || open.logit_scale <= 0.0 {
            return Err(invalid("open_set.logit_scale must be > 0"));
        }
        if open.display_top_k == 0 {
            return Err(invalid("open_set.display_top_k must be > 0"));
        }
        if open.embedding_dim == 0 || open.text_max_length == 0 || open.text_batch_size == 0 {
            return Err(invalid(
                "open_set.embedding_dim, text_max_length and text_batch_size must be > 0",
            ));
        }
        if open.std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(invalid("open_set.std entries must be non-zero"));
        }
        if open.domain.enabled
            && (open.domain.in_domain_prompts.is_empty()
                || open.domain.out_of_domain_prompts.is_empty())
        {
            return Err(invalid(
                "open_set.domain needs both in-domain and out-of-domain prompts when enabled",
            ));
        }

        let cal = &self.calibration;
        if !(cal.min_temperature.is_finite()
            && cal.max_temperature.is_finite()
            && cal.min_temperature > 0.0
            && cal.min_temperature < cal.max_temperature)
        {
            return Err(invalid(
                "calibration temperature bounds must satisfy 0 < min_temperature < max_temperature",
            ));
        }
        if !(cal.tolerance.is_finite() && cal.tolerance > 0.0) {
            return Err(invalid("calibration.tolerance must be > 0"));
        }
        if cal.max_iterations == 0 {
            return Err(invalid("calibration.max_iterations must be > 0"));
        }
        if cal.ece_bins == 0 {
            return Err(invalid("calibration.ece_bins must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_thresholds_out_of_range() {
        let mut config = Config::default();
        config.arbitration.general_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("general_threshold"));

        let mut config = Config::default();
        config.arbitration.severity_threshold = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("severity_threshold"));
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = Config::default();
        config.arbitration.top_k = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_validate_rejects_empty_sources() {
        let mut config = Config::default();
        config.classifier.sources.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_all_zero_weights() {
        let mut config = Config::default();
        config.classifier.sources[0].weight = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("weights"));
    }

    #[test]
    fn test_validate_rejects_duplicate_source_names() {
        let mut config = Config::default();
        let dup = config.classifier.sources[0].clone();
        config.classifier.sources.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_template_without_placeholder() {
        let mut config = Config::default();
        config.open_set.prompt_template = "a clinical photograph".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_temperature_bounds() {
        let mut config = Config::default();
        config.calibration.min_temperature = 5.0;
        config.calibration.max_temperature = 0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature bounds"));
    }

    #[test]
    fn test_validate_rejects_enabled_domain_without_prompts() {
        let mut config = Config::default();
        config.open_set.domain.enabled = true;
        config.open_set.domain.out_of_domain_prompts.clear();
        assert!(config.validate().is_err());
    }
}
