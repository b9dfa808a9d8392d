//! Open-set label vocabulary.

use std::collections::HashSet;
use std::path::Path;

use crate::config::OpenSetConfig;
use crate::error::ConfigError;
use crate::labels::normalize_label;

/// Labels scored by the open-set path, in prompt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSetVocabulary {
    labels: Vec<String>,
}

impl OpenSetVocabulary {
    /// Build a vocabulary, rejecting empty input, blank labels, and duplicates.
    pub fn new(labels: Vec<String>) -> Result<Self, ConfigError> {
        if labels.is_empty() {
            return Err(ConfigError::ValidationError(
                "open-set vocabulary must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for label in &labels {
            let key = normalize_label(label);
            if key.is_empty() {
                return Err(ConfigError::ValidationError(
                    "open-set vocabulary contains a blank label".to_string(),
                ));
            }
            if !seen.insert(key) {
                return Err(ConfigError::ValidationError(format!(
                    "open-set vocabulary lists '{label}' more than once"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// Load one label per line. Blank lines and `#` comments are skipped.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::artifact(path, format!("cannot read vocabulary: {e}")))?;
        let labels: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        let vocabulary =
            Self::new(labels).map_err(|e| ConfigError::artifact(path, e.to_string()))?;
        tracing::info!(
            "Loaded open-set vocabulary: {} labels from {:?}",
            vocabulary.len(),
            path
        );
        Ok(vocabulary)
    }

    /// Vocabulary from `vocabulary_file` when given, else the inline labels.
    pub fn from_config(
        config: &OpenSetConfig,
        vocabulary_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        match vocabulary_file {
            Some(path) => Self::load(path),
            None => Self::new(config.labels.clone()),
        }
    }

    /// Render every label through `template`, replacing `{}`.
    pub fn prompts(&self, template: &str) -> Vec<String> {
        self.labels
            .iter()
            .map(|label| template.replace("{}", label))
            .collect()
    }

    /// Labels in prompt order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a constructed vocabulary.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
