//! The closed-set label taxonomy.
//!
//! Loaded once from a JSON mapping file (`{"Acne": 0, "Eczema": 1, ...}`)
//! produced by the training tooling. The mapping must be a bijection onto
//! `0..n`; anything else is rejected at startup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::ConfigError;

/// Canonical form used when comparing labels across vocabularies.
///
/// Lowercases, maps `_` and `-` to spaces, and collapses whitespace.
pub fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordered, immutable closed-set labels with a bidirectional index.
#[derive(Debug, Clone)]
pub struct LabelSet {
    labels: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl LabelSet {
    /// Build a label set from names in index order.
    ///
    /// Rejects empty sets, blank names, and names that collide after
    /// normalization.
    pub fn new(labels: Vec<String>) -> Result<Self, ConfigError> {
        if labels.is_empty() {
            return Err(ConfigError::ValidationError(
                "label set must contain at least one label".into(),
            ));
        }
        let mut by_name = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            let key = normalize_label(label);
            if key.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "label at index {i} is blank"
                )));
            }
            if let Some(prev) = by_name.insert(key, i) {
                return Err(ConfigError::ValidationError(format!(
                    "labels at indices {prev} and {i} collide ('{}' vs '{}')",
                    labels[prev], label
                )));
            }
        }
        Ok(Self { labels, by_name })
    }

    /// Load a `{ "label": index }` JSON mapping file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::artifact(path, format!("cannot read label map: {e}")))?;
        let mapping: HashMap<String, usize> = serde_json::from_str(&content)
            .map_err(|e| ConfigError::artifact(path, format!("malformed label map: {e}")))?;
        let set = Self::from_mapping(mapping).map_err(|e| match e {
            ConfigError::ValidationError(msg) => ConfigError::artifact(path, msg),
            other => other,
        })?;
        tracing::info!("Loaded {} closed-set labels from {:?}", set.len(), path);
        Ok(set)
    }

    /// Build from a name → index mapping, requiring indices to be exactly `0..n`.
    pub fn from_mapping(mapping: HashMap<String, usize>) -> Result<Self, ConfigError> {
        let n = mapping.len();
        let mut by_index: BTreeMap<usize, String> = BTreeMap::new();
        for (name, idx) in mapping {
            if idx >= n {
                return Err(ConfigError::ValidationError(format!(
                    "index {idx} for '{name}' is out of range for {n} labels"
                )));
            }
            if let Some(other) = by_index.insert(idx, name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "index {idx} assigned to both '{other}' and '{name}'"
                )));
            }
        }
        Self::new(by_index.into_values().collect())
    }

    /// Label name at `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Index of `name` (normalized comparison).
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(&normalize_label(name)).copied()
    }

    /// Whether `name` is part of the set.
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// All labels in index order.
    pub fn names(&self) -> &[String] {
        &self.labels
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
