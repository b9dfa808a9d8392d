//! The `derma calibrate` command: fit and persist the temperature.
//!
//! Input is a JSON file with one true label per row and either raw logits or
//! post-softmax probabilities from the closed-set ensemble:
//!
//! ```json
//! { "labels": ["Acne", 3, "Eczema"], "logits": [[...], [...], [...]] }
//! ```
//!
//! Labels may be names from the label map or indices into it.

use std::path::{Path, PathBuf};

use clap::Args;
use derma_core::{Config, FitReport, LabelSet, TemperatureFitter, ValidationSet};
use serde::Deserialize;

/// Arguments for the `calibrate` command.
#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// Validation file with `labels` and `logits` or `probabilities`
    #[arg(required = true)]
    pub input: PathBuf,

    /// Where to write the temperature (defaults to the configured artifact path)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Fit and report without writing the temperature file
    #[arg(long)]
    pub dry_run: bool,
}

/// A true label given by name or by index.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LabelRef {
    Index(usize),
    Name(String),
}

/// On-disk validation file.
#[derive(Debug, Deserialize)]
struct ValidationFile {
    labels: Vec<LabelRef>,
    #[serde(default)]
    logits: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    probabilities: Option<Vec<Vec<f64>>>,
}

/// Execute the calibrate command.
pub async fn execute(args: CalibrateArgs, config: Config) -> anyhow::Result<()> {
    let label_set = LabelSet::load(&config.label_map_path())?;
    let set = read_validation_set(&args.input, &label_set)?;
    tracing::info!(
        "Fitting temperature on {} samples over {} labels",
        set.len(),
        label_set.len()
    );

    let fitter = TemperatureFitter::new(&config.calibration);
    let report: FitReport = tokio::task::spawn_blocking(move || fitter.fit(&set)).await??;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.dry_run {
        tracing::info!("Dry run: temperature not written");
        return Ok(());
    }
    let path = args
        .output
        .map(|p| super::expand_path(&p))
        .unwrap_or_else(|| config.temperature_path());
    report.temperature.save(&path)?;
    Ok(())
}

/// Parse a validation file and resolve its labels against `label_set`.
fn read_validation_set(path: &Path, label_set: &LabelSet) -> anyhow::Result<ValidationSet> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let file: ValidationFile = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Malformed validation file {}: {e}", path.display()))?;

    let labels = resolve_labels(&file.labels, label_set)?;
    let set = match (file.logits, file.probabilities) {
        (Some(logits), None) => ValidationSet::new(logits, labels, label_set.len())?,
        (None, Some(probabilities)) => {
            ValidationSet::from_probabilities(probabilities, labels, label_set.len())?
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("Validation file must contain either `logits` or `probabilities`, not both")
        }
        (None, None) => anyhow::bail!("Validation file needs a `logits` or `probabilities` array"),
    };
    Ok(set)
}

fn resolve_labels(labels: &[LabelRef], label_set: &LabelSet) -> anyhow::Result<Vec<usize>> {
    labels
        .iter()
        .enumerate()
        .map(|(row, label)| match label {
            LabelRef::Index(i) => Ok(*i),
            LabelRef::Name(name) => label_set.index_of(name).ok_or_else(|| {
                anyhow::anyhow!("Row {row}: label '{name}' is not in the label map")
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_set() -> LabelSet {
        LabelSet::new(vec!["Acne".into(), "Eczema".into(), "Melanoma".into()]).unwrap()
    }

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("validation.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_reads_names_and_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"labels": ["acne", 2], "logits": [[2.0, 0.0, 0.0], [0.0, 0.0, 1.0]]}"#,
        );
        let set = read_validation_set(&path, &label_set()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_reads_probabilities() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"labels": ["Eczema"], "probabilities": [[0.1, 0.8, 0.1]]}"#,
        );
        assert!(read_validation_set(&path, &label_set()).is_ok());
    }

    #[test]
    fn test_unknown_label_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"labels": ["Rosacea"], "logits": [[0.0, 0.0, 0.0]]}"#);
        let err = read_validation_set(&path, &label_set()).unwrap_err();
        assert!(err.to_string().contains("Rosacea"));
    }

    #[test]
    fn test_requires_exactly_one_score_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"labels": [0]}"#);
        assert!(read_validation_set(&path, &label_set()).is_err());

        let path = write(
            &dir,
            r#"{"labels": [0], "logits": [[0.0, 0.0, 0.0]], "probabilities": [[1.0, 0.0, 0.0]]}"#,
        );
        assert!(read_validation_set(&path, &label_set()).is_err());
    }

    #[test]
    fn test_empty_validation_set_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"labels": [], "logits": []}"#);
        let err = read_validation_set(&path, &label_set()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_calibrate_writes_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.artifact_dir = dir.path().to_path_buf();
        std::fs::write(
            config.label_map_path(),
            r#"{"Acne": 0, "Eczema": 1, "Melanoma": 2}"#,
        )
        .unwrap();
        let input = write(
            &dir,
            r#"{"labels": [0, 1, 2, 0], "logits": [[3.0, 0.0, 0.0], [0.0, 1.0, 0.5], [0.2, 0.0, 0.4], [0.0, 2.0, 0.0]]}"#,
        );

        let args = CalibrateArgs {
            input,
            output: None,
            dry_run: false,
        };
        execute(args, config.clone()).await.unwrap();

        let bounds = config.calibration.temperature_bounds();
        let t = derma_core::Temperature::load_within(&config.temperature_path(), &bounds).unwrap();
        assert!(bounds.contains(&t.value()));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.artifact_dir = dir.path().to_path_buf();
        std::fs::write(config.label_map_path(), r#"{"Acne": 0, "Eczema": 1}"#).unwrap();
        let input = write(&dir, r#"{"labels": [0, 1], "logits": [[1.0, 0.0], [0.0, 1.0]]}"#);

        let args = CalibrateArgs {
            input,
            output: None,
            dry_run: true,
        };
        execute(args, config.clone()).await.unwrap();
        assert!(!config.temperature_path().exists());
    }
}
