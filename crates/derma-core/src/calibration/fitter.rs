//! Offline temperature fitting by bounded 1-D NLL minimization.
//!
//! NLL as a function of T is unimodal on the search interval, so a
//! golden-section search converges without derivatives. Both endpoints are
//! evaluated as well, since the optimum frequently sits on a bound for
//! badly under- or over-confident models.

use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::error::FitError;
use crate::labels::LabelSet;

use super::calibrator::logits_from_probabilities;
use super::metrics::{expected_calibration_error, negative_log_likelihood, top1_outcomes};
use super::Temperature;

/// `(sqrt(5) - 1) / 2`
const INV_PHI: f64 = 0.618_033_988_749_894_9;

fn insufficient(message: impl Into<String>) -> FitError {
    FitError::InsufficientData(message.into())
}

/// Validation logits with their true label indices.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    logits: Vec<Vec<f64>>,
    labels: Vec<usize>,
}

impl ValidationSet {
    /// Validate logits against the number of classes.
    ///
    /// Fails on an empty set, mismatched lengths, ragged or wrong-width rows,
    /// non-finite values, or labels outside `0..num_classes`.
    pub fn new(
        logits: Vec<Vec<f64>>,
        labels: Vec<usize>,
        num_classes: usize,
    ) -> Result<Self, FitError> {
        if logits.is_empty() {
            return Err(insufficient("validation set is empty"));
        }
        if num_classes == 0 {
            return Err(insufficient("label set is empty"));
        }
        if logits.len() != labels.len() {
            return Err(insufficient(format!(
                "{} logit rows but {} labels",
                logits.len(),
                labels.len()
            )));
        }
        for (i, (row, &label)) in logits.iter().zip(&labels).enumerate() {
            if row.len() != num_classes {
                return Err(insufficient(format!(
                    "row {i} has {} values, expected {num_classes}",
                    row.len()
                )));
            }
            if row.iter().any(|z| !z.is_finite()) {
                return Err(insufficient(format!("row {i} contains a non-finite logit")));
            }
            if label >= num_classes {
                return Err(insufficient(format!(
                    "label {label} in row {i} is out of range for {num_classes} classes"
                )));
            }
        }
        Ok(Self { logits, labels })
    }

    /// Build from post-softmax probabilities via `ln(clip(p, 1e-8, 1))`.
    pub fn from_probabilities(
        probabilities: Vec<Vec<f64>>,
        labels: Vec<usize>,
        num_classes: usize,
    ) -> Result<Self, FitError> {
        if let Some(i) = probabilities
            .iter()
            .position(|row| row.iter().any(|p| !p.is_finite() || *p < 0.0))
        {
            return Err(insufficient(format!(
                "row {i} contains a negative or non-finite probability"
            )));
        }
        let logits = probabilities
            .iter()
            .map(|row| logits_from_probabilities(row))
            .collect();
        Self::new(logits, labels, num_classes)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn nll(&self, t: f64) -> f64 {
        negative_log_likelihood(&self.logits, &self.labels, t)
    }

    fn ece(&self, t: f64, bins: usize) -> f64 {
        let (conf, correct) = top1_outcomes(&self.logits, &self.labels, t);
        expected_calibration_error(&conf, &correct, bins)
    }
}

/// Summary of one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    /// Fitted temperature
    pub temperature: Temperature,
    /// Mean NLL at T = 1
    pub nll_before: f64,
    /// Mean NLL at the fitted temperature
    pub nll_after: f64,
    /// Expected calibration error at T = 1
    pub ece_before: f64,
    /// Expected calibration error at the fitted temperature
    pub ece_after: f64,
    /// Validation samples used
    pub samples: usize,
    /// Solver iterations performed
    pub iterations: usize,
}

/// Bounded temperature solver.
#[derive(Debug, Clone)]
pub struct TemperatureFitter {
    min_temperature: f64,
    max_temperature: f64,
    tolerance: f64,
    max_iterations: usize,
    ece_bins: usize,
}

impl TemperatureFitter {
    /// Create a fitter from validated calibration settings.
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            min_temperature: config.min_temperature,
            max_temperature: config.max_temperature,
            tolerance: config.tolerance,
            max_iterations: config.max_iterations,
            ece_bins: config.ece_bins,
        }
    }

    /// Find the NLL-minimizing temperature within the configured bounds.
    ///
    /// Deterministic: identical input always yields the identical result.
    pub fn fit(&self, set: &ValidationSet) -> Result<FitReport, FitError> {
        let (mut a, mut b) = (self.min_temperature, self.max_temperature);
        let mut c = b - INV_PHI * (b - a);
        let mut d = a + INV_PHI * (b - a);
        let mut fc = set.nll(c);
        let mut fd = set.nll(d);
        let mut iterations = 0;

        while (b - a) > self.tolerance && iterations < self.max_iterations {
            if fc <= fd {
                b = d;
                d = c;
                fd = fc;
                c = b - INV_PHI * (b - a);
                fc = set.nll(c);
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + INV_PHI * (b - a);
                fd = set.nll(d);
            }
            iterations += 1;
        }

        let interior = if fc <= fd { (c, fc) } else { (d, fd) };
        let best = [
            (self.min_temperature, set.nll(self.min_temperature)),
            interior,
            (self.max_temperature, set.nll(self.max_temperature)),
        ]
        .into_iter()
        .filter(|(_, f)| f.is_finite())
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .ok_or_else(|| insufficient("negative log-likelihood is not finite anywhere in range"))?;

        let temperature = Temperature::new(best.0)
            .map_err(|e| insufficient(format!("solver produced an invalid temperature: {e}")))?;

        let report = FitReport {
            temperature,
            nll_before: set.nll(1.0),
            nll_after: best.1,
            ece_before: set.ece(1.0, self.ece_bins),
            ece_after: set.ece(best.0, self.ece_bins),
            samples: set.len(),
            iterations,
        };

        tracing::info!(
            "Fitted temperature {} on {} samples in {} iterations (NLL {:.4} -> {:.4}, ECE {:.4} -> {:.4})",
            report.temperature,
            report.samples,
            report.iterations,
            report.nll_before,
            report.nll_after,
            report.ece_before,
            report.ece_after,
        );

        Ok(report)
    }
}

/// Fit a temperature for `label_set` from raw validation logits.
pub fn fit_temperature(
    logits: Vec<Vec<f64>>,
    labels: Vec<usize>,
    label_set: &LabelSet,
    config: &CalibrationConfig,
) -> Result<Temperature, FitError> {
    let set = ValidationSet::new(logits, labels, label_set.len())?;
    Ok(TemperatureFitter::new(config).fit(&set)?.temperature)
}
