//! Temperature scaling of post-softmax probabilities.

use crate::error::InferenceError;
use crate::math;
use crate::types::ProbabilityVector;

use super::Temperature;

/// Floor applied before taking logs so zero probabilities stay finite.
pub const LOG_EPSILON: f64 = 1e-8;

/// Recover log-space scores from post-softmax probabilities.
///
/// `ln(clip(p, LOG_EPSILON, 1))`. Equal to the true logits up to an additive
/// constant, which softmax ignores.
pub fn logits_from_probabilities(probabilities: &[f64]) -> Vec<f64> {
    probabilities
        .iter()
        .map(|p| p.clamp(LOG_EPSILON, 1.0).ln())
        .collect()
}

/// Rescales a classifier's distribution with a fixed temperature.
///
/// Immutable once built; swapping temperatures means building a new one.
#[derive(Debug, Clone)]
pub struct Calibrator {
    temperature: Temperature,
}

impl Calibrator {
    /// Create a calibrator for the given temperature.
    pub fn new(temperature: Temperature) -> Self {
        Self { temperature }
    }

    /// The temperature in use.
    pub fn temperature(&self) -> Temperature {
        self.temperature
    }

    /// Calibrate a distribution: `softmax(ln(clip(p)) / T)`.
    ///
    /// The result is validated; an invalid output is reported, never repaired.
    pub fn calibrate(&self, raw: &ProbabilityVector) -> Result<ProbabilityVector, InferenceError> {
        let t = self.temperature.value();
        let scaled: Vec<f64> = logits_from_probabilities(raw.as_slice())
            .into_iter()
            .map(|z| z / t)
            .collect();
        ProbabilityVector::new(math::softmax(&scaled))
    }
}
