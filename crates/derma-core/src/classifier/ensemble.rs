//! Weighted combination of closed-set sources.

use std::sync::Arc;

use crate::error::{ConfigError, InferenceError};
use crate::types::{ImageTensor, ProbabilityVector};

use super::ClosedSetModel;

/// Mass assigned to classes a source does not cover.
pub const PAD_PROBABILITY: f64 = 1e-8;

/// A closed-set model together with its ensemble weight.
#[derive(Clone)]
pub struct WeightedSource {
    /// Weight before renormalization; must be finite and non-negative.
    pub weight: f64,
    /// The model itself.
    pub model: Arc<dyn ClosedSetModel>,
}

impl WeightedSource {
    /// Pair a model with a weight.
    pub fn new(model: Arc<dyn ClosedSetModel>, weight: f64) -> Self {
        Self { weight, model }
    }
}

impl std::fmt::Debug for WeightedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedSource")
            .field("name", &self.model.name())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Fit a raw model output to `num_classes` entries and renormalize it.
///
/// Missing trailing classes get [`PAD_PROBABILITY`]; extra entries are dropped.
/// Negative, non-finite, empty, or all-zero output is rejected.
pub fn align_distribution(
    raw: &[f32],
    num_classes: usize,
) -> Result<ProbabilityVector, InferenceError> {
    if raw.is_empty() {
        return Err(InferenceError::DistributionInvalid(
            "model returned an empty output".to_string(),
        ));
    }
    if let Some(v) = raw.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(InferenceError::DistributionInvalid(format!(
            "model output contains {v}, expected non-negative probabilities"
        )));
    }
    if raw.len() != num_classes {
        tracing::debug!(
            "Aligning model output of length {} to {} classes",
            raw.len(),
            num_classes
        );
    }
    let aligned: Vec<f64> = (0..num_classes)
        .map(|i| raw.get(i).map_or(PAD_PROBABILITY, |&p| p as f64))
        .collect();
    ProbabilityVector::normalized(aligned)
}

/// Weighted ensemble of closed-set sources.
#[derive(Debug, Clone)]
pub struct Ensemble {
    sources: Vec<WeightedSource>,
    num_classes: usize,
}

impl Ensemble {
    /// Build an ensemble. Zero-weight sources are dropped.
    ///
    /// Fails if no source carries positive weight or a weight is invalid.
    pub fn new(sources: Vec<WeightedSource>, num_classes: usize) -> Result<Self, ConfigError> {
        if let Some(s) = sources
            .iter()
            .find(|s| !s.weight.is_finite() || s.weight < 0.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "source '{}' has invalid weight {}",
                s.model.name(),
                s.weight
            )));
        }
        let sources: Vec<WeightedSource> =
            sources.into_iter().filter(|s| s.weight > 0.0).collect();
        if sources.is_empty() {
            return Err(ConfigError::ValidationError(
                "ensemble needs at least one source with positive weight".to_string(),
            ));
        }
        Ok(Self {
            sources,
            num_classes,
        })
    }

    /// Sources taking part in the ensemble.
    pub fn sources(&self) -> &[WeightedSource] {
        &self.sources
    }

    /// Run every source and combine their aligned outputs.
    ///
    /// Any failing source fails the whole prediction; there is no partial
    /// ensemble and no retry.
    pub fn predict(&self, image: &ImageTensor) -> Result<ProbabilityVector, InferenceError> {
        let outputs = self
            .sources
            .iter()
            .map(|s| s.model.predict(image))
            .collect::<Result<Vec<_>, _>>()?;
        let weights: Vec<f64> = self.sources.iter().map(|s| s.weight).collect();
        self.combine(&outputs, &weights)
    }

    /// Combine raw outputs with their weights. Weights are renormalized.
    pub fn combine(
        &self,
        outputs: &[Vec<f32>],
        weights: &[f64],
    ) -> Result<ProbabilityVector, InferenceError> {
        let total: f64 = weights.iter().sum();
        if outputs.is_empty() || outputs.len() != weights.len() || total <= 0.0 {
            return Err(InferenceError::DistributionInvalid(
                "no weighted outputs to combine".to_string(),
            ));
        }

        let mut combined = vec![0.0_f64; self.num_classes];
        for (raw, weight) in outputs.iter().zip(weights) {
            let aligned = align_distribution(raw, self.num_classes)?;
            for (acc, p) in combined.iter_mut().zip(aligned.as_slice()) {
                *acc += (weight / total) * p;
            }
        }
        ProbabilityVector::normalized(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    struct Fixed(&'static str, Vec<f32>);

    impl ClosedSetModel for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn predict(&self, _image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            Ok(self.1.clone())
        }
    }

    struct Broken;

    impl ClosedSetModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict(&self, _image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::model("broken", "session failed"))
        }
    }

    fn image() -> ImageTensor {
        ImageTensor::new(Array4::zeros((1, 3, 2, 2))).unwrap()
    }

    fn source(name: &'static str, out: Vec<f32>, weight: f64) -> WeightedSource {
        WeightedSource::new(Arc::new(Fixed(name, out)), weight)
    }

    #[test]
    fn test_align_pads_missing_classes() {
        let pv = align_distribution(&[0.5, 0.5], 3).unwrap();
        assert_eq!(pv.len(), 3);
        assert!(pv.get(2).unwrap() > 0.0 && pv.get(2).unwrap() < 1e-7);
    }

    #[test]
    fn test_align_truncates_extra_classes() {
        let pv = align_distribution(&[0.2, 0.2, 0.6], 2).unwrap();
        assert_eq!(pv.as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn test_align_rejects_bad_output() {
        assert!(align_distribution(&[], 3).is_err());
        assert!(align_distribution(&[0.5, -0.1], 2).is_err());
        assert!(align_distribution(&[f32::NAN, 1.0], 2).is_err());
        assert!(align_distribution(&[0.0, 0.0], 2).is_err());
    }

    #[test]
    fn test_single_source_passthrough() {
        let ensemble = Ensemble::new(vec![source("cnn", vec![0.25, 0.75], 1.0)], 2).unwrap();
        let pv = ensemble.predict(&image()).unwrap();
        assert!((pv.as_slice()[1] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_weights_are_renormalized() {
        let ensemble = Ensemble::new(
            vec![
                source("a", vec![1.0, 0.0], 3.0),
                source("b", vec![0.0, 1.0], 1.0),
            ],
            2,
        )
        .unwrap();
        let pv = ensemble.predict(&image()).unwrap();
        assert!((pv.as_slice()[0] - 0.75).abs() < 1e-9);
        assert!((pv.as_slice()[1] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_source_is_omitted() {
        let ensemble = Ensemble::new(
            vec![
                source("a", vec![1.0, 0.0], 1.0),
                WeightedSource::new(Arc::new(Broken), 0.0),
            ],
            2,
        )
        .unwrap();
        assert_eq!(ensemble.sources().len(), 1);
        assert!(ensemble.predict(&image()).is_ok());
    }

    #[test]
    fn test_failing_source_fails_prediction() {
        let ensemble = Ensemble::new(
            vec![
                source("a", vec![1.0, 0.0], 1.0),
                WeightedSource::new(Arc::new(Broken), 1.0),
            ],
            2,
        )
        .unwrap();
        let err = ensemble.predict(&image()).unwrap_err();
        assert!(matches!(err, InferenceError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_rejects_all_zero_weights() {
        assert!(Ensemble::new(vec![source("a", vec![1.0], 0.0)], 1).is_err());
        assert!(Ensemble::new(vec![], 1).is_err());
    }

    #[test]
    fn test_invalid_weight_is_configuration_error() {
        for weight in [-1.0, f64::NAN, f64::INFINITY] {
            let err = Ensemble::new(vec![source("a", vec![1.0], weight)], 1).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)));
            assert_eq!(crate::DermaError::from(err).kind(), crate::ErrorKind::ConfigurationInvalid);
        }
    }
}
