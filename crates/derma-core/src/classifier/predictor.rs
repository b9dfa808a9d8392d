//! Ensemble + calibration + argmax.

use std::sync::Arc;

use crate::calibration::Calibrator;
use crate::error::{ConfigError, InferenceError};
use crate::labels::LabelSet;
use crate::types::{ClosedSetResult, ImageTensor};

use super::{Ensemble, WeightedSource};

/// Produces calibrated closed-set predictions.
#[derive(Debug, Clone)]
pub struct ClosedSetPredictor {
    labels: Arc<LabelSet>,
    ensemble: Ensemble,
}

impl ClosedSetPredictor {
    /// Create a predictor over `labels` from weighted sources.
    pub fn new(labels: Arc<LabelSet>, sources: Vec<WeightedSource>) -> Result<Self, ConfigError> {
        let ensemble = Ensemble::new(sources, labels.len())?;
        tracing::info!(
            "Closed-set predictor ready: {} classes, sources [{}]",
            labels.len(),
            ensemble
                .sources()
                .iter()
                .map(|s| format!("{}×{}", s.model.name(), s.weight))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self { labels, ensemble })
    }

    /// The label set predictions are made over.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Run all sources, calibrate with `calibrator`, and pick the argmax.
    ///
    /// Ties resolve to the lowest label index.
    pub fn predict(
        &self,
        image: &ImageTensor,
        calibrator: &Calibrator,
    ) -> Result<ClosedSetResult, InferenceError> {
        let raw = self.ensemble.predict(image)?;
        let distribution = calibrator.calibrate(&raw)?;
        let (index, confidence) = distribution.top();
        let label = self.labels.name(index).ok_or_else(|| {
            InferenceError::DistributionInvalid(format!(
                "argmax index {index} outside label set of {}",
                self.labels.len()
            ))
        })?;

        tracing::debug!(
            "Closed-set prediction: {} ({:.4}, T={})",
            label,
            confidence,
            calibrator.temperature()
        );

        Ok(ClosedSetResult {
            label: label.to_string(),
            index,
            confidence,
            distribution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Temperature;
    use crate::classifier::ClosedSetModel;
    use ndarray::Array4;

    struct Fixed(Vec<f32>);

    impl ClosedSetModel for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, _image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    fn predictor(output: Vec<f32>) -> ClosedSetPredictor {
        let labels = LabelSet::new(vec!["Acne".into(), "Eczema".into(), "Melanoma".into()]).unwrap();
        ClosedSetPredictor::new(
            Arc::new(labels),
            vec![WeightedSource::new(Arc::new(Fixed(output)), 1.0)],
        )
        .unwrap()
    }

    fn image() -> ImageTensor {
        ImageTensor::new(Array4::from_elem((1, 3, 4, 4), 0.5)).unwrap()
    }

    #[test]
    fn test_predict_returns_argmax_label() {
        let result = predictor(vec![0.1, 0.2, 0.7])
            .predict(&image(), &Calibrator::new(Temperature::IDENTITY))
            .unwrap();
        assert_eq!(result.label, "Melanoma");
        assert_eq!(result.index, 2);
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.distribution.len(), 3);
    }

    #[test]
    fn test_predict_applies_temperature() {
        let p = predictor(vec![0.1, 0.2, 0.7]);
        let sharp = p
            .predict(&image(), &Calibrator::new(Temperature::IDENTITY))
            .unwrap();
        let flat = p
            .predict(&image(), &Calibrator::new(Temperature::new(2.0).unwrap()))
            .unwrap();
        assert_eq!(sharp.label, flat.label);
        assert!(flat.confidence < sharp.confidence);
    }

    #[test]
    fn test_tie_resolves_to_lowest_index() {
        let result = predictor(vec![0.4, 0.4, 0.2])
            .predict(&image(), &Calibrator::new(Temperature::IDENTITY))
            .unwrap();
        assert_eq!(result.label, "Acne");
    }

    #[test]
    fn test_short_output_is_padded() {
        let result = predictor(vec![0.3, 0.7])
            .predict(&image(), &Calibrator::new(Temperature::IDENTITY))
            .unwrap();
        assert_eq!(result.label, "Eczema");
        assert!(result.distribution.get(2).unwrap() < 1e-6);
    }
}
