//! Closed-set prediction over the fixed label set.
//!
//! One or more weighted [`ClosedSetModel`] sources are combined into a single
//! distribution, calibrated, and reduced to the argmax label.

mod ensemble;
mod onnx;
mod predictor;

pub use ensemble::{align_distribution, Ensemble, WeightedSource, PAD_PROBABILITY};
pub use onnx::OnnxClassifier;
pub use predictor::ClosedSetPredictor;

use crate::error::InferenceError;
use crate::types::ImageTensor;

/// A model producing a distribution over (a prefix of) the label set.
///
/// Implementations must be safe to call from several threads at once.
pub trait ClosedSetModel: Send + Sync {
    /// Source name for logging (e.g. "cnn").
    fn name(&self) -> &str;

    /// Run the model on one image and return per-class probabilities.
    ///
    /// The output may be shorter or longer than the label set; the ensemble
    /// aligns it.
    fn predict(&self, image: &ImageTensor) -> Result<Vec<f32>, InferenceError>;
}
