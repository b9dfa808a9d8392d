//! ONNX Runtime closed-set classifier.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Value;

use crate::config::{OutputKind, SourceConfig};
use crate::error::{ConfigError, InferenceError};
use crate::math;
use crate::types::{ImageTensor, TensorLayout};

use super::ClosedSetModel;

/// A closed-set classifier exported to ONNX.
///
/// Uses a `Mutex` because `Session::run` requires `&mut self`.
pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    layout: TensorLayout,
    output: OutputKind,
    mean: [f32; 3],
    std: [f32; 3],
}

impl OnnxClassifier {
    /// Load a classifier described by `source` from `model_path`.
    ///
    /// Input and output tensor names are detected from model metadata unless
    /// `source.output_name` pins the output.
    pub fn load(source: &SourceConfig, model_path: &Path) -> Result<Self, ConfigError> {
        if !model_path.exists() {
            return Err(ConfigError::artifact(
                model_path,
                format!("classifier model for source '{}' not found", source.name),
            ));
        }

        let session = Session::builder()
            .map_err(|e| {
                ConfigError::artifact(model_path, format!("Failed to create ONNX session builder: {e}"))
            })?
            .commit_from_file(model_path)
            .map_err(|e| ConfigError::artifact(model_path, format!("Failed to load ONNX model: {e}")))?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| ConfigError::artifact(model_path, "model declares no inputs"))?;

        let output_name = match &source.output_name {
            Some(name) => {
                if !session.outputs().iter().any(|o| o.name() == name) {
                    return Err(ConfigError::artifact(
                        model_path,
                        format!("model has no output named '{name}'"),
                    ));
                }
                name.clone()
            }
            None => session
                .outputs()
                .first()
                .map(|o| o.name().to_string())
                .ok_or_else(|| ConfigError::artifact(model_path, "model declares no outputs"))?,
        };

        tracing::info!(
            "Loaded classifier '{}' from {:?} (input: {:?}, output: {:?}, layout: {:?})",
            source.name,
            model_path,
            input_name,
            output_name,
            source.layout
        );

        Ok(Self {
            name: source.name.clone(),
            session: Mutex::new(session),
            input_name,
            output_name,
            layout: source.layout,
            output: source.output,
            mean: source.mean,
            std: source.std,
        })
    }

    fn unavailable(&self, message: impl Into<String>) -> InferenceError {
        InferenceError::model(&self.name, message)
    }
}

impl ClosedSetModel for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let (shape, flat) = image.to_model_input(self.layout, self.mean, self.std);

        let input_value = Value::from_array((shape, flat))
            .map_err(|e| self.unavailable(format!("Failed to create input tensor: {e}")))?;
        let inputs = ort::inputs![self.input_name.as_str() => input_value];

        let mut session = self
            .session
            .lock()
            .map_err(|e| self.unavailable(format!("Session lock poisoned: {e}")))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| self.unavailable(format!("ONNX inference failed: {e}")))?;

        let output = outputs
            .iter()
            .find(|(name, _)| *name == self.output_name)
            .ok_or_else(|| {
                self.unavailable(format!("Model did not produce {}", self.output_name))
            })?;

        let (_shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| self.unavailable(format!("Failed to extract output tensor: {e}")))?;

        // A single image in, so the whole tensor is one row.
        let raw = data.to_vec();
        Ok(match self.output {
            OutputKind::Probabilities => raw,
            OutputKind::Logits => {
                if raw.iter().any(|z| !z.is_finite()) {
                    return Err(InferenceError::DistributionInvalid(format!(
                        "source '{}' produced non-finite logits",
                        self.name
                    )));
                }
                let logits: Vec<f64> = raw.iter().map(|&z| z as f64).collect();
                math::softmax(&logits).into_iter().map(|p| p as f32).collect()
            }
        })
    }
}
