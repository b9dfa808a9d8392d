//! CLIP vision encoder over ONNX Runtime.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Value;

use crate::config::OpenSetConfig;
use crate::error::{ConfigError, InferenceError};
use crate::types::{ImageTensor, TensorLayout};

use super::ImageEmbedder;

const MODEL_NAME: &str = "image-encoder";

/// Wraps an ONNX Runtime session for the CLIP visual tower.
///
/// Uses a `Mutex` because `Session::run` requires `&mut self`.
pub struct OnnxImageEncoder {
    session: Mutex<Session>,
    /// Name of the input tensor (detected from model metadata).
    input_name: String,
    output_name: String,
    mean: [f32; 3],
    std: [f32; 3],
}

impl OnnxImageEncoder {
    /// File name of the vision tower inside the encoder directory.
    pub const FILE_NAME: &'static str = "vision_model.onnx";

    /// Load `vision_model.onnx` from `model_dir`.
    pub fn load(model_dir: &Path, config: &OpenSetConfig) -> Result<Self, ConfigError> {
        let model_path = model_dir.join(Self::FILE_NAME);
        if !model_path.exists() {
            return Err(ConfigError::artifact(
                &model_path,
                "image encoder not found. Run `derma models download` first.",
            ));
        }

        let session = Session::builder()
            .map_err(|e| {
                ConfigError::artifact(&model_path, format!("Failed to create ONNX session builder: {e}"))
            })?
            .commit_from_file(&model_path)
            .map_err(|e| ConfigError::artifact(&model_path, format!("Failed to load ONNX model: {e}")))?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "pixel_values".to_string());

        tracing::debug!(
            "Loaded image encoder from {:?} (input: {:?}, outputs: {:?})",
            model_path,
            input_name,
            session
                .outputs()
                .iter()
                .map(|o| o.name())
                .collect::<Vec<_>>()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name: config.image_output.clone(),
            mean: config.mean,
            std: config.std,
        })
    }
}

impl ImageEmbedder for OnnxImageEncoder {
    fn embed_image(&self, image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let (shape, flat) = image.to_model_input(TensorLayout::Nchw, self.mean, self.std);

        let input_value = Value::from_array((shape, flat)).map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("Failed to create input tensor: {e}"))
        })?;

        let inputs = ort::inputs![self.input_name.as_str() => input_value];

        let mut session = self.session.lock().map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("Session lock poisoned: {e}"))
        })?;

        let outputs = session.run(inputs).map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("ONNX inference failed: {e}"))
        })?;

        // The projected embedding, not last_hidden_state: only the projection
        // shares a space with the text tower.
        let embeds = outputs
            .iter()
            .find(|(name, _)| *name == self.output_name)
            .ok_or_else(|| {
                InferenceError::model(
                    MODEL_NAME,
                    format!("Model did not produce {}", self.output_name),
                )
            })?;

        let (shape, data) = embeds.1.try_extract_tensor::<f32>().map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("Failed to extract {}: {e}", self.output_name))
        })?;

        match shape.len() {
            1 => Ok(data.to_vec()),
            2 => Ok(data[..shape[1] as usize].to_vec()),
            _ => Err(InferenceError::model(
                MODEL_NAME,
                format!("Unexpected {} shape: {:?}", self.output_name, shape),
            )),
        }
    }
}
