//! CLIP text encoder over ONNX Runtime with a HuggingFace tokenizer.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Value;

use crate::config::OpenSetConfig;
use crate::error::{ConfigError, InferenceError};

use super::TextEmbedder;

const MODEL_NAME: &str = "text-encoder";

/// CLIP text tower wrapper.
///
/// Uses the same `Mutex<Session>` pattern as the vision encoder. Only used at
/// startup to build the prompt bank.
pub struct OnnxTextEncoder {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    output_name: String,
    max_length: usize,
    wants_attention_mask: bool,
}

impl OnnxTextEncoder {
    /// File name of the text tower inside the encoder directory.
    pub const FILE_NAME: &'static str = "text_model.onnx";
    /// Tokenizer file inside the encoder directory.
    pub const TOKENIZER_FILE: &'static str = "tokenizer.json";

    /// Load `text_model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path, config: &OpenSetConfig) -> Result<Self, ConfigError> {
        let text_model_path = model_dir.join(Self::FILE_NAME);
        let tokenizer_path = model_dir.join(Self::TOKENIZER_FILE);

        for path in [&text_model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(ConfigError::artifact(
                    path,
                    "text encoder file not found. Run `derma models download` first.",
                ));
            }
        }

        let session = Session::builder()
            .map_err(|e| {
                ConfigError::artifact(&text_model_path, format!("Failed to create ONNX session builder: {e}"))
            })?
            .commit_from_file(&text_model_path)
            .map_err(|e| {
                ConfigError::artifact(&text_model_path, format!("Failed to load text encoder model: {e}"))
            })?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            ConfigError::artifact(&tokenizer_path, format!("Failed to load tokenizer: {e}"))
        })?;

        let wants_attention_mask = session.inputs().iter().any(|i| i.name() == "attention_mask");

        tracing::debug!(
            "Loaded text encoder (inputs: {:?}, outputs: {:?})",
            session
                .inputs()
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>(),
            session
                .outputs()
                .iter()
                .map(|o| o.name())
                .collect::<Vec<_>>()
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            output_name: config.text_output.clone(),
            max_length: config.text_max_length,
            wants_attention_mask,
        })
    }

    /// Whether both text encoder files exist in `model_dir`.
    pub fn model_exists(model_dir: &Path) -> bool {
        model_dir.join(Self::FILE_NAME).exists() && model_dir.join(Self::TOKENIZER_FILE).exists()
    }
}

impl TextEmbedder for OnnxTextEncoder {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        let batch_size = texts.len();
        if batch_size == 0 {
            return Ok(vec![]);
        }
        let max_length = self.max_length;

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| InferenceError::model(MODEL_NAME, format!("Tokenization failed: {e}")))?;

        // Right-pad with zeros; CLIP pools at the end-of-text token, which
        // carries the largest id, so zero padding does not move it.
        let mut input_ids = vec![0i64; batch_size * max_length];
        let mut attention_mask = vec![0i64; batch_size * max_length];
        for (i, encoding) in encodings.iter().enumerate() {
            for (j, &id) in encoding.get_ids().iter().take(max_length).enumerate() {
                input_ids[i * max_length + j] = id as i64;
                attention_mask[i * max_length + j] = 1;
            }
        }

        let shape = vec![batch_size as i64, max_length as i64];
        let input_ids_value = Value::from_array((shape.clone(), input_ids)).map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("Failed to create input tensor: {e}"))
        })?;

        let mut session = self.session.lock().map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("Text encoder lock poisoned: {e}"))
        })?;

        let outputs = if self.wants_attention_mask {
            let mask_value = Value::from_array((shape, attention_mask)).map_err(|e| {
                InferenceError::model(MODEL_NAME, format!("Failed to create mask tensor: {e}"))
            })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_value,
                "attention_mask" => mask_value
            ])
        } else {
            session.run(ort::inputs!["input_ids" => input_ids_value])
        }
        .map_err(|e| InferenceError::model(MODEL_NAME, format!("Text encoder inference failed: {e}")))?;

        let embeds = outputs
            .iter()
            .find(|(name, _)| *name == self.output_name)
            .ok_or_else(|| {
                InferenceError::model(
                    MODEL_NAME,
                    format!("Text encoder did not produce {}", self.output_name),
                )
            })?;

        let (_shape, data) = embeds.1.try_extract_tensor::<f32>().map_err(|e| {
            InferenceError::model(MODEL_NAME, format!("Failed to extract {}: {e}", self.output_name))
        })?;

        let dim = data.len() / batch_size;
        if dim == 0 || dim * batch_size != data.len() {
            return Err(InferenceError::model(
                MODEL_NAME,
                format!("output of {} values does not split into {batch_size} rows", data.len()),
            ));
        }
        Ok(data.chunks(dim).map(<[f32]>::to_vec).collect())
    }
}
