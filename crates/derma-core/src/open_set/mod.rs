//! Open-set semantic scoring with a CLIP-style dual encoder.
//!
//! The image embedding is compared against a bank of prompt embeddings
//! ("a clinical photograph of {label}") computed once at startup. Scores are
//! relative similarities, never calibrated probabilities.

mod domain;
mod image_encoder;
mod prompt_bank;
mod scorer;
mod text_encoder;
mod vocabulary;

pub use domain::DomainCheck;
pub use image_encoder::OnnxImageEncoder;
pub use prompt_bank::PromptBank;
pub use scorer::OpenSetScorer;
pub use text_encoder::OnnxTextEncoder;
pub use vocabulary::OpenSetVocabulary;

use crate::error::InferenceError;
use crate::types::ImageTensor;

/// Maps an image into the shared embedding space.
pub trait ImageEmbedder: Send + Sync {
    /// Embed one image. The result need not be normalized.
    fn embed_image(&self, image: &ImageTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Maps text prompts into the shared embedding space.
pub trait TextEmbedder: Send + Sync {
    /// Embed a batch of prompts, one vector per prompt, in order.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError>;
}
