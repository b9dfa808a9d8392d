//! Cosine scoring of an image against the prompt bank.

use std::sync::Arc;

use crate::error::{ConfigError, DermaError, InferenceError};
use crate::math;
use crate::types::{DomainReport, ImageTensor, SimilarityRanking};

use super::{DomainCheck, ImageEmbedder, OpenSetVocabulary, PromptBank};

/// Scores images against a fixed open-set vocabulary.
///
/// Stateless per call: the prompt bank is built once and only read.
pub struct OpenSetScorer {
    vocabulary: OpenSetVocabulary,
    bank: PromptBank,
    embedder: Arc<dyn ImageEmbedder>,
    logit_scale: f64,
    domain: Option<DomainCheck>,
}

impl OpenSetScorer {
    /// Create a scorer. `bank` must hold one row per vocabulary label.
    pub fn new(
        vocabulary: OpenSetVocabulary,
        bank: PromptBank,
        embedder: Arc<dyn ImageEmbedder>,
        logit_scale: f64,
    ) -> Result<Self, InferenceError> {
        if bank.len() != vocabulary.len() {
            return Err(InferenceError::InvalidInput(format!(
                "prompt bank has {} rows for {} labels",
                bank.len(),
                vocabulary.len()
            )));
        }
        tracing::info!(
            "Open-set scorer ready: {} labels, logit scale {}",
            vocabulary.len(),
            logit_scale
        );
        Ok(Self {
            vocabulary,
            bank,
            embedder,
            logit_scale,
            domain: None,
        })
    }

    /// Attach an in-domain probe evaluated alongside each score.
    pub fn with_domain_check(mut self, domain: DomainCheck) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Embed `sample` once and check the image encoder's output matches the
    /// prompt bank's dimension.
    pub fn check_embedding_dim(&self, sample: &ImageTensor) -> Result<(), DermaError> {
        let dim = self.embedder.embed_image(sample)?.len();
        if dim != self.bank.embedding_dim() {
            return Err(ConfigError::ValidationError(format!(
                "image encoder produces {dim}-dim embeddings, prompt bank has {}",
                self.bank.embedding_dim()
            ))
            .into());
        }
        Ok(())
    }

    /// The vocabulary scored against.
    pub fn vocabulary(&self) -> &OpenSetVocabulary {
        &self.vocabulary
    }

    /// Rank the vocabulary for one image.
    pub fn score(&self, image: &ImageTensor) -> Result<SimilarityRanking, InferenceError> {
        let embedding = self.embed(image)?;
        self.score_embedding(&embedding)
    }

    /// Rank the vocabulary and run the domain probe, embedding the image once.
    pub fn assess(
        &self,
        image: &ImageTensor,
    ) -> Result<(SimilarityRanking, Option<DomainReport>), InferenceError> {
        let embedding = self.embed(image)?;
        let ranking = self.score_embedding(&embedding)?;
        let domain = self
            .domain
            .as_ref()
            .map(|d| d.evaluate(&embedding))
            .transpose()?;
        Ok((ranking, domain))
    }

    /// Rank the vocabulary for an L2-normalized image embedding.
    ///
    /// Softmax over `logit_scale * cosine`; ties keep vocabulary order.
    pub fn score_embedding(&self, embedding: &[f32]) -> Result<SimilarityRanking, InferenceError> {
        let logits: Vec<f64> = self
            .bank
            .similarities(embedding)?
            .into_iter()
            .map(|s| s * self.logit_scale)
            .collect();
        let scores = math::softmax(&logits);
        Ok(SimilarityRanking::from_scores(self.vocabulary.labels(), &scores))
    }

    fn embed(&self, image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let mut embedding = self.embedder.embed_image(image)?;
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::model(
                "image-encoder",
                "embedding contains non-finite values",
            ));
        }
        math::l2_normalize_in_place(&mut embedding);
        Ok(embedding)
    }
}
