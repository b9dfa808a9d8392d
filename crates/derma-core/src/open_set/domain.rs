//! Optional in-domain probe: does the image look like skin at all?
//!
//! In-domain and out-of-domain prompts share one softmax; the image is in
//! domain when its best in-domain prompt beats its best out-of-domain prompt.
//! The result is diagnostic and never changes the verdict.

use crate::config::DomainCheckConfig;
use crate::error::InferenceError;
use crate::math;
use crate::types::DomainReport;

use super::{PromptBank, TextEmbedder};

/// Encoded probe prompts.
#[derive(Debug, Clone)]
pub struct DomainCheck {
    bank: PromptBank,
    in_domain_count: usize,
    logit_scale: f64,
}

impl DomainCheck {
    /// Build from already-encoded banks.
    pub fn new(
        in_domain: PromptBank,
        out_of_domain: PromptBank,
        logit_scale: f64,
    ) -> Result<Self, InferenceError> {
        let in_domain_count = in_domain.len();
        let bank = in_domain.concat(&out_of_domain)?;
        Ok(Self {
            bank,
            in_domain_count,
            logit_scale,
        })
    }

    /// Encode the configured probe prompts.
    pub fn encode(
        config: &DomainCheckConfig,
        encoder: &dyn TextEmbedder,
        logit_scale: f64,
    ) -> Result<Self, InferenceError> {
        let in_domain = PromptBank::from_embeddings(encoder.embed_texts(&config.in_domain_prompts)?)?;
        let out_of_domain =
            PromptBank::from_embeddings(encoder.embed_texts(&config.out_of_domain_prompts)?)?;
        tracing::info!(
            "Domain check ready: {} in-domain, {} out-of-domain prompts",
            in_domain.len(),
            out_of_domain.len()
        );
        Self::new(in_domain, out_of_domain, logit_scale)
    }

    /// Evaluate a normalized image embedding.
    pub fn evaluate(&self, embedding: &[f32]) -> Result<DomainReport, InferenceError> {
        let logits: Vec<f64> = self
            .bank
            .similarities(embedding)?
            .into_iter()
            .map(|s| s * self.logit_scale)
            .collect();
        let probs = math::softmax(&logits);
        let (inside, outside) = probs.split_at(self.in_domain_count);
        let best = |xs: &[f64]| xs.iter().copied().fold(0.0_f64, f64::max);
        let in_domain_score = best(inside);
        let out_of_domain_score = best(outside);
        Ok(DomainReport {
            in_domain: in_domain_score > out_of_domain_score,
            in_domain_score,
            out_of_domain_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check() -> DomainCheck {
        let skin = PromptBank::from_embeddings(vec![vec![1.0, 0.0, 0.0], vec![0.7, 0.7, 0.0]]).unwrap();
        let other = PromptBank::from_embeddings(vec![vec![0.0, 0.0, 1.0]]).unwrap();
        DomainCheck::new(skin, other, 100.0).unwrap()
    }

    #[test]
    fn test_skin_embedding_is_in_domain() {
        let report = check().evaluate(&[1.0, 0.0, 0.0]).unwrap();
        assert!(report.in_domain);
        assert!(report.in_domain_score > report.out_of_domain_score);
    }

    #[test]
    fn test_other_embedding_is_out_of_domain() {
        let report = check().evaluate(&[0.0, 0.0, 1.0]).unwrap();
        assert!(!report.in_domain);
    }

    #[test]
    fn test_scores_come_from_joint_softmax() {
        let report = check().evaluate(&[0.6, 0.0, 0.8]).unwrap();
        assert!(report.in_domain_score + report.out_of_domain_score <= 1.0 + 1e-9);
    }
}
