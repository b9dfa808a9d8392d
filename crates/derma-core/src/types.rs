//! Core data types flowing through the decision engine.
//!
//! [`ProbabilityVector`] (closed-set, calibrated) and [`SimilarityRanking`]
//! (open-set, relative) are deliberately separate types: their scores live
//! on different scales and are never compared against each other.

use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::labels::normalize_label;
use crate::math;

/// Allowed deviation of a probability vector's sum from 1.0.
pub const SUM_TOLERANCE: f64 = 1e-6;

/// Number of color channels (RGB).
pub const CHANNELS: usize = 3;

/// A decoded, fixed-size RGB image ready for model input.
///
/// Layout is NCHW `[1, 3, H, W]` with values in `[0, 1]`. Decoding, resizing
/// and scaling are the caller's job; each model adapter applies its own
/// per-channel normalization and layout on top of this tensor.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
}

impl ImageTensor {
    /// Wrap an NCHW tensor, checking shape and value range.
    pub fn new(data: Array4<f32>) -> Result<Self, InferenceError> {
        let shape = data.shape();
        if shape[0] != 1 || shape[1] != CHANNELS || shape[2] == 0 || shape[3] == 0 {
            return Err(InferenceError::InvalidInput(format!(
                "expected shape [1, 3, H, W], got {:?}",
                shape
            )));
        }
        if data.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return Err(InferenceError::InvalidInput(
                "pixel values must be finite and within [0, 1]".to_string(),
            ));
        }
        Ok(Self { data })
    }

    /// Tensor height in pixels.
    pub fn height(&self) -> usize {
        self.data.shape()[2]
    }

    /// Tensor width in pixels.
    pub fn width(&self) -> usize {
        self.data.shape()[3]
    }

    /// Borrow the underlying NCHW array.
    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// Produce a flat model input with per-channel `(x - mean) / std` applied.
    ///
    /// Returns `(shape, data)` in the requested layout, ready for ONNX Runtime.
    pub fn to_model_input(
        &self,
        layout: TensorLayout,
        mean: [f32; 3],
        std: [f32; 3],
    ) -> (Vec<i64>, Vec<f32>) {
        let (h, w) = (self.height(), self.width());
        let mut flat = Vec::with_capacity(CHANNELS * h * w);
        match layout {
            TensorLayout::Nchw => {
                for c in 0..CHANNELS {
                    for y in 0..h {
                        for x in 0..w {
                            flat.push((self.data[[0, c, y, x]] - mean[c]) / std[c]);
                        }
                    }
                }
                (vec![1, CHANNELS as i64, h as i64, w as i64], flat)
            }
            TensorLayout::Nhwc => {
                for y in 0..h {
                    for x in 0..w {
                        for c in 0..CHANNELS {
                            flat.push((self.data[[0, c, y, x]] - mean[c]) / std[c]);
                        }
                    }
                }
                (vec![1, h as i64, w as i64, CHANNELS as i64], flat)
            }
        }
    }
}

/// Memory layout a model expects for its image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[batch, channels, height, width]` (PyTorch exports)
    Nchw,
    /// `[batch, height, width, channels]` (Keras exports)
    Nhwc,
}

/// A validated probability distribution over the label set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProbabilityVector(Vec<f64>);

impl ProbabilityVector {
    /// Validate an already-normalized distribution.
    ///
    /// Fails if the vector is empty, contains negative or non-finite entries,
    /// or does not sum to 1 within [`SUM_TOLERANCE`]. Never rescales.
    pub fn new(values: Vec<f64>) -> Result<Self, InferenceError> {
        check_entries(&values)?;
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(InferenceError::DistributionInvalid(format!(
                "probabilities sum to {sum:.9}, expected 1 ± {SUM_TOLERANCE}"
            )));
        }
        Ok(Self(values))
    }

    /// Divide non-negative weights by their sum, then validate.
    pub fn normalized(values: Vec<f64>) -> Result<Self, InferenceError> {
        check_entries(&values)?;
        let sum: f64 = values.iter().sum();
        if sum <= 0.0 {
            return Err(InferenceError::DistributionInvalid(
                "cannot normalize a vector with zero total mass".to_string(),
            ));
        }
        Self::new(values.into_iter().map(|v| v / sum).collect())
    }

    /// Probabilities in label-index order.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a validated vector; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Probability at `index`.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    /// Index and probability of the most likely class (ties → lowest index).
    pub fn top(&self) -> (usize, f64) {
        let idx = math::argmax(&self.0).unwrap_or(0);
        (idx, self.0[idx])
    }
}

fn check_entries(values: &[f64]) -> Result<(), InferenceError> {
    if values.is_empty() {
        return Err(InferenceError::DistributionInvalid(
            "probability vector is empty".to_string(),
        ));
    }
    if let Some((i, v)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(InferenceError::DistributionInvalid(format!(
            "entry {i} is {v}, expected a finite non-negative value"
        )));
    }
    Ok(())
}

/// One open-set label with its relative similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLabel {
    /// Open-set vocabulary label (e.g. "basal cell carcinoma")
    pub label: String,
    /// Softmax-normalized similarity in `[0, 1]`. Relative, not calibrated.
    pub score: f64,
}

/// Open-set labels sorted by descending score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SimilarityRanking(Vec<RankedLabel>);

impl SimilarityRanking {
    /// Build a ranking from parallel label/score slices.
    ///
    /// Sort is stable, so equal scores keep their original prompt order.
    pub fn from_scores(labels: &[String], scores: &[f64]) -> Self {
        let mut ranked: Vec<RankedLabel> = labels
            .iter()
            .zip(scores.iter())
            .map(|(label, &score)| RankedLabel {
                label: label.clone(),
                score,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Self(ranked)
    }

    /// Best-scoring label, if any.
    pub fn top(&self) -> Option<&RankedLabel> {
        self.0.first()
    }

    /// The first `k` entries (fewer if the ranking is shorter).
    pub fn top_k(&self, k: usize) -> &[RankedLabel] {
        &self.0[..k.min(self.0.len())]
    }

    /// Whether `label` appears in the first `k` entries.
    ///
    /// Matching is by normalized name, so "Basal_Cell_Carcinoma" matches
    /// "basal cell carcinoma".
    pub fn contains_in_top_k(&self, label: &str, k: usize) -> bool {
        let wanted = normalize_label(label);
        self.top_k(k)
            .iter()
            .any(|r| normalize_label(&r.label) == wanted)
    }

    /// Iterate over all entries in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &RankedLabel> {
        self.0.iter()
    }

    /// Number of ranked labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the ranking has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Output of the closed-set predictor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedSetResult {
    /// Most likely label
    pub label: String,
    /// Index of `label` in the label set
    pub index: usize,
    /// Calibrated probability of `label`
    pub confidence: f64,
    /// Full calibrated distribution (label-index order)
    pub distribution: ProbabilityVector,
}

/// Which model the final verdict trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictSource {
    #[serde(rename = "closed-set")]
    ClosedSet,
    #[serde(rename = "open-set")]
    OpenSet,
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClosedSet => write!(f, "closed-set"),
            Self::OpenSet => write!(f, "open-set"),
        }
    }
}

/// Which arbitration rule produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Severe label above the (lower) severity threshold
    SeverityOverride,
    /// Confident closed-set label confirmed by the open-set top-K
    ConfidentAndValidated,
    /// Confident closed-set label missing from the open-set top-K
    RejectedByValidator,
    /// Closed-set confidence under the general threshold
    LowConfidence,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::SeverityOverride => "severity override",
            Self::ConfidentAndValidated => "confident and semantically validated",
            Self::RejectedByValidator => "closed-set rejected by semantic validator",
            Self::LowConfidence => "closed-set confidence below threshold",
        };
        f.write_str(text)
    }
}

/// The final arbitrated decision for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Chosen label, from the closed-set label set or the open-set vocabulary
    pub final_label: String,
    /// Calibrated probability (closed-set) or relative score (open-set), in `[0, 1]`
    pub final_confidence: f64,
    /// Which source the verdict trusts
    pub source: VerdictSource,
    /// Rule that fired
    pub reason: ReasonCode,
}

/// Result of the optional in-domain probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DomainReport {
    /// Whether the image looks like a skin photograph
    pub in_domain: bool,
    /// Best score among in-domain prompts
    pub in_domain_score: f64,
    /// Best score among out-of-domain prompts
    pub out_of_domain_score: f64,
}

/// Everything the engine computed for one request.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    /// The arbitrated verdict
    pub verdict: Verdict,
    /// Closed-set prediction the verdict was based on
    pub closed_set: ClosedSetResult,
    /// Leading open-set labels (display top-K)
    pub open_set_top: Vec<RankedLabel>,
    /// In-domain probe result, when enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainReport>,
    /// Temperature in effect for this request
    pub temperature: f64,
}
