//! Sub-configuration structs with defaults matching the shipped models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use crate::types::TensorLayout;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding trained artifacts (classifier, label map, temperature)
    pub artifact_dir: PathBuf,

    /// Directory where downloaded open-set encoders are stored
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("~/.derma/artifacts"),
            model_dir: PathBuf::from("~/.derma/models"),
        }
    }
}

/// Persisted artifact file names, relative to `general.artifact_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Label ↔ index mapping (JSON object of name → index)
    pub label_map: String,

    /// Scalar temperature file (one decimal number)
    pub temperature: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            label_map: "classes.json".to_string(),
            temperature: "temperature.txt".to_string(),
        }
    }
}

/// Input tensor settings shared by every model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Square input size in pixels
    pub image_size: u32,

    /// File extensions picked up when a directory is given
    pub supported_formats: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            supported_formats: ["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// What a closed-set model emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Post-softmax probabilities
    Probabilities,
    /// Pre-softmax logits
    Logits,
}

/// One weighted closed-set source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name used in logs and error messages
    pub name: String,

    /// ONNX file name, relative to `general.artifact_dir`
    pub model: String,

    /// Ensemble weight (renormalized across sources)
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Input layout expected by the model
    #[serde(default = "default_layout")]
    pub layout: TensorLayout,

    /// Whether the model outputs probabilities or logits
    #[serde(default = "default_output_kind")]
    pub output: OutputKind,

    /// Output tensor name; first model output when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,

    /// Per-channel mean subtracted from `[0, 1]` pixels
    #[serde(default = "default_unit_mean")]
    pub mean: [f32; 3],

    /// Per-channel std dividing the mean-shifted pixels
    #[serde(default = "default_unit_std")]
    pub std: [f32; 3],
}

fn default_weight() -> f64 {
    1.0
}

fn default_layout() -> TensorLayout {
    TensorLayout::Nhwc
}

fn default_output_kind() -> OutputKind {
    OutputKind::Probabilities
}

fn default_unit_mean() -> [f32; 3] {
    [0.0; 3]
}

fn default_unit_std() -> [f32; 3] {
    [1.0; 3]
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "cnn".to_string(),
            model: "cnn_balanced_finetuned.onnx".to_string(),
            weight: default_weight(),
            layout: default_layout(),
            output: default_output_kind(),
            output_name: None,
            mean: default_unit_mean(),
            std: default_unit_std(),
        }
    }
}

/// Closed-set classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Weighted sources; a single CNN with weight 1.0 by default
    pub sources: Vec<SourceConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig::default()],
        }
    }
}

/// Open-set semantic scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSetConfig {
    /// Encoder directory name under `general.model_dir`
    pub model: String,

    /// Prompt template; `{}` is replaced by the label
    pub prompt_template: String,

    /// Disease descriptions scored against each image
    pub labels: Vec<String>,

    /// Optional vocabulary file (one label per line) overriding `labels`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_file: Option<PathBuf>,

    /// Multiplier on cosine similarities before softmax
    pub logit_scale: f64,

    /// How many open-set entries to report alongside a verdict
    pub display_top_k: usize,

    /// Embedding dimension shared by both encoders
    pub embedding_dim: usize,

    /// Token sequence length for the text encoder
    pub text_max_length: usize,

    /// Prompts encoded per text-encoder call
    pub text_batch_size: usize,

    /// Image encoder output tensor name
    pub image_output: String,

    /// Text encoder output tensor name
    pub text_output: String,

    /// Per-channel normalization mean for the image encoder
    pub mean: [f32; 3],

    /// Per-channel normalization std for the image encoder
    pub std: [f32; 3],

    /// In-domain probe
    pub domain: DomainCheckConfig,

    /// Encoder download settings
    pub download: DownloadConfig,
}

impl Default for OpenSetConfig {
    fn default() -> Self {
        Self {
            model: "clip-vit-base-patch32".to_string(),
            prompt_template: "a clinical photograph of {}".to_string(),
            labels: [
                "acne",
                "rosacea",
                "eczema",
                "psoriasis",
                "vitiligo",
                "basal cell carcinoma",
                "melanoma",
                "hives (urticaria)",
                "athlete's foot (tinea pedis)",
                "nail fungus (onychomycosis)",
                "contact dermatitis",
                "seborrheic dermatitis",
                "ringworm",
                "healthy skin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vocabulary_file: None,
            logit_scale: 1.0,
            display_top_k: 5,
            embedding_dim: 512,
            text_max_length: 77,
            text_batch_size: 32,
            image_output: "image_embeds".to_string(),
            text_output: "text_embeds".to_string(),
            mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
            std: [0.268_629_54, 0.261_302_6, 0.275_777_1],
            domain: DomainCheckConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

/// In-domain probe: is this a photograph of skin at all?
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainCheckConfig {
    /// Run the probe and report it with each assessment
    pub enabled: bool,

    /// Prompts describing skin photographs
    pub in_domain_prompts: Vec<String>,

    /// Prompts describing anything else
    pub out_of_domain_prompts: Vec<String>,
}

impl Default for DomainCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            in_domain_prompts: vec![
                "a photo of human skin".to_string(),
                "a close-up photo of a skin condition".to_string(),
                "a dermatology image".to_string(),
                "a medical photo of skin disease".to_string(),
            ],
            out_of_domain_prompts: vec![
                "a non-skin image".to_string(),
                "an object or scenery photo".to_string(),
            ],
        }
    }
}

/// Where `derma models download` fetches the open-set encoders from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Hugging Face repository
    pub repo: String,

    /// Remote path of the vision encoder
    pub vision_remote: String,

    /// Remote path of the text encoder
    pub text_remote: String,

    /// Remote path of the tokenizer
    pub tokenizer_remote: String,

    /// Expected BLAKE3 checksums keyed by local file name
    pub blake3: BTreeMap<String, String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            repo: "Xenova/clip-vit-base-patch32".to_string(),
            vision_remote: "onnx/vision_model.onnx".to_string(),
            text_remote: "onnx/text_model.onnx".to_string(),
            tokenizer_remote: "tokenizer.json".to_string(),
            blake3: BTreeMap::new(),
        }
    }
}

/// Arbitration thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Closed-set confidence needed to trust a non-severe label
    pub general_threshold: f64,

    /// Lower bar for labels in `severity_labels`
    pub severity_threshold: f64,

    /// Open-set ranks checked for agreement
    pub top_k: usize,

    /// Closed-set labels whose false negatives are costliest
    pub severity_labels: Vec<String>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            general_threshold: 0.75,
            severity_threshold: 0.25,
            top_k: 5,
            severity_labels: vec!["Melanoma".to_string(), "Basal Cell Carcinoma".to_string()],
        }
    }
}

/// Offline temperature fitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Lower bound of the temperature search
    pub min_temperature: f64,

    /// Upper bound of the temperature search
    pub max_temperature: f64,

    /// Stop when the bracket is narrower than this
    pub tolerance: f64,

    /// Hard cap on solver iterations
    pub max_iterations: usize,

    /// Bins used for expected calibration error
    pub ece_bins: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_temperature: 0.5,
            max_temperature: 5.0,
            tolerance: 1e-4,
            max_iterations: 200,
            ece_bins: 15,
        }
    }
}

impl CalibrationConfig {
    /// The range a fitted or loaded temperature must fall in.
    pub fn temperature_bounds(&self) -> RangeInclusive<f64> {
        self.min_temperature..=self.max_temperature
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
