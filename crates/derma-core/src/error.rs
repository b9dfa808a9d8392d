//! Error types for the Derma decision engine.
//!
//! Errors are organized by phase (configuration, inference, fitting) so the
//! caller can log the root cause with context. Every error maps onto the
//! coarse [`ErrorKind`] taxonomy through [`DermaError::kind`]; an API layer
//! should only ever show [`DermaError::public_message`] to end users.

use std::path::PathBuf;
use thiserror::Error;

/// User-facing text for any failure inside the core.
pub const PREDICTION_UNAVAILABLE: &str = "prediction unavailable";

/// Coarse error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A classifier or embedder could not execute.
    ModelUnavailable,
    /// A probability vector violated the sum/non-negativity invariant.
    DistributionInvalid,
    /// Temperature fitting was given an empty or invalid validation set.
    InsufficientData,
    /// Configuration or a persisted artifact is missing or malformed.
    ConfigurationInvalid,
    /// The caller handed the core an input tensor of the wrong shape or range.
    InvalidInput,
}

/// Top-level error type for Derma operations.
#[derive(Error, Debug)]
pub enum DermaError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Per-request inference errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Offline temperature fitting errors
    #[error("Calibration fit error: {0}")]
    Fit(#[from] FitError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DermaError {
    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Io(_) | Self::Json(_) => ErrorKind::ConfigurationInvalid,
            Self::Inference(e) => e.kind(),
            Self::Fit(_) => ErrorKind::InsufficientData,
        }
    }

    /// Message safe to show to an end user. Never includes labels or thresholds.
    pub fn public_message(&self) -> &'static str {
        PREDICTION_UNAVAILABLE
    }
}

/// Configuration-specific errors. Raised at initialization, never per request.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// A persisted artifact (label map, temperature, model file) is missing or malformed
    #[error("Invalid artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },
}

impl ConfigError {
    pub(crate) fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while serving a single request.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The underlying classifier or embedder failed to produce an output
    #[error("Model '{model}' unavailable: {message}")]
    ModelUnavailable { model: String, message: String },

    /// A probability vector failed validation
    #[error("Invalid distribution: {0}")]
    DistributionInvalid(String),

    /// The input tensor does not have the expected shape or value range
    #[error("Invalid input tensor: {0}")]
    InvalidInput(String),
}

impl InferenceError {
    pub(crate) fn model(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::DistributionInvalid(_) => ErrorKind::DistributionInvalid,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

/// Errors raised by the offline temperature fitter.
#[derive(Error, Debug)]
pub enum FitError {
    /// The validation set is empty, ragged, or references unknown labels
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

/// Convenience type alias for Derma results.
pub type Result<T> = std::result::Result<T, DermaError>;

/// Convenience type alias for inference-specific results.
pub type InferenceResult<T> = std::result::Result<T, InferenceError>;
