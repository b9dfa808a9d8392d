//! Derma Core - calibrated hybrid decision engine for skin-condition images.
//!
//! A closed-set classifier trained on a fixed label set and an open-set
//! CLIP-style scorer run on every image; a fixed-order arbitration policy
//! decides which one to trust.
//!
//! # Architecture
//!
//! ```text
//! ImageTensor ─┬─► Closed-set ensemble ─► Temperature scaling ─┐
//!              └─► Open-set prompt similarity ─────────────────┴─► Arbitration ─► Verdict
//! ```
//!
//! The temperature is fitted offline from validation logits with
//! [`calibration::TemperatureFitter`] and persisted as a one-number text file.
//!
//! # Usage
//!
//! ```rust,ignore
//! use derma_core::{Config, HybridEngine};
//!
//! let config = Config::load()?;
//! let engine = HybridEngine::from_config(&config)?;
//! let assessment = engine.assess_blocking(&image)?;
//! println!("{} ({})", assessment.verdict.final_label, assessment.verdict.reason);
//! ```

// Module declarations
pub mod arbitration;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod math;
pub mod open_set;
pub mod output;
pub mod types;

// Re-exports for convenient access
pub use arbitration::ArbitrationPolicy;
pub use calibration::{Calibrator, FitReport, Temperature, TemperatureFitter, ValidationSet};
pub use classifier::{ClosedSetModel, ClosedSetPredictor, WeightedSource};
pub use config::Config;
pub use engine::HybridEngine;
pub use error::{
    ConfigError, DermaError, ErrorKind, FitError, InferenceError, InferenceResult, Result,
    PREDICTION_UNAVAILABLE,
};
pub use labels::LabelSet;
pub use open_set::{ImageEmbedder, OpenSetScorer, TextEmbedder};
pub use output::{OutputFormat, PredictionRecord, RecordWriter};
pub use types::{
    Assessment, ClosedSetResult, DomainReport, ImageTensor, ProbabilityVector, RankedLabel,
    ReasonCode, SimilarityRanking, Verdict, VerdictSource,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
