//! Temperature scaling: per-request calibration and the offline fitter.

mod calibrator;
mod fitter;
pub mod metrics;
mod temperature;

pub use calibrator::{logits_from_probabilities, Calibrator, LOG_EPSILON};
pub use fitter::{fit_temperature, FitReport, TemperatureFitter, ValidationSet};
pub use temperature::Temperature;
