// putrate - LSM put-rate prediction
// Sustainable write throughput of an LSM-tree storage engine

#![warn(rust_2018_idioms)]

pub mod accuracy;
pub mod aggregator;
pub mod config;
pub mod device;
pub mod level;
pub mod phase;
pub mod report;
pub mod stability;
pub mod trace;

// Re-exports for convenience
pub use accuracy::{AccuracyEvaluator, ValidationRecord, ValidationStatus, ValidationSummary};
pub use aggregator::{s_steady, ModelInputs, PredictionResult, PutRateAggregator};
pub use crate::config::ModelConfig;
pub use device::{DeviceBandwidth, DeviceEnvelope};
pub use level::{LevelCostModel, LevelProfile, LevelStats};
pub use phase::{Phase, PhaseEstimator, PhaseName, PhaseSegmenter};
pub use report::FlatRecord;
pub use stability::{StabilityFactor, StabilitySignals};
pub use trace::{DeviceBenchmark, ThroughputTrace, TimeRange, TraceSet};

/// Model error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Error {
        /// Malformed input; the only kind that aborts a prediction
        #[error("Invalid input `{field}`: {reason}")]
        InvalidInput { field: String, reason: String },

        #[error("Insufficient data: need {needed} samples, got {got}")]
        InsufficientData { needed: usize, got: usize },

        #[error("Division guard: {0}")]
        DivisionGuard(String),

        #[error("Config error: {0}")]
        Config(String),

        #[error("Serialization error: {0}")]
        Serialization(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;

    /// `num / den`, refusing zero or non-finite denominators and results
    ///
    /// Callers recover with `unwrap_or` and a substitute value; the error
    /// never escapes a component.
    pub fn guarded_ratio(num: f64, den: f64) -> Result<f64> {
        if den == 0.0 || !den.is_finite() {
            return Err(Error::DivisionGuard(format!("{} / {}", num, den)));
        }
        let ratio = num / den;
        if ratio.is_finite() {
            Ok(ratio)
        } else {
            Err(Error::DivisionGuard(format!("{} / {} = {}", num, den, ratio)))
        }
    }

}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
