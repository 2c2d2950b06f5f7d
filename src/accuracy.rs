//! Prediction accuracy against measured throughput
//!
//! `error_percent = (predicted - actual) / actual × 100`, graded on its
//! absolute value:
//!
//! | |error| | status    |
//! |---------|-----------|
//! | < 5 %   | Excellent |
//! | < 15 %  | Good      |
//! | < 30 %  | Fair      |
//! | else    | Poor      |

use crate::aggregator::PredictionResult;
use crate::config::AccuracyConfig;
use crate::error::{Error, Result};
use crate::trace::{ThroughputTrace, TimeRange};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Excellent => "excellent",
            ValidationStatus::Good => "good",
            ValidationStatus::Fair => "fair",
            ValidationStatus::Poor => "poor",
        }
    }

    /// 0 (Excellent) through 3 (Poor)
    pub fn ordinal(&self) -> u8 {
        match self {
            ValidationStatus::Excellent => 0,
            ValidationStatus::Good => 1,
            ValidationStatus::Fair => 2,
            ValidationStatus::Poor => 3,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One predicted/measured comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub predicted: f64,
    pub actual: f64,
    /// Signed; negative means the model under-predicted
    pub error_percent: f64,
    pub error_abs: f64,
    pub status: ValidationStatus,
}

/// Aggregate accuracy over many records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub count: usize,
    pub mean_abs_error: f64,
    pub max_abs_error: f64,
    /// Root mean square of `error_percent`
    pub rmse_percent: f64,
    pub by_status: BTreeMap<ValidationStatus, usize>,
}

impl ValidationSummary {
    pub fn count_of(&self, status: ValidationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccuracyEvaluator {
    config: AccuracyConfig,
}

impl AccuracyEvaluator {
    pub fn new(config: AccuracyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AccuracyConfig {
        &self.config
    }

    /// Status for an absolute error percentage
    pub fn grade(&self, error_abs: f64) -> ValidationStatus {
        if error_abs < self.config.excellent_pct {
            ValidationStatus::Excellent
        } else if error_abs < self.config.good_pct {
            ValidationStatus::Good
        } else if error_abs < self.config.fair_pct {
            ValidationStatus::Fair
        } else {
            // NaN lands here too
            ValidationStatus::Poor
        }
    }

    /// Compare a prediction against a measured value
    ///
    /// A non-positive `actual` cannot anchor a percentage; the record is
    /// reported with zero error and [`ValidationStatus::Poor`].
    pub fn evaluate(&self, predicted: f64, actual: f64) -> ValidationRecord {
        if actual.is_nan() || actual <= 0.0 {
            warn!(predicted, actual, "Measured throughput not positive, graded poor");
            return ValidationRecord {
                predicted,
                actual,
                error_percent: 0.0,
                error_abs: 0.0,
                status: ValidationStatus::Poor,
            };
        }

        let error_percent = (predicted - actual) / actual * 100.0;
        let error_abs = error_percent.abs();
        let status = self.grade(error_abs);
        debug!(predicted, actual, error_percent, %status, "Validated prediction");

        ValidationRecord {
            predicted,
            actual,
            error_percent,
            error_abs,
            status,
        }
    }

    /// Validate a prediction against the average of a measured trace
    ///
    /// The trace is averaged over `range`, or over the predicted phase's
    /// time range when none is given. A `MibPerSec` trace is converted
    /// through the prediction's record size first.
    #[instrument(skip(self, prediction, measured), fields(samples = measured.len()))]
    pub fn evaluate_prediction(
        &self,
        prediction: &PredictionResult,
        measured: &ThroughputTrace,
        range: Option<TimeRange>,
    ) -> Result<ValidationRecord> {
        let range = range.unwrap_or(prediction.phase.time_range);
        let actual = measured
            .to_ops(prediction.record_size_bytes)
            .average_over(range)
            .ok_or_else(|| Error::InvalidInput {
                field: "measured".to_string(),
                reason: format!("no samples inside [{}, {}]", range.start, range.end),
            })?;
        Ok(self.evaluate(prediction.predicted_s_max, actual))
    }

    /// Summary statistics over a batch of records
    pub fn summarize(&self, records: &[ValidationRecord]) -> ValidationSummary {
        let mut by_status = BTreeMap::new();
        for record in records {
            *by_status.entry(record.status).or_insert(0) += 1;
        }

        if records.is_empty() {
            return ValidationSummary {
                count: 0,
                mean_abs_error: 0.0,
                max_abs_error: 0.0,
                rmse_percent: 0.0,
                by_status,
            };
        }

        let abs: Vec<f64> = records.iter().map(|r| r.error_abs).collect();
        let squared: Vec<f64> = records.iter().map(|r| r.error_percent.powi(2)).collect();

        ValidationSummary {
            count: records.len(),
            mean_abs_error: abs.iter().mean(),
            max_abs_error: Statistics::max(abs.iter()),
            rmse_percent: squared.iter().mean().sqrt(),
            by_status,
        }
    }
}
