//! Flat name → number records for report renderers
//!
//! Renderers downstream of the model only understand flat numeric maps.
//! Enumerations are written as ordinals and timestamps as unix seconds.

use crate::accuracy::{ValidationRecord, ValidationSummary};
use crate::aggregator::PredictionResult;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

pub type FlatMap = BTreeMap<String, f64>;

/// A record a report renderer can consume
pub trait FlatRecord {
    fn to_flat_map(&self) -> FlatMap;

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_flat_map())
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl FlatRecord for PredictionResult {
    fn to_flat_map(&self) -> FlatMap {
        let mut map = FlatMap::new();
        map.insert("predicted_s_max".into(), self.predicted_s_max);
        map.insert("predicted_bandwidth_mibs".into(), self.predicted_bandwidth_mibs);
        map.insert("record_size_bytes".into(), self.record_size_bytes);
        map.insert("phase".into(), f64::from(self.phase.name.ordinal()));
        map.insert("phase_start".into(), self.phase.time_range.start);
        map.insert("phase_end".into(), self.phase.time_range.end);
        map.insert("phase_stability".into(), self.phase.stability);
        map.insert("phase_io_intensity".into(), self.phase.io_intensity);
        map.insert("phase_trend".into(), self.phase.trend.signum());
        map.insert("timestamp".into(), unix_secs(self));
        for (name, value) in &self.component_factors {
            map.insert(name.clone(), *value);
        }
        map
    }
}

impl FlatRecord for ValidationRecord {
    fn to_flat_map(&self) -> FlatMap {
        let mut map = FlatMap::new();
        map.insert("predicted".into(), self.predicted);
        map.insert("actual".into(), self.actual);
        map.insert("error_percent".into(), self.error_percent);
        map.insert("error_abs".into(), self.error_abs);
        map.insert("status".into(), f64::from(self.status.ordinal()));
        map
    }
}

impl FlatRecord for ValidationSummary {
    fn to_flat_map(&self) -> FlatMap {
        let mut map = FlatMap::new();
        map.insert("count".into(), self.count as f64);
        map.insert("mean_abs_error".into(), self.mean_abs_error);
        map.insert("max_abs_error".into(), self.max_abs_error);
        map.insert("rmse_percent".into(), self.rmse_percent);
        for (status, n) in &self.by_status {
            map.insert(format!("count_{}", status.as_str()), *n as f64);
        }
        map
    }
}

fn unix_secs(prediction: &PredictionResult) -> f64 {
    prediction.timestamp.timestamp_millis() as f64 / 1000.0
}
