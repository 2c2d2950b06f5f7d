//! Device bandwidth envelope
//!
//! Turns a raw device benchmark into the bandwidth ceiling the rest of the
//! model works against. Puts are bounded by the write side: flushes and
//! compaction rewrites all land on the device as writes, so the effective
//! bandwidth is the (degraded) write envelope.

use crate::config::{AccessPattern, DeviceConfig};
use crate::error::{Error, Result};
use crate::trace::DeviceBenchmark;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Effective device bandwidth (MiB/s) for one calibration run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceBandwidth {
    pub write_bw: f64,
    pub read_bw: f64,
    pub effective_bw: f64,
}

impl DeviceBandwidth {
    /// Envelope with `effective_bw == write_bw`
    pub fn new(write_bw: f64, read_bw: f64) -> Self {
        Self {
            write_bw,
            read_bw,
            effective_bw: write_bw,
        }
    }
}

/// Builds [`DeviceBandwidth`] envelopes from benchmarks
#[derive(Debug, Clone, Default)]
pub struct DeviceEnvelope {
    config: DeviceConfig,
}

impl DeviceEnvelope {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    /// Envelope for a benchmark, scaled by an optional degradation multiplier
    ///
    /// Non-positive samples are clamped to the configured floor. Fails only
    /// when both write and read samples are non-positive.
    pub fn envelope(
        &self,
        bench: &DeviceBenchmark,
        degradation: Option<f64>,
    ) -> Result<DeviceBandwidth> {
        let (raw_write, raw_read) = self.select(bench);

        if !is_usable(raw_write) && !is_usable(raw_read) {
            return Err(Error::InvalidInput {
                field: "write_bw_MiBs/read_bw_MiBs".to_string(),
                reason: format!(
                    "both bandwidth samples are non-positive (write={}, read={})",
                    raw_write, raw_read
                ),
            });
        }

        let write_bw = self.clamp("write_bw_MiBs", raw_write);
        let read_bw = self.clamp("read_bw_MiBs", raw_read);

        let multiplier = match degradation {
            Some(d) if d > 0.0 && d <= 1.0 => d,
            Some(d) => {
                let clamped = if d.is_nan() || d > 1.0 { 1.0 } else { f64::EPSILON };
                warn!(degradation = d, clamped, "Degradation multiplier outside (0, 1]");
                clamped
            }
            None => 1.0,
        };

        let envelope = DeviceBandwidth {
            write_bw,
            read_bw,
            effective_bw: write_bw * multiplier,
        };
        debug!(
            write_bw = envelope.write_bw,
            read_bw = envelope.read_bw,
            effective_bw = envelope.effective_bw,
            multiplier,
            "Device envelope"
        );
        Ok(envelope)
    }

    /// Samples for the configured access pattern; random falls back to
    /// sequential when the benchmark did not measure it.
    fn select(&self, bench: &DeviceBenchmark) -> (f64, f64) {
        match self.config.access_pattern {
            AccessPattern::Sequential => (bench.write_bw_mibs, bench.read_bw_mibs),
            AccessPattern::Random => (
                bench.rand_write_bw_mibs.unwrap_or(bench.write_bw_mibs),
                bench.rand_read_bw_mibs.unwrap_or(bench.read_bw_mibs),
            ),
        }
    }

    fn clamp(&self, field: &str, value: f64) -> f64 {
        if is_usable(value) {
            value
        } else {
            warn!(
                field,
                value,
                floor = self.config.min_bandwidth_mibs,
                "Clamping unusable bandwidth sample"
            );
            self.config.min_bandwidth_mibs
        }
    }
}

/// Wear multiplier from a before/after benchmark pair of the same device
///
/// Ratio of the write bandwidth after to before, clamped to (0, 1]. A
/// device that got faster reports 1.0; an unusable "before" sample also
/// reports 1.0 since there is nothing to compare against.
pub fn degradation_factor(before: &DeviceBenchmark, after: &DeviceBenchmark, floor: f64) -> f64 {
    if !is_usable(before.write_bw_mibs) {
        return 1.0;
    }
    let ratio = after.write_bw_mibs / before.write_bw_mibs;
    if !ratio.is_finite() {
        return 1.0;
    }
    ratio.clamp(floor.max(f64::MIN_POSITIVE), 1.0)
}

fn is_usable(v: f64) -> bool {
    v.is_finite() && v > 0.0
}
