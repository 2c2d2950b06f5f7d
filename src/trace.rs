//! Measured inputs fed into the model
//!
//! These are the record shapes external tooling produces from benchmark
//! runs and engine logs. The model only reads them; it never performs I/O.

use serde::{Deserialize, Serialize};

/// Bytes per MiB
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Raw device benchmark (MiB/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceBenchmark {
    /// Sequential write bandwidth
    #[serde(rename = "write_bw_MiBs")]
    pub write_bw_mibs: f64,
    /// Sequential read bandwidth
    #[serde(rename = "read_bw_MiBs")]
    pub read_bw_mibs: f64,
    /// Random write bandwidth, when the benchmark measured it
    #[serde(rename = "rand_write_bw_MiBs", default, skip_serializing_if = "Option::is_none")]
    pub rand_write_bw_mibs: Option<f64>,
    /// Random read bandwidth, when the benchmark measured it
    #[serde(rename = "rand_read_bw_MiBs", default, skip_serializing_if = "Option::is_none")]
    pub rand_read_bw_mibs: Option<f64>,
}

impl DeviceBenchmark {
    pub fn sequential(write_bw_mibs: f64, read_bw_mibs: f64) -> Self {
        Self {
            write_bw_mibs,
            read_bw_mibs,
            rand_write_bw_mibs: None,
            rand_read_bw_mibs: None,
        }
    }

    pub fn with_random(mut self, write_bw_mibs: f64, read_bw_mibs: f64) -> Self {
        self.rand_write_bw_mibs = Some(write_bw_mibs);
        self.rand_read_bw_mibs = Some(read_bw_mibs);
        self
    }
}

/// One compaction/flush observation for a level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub level: u32,
    pub write_bytes: u64,
    pub read_bytes: u64,
    /// Seconds since the instance started
    pub timestamp: f64,
}

/// Unit of a throughput trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputUnit {
    #[default]
    OpsPerSec,
    MibPerSec,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    /// Seconds since the instance started
    pub timestamp: f64,
    pub value: f64,
}

impl ThroughputSample {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Closed-open interval of seconds; the final phase of a window is closed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// `start <= t <= end`
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Ordered throughput series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputTrace {
    #[serde(default)]
    pub unit: ThroughputUnit,
    pub samples: Vec<ThroughputSample>,
}

impl ThroughputTrace {
    pub fn new(unit: ThroughputUnit, samples: Vec<ThroughputSample>) -> Self {
        Self { unit, samples }
    }

    /// Build an ops/s trace from `(timestamp, value)` pairs
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self {
            unit: ThroughputUnit::OpsPerSec,
            samples: pairs
                .iter()
                .map(|&(t, v)| ThroughputSample::new(t, v))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Observation window covered by the trace
    pub fn window(&self) -> Option<TimeRange> {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => Some(TimeRange::new(first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Timestamps are finite and non-decreasing
    ///
    /// Segmentation and `window()` assume this; an empty trace is ordered.
    pub fn is_ordered(&self) -> bool {
        self.samples.iter().all(|s| s.timestamp.is_finite())
            && self
                .samples
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    /// Same trace expressed in ops/s
    pub fn to_ops(&self, record_size_bytes: f64) -> ThroughputTrace {
        match self.unit {
            ThroughputUnit::OpsPerSec => self.clone(),
            ThroughputUnit::MibPerSec => ThroughputTrace {
                unit: ThroughputUnit::OpsPerSec,
                samples: self
                    .samples
                    .iter()
                    .map(|s| {
                        ThroughputSample::new(
                            s.timestamp,
                            mibs_to_ops(s.value, record_size_bytes),
                        )
                    })
                    .collect(),
            },
        }
    }

    /// Mean value of the samples falling inside `range`
    ///
    /// Returns `None` when no sample lies in the interval.
    pub fn average_over(&self, range: TimeRange) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|s| range.contains(s.timestamp))
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.value, n + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

/// Engine counters for one observation interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineCounters {
    pub stall_secs: f64,
    pub interval_secs: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Every measured input of one prediction, as external tooling hands it over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSet {
    pub device: DeviceBenchmark,
    /// Earlier benchmark of the same device; enables wear degradation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_baseline: Option<DeviceBenchmark>,
    #[serde(default)]
    pub compaction: Vec<CompactionRecord>,
    #[serde(default)]
    pub user_write_bytes: u64,
    #[serde(default)]
    pub throughput: ThroughputTrace,
    #[serde(default)]
    pub counters: EngineCounters,
}

/// Convert a bandwidth (MiB/s) into an operation rate for a record size
pub fn mibs_to_ops(mibs: f64, record_size_bytes: f64) -> f64 {
    mibs * BYTES_PER_MIB / record_size_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_json_shape() {
        let bench: DeviceBenchmark =
            serde_json::from_str(r#"{"write_bw_MiBs": 1581.4, "read_bw_MiBs": 2368.0}"#).unwrap();
        assert_eq!(bench, DeviceBenchmark::sequential(1581.4, 2368.0));
        assert!(bench.rand_write_bw_mibs.is_none());
    }

    #[test]
    fn test_average_over() {
        let trace = ThroughputTrace::from_pairs(&[(0.0, 10.0), (1.0, 20.0), (2.0, 30.0), (3.0, 40.0)]);
        assert_eq!(trace.average_over(TimeRange::new(1.0, 2.0)), Some(25.0));
        assert_eq!(trace.average_over(TimeRange::new(10.0, 20.0)), None);
        assert_eq!(trace.window(), Some(TimeRange::new(0.0, 3.0)));
    }

    #[test]
    fn test_is_ordered() {
        assert!(ThroughputTrace::default().is_ordered());
        assert!(ThroughputTrace::from_pairs(&[(0.0, 1.0), (0.0, 2.0), (5.0, 3.0)]).is_ordered());

        let backwards: Vec<(f64, f64)> = (0..12).map(|i| (100.0 - i as f64, 500.0)).collect();
        assert!(!ThroughputTrace::from_pairs(&backwards).is_ordered());
        assert!(!ThroughputTrace::from_pairs(&[(0.0, 1.0), (f64::NAN, 1.0)]).is_ordered());
        assert!(!ThroughputTrace::from_pairs(&[(0.0, 1.0), (f64::INFINITY, 1.0)]).is_ordered());
    }

    #[test]
    fn test_mibs_trace_to_ops() {
        let trace = ThroughputTrace::new(
            ThroughputUnit::MibPerSec,
            vec![ThroughputSample::new(0.0, 1.0)],
        );
        let ops = trace.to_ops(1024.0);
        assert_eq!(ops.unit, ThroughputUnit::OpsPerSec);
        assert_eq!(ops.samples[0].value, 1024.0);
    }
}
