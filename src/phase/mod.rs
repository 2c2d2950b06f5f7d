//! Operating phase estimation
//!
//! A cold-started LSM instance moves through three phases:
//!
//! ```text
//! throughput
//!   │ ████████
//!   │         ██▄▄
//!   │             ▀▀▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄▄
//!   └──────────────────────────────────▶ time
//!     initial  transitional   stable
//! ```
//!
//! Memtables and L0 absorb writes at first; once compaction debt builds up
//! throughput drops and oscillates before settling. A segmenter splits a
//! throughput trace into at most three contiguous phases, in that order,
//! covering the observation window exactly once.
//!
//! Two strategies implement [`PhaseSegmenter`]:
//! - [`TimeThresholdSegmenter`]: fixed elapsed-time thresholds T1/T2
//! - [`ChangePointSegmenter`]: boundaries detected from the smoothed
//!   rate-of-change of the trace
//!
//! [`PhaseEstimator`] selects one of them from configuration.

pub mod change_point;
pub mod time_threshold;

pub use change_point::ChangePointSegmenter;
pub use time_threshold::TimeThresholdSegmenter;

use crate::config::{PhaseConfig, PhaseProfile, PhaseStrategyKind};
use crate::error::{Error, Result};
use crate::trace::{ThroughputTrace, TimeRange};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;
use std::ops::Range;
use tracing::{debug, instrument, warn};

/// Lower bound for per-phase factors; keeps them inside (0, 1]
pub const PHASE_FACTOR_FLOOR: f64 = 1e-3;

/// Phase names, in the only order they can occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Initial,
    Transitional,
    Stable,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Initial => "initial",
            PhaseName::Transitional => "transitional",
            PhaseName::Stable => "stable",
        }
    }

    /// Ordinal used when a phase is reported as a number
    pub fn ordinal(&self) -> u8 {
        match self {
            PhaseName::Initial => 0,
            PhaseName::Transitional => 1,
            PhaseName::Stable => 2,
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of throughput within a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

impl Trend {
    /// +1 / 0 / -1
    pub fn signum(&self) -> f64 {
        match self {
            Trend::Increasing => 1.0,
            Trend::Stable => 0.0,
            Trend::Decreasing => -1.0,
        }
    }
}

/// One segment of the observation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub time_range: TimeRange,
    /// Throughput relative to the peak phase, in (0, 1]
    pub performance_factor: f64,
    /// 1 - coefficient of variation, in (0, 1]
    pub stability: f64,
    /// Mean throughput relative to the peak sample, in (0, 1]
    pub io_intensity: f64,
    pub trend: Trend,
    pub mean_throughput: f64,
    pub samples: usize,
}

impl Phase {
    /// Phase built from nominal configured factors
    pub fn nominal(name: PhaseName, time_range: TimeRange, profile: &PhaseProfile) -> Self {
        Self {
            name,
            time_range,
            performance_factor: profile.performance_factor,
            stability: profile.stability,
            io_intensity: profile.io_intensity,
            trend: Trend::Stable,
            mean_throughput: 0.0,
            samples: 0,
        }
    }

    /// A neutral stable phase: every factor 1.0
    pub fn steady(time_range: TimeRange) -> Self {
        Self {
            name: PhaseName::Stable,
            time_range,
            performance_factor: 1.0,
            stability: 1.0,
            io_intensity: 1.0,
            trend: Trend::Stable,
            mean_throughput: 0.0,
            samples: 0,
        }
    }
}

/// Capability: segment a throughput trace into phases
pub trait PhaseSegmenter {
    /// Strategy name for logs and reports
    fn name(&self) -> &'static str;

    /// Minimum samples needed before [`PhaseSegmenter::split`] is attempted
    fn min_samples(&self) -> usize;

    /// Split an ordered trace holding at least `min_samples` samples
    fn split(&self, trace: &ThroughputTrace) -> Result<Vec<Phase>>;

    /// Segment a trace; never fails
    ///
    /// Too few samples, timestamps out of order, or any other segmentation
    /// failure yields a single stable phase spanning the whole window.
    fn segment(&self, trace: &ThroughputTrace) -> Vec<Phase> {
        let result = if trace.len() < self.min_samples() {
            Err(Error::InsufficientData {
                needed: self.min_samples(),
                got: trace.len(),
            })
        } else if !trace.is_ordered() {
            Err(Error::InvalidInput {
                field: "throughput.samples".to_string(),
                reason: "timestamps must be finite and non-decreasing".to_string(),
            })
        } else {
            self.split(trace)
        };

        match result {
            Ok(phases) if !phases.is_empty() => {
                debug!(
                    strategy = self.name(),
                    phases = phases.len(),
                    "Segmented throughput trace"
                );
                phases
            }
            Ok(_) => vec![single_phase(trace)],
            Err(e) => {
                warn!(strategy = self.name(), error = %e, "Falling back to a single stable phase");
                vec![single_phase(trace)]
            }
        }
    }

    /// Phase the instance is in at the end of the trace
    fn current_phase(&self, trace: &ThroughputTrace) -> Phase {
        self.segment(trace)
            .pop()
            .unwrap_or_else(|| single_phase(trace))
    }
}

/// Configured choice of segmentation strategy
#[derive(Debug, Clone)]
pub enum PhaseEstimator {
    TimeThreshold(TimeThresholdSegmenter),
    ChangePoint(ChangePointSegmenter),
}

impl PhaseEstimator {
    pub fn from_config(config: &PhaseConfig) -> Self {
        match config.strategy {
            PhaseStrategyKind::TimeThreshold => {
                PhaseEstimator::TimeThreshold(TimeThresholdSegmenter::new(config.clone()))
            }
            PhaseStrategyKind::ChangePoint => {
                PhaseEstimator::ChangePoint(ChangePointSegmenter::new(config.clone()))
            }
        }
    }

    pub fn config(&self) -> &PhaseConfig {
        match self {
            PhaseEstimator::TimeThreshold(s) => s.config(),
            PhaseEstimator::ChangePoint(s) => s.config(),
        }
    }

    /// Nominal phase for an instance `elapsed_secs` after cold start
    #[instrument(skip(self))]
    pub fn classify_elapsed(&self, elapsed_secs: f64) -> Phase {
        let config = self.config();
        let name = time_threshold::classify(config, elapsed_secs);
        let (range, profile) = match name {
            PhaseName::Initial => (TimeRange::new(0.0, config.initial_secs), &config.initial),
            PhaseName::Transitional => (
                TimeRange::new(config.initial_secs, config.stable_secs),
                &config.transitional,
            ),
            PhaseName::Stable => (
                TimeRange::new(config.stable_secs, elapsed_secs.max(config.stable_secs)),
                &config.stable,
            ),
        };
        Phase::nominal(name, range, profile)
    }
}

impl Default for PhaseEstimator {
    fn default() -> Self {
        Self::from_config(&PhaseConfig::default())
    }
}

impl PhaseSegmenter for PhaseEstimator {
    fn name(&self) -> &'static str {
        match self {
            PhaseEstimator::TimeThreshold(s) => s.name(),
            PhaseEstimator::ChangePoint(s) => s.name(),
        }
    }

    fn min_samples(&self) -> usize {
        match self {
            PhaseEstimator::TimeThreshold(s) => s.min_samples(),
            PhaseEstimator::ChangePoint(s) => s.min_samples(),
        }
    }

    fn split(&self, trace: &ThroughputTrace) -> Result<Vec<Phase>> {
        match self {
            PhaseEstimator::TimeThreshold(s) => s.split(trace),
            PhaseEstimator::ChangePoint(s) => s.split(trace),
        }
    }
}

/// A segment as produced by a strategy, before statistics are attached
#[derive(Debug, Clone)]
pub(crate) struct RawSegment {
    pub name: PhaseName,
    pub time_range: TimeRange,
    /// Indices into the trace's samples
    pub samples: Range<usize>,
}

/// Attach per-segment statistics
///
/// A sampled segment's `performance_factor` is its mean relative to the
/// highest segment mean. Segments without samples take the configured
/// nominal profile as is: that factor is an absolute fraction of the
/// device envelope and is not rescaled by the sampled peak, so mixed
/// segmentations carry both kinds.
pub(crate) fn summarize(
    trace: &ThroughputTrace,
    segments: Vec<RawSegment>,
    config: &PhaseConfig,
) -> Vec<Phase> {
    let peak_sample = trace
        .samples
        .iter()
        .map(|s| s.value)
        .fold(0.0_f64, f64::max);

    let means: Vec<Option<f64>> = segments
        .iter()
        .map(|seg| {
            if seg.samples.is_empty() {
                None
            } else {
                Some(trace.samples[seg.samples.clone()].iter().map(|s| s.value).mean())
            }
        })
        .collect();
    let peak_mean = means.iter().flatten().fold(0.0_f64, |a, &m| a.max(m));

    segments
        .into_iter()
        .zip(means)
        .map(|(seg, mean)| match mean {
            None => {
                let profile = match seg.name {
                    PhaseName::Initial => &config.initial,
                    PhaseName::Transitional => &config.transitional,
                    PhaseName::Stable => &config.stable,
                };
                Phase::nominal(seg.name, seg.time_range, profile)
            }
            Some(mean) => {
                let samples = &trace.samples[seg.samples.clone()];
                let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
                let times: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
                let cv = coefficient_of_variation(&values);
                Phase {
                    name: seg.name,
                    time_range: seg.time_range,
                    performance_factor: unit_factor(ratio_or_one(mean, peak_mean)),
                    stability: unit_factor(1.0 - cv),
                    io_intensity: unit_factor(ratio_or_one(mean, peak_sample)),
                    trend: trend(&times, &values),
                    mean_throughput: mean,
                    samples: values.len(),
                }
            }
        })
        .collect()
}

/// Single stable phase over the whole trace (the insufficient-data fallback)
pub fn single_phase(trace: &ThroughputTrace) -> Phase {
    let window = span(trace).unwrap_or(TimeRange::new(0.0, 0.0));
    if trace.is_empty() {
        return Phase::steady(window);
    }
    let values = trace.values();
    let times: Vec<f64> = trace.samples.iter().map(|s| s.timestamp).collect();
    Phase {
        name: PhaseName::Stable,
        time_range: window,
        performance_factor: 1.0,
        stability: unit_factor(1.0 - coefficient_of_variation(&values)),
        io_intensity: 1.0,
        trend: trend(&times, &values),
        mean_throughput: values.iter().mean(),
        samples: values.len(),
    }
}

/// Earliest to latest finite timestamp, whatever the sample order
fn span(trace: &ThroughputTrace) -> Option<TimeRange> {
    trace
        .samples
        .iter()
        .map(|s| s.timestamp)
        .filter(|t| t.is_finite())
        .fold(None, |acc: Option<TimeRange>, t| match acc {
            None => Some(TimeRange::new(t, t)),
            Some(r) => Some(TimeRange::new(r.start.min(t), r.end.max(t))),
        })
}

/// Population standard deviation divided by the mean
///
/// 0 for a single sample; 1 (worst) when the mean is not positive.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().mean();
    if mean.is_nan() || mean <= 0.0 {
        return 1.0;
    }
    values.iter().population_std_dev() / mean
}

/// Population standard deviation; 0 for fewer than two values
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().population_std_dev()
}

/// Slope-sign test against the regression standard error
///
/// Stable when |slope| is below the standard error of the slope, or when
/// there are too few points to estimate it.
pub fn trend(times: &[f64], values: &[f64]) -> Trend {
    let n = times.len().min(values.len());
    if n < 3 {
        return Trend::Stable;
    }
    let (x, y) = (&times[..n], &values[..n]);
    let x_mean = x.iter().mean();
    let y_mean = y.iter().mean();

    let sxx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
    if sxx.is_nan() || sxx <= 0.0 {
        return Trend::Stable;
    }
    let sxy: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum();
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let residual_ss: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (yi - (intercept + slope * xi)).powi(2))
        .sum();
    let standard_error = (residual_ss / (n as f64 - 2.0) / sxx).sqrt();

    if slope == 0.0 || slope.abs() < standard_error {
        Trend::Stable
    } else if slope > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

fn ratio_or_one(num: f64, den: f64) -> f64 {
    if den > 0.0 && num.is_finite() {
        num / den
    } else {
        1.0
    }
}

fn unit_factor(v: f64) -> f64 {
    if v.is_nan() {
        return PHASE_FACTOR_FLOOR;
    }
    v.clamp(PHASE_FACTOR_FLOOR, 1.0)
}

/// Check that phases are ordered, contiguous and cover `window`
pub fn is_contiguous_cover(phases: &[Phase], window: TimeRange) -> bool {
    let (first, last) = match (phases.first(), phases.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return false,
    };
    first.time_range.start == window.start
        && last.time_range.end == window.end
        && phases.windows(2).all(|w| {
            w[0].time_range.end == w[1].time_range.start && w[0].name < w[1].name
        })
        && phases.iter().all(|p| p.time_range.start <= p.time_range.end)
}
