//! Change-point phase detection
//!
//! 1. Smooth the trace with a trailing moving average of `window` samples.
//! 2. Rate of change: relative difference between consecutive smoothed
//!    values.
//! 3. Volatility: rolling standard deviation of the rate of change.
//! 4. The first sample where either signal exceeds its threshold ends the
//!    initial phase. The first later run of `window` quiet samples starts
//!    the stable phase.
//!
//! A trace that never crosses a threshold is one stable phase. An initial
//! phase shorter than `window` samples is folded into the transitional one.

use super::{population_std_dev, summarize, Phase, PhaseName, PhaseSegmenter, RawSegment};
use crate::config::PhaseConfig;
use crate::error::guarded_ratio;
use crate::error::Result;
use crate::trace::{ThroughputTrace, TimeRange};
use ndarray::{s, ArrayView1};
use std::ops::Range;
use tracing::{debug, instrument};

/// Segments a trace where its throughput starts and stops changing
#[derive(Debug, Clone, Default)]
pub struct ChangePointSegmenter {
    config: PhaseConfig,
}

impl ChangePointSegmenter {
    pub fn new(config: PhaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    /// Per-sample "changing" flags for a series
    fn activity(&self, values: &[f64]) -> Vec<bool> {
        let window = self.config.window.max(1);
        let smoothed = moving_average(values, window);
        let roc = rate_of_change(&smoothed);
        let volatility = rolling_std(&roc, window);

        roc.iter()
            .zip(&volatility)
            .map(|(r, v)| {
                r.abs() > self.config.change_threshold || *v > self.config.volatility_threshold
            })
            .collect()
    }
}

impl PhaseSegmenter for ChangePointSegmenter {
    fn name(&self) -> &'static str {
        "change_point"
    }

    fn min_samples(&self) -> usize {
        // Need room for at least one smoothing window on each side
        self.config.min_samples.max(2 * self.config.window.max(1)).max(2)
    }

    #[instrument(skip(self, trace), fields(samples = trace.len()))]
    fn split(&self, trace: &ThroughputTrace) -> Result<Vec<Phase>> {
        let n = trace.len();
        let window = self.config.window.max(1);
        let active = self.activity(&trace.values());

        let boundaries = match active.iter().position(|&a| a) {
            None => Vec::new(),
            Some(start) => {
                let quiet = (start + 1..n)
                    .find(|&j| j + window <= n && active[j..j + window].iter().all(|a| !a));
                let mut cuts = Vec::with_capacity(2);
                if start >= window {
                    cuts.push(start);
                }
                if let Some(q) = quiet {
                    cuts.push(q);
                }
                cuts
            }
        };
        debug!(?boundaries, "Change points");

        let names: &[PhaseName] = match (boundaries.len(), active.iter().any(|&a| a)) {
            (_, false) => &[PhaseName::Stable],
            (2, true) => &[PhaseName::Initial, PhaseName::Transitional, PhaseName::Stable],
            // A single cut is either the end of the initial phase (no quiet
            // run followed) or the start of the stable one (no initial phase)
            (1, true) => {
                let start = active.iter().position(|&a| a).unwrap_or(0);
                if start >= window {
                    &[PhaseName::Initial, PhaseName::Transitional]
                } else {
                    &[PhaseName::Transitional, PhaseName::Stable]
                }
            }
            (_, true) => &[PhaseName::Transitional],
        };

        let mut edges = Vec::with_capacity(boundaries.len() + 2);
        edges.push(0);
        edges.extend(boundaries.iter().copied());
        edges.push(n);

        let segments = names
            .iter()
            .zip(edges.windows(2))
            .map(|(&name, e)| raw_segment(trace, name, e[0]..e[1]))
            .collect();

        Ok(summarize(trace, segments, &self.config))
    }
}

/// Segment over sample indices `range`; the final segment closes on the
/// last sample, earlier ones end where the next begins.
fn raw_segment(trace: &ThroughputTrace, name: PhaseName, range: Range<usize>) -> RawSegment {
    let n = trace.samples.len();
    let start = trace.samples[range.start].timestamp;
    let end = if range.end >= n {
        trace.samples[n - 1].timestamp
    } else {
        trace.samples[range.end].timestamp
    };
    RawSegment {
        name,
        time_range: TimeRange::new(start, end),
        samples: range,
    }
}

/// Trailing moving average; the first `window - 1` points average what is
/// available so the output has the input's length.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let window = window.clamp(1, values.len());
    let view = ArrayView1::from(values);

    let mut out = Vec::with_capacity(values.len());
    for i in 0..window - 1 {
        out.push(view.slice(s![..=i]).mean().unwrap_or(0.0));
    }
    out.extend(view.windows(window).into_iter().map(|w| w.mean().unwrap_or(0.0)));
    out
}

/// Relative change between consecutive points; 0 where the previous point
/// is zero.
pub fn rate_of_change(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(0.0);
    out.extend(
        values
            .windows(2)
            .map(|w| guarded_ratio(w[1] - w[0], w[0].abs()).unwrap_or(0.0)),
    );
    out
}

/// Trailing rolling population standard deviation
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let lo = (i + 1).saturating_sub(window);
            population_std_dev(&values[lo..=i])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{is_contiguous_cover, Trend};

    fn cold_start_trace() -> ThroughputTrace {
        // 20 samples at 1000, a steep drop to 400, then 20 samples at 400
        let mut values = vec![1000.0; 20];
        values.extend([900.0, 800.0, 700.0, 600.0, 500.0, 400.0]);
        values.extend(vec![400.0; 20]);
        let pairs: Vec<(f64, f64)> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as f64 * 10.0, v))
            .collect();
        ThroughputTrace::from_pairs(&pairs)
    }

    #[test]
    fn test_moving_average() {
        let ma = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(ma, vec![1.0, 1.5, 2.0, 3.0, 4.0]);
        assert_eq!(moving_average(&[], 3), Vec::<f64>::new());
        assert_eq!(moving_average(&[2.0, 4.0], 10), vec![2.0, 3.0]);
    }

    #[test]
    fn test_rate_of_change() {
        let roc = rate_of_change(&[100.0, 110.0, 0.0, 5.0]);
        assert_eq!(roc.len(), 4);
        assert_eq!(roc[0], 0.0);
        assert!((roc[1] - 0.1).abs() < 1e-12);
        assert_eq!(roc[2], -1.0);
        // Previous point zero: term skipped
        assert_eq!(roc[3], 0.0);
    }

    #[test]
    fn test_cold_start_has_three_phases() {
        let seg = ChangePointSegmenter::default();
        let trace = cold_start_trace();
        let phases = seg.segment(&trace);

        let names: Vec<PhaseName> = phases.iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![PhaseName::Initial, PhaseName::Transitional, PhaseName::Stable]
        );
        assert!(is_contiguous_cover(&phases, trace.window().unwrap()));
        assert_eq!(phases[0].performance_factor, 1.0);
        assert!(phases[2].performance_factor < 0.5);
        assert_eq!(phases[2].stability, 1.0);
        assert_eq!(phases[1].trend, Trend::Decreasing);

        let covered: usize = phases.iter().map(|p| p.samples).sum();
        assert_eq!(covered, trace.len());
    }

    #[test]
    fn test_flat_trace_is_stable() {
        let seg = ChangePointSegmenter::default();
        let pairs: Vec<(f64, f64)> = (0..30).map(|i| (i as f64, 5000.0)).collect();
        let phases = seg.segment(&ThroughputTrace::from_pairs(&pairs));
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].name, PhaseName::Stable);
        assert_eq!(phases[0].samples, 30);
    }

    #[test]
    fn test_never_settles() {
        let seg = ChangePointSegmenter::default();
        let mut values = vec![1000.0; 20];
        // Keeps dropping by 10% until the end
        let mut v = 1000.0;
        for _ in 0..15 {
            v *= 0.85;
            values.push(v);
        }
        let pairs: Vec<(f64, f64)> = values.iter().enumerate().map(|(i, &v)| (i as f64, v)).collect();
        let trace = ThroughputTrace::from_pairs(&pairs);
        let phases = seg.segment(&trace);

        let names: Vec<PhaseName> = phases.iter().map(|p| p.name).collect();
        assert_eq!(names, vec![PhaseName::Initial, PhaseName::Transitional]);
        assert!(is_contiguous_cover(&phases, trace.window().unwrap()));
    }

    #[test]
    fn test_immediate_change_has_no_initial_phase() {
        let seg = ChangePointSegmenter::default();
        let mut values = vec![1000.0, 700.0, 500.0, 400.0];
        values.extend(vec![400.0; 26]);
        let pairs: Vec<(f64, f64)> = values.iter().enumerate().map(|(i, &v)| (i as f64, v)).collect();
        let trace = ThroughputTrace::from_pairs(&pairs);
        let phases = seg.segment(&trace);

        let names: Vec<PhaseName> = phases.iter().map(|p| p.name).collect();
        assert_eq!(names, vec![PhaseName::Transitional, PhaseName::Stable]);
        assert!(is_contiguous_cover(&phases, trace.window().unwrap()));
    }

    #[test]
    fn test_short_trace_falls_back() {
        let seg = ChangePointSegmenter::default();
        let pairs: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 100.0 * i as f64)).collect();
        let phases = seg.segment(&ThroughputTrace::from_pairs(&pairs));
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].name, PhaseName::Stable);
        assert_eq!(phases[0].time_range, TimeRange::new(0.0, 4.0));
    }
}
