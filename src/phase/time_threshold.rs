//! Elapsed-time phase classification
//!
//! Phases are fixed intervals of elapsed time since cold start:
//! `[0, T1)` initial, `[T1, T2)` transitional, `[T2, ∞)` stable.
//! Elapsed time is measured from the first sample of the trace.

use super::{summarize, Phase, PhaseName, PhaseSegmenter, RawSegment};
use crate::config::PhaseConfig;
use crate::error::Result;
use crate::trace::{ThroughputTrace, TimeRange};
use tracing::instrument;

/// Segments a trace at the configured elapsed-time thresholds
#[derive(Debug, Clone, Default)]
pub struct TimeThresholdSegmenter {
    config: PhaseConfig,
}

impl TimeThresholdSegmenter {
    pub fn new(config: PhaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }
}

/// Phase for an elapsed time
pub fn classify(config: &PhaseConfig, elapsed_secs: f64) -> PhaseName {
    if elapsed_secs < config.initial_secs {
        PhaseName::Initial
    } else if elapsed_secs < config.stable_secs {
        PhaseName::Transitional
    } else {
        PhaseName::Stable
    }
}

impl PhaseSegmenter for TimeThresholdSegmenter {
    fn name(&self) -> &'static str {
        "time_threshold"
    }

    fn min_samples(&self) -> usize {
        self.config.min_samples.max(1)
    }

    #[instrument(skip(self, trace), fields(samples = trace.len()))]
    fn split(&self, trace: &ThroughputTrace) -> Result<Vec<Phase>> {
        let window = match trace.window() {
            Some(w) => w,
            None => return Ok(Vec::new()),
        };

        let t0 = window.start;
        let clip = |t: f64| t.max(window.start).min(window.end);
        let cuts = [
            window.start,
            clip(t0 + self.config.initial_secs),
            clip(t0 + self.config.stable_secs),
            window.end,
        ];
        let names = [PhaseName::Initial, PhaseName::Transitional, PhaseName::Stable];

        // Zero-width intervals are dropped; the rest chain end-to-start
        let mut ranges: Vec<(PhaseName, TimeRange)> = names
            .iter()
            .zip(cuts.windows(2))
            .filter(|(_, c)| c[1] > c[0])
            .map(|(&name, c)| (name, TimeRange::new(c[0], c[1])))
            .collect();
        if ranges.is_empty() {
            // Every sample shares one timestamp
            ranges.push((classify(&self.config, 0.0), window));
        }

        let last = ranges.len() - 1;
        let segments = ranges
            .into_iter()
            .enumerate()
            .map(|(i, (name, range))| {
                let lo = trace.samples.partition_point(|s| s.timestamp < range.start);
                let hi = if i == last {
                    trace.samples.len()
                } else {
                    trace.samples.partition_point(|s| s.timestamp < range.end)
                };
                RawSegment {
                    name,
                    time_range: range,
                    samples: lo..hi.max(lo),
                }
            })
            .collect();

        Ok(summarize(trace, segments, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{is_contiguous_cover, Trend};

    fn config(t1: f64, t2: f64) -> PhaseConfig {
        PhaseConfig {
            initial_secs: t1,
            stable_secs: t2,
            min_samples: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify() {
        let cfg = config(600.0, 3600.0);
        assert_eq!(classify(&cfg, 0.0), PhaseName::Initial);
        assert_eq!(classify(&cfg, 599.9), PhaseName::Initial);
        assert_eq!(classify(&cfg, 600.0), PhaseName::Transitional);
        assert_eq!(classify(&cfg, 3599.0), PhaseName::Transitional);
        assert_eq!(classify(&cfg, 3600.0), PhaseName::Stable);
        assert_eq!(classify(&cfg, 1e9), PhaseName::Stable);
    }

    #[test]
    fn test_three_phases() {
        let seg = TimeThresholdSegmenter::new(config(10.0, 20.0));
        // 1000 ops/s for 10s, 700 for 10s, then 500
        let pairs: Vec<(f64, f64)> = (0..30)
            .map(|i| {
                let v = if i < 10 {
                    1000.0
                } else if i < 20 {
                    700.0
                } else {
                    500.0
                };
                (i as f64, v)
            })
            .collect();
        let trace = ThroughputTrace::from_pairs(&pairs);
        let phases = seg.segment(&trace);

        assert_eq!(phases.len(), 3);
        assert!(is_contiguous_cover(&phases, TimeRange::new(0.0, 29.0)));
        assert_eq!(phases[0].name, PhaseName::Initial);
        assert_eq!(phases[0].samples, 10);
        assert_eq!(phases[0].performance_factor, 1.0);
        assert_eq!(phases[1].performance_factor, 0.7);
        assert_eq!(phases[2].performance_factor, 0.5);
        assert_eq!(phases[2].samples, 10);
        assert_eq!(phases[2].stability, 1.0);
        assert_eq!(phases[2].trend, Trend::Stable);
    }

    #[test]
    fn test_short_window_drops_later_phases() {
        let seg = TimeThresholdSegmenter::new(config(10.0, 20.0));
        let pairs: Vec<(f64, f64)> = (0..15).map(|i| (i as f64, 100.0)).collect();
        let phases = seg.segment(&ThroughputTrace::from_pairs(&pairs));

        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].name, PhaseName::Initial);
        assert_eq!(phases[1].name, PhaseName::Transitional);
        assert!(is_contiguous_cover(&phases, TimeRange::new(0.0, 14.0)));
    }

    #[test]
    fn test_window_entirely_stable() {
        let seg = TimeThresholdSegmenter::new(config(0.0, 0.0));
        let pairs: Vec<(f64, f64)> = (0..5).map(|i| (100.0 + i as f64, 50.0)).collect();
        let phases = seg.segment(&ThroughputTrace::from_pairs(&pairs));

        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].name, PhaseName::Stable);
        assert_eq!(phases[0].samples, 5);
    }

    #[test]
    fn test_sparse_segment_uses_nominal_profile() {
        let cfg = config(10.0, 20.0);
        let seg = TimeThresholdSegmenter::new(cfg.clone());
        // Nothing sampled between t=10 and t=20
        let pairs = [(0.0, 900.0), (5.0, 900.0), (9.0, 900.0), (25.0, 400.0), (30.0, 400.0)];
        let phases = seg.segment(&ThroughputTrace::from_pairs(&pairs));

        assert_eq!(phases.len(), 3);
        assert_eq!(phases[1].samples, 0);
        // Nominal factor is used unscaled next to peak-relative neighbours
        assert_eq!(phases[1].performance_factor, cfg.transitional.performance_factor);
        assert_eq!(phases[0].performance_factor, 1.0);
        assert!((phases[2].performance_factor - 400.0 / 900.0).abs() < 1e-12);
        assert!(is_contiguous_cover(&phases, TimeRange::new(0.0, 30.0)));
    }

    #[test]
    fn test_identical_timestamps() {
        let seg = TimeThresholdSegmenter::new(config(10.0, 20.0));
        let pairs = [(5.0, 1.0), (5.0, 2.0), (5.0, 3.0)];
        let phases = seg.segment(&ThroughputTrace::from_pairs(&pairs));
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].time_range, TimeRange::new(5.0, 5.0));
        assert_eq!(phases[0].samples, 3);
    }
}
