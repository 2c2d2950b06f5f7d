//! Put-rate aggregation
//!
//! Joins the four component models into a predicted S_max:
//!
//! ```text
//! DeviceEnvelope ──┐
//! LevelCostModel ──┼──▶ PutRateAggregator ──▶ PredictionResult
//! PhaseEstimator ──┤         S_max = effective_bw × phase × compaction × stability
//! StabilityFactor ─┘                 × MiB / record_size
//! ```
//!
//! The bounded-system law the model exists to support is
//! `S_steady(λ) = min(λ, S_max)`.

use crate::config::{CombinationLaw, ModelConfig};
use crate::device::{degradation_factor, DeviceBandwidth, DeviceEnvelope};
use crate::error::{Error, Result};
use crate::level::{LevelCostModel, LevelProfile};
use crate::phase::{Phase, PhaseEstimator, PhaseSegmenter};
use crate::stability::{StabilityBreakdown, StabilityFactor, StabilitySignals};
use crate::trace::{mibs_to_ops, TraceSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Names of the entries in [`PredictionResult::component_factors`]
pub mod factor {
    pub const EFFECTIVE_BW_MIBS: &str = "effective_bw_mibs";
    pub const WRITE_BW_MIBS: &str = "write_bw_mibs";
    pub const READ_BW_MIBS: &str = "read_bw_mibs";
    pub const PHASE: &str = "phase_performance_factor";
    pub const COMPACTION: &str = "compaction_factor";
    pub const STABILITY: &str = "stability_multiplier";
    pub const STALL_PRESSURE: &str = "stall_pressure";
    pub const COMBINED: &str = "combined_factor";
}

/// Snapshot of component outputs for one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInputs {
    pub device: DeviceBandwidth,
    pub levels: LevelProfile,
    pub phase: Phase,
    pub signals: StabilitySignals,
}

/// Predicted sustainable put rate with its diagnostic factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Operations per second
    pub predicted_s_max: f64,
    /// The same ceiling as bandwidth (MiB/s)
    pub predicted_bandwidth_mibs: f64,
    pub record_size_bytes: f64,
    pub component_factors: BTreeMap<String, f64>,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

impl PredictionResult {
    /// Steady-state throughput for arrival rate `lambda` (ops/s)
    pub fn s_steady(&self, lambda: f64) -> f64 {
        s_steady(lambda, self.predicted_s_max)
    }

    pub fn factor(&self, name: &str) -> Option<f64> {
        self.component_factors.get(name).copied()
    }
}

/// `min(λ, S_max)`; `λ == S_max` returns exactly S_max
pub fn s_steady(lambda: f64, s_max: f64) -> f64 {
    if lambda <= s_max {
        lambda
    } else {
        s_max
    }
}

/// Combines component models into S_max
#[derive(Debug, Clone)]
pub struct PutRateAggregator {
    config: ModelConfig,
    device: DeviceEnvelope,
    levels: LevelCostModel,
    phases: PhaseEstimator,
    stability: StabilityFactor,
}

impl PutRateAggregator {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            device: DeviceEnvelope::new(config.device.clone()),
            levels: LevelCostModel::new(config.level.clone()),
            phases: PhaseEstimator::from_config(&config.phase),
            stability: StabilityFactor::new(config.stability.clone()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ModelConfig::default())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device_envelope(&self) -> &DeviceEnvelope {
        &self.device
    }

    pub fn level_model(&self) -> &LevelCostModel {
        &self.levels
    }

    pub fn phase_estimator(&self) -> &PhaseEstimator {
        &self.phases
    }

    pub fn stability_factor(&self) -> &StabilityFactor {
        &self.stability
    }

    /// Predict S_max from already-computed component outputs
    #[instrument(skip(self, inputs), fields(phase = %inputs.phase.name))]
    pub fn predict(&self, inputs: &ModelInputs) -> Result<PredictionResult> {
        let record_size = self.config.aggregator.record_size_bytes;
        require_positive("record_size_bytes", record_size)?;
        require_positive("effective_bw", inputs.device.effective_bw)?;
        require_unit("phase.performance_factor", inputs.phase.performance_factor)?;
        require_unit("compaction_factor", inputs.levels.compaction_factor)?;

        let stability = self.stability.evaluate(&inputs.signals);
        let phase_factor = inputs.phase.performance_factor;
        let compaction_factor = inputs.levels.compaction_factor;

        let (bandwidth, combined) = match self.config.aggregator.combination {
            CombinationLaw::Multiplicative => {
                let bandwidth = inputs.device.effective_bw
                    * phase_factor
                    * compaction_factor
                    * stability.multiplier;
                (bandwidth, phase_factor * compaction_factor * stability.multiplier)
            }
            CombinationLaw::WeightedMean => {
                let w = &self.config.aggregator.weights;
                let total = w.phase + w.compaction + w.stability;
                if total.is_nan() || total <= 0.0 {
                    return Err(Error::InvalidInput {
                        field: "aggregator.weights".to_string(),
                        reason: "weights must have a positive sum".to_string(),
                    });
                }
                let combined = (w.phase * phase_factor
                    + w.compaction * compaction_factor
                    + w.stability * stability.multiplier)
                    / total;
                (inputs.device.effective_bw * combined, combined)
            }
        };
        let s_max = mibs_to_ops(bandwidth, record_size);

        let component_factors = component_factors(inputs, &stability, combined);
        debug!(?component_factors, "Component factors");
        info!(
            s_max_ops = s_max,
            bandwidth_mibs = bandwidth,
            phase = %inputs.phase.name,
            "Predicted sustainable put rate"
        );

        Ok(PredictionResult {
            predicted_s_max: s_max,
            predicted_bandwidth_mibs: bandwidth,
            record_size_bytes: record_size,
            component_factors,
            phase: inputs.phase.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Build every component from measured traces, then predict
    ///
    /// The device envelope and the level profile do not depend on each
    /// other and are computed concurrently.
    #[instrument(skip(self, traces), fields(
        compaction_records = traces.compaction.len(),
        throughput_samples = traces.throughput.len()
    ))]
    pub fn predict_from_traces(&self, traces: &TraceSet) -> Result<PredictionResult> {
        let (inputs, _) = self.assemble(traces)?;
        self.predict(&inputs)
    }

    /// Component outputs for a trace set, plus the full segmentation
    ///
    /// Throughput timestamps must be finite and non-decreasing.
    pub fn assemble(&self, traces: &TraceSet) -> Result<(ModelInputs, Vec<Phase>)> {
        if !traces.throughput.is_ordered() {
            return Err(Error::InvalidInput {
                field: "throughput.samples".to_string(),
                reason: "timestamps must be finite and non-decreasing".to_string(),
            });
        }

        let degradation = traces.device_baseline.as_ref().map(|before| {
            degradation_factor(before, &traces.device, self.config.device.min_degradation)
        });

        let (device, levels) = rayon::join(
            || self.device.envelope(&traces.device, degradation),
            || {
                self.levels
                    .from_trace(&traces.compaction, traces.user_write_bytes)
            },
        );
        let device = device?;

        let throughput = traces
            .throughput
            .to_ops(self.config.aggregator.record_size_bytes);
        let phases = self.phases.segment(&throughput);
        let phase = phases
            .last()
            .cloned()
            .unwrap_or_else(|| crate::phase::single_phase(&throughput));

        let counters = &traces.counters;
        let signals = StabilitySignals::from_counters(
            secs("counters.stall_secs", counters.stall_secs)?,
            secs("counters.interval_secs", counters.interval_secs)?,
            counters.cache_hits,
            counters.cache_misses,
            &levels,
        );

        Ok((
            ModelInputs {
                device,
                levels,
                phase,
                signals,
            },
            phases,
        ))
    }
}

impl Default for PutRateAggregator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn component_factors(
    inputs: &ModelInputs,
    stability: &StabilityBreakdown,
    combined: f64,
) -> BTreeMap<String, f64> {
    [
        (factor::EFFECTIVE_BW_MIBS, inputs.device.effective_bw),
        (factor::WRITE_BW_MIBS, inputs.device.write_bw),
        (factor::READ_BW_MIBS, inputs.device.read_bw),
        (factor::PHASE, inputs.phase.performance_factor),
        (factor::COMPACTION, inputs.levels.compaction_factor),
        (factor::STABILITY, stability.multiplier),
        (factor::STALL_PRESSURE, stability.pressure),
        (factor::COMBINED, combined),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn require_positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput {
            field: field.to_string(),
            reason: format!("expected a positive finite value, got {}", value),
        })
    }
}

fn require_unit(field: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput {
            field: field.to_string(),
            reason: format!("expected a value in (0, 1], got {}", value),
        })
    }
}

fn secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| Error::InvalidInput {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactorWeights;
    use crate::level::LevelStats;
    use crate::phase::PhaseName;
    use crate::trace::{
        CompactionRecord, DeviceBenchmark, EngineCounters, ThroughputTrace, TimeRange,
    };

    fn inputs(effective_bw: f64, efficiency: f64, performance_factor: f64) -> ModelInputs {
        let mut phase = Phase::steady(TimeRange::new(0.0, 100.0));
        phase.performance_factor = performance_factor;
        ModelInputs {
            device: DeviceBandwidth::new(effective_bw, 2.0 * effective_bw),
            levels: LevelProfile::from_levels(vec![LevelStats {
                level_index: 1,
                io_share: 1.0,
                write_amplification: 10.0,
                read_amplification: 0.0,
                efficiency,
            }]),
            phase,
            signals: StabilitySignals::default(),
        }
    }

    #[test]
    fn test_multiplicative_chain() -> Result<()> {
        let agg = PutRateAggregator::with_defaults();
        let result = agg.predict(&inputs(1000.0, 0.5, 0.8))?;

        let expected_mibs = 1000.0 * 0.8 * 0.5;
        assert!((result.predicted_bandwidth_mibs - expected_mibs).abs() < 1e-9);
        let expected_ops = expected_mibs * 1024.0 * 1024.0 / 1088.0;
        assert!((result.predicted_s_max - expected_ops).abs() < 1e-6);

        assert_eq!(result.factor(factor::COMPACTION), Some(0.5));
        assert_eq!(result.factor(factor::PHASE), Some(0.8));
        assert_eq!(result.factor(factor::STABILITY), Some(1.0));
        assert_eq!(result.phase.name, PhaseName::Stable);
        Ok(())
    }

    #[test]
    fn test_s_steady_law() -> Result<()> {
        let agg = PutRateAggregator::with_defaults();
        let result = agg.predict(&inputs(100.0, 1.0, 1.0))?;
        let s_max = result.predicted_s_max;

        assert_eq!(result.s_steady(s_max / 2.0), s_max / 2.0);
        assert_eq!(result.s_steady(s_max), s_max);
        assert_eq!(result.s_steady(s_max * 3.0), s_max);
        assert_eq!(s_steady(0.0, s_max), 0.0);
        Ok(())
    }

    #[test]
    fn test_weighted_mean_law() -> Result<()> {
        let mut config = ModelConfig::default();
        config.aggregator.combination = CombinationLaw::WeightedMean;
        config.aggregator.weights = FactorWeights {
            phase: 1.0,
            compaction: 2.0,
            stability: 1.0,
        };
        let agg = PutRateAggregator::new(config);
        let result = agg.predict(&inputs(1000.0, 0.5, 0.8))?;

        let combined = (0.8 + 2.0 * 0.5 + 1.0) / 4.0;
        assert!((result.factor(factor::COMBINED).unwrap() - combined).abs() < 1e-12);
        assert!((result.predicted_bandwidth_mibs - 1000.0 * combined).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_invalid_inputs_name_the_field() {
        let agg = PutRateAggregator::with_defaults();

        let mut bad = inputs(1000.0, 0.5, 0.8);
        bad.device.effective_bw = 0.0;
        match agg.predict(&bad) {
            Err(Error::InvalidInput { field, .. }) => assert_eq!(field, "effective_bw"),
            other => panic!("expected InvalidInput, got {:?}", other),
        }

        let bad = inputs(1000.0, 0.5, 1.5);
        match agg.predict(&bad) {
            Err(Error::InvalidInput { field, .. }) => {
                assert_eq!(field, "phase.performance_factor")
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_signals_still_predict() -> Result<()> {
        let agg = PutRateAggregator::with_defaults();
        let mut saturated = inputs(1000.0, 0.5, 1.0);
        saturated.signals = StabilitySignals::new(1.0, 1.0, 1.0);
        let result = agg.predict(&saturated)?;
        assert!(result.predicted_s_max > 0.0);
        assert!(result.factor(factor::STABILITY).unwrap() >= 0.05);
        Ok(())
    }

    #[test]
    fn test_predict_from_traces() -> Result<()> {
        let pairs: Vec<(f64, f64)> = (0..40).map(|i| (i as f64 * 120.0, 50_000.0)).collect();
        let traces = TraceSet {
            device: DeviceBenchmark::sequential(1000.0, 2000.0),
            device_baseline: Some(DeviceBenchmark::sequential(1250.0, 2000.0)),
            compaction: vec![
                CompactionRecord {
                    level: 0,
                    write_bytes: 1000,
                    read_bytes: 0,
                    timestamp: 10.0,
                },
                CompactionRecord {
                    level: 1,
                    write_bytes: 3000,
                    read_bytes: 2000,
                    timestamp: 20.0,
                },
            ],
            user_write_bytes: 1000,
            throughput: ThroughputTrace::from_pairs(&pairs),
            counters: EngineCounters {
                stall_secs: 0.0,
                interval_secs: 60.0,
                cache_hits: 0,
                cache_misses: 0,
            },
        };

        let agg = PutRateAggregator::with_defaults();
        let (inputs, phases) = agg.assemble(&traces)?;
        assert_eq!(inputs.device.effective_bw, 800.0);
        assert_eq!(inputs.levels.levels.len(), 2);
        assert_eq!(phases.last().map(|p| p.name), Some(PhaseName::Stable));
        assert!(inputs.signals.compaction_intensity > 0.0);

        let result = agg.predict_from_traces(&traces)?;
        assert!(result.predicted_s_max > 0.0);
        assert!(result.predicted_bandwidth_mibs < 800.0);
        Ok(())
    }

    #[test]
    fn test_negative_counter_is_invalid() {
        let traces = TraceSet {
            device: DeviceBenchmark::sequential(1000.0, 2000.0),
            device_baseline: None,
            compaction: Vec::new(),
            user_write_bytes: 0,
            throughput: ThroughputTrace::default(),
            counters: EngineCounters {
                stall_secs: -1.0,
                ..Default::default()
            },
        };
        let agg = PutRateAggregator::with_defaults();
        assert!(matches!(
            agg.predict_from_traces(&traces),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_unordered_throughput_is_invalid() {
        let backwards: Vec<(f64, f64)> = (0..12).map(|i| (100.0 - i as f64, 500.0)).collect();
        let traces = TraceSet {
            device: DeviceBenchmark::sequential(1000.0, 2000.0),
            device_baseline: None,
            compaction: Vec::new(),
            user_write_bytes: 0,
            throughput: ThroughputTrace::from_pairs(&backwards),
            counters: EngineCounters::default(),
        };
        let agg = PutRateAggregator::with_defaults();
        match agg.assemble(&traces) {
            Err(Error::InvalidInput { field, .. }) => assert_eq!(field, "throughput.samples"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            agg.predict_from_traces(&traces),
            Err(Error::InvalidInput { .. })
        ));
    }
}
