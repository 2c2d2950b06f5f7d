//! Model configuration
//!
//! Every tunable of the put-rate model lives here as a named constant with a
//! documented default. A [`ModelConfig`] can be built in code, loaded from a
//! TOML file, and overridden from the environment:
//!
//! ```text
//! putrate.toml            PUTRATE__STABILITY__FLOOR=0.1
//!   [device]              PUTRATE__AGGREGATOR__RECORD_SIZE_BYTES=512
//!   [level]
//!   [phase]
//!   [stability]
//!   [aggregator]
//!   [accuracy]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Bandwidth floor substituted for non-positive device samples (MiB/s)
pub const DEFAULT_MIN_BANDWIDTH_MIBS: f64 = 1.0;

/// Lowest wear multiplier a before/after benchmark pair can produce
pub const DEFAULT_MIN_DEGRADATION: f64 = 0.01;

/// Lowest efficiency a level can report; keeps efficiency inside (0, 1]
pub const DEFAULT_MIN_EFFICIENCY: f64 = 1e-3;

/// Elapsed seconds before an instance leaves the initial phase (T1)
pub const DEFAULT_INITIAL_SECS: f64 = 600.0;

/// Elapsed seconds after which an instance is considered stable (T2)
pub const DEFAULT_STABLE_SECS: f64 = 3600.0;

/// Moving-average window used by change-point segmentation (samples)
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Relative rate-of-change that marks a phase boundary
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.05;

/// Rolling standard deviation of the rate-of-change that marks a boundary
pub const DEFAULT_VOLATILITY_THRESHOLD: f64 = 0.03;

/// Below this many samples segmentation falls back to one stable phase
pub const DEFAULT_MIN_SAMPLES: usize = 10;

/// Backpressure multiplier floor: some throughput survives any stall
pub const DEFAULT_STABILITY_FLOOR: f64 = 0.05;

/// Average record size used to turn bandwidth into an operation rate
pub const DEFAULT_RECORD_SIZE_BYTES: f64 = 1088.0;

/// Validation status thresholds (absolute error percent)
pub const DEFAULT_EXCELLENT_PCT: f64 = 5.0;
pub const DEFAULT_GOOD_PCT: f64 = 15.0;
pub const DEFAULT_FAIR_PCT: f64 = 30.0;

/// Environment prefix for overrides (`PUTRATE__SECTION__KEY`)
pub const ENV_PREFIX: &str = "PUTRATE";

/// Complete model configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub device: DeviceConfig,
    pub level: LevelConfig,
    pub phase: PhaseConfig,
    pub stability: StabilityConfig,
    pub aggregator: AggregatorConfig,
    pub accuracy: AccuracyConfig,
}

/// Which benchmark samples bound the device envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    /// Compaction and flush I/O is sequential
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Floor for non-positive bandwidth samples (MiB/s)
    pub min_bandwidth_mibs: f64,
    pub access_pattern: AccessPattern,
    pub min_degradation: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_bandwidth_mibs: DEFAULT_MIN_BANDWIDTH_MIBS,
            access_pattern: AccessPattern::Sequential,
            min_degradation: DEFAULT_MIN_DEGRADATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub min_efficiency: f64,
    /// How much read amplification counts against a level's efficiency
    pub read_amplification_weight: f64,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            min_efficiency: DEFAULT_MIN_EFFICIENCY,
            read_amplification_weight: 0.0,
        }
    }
}

/// Phase segmentation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStrategyKind {
    #[default]
    TimeThreshold,
    ChangePoint,
}

/// Nominal factors for a phase when no trace is available
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseProfile {
    pub performance_factor: f64,
    pub stability: f64,
    pub io_intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub strategy: PhaseStrategyKind,
    /// T1: end of the initial phase (elapsed seconds)
    pub initial_secs: f64,
    /// T2: start of the stable phase (elapsed seconds)
    pub stable_secs: f64,
    pub window: usize,
    pub change_threshold: f64,
    pub volatility_threshold: f64,
    pub min_samples: usize,
    pub initial: PhaseProfile,
    pub transitional: PhaseProfile,
    pub stable: PhaseProfile,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        // Nominal profiles are calibration values: a cold instance runs at
        // full speed, compaction debt then settles it to roughly half.
        Self {
            strategy: PhaseStrategyKind::TimeThreshold,
            initial_secs: DEFAULT_INITIAL_SECS,
            stable_secs: DEFAULT_STABLE_SECS,
            window: DEFAULT_SMOOTHING_WINDOW,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            volatility_threshold: DEFAULT_VOLATILITY_THRESHOLD,
            min_samples: DEFAULT_MIN_SAMPLES,
            initial: PhaseProfile {
                performance_factor: 1.0,
                stability: 0.6,
                io_intensity: 0.4,
            },
            transitional: PhaseProfile {
                performance_factor: 0.7,
                stability: 0.5,
                io_intensity: 1.0,
            },
            stable: PhaseProfile {
                performance_factor: 0.5,
                stability: 0.9,
                io_intensity: 0.7,
            },
        }
    }
}

/// Sensitivity of the backpressure multiplier to each signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityWeights {
    pub write_stall: f64,
    pub cache_miss: f64,
    pub compaction: f64,
}

impl Default for StabilityWeights {
    fn default() -> Self {
        Self {
            write_stall: 1.0,
            cache_miss: 1.0,
            compaction: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub floor: f64,
    pub weights: StabilityWeights,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            floor: DEFAULT_STABILITY_FLOOR,
            weights: StabilityWeights::default(),
        }
    }
}

/// How the component factors are folded into one throughput factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationLaw {
    /// phase × compaction × stability
    #[default]
    Multiplicative,
    /// Weighted arithmetic mean of the three factors
    WeightedMean,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub phase: f64,
    pub compaction: f64,
    pub stability: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            phase: 1.0,
            compaction: 1.0,
            stability: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub record_size_bytes: f64,
    pub combination: CombinationLaw,
    pub weights: FactorWeights,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            record_size_bytes: DEFAULT_RECORD_SIZE_BYTES,
            combination: CombinationLaw::Multiplicative,
            weights: FactorWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyConfig {
    pub excellent_pct: f64,
    pub good_pct: f64,
    pub fair_pct: f64,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            excellent_pct: DEFAULT_EXCELLENT_PCT,
            good_pct: DEFAULT_GOOD_PCT,
            fair_pct: DEFAULT_FAIR_PCT,
        }
    }
}

impl ModelConfig {
    /// Load configuration from an optional TOML file plus `PUTRATE__*`
    /// environment overrides, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading model configuration");
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: ModelConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;
        cfg.validate()?;
        debug!(?cfg, "Model configuration loaded");
        Ok(cfg)
    }

    /// Parse a TOML document (no environment overrides)
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: ModelConfig =
            toml::from_str(s).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to render TOML: {}", e)))
    }

    /// Reject configurations the model cannot evaluate with
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, what: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(Error::Config(what.to_string()))
            }
        }

        check(
            self.device.min_bandwidth_mibs > 0.0,
            "device.min_bandwidth_mibs must be positive",
        )?;
        check(
            self.device.min_degradation > 0.0 && self.device.min_degradation <= 1.0,
            "device.min_degradation must be in (0, 1]",
        )?;
        check(
            self.level.min_efficiency > 0.0 && self.level.min_efficiency <= 1.0,
            "level.min_efficiency must be in (0, 1]",
        )?;
        check(
            self.level.read_amplification_weight >= 0.0,
            "level.read_amplification_weight must be non-negative",
        )?;
        check(
            self.phase.initial_secs >= 0.0 && self.phase.initial_secs <= self.phase.stable_secs,
            "phase thresholds must satisfy 0 <= initial_secs <= stable_secs",
        )?;
        check(self.phase.window >= 1, "phase.window must be at least 1")?;
        check(
            self.phase.change_threshold > 0.0 && self.phase.volatility_threshold > 0.0,
            "phase change/volatility thresholds must be positive",
        )?;
        for (name, p) in [
            ("initial", &self.phase.initial),
            ("transitional", &self.phase.transitional),
            ("stable", &self.phase.stable),
        ] {
            let in_unit = |v: f64| v > 0.0 && v <= 1.0;
            check(
                in_unit(p.performance_factor) && in_unit(p.stability) && in_unit(p.io_intensity),
                &format!("phase.{} profile factors must be in (0, 1]", name),
            )?;
        }
        check(
            self.stability.floor > 0.0 && self.stability.floor <= 1.0,
            "stability.floor must be in (0, 1]",
        )?;
        let w = &self.stability.weights;
        check(
            [w.write_stall, w.cache_miss, w.compaction]
                .iter()
                .all(|v| (0.0..=1.0).contains(v)),
            "stability.weights must be in [0, 1]",
        )?;
        check(
            self.aggregator.record_size_bytes > 0.0,
            "aggregator.record_size_bytes must be positive",
        )?;
        let fw = &self.aggregator.weights;
        check(
            fw.phase >= 0.0
                && fw.compaction >= 0.0
                && fw.stability >= 0.0
                && fw.phase + fw.compaction + fw.stability > 0.0,
            "aggregator.weights must be non-negative with a positive sum",
        )?;
        let a = &self.accuracy;
        check(
            0.0 < a.excellent_pct && a.excellent_pct <= a.good_pct && a.good_pct <= a.fair_pct,
            "accuracy thresholds must satisfy 0 < excellent <= good <= fair",
        )?;
        Ok(())
    }
}
