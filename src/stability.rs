//! Backpressure discount
//!
//! Three contention signals, each a ratio in [0, 1], are combined with
//! diminishing returns:
//!
//! ```text
//! pressure   = 1 - Π (1 - wᵢ·xᵢ)
//! multiplier = max(floor, 1 - (1 - floor)·pressure)
//! ```
//!
//! Any single signal at 1.0 (with weight 1.0) saturates the pressure and
//! drives the multiplier to the floor; further signals cannot push it lower.
//! With all signals at zero the multiplier is exactly 1.0.

use crate::config::StabilityConfig;
use crate::error::guarded_ratio;
use crate::level::LevelProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Contention signals for one observation interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilitySignals {
    /// Fraction of the interval writes spent stalled
    pub write_stall_ratio: f64,
    /// Block-cache misses over lookups
    pub cache_miss_ratio: f64,
    /// Share of device I/O spent on compaction
    pub compaction_intensity: f64,
}

impl StabilitySignals {
    pub fn new(write_stall_ratio: f64, cache_miss_ratio: f64, compaction_intensity: f64) -> Self {
        Self {
            write_stall_ratio,
            cache_miss_ratio,
            compaction_intensity,
        }
    }

    /// Signals from raw engine counters
    ///
    /// Zero-length intervals and zero lookups contribute no pressure.
    pub fn from_counters(
        stall_time: Duration,
        interval: Duration,
        cache_hits: u64,
        cache_misses: u64,
        levels: &LevelProfile,
    ) -> Self {
        let write_stall_ratio =
            guarded_ratio(stall_time.as_secs_f64(), interval.as_secs_f64()).unwrap_or(0.0);
        let lookups = cache_hits.saturating_add(cache_misses) as f64;
        let cache_miss_ratio = guarded_ratio(cache_misses as f64, lookups).unwrap_or(0.0);

        Self {
            write_stall_ratio,
            cache_miss_ratio,
            compaction_intensity: levels.compaction_intensity(),
        }
    }
}

/// Per-signal breakdown of a multiplier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityBreakdown {
    pub signals: StabilitySignals,
    /// Survival fraction for each signal alone, before the floor
    pub write_stall_survival: f64,
    pub cache_miss_survival: f64,
    pub compaction_survival: f64,
    /// Combined pressure in [0, 1]
    pub pressure: f64,
    pub multiplier: f64,
}

/// Backpressure multiplier
#[derive(Debug, Clone, Default)]
pub struct StabilityFactor {
    config: StabilityConfig,
}

impl StabilityFactor {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    pub fn floor(&self) -> f64 {
        self.config.floor
    }

    /// Multiplier in `[floor, 1]`
    pub fn multiplier(
        &self,
        write_stall_ratio: f64,
        cache_miss_ratio: f64,
        compaction_intensity: f64,
    ) -> f64 {
        self.evaluate(&StabilitySignals::new(
            write_stall_ratio,
            cache_miss_ratio,
            compaction_intensity,
        ))
        .multiplier
    }

    /// Multiplier together with its per-signal breakdown
    pub fn evaluate(&self, signals: &StabilitySignals) -> StabilityBreakdown {
        let w = &self.config.weights;
        let survival = |name: &str, x: f64, weight: f64| -> f64 {
            let x = unit(name, x);
            1.0 - weight * x
        };
        let stall = survival("write_stall_ratio", signals.write_stall_ratio, w.write_stall);
        let miss = survival("cache_miss_ratio", signals.cache_miss_ratio, w.cache_miss);
        let compaction = survival(
            "compaction_intensity",
            signals.compaction_intensity,
            w.compaction,
        );

        let pressure = (1.0 - stall * miss * compaction).clamp(0.0, 1.0);
        let floor = self.config.floor;
        let multiplier = (1.0 - (1.0 - floor) * pressure).clamp(floor, 1.0);

        debug!(
            stall,
            miss,
            compaction,
            pressure,
            multiplier,
            "Stability multiplier"
        );

        StabilityBreakdown {
            signals: *signals,
            write_stall_survival: stall,
            cache_miss_survival: miss,
            compaction_survival: compaction,
            pressure,
            multiplier,
        }
    }
}

/// Clamp a ratio signal into [0, 1]; NaN counts as no signal
fn unit(name: &str, x: f64) -> f64 {
    if x.is_nan() {
        warn!(signal = name, "NaN stability signal treated as 0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&x) {
        warn!(signal = name, value = x, "Stability signal clamped to [0, 1]");
    }
    x.clamp(0.0, 1.0)
}
