//! Per-level compaction cost model
//!
//! Folds a compaction trace into one [`LevelStats`] per LSM level and
//! derives the compaction factor: the fraction of raw device bandwidth
//! that survives compaction overhead.
//!
//! ```text
//! io_share[i]   = bytes[i] / Σ bytes
//! wa[i]         = level_write_bytes[i] / user_write_bytes
//! efficiency[i] = 1 / max(1, wa[i] + k·ra[i])      (floored at min_efficiency)
//! compaction    = Σ io_share[i] × efficiency[i]
//! ```

use crate::config::LevelConfig;
use crate::error::guarded_ratio;
use crate::trace::CompactionRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Traces longer than this are folded in parallel
const PARALLEL_FOLD_THRESHOLD: usize = 4096;

/// Cost profile of a single LSM level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub level_index: u32,
    /// Fraction of total observed I/O volume, in [0, 1]
    pub io_share: f64,
    pub write_amplification: f64,
    pub read_amplification: f64,
    /// In (0, 1]; higher amplification means lower efficiency
    pub efficiency: f64,
}

/// Level costs for one observation interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProfile {
    /// Ordered by io_share descending, then level_index ascending
    pub levels: Vec<LevelStats>,
    pub user_write_bytes: u64,
    pub total_write_bytes: u64,
    pub total_read_bytes: u64,
    pub compaction_factor: f64,
}

impl LevelProfile {
    /// Profile from already-computed level stats (no byte totals)
    pub fn from_levels(mut levels: Vec<LevelStats>) -> Self {
        sort_levels(&mut levels);
        let compaction_factor = compaction_factor(&levels);
        Self {
            levels,
            user_write_bytes: 0,
            total_write_bytes: 0,
            total_read_bytes: 0,
            compaction_factor,
        }
    }

    /// Physical bytes written per logical byte, across all levels
    pub fn total_write_amplification(&self) -> f64 {
        guarded_ratio(self.total_write_bytes as f64, self.user_write_bytes as f64).unwrap_or(0.0)
    }

    pub fn total_read_amplification(&self) -> f64 {
        guarded_ratio(self.total_read_bytes as f64, self.user_write_bytes as f64).unwrap_or(0.0)
    }

    /// Share of physical I/O that is compaction work rather than user data
    ///
    /// In [0, 1]; 0 when nothing was observed.
    pub fn compaction_intensity(&self) -> f64 {
        let physical = (self.total_write_bytes + self.total_read_bytes) as f64;
        match guarded_ratio(self.user_write_bytes as f64, physical) {
            Ok(user_share) => (1.0 - user_share).clamp(0.0, 1.0),
            Err(_) => 0.0,
        }
    }

    /// Sum of io_share across levels
    pub fn io_share_sum(&self) -> f64 {
        self.levels.iter().map(|l| l.io_share).sum()
    }

    pub fn level(&self, level_index: u32) -> Option<&LevelStats> {
        self.levels.iter().find(|l| l.level_index == level_index)
    }
}

/// Level cost model
#[derive(Debug, Clone, Default)]
pub struct LevelCostModel {
    config: LevelConfig,
}

impl LevelCostModel {
    pub fn new(config: LevelConfig) -> Self {
        Self { config }
    }

    /// Efficiency for a level with the given amplification
    ///
    /// Non-increasing in both arguments, bounded to `[min_efficiency, 1]`.
    pub fn efficiency(&self, write_amplification: f64, read_amplification: f64) -> f64 {
        let amplification = write_amplification.max(0.0)
            + self.config.read_amplification_weight * read_amplification.max(0.0);
        if !amplification.is_finite() {
            return self.config.min_efficiency;
        }
        if amplification <= 1.0 {
            return 1.0;
        }
        (1.0 / amplification).max(self.config.min_efficiency)
    }

    /// Stats for one level with a known io_share
    pub fn level_stats(
        &self,
        level_index: u32,
        io_share: f64,
        write_amplification: f64,
        read_amplification: f64,
    ) -> LevelStats {
        LevelStats {
            level_index,
            io_share,
            write_amplification,
            read_amplification,
            efficiency: self.efficiency(write_amplification, read_amplification),
        }
    }

    /// Aggregate a compaction trace by level
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub fn from_trace(&self, records: &[CompactionRecord], user_write_bytes: u64) -> LevelProfile {
        let per_level = if records.len() > PARALLEL_FOLD_THRESHOLD {
            fold_parallel(records)
        } else {
            fold_sequential(records)
        };
        self.from_level_bytes(&per_level, user_write_bytes)
    }

    /// Build a profile from `(level, write_bytes, read_bytes)` totals
    pub fn from_level_bytes(
        &self,
        per_level: &[(u32, u64, u64)],
        user_write_bytes: u64,
    ) -> LevelProfile {
        let total_write_bytes = per_level.iter().fold(0u64, |a, &(_, w, _)| a.saturating_add(w));
        let total_read_bytes = per_level.iter().fold(0u64, |a, &(_, _, r)| a.saturating_add(r));
        let total_bytes = (total_write_bytes as f64) + (total_read_bytes as f64);

        if user_write_bytes == 0 && total_write_bytes > 0 {
            warn!("No user writes observed; amplification terms are skipped");
        }

        let mut levels: Vec<LevelStats> = per_level
            .iter()
            .map(|&(level, w, r)| {
                let bytes = w as f64 + r as f64;
                let io_share = guarded_ratio(bytes, total_bytes).unwrap_or(0.0);
                let wa = guarded_ratio(w as f64, user_write_bytes as f64).unwrap_or(0.0);
                let ra = guarded_ratio(r as f64, user_write_bytes as f64).unwrap_or(0.0);
                self.level_stats(level, io_share, wa, ra)
            })
            .collect();
        sort_levels(&mut levels);

        let compaction_factor = compaction_factor(&levels);
        debug!(
            levels = levels.len(),
            user_write_bytes,
            total_write_bytes,
            total_read_bytes,
            compaction_factor,
            "Level profile"
        );

        LevelProfile {
            levels,
            user_write_bytes,
            total_write_bytes,
            total_read_bytes,
            compaction_factor,
        }
    }
}

/// Σ io_share × efficiency over levels with observed I/O
///
/// Levels with zero io_share are skipped. With no observed I/O at all there
/// is no compaction overhead and the factor is 1.0.
pub fn compaction_factor(levels: &[LevelStats]) -> f64 {
    let active: Vec<&LevelStats> = levels.iter().filter(|l| l.io_share > 0.0).collect();
    if active.is_empty() {
        return 1.0;
    }
    // Shares sum to 1 only up to rounding
    active
        .iter()
        .map(|l| l.io_share * l.efficiency)
        .sum::<f64>()
        .min(1.0)
}

fn sort_levels(levels: &mut [LevelStats]) {
    levels.sort_by(|a, b| {
        b.io_share
            .total_cmp(&a.io_share)
            .then(a.level_index.cmp(&b.level_index))
    });
}

/// `(level, write_bytes, read_bytes)` totals, ordered by level
fn fold_sequential(records: &[CompactionRecord]) -> Vec<(u32, u64, u64)> {
    let mut acc = BTreeMap::new();
    for r in records {
        accumulate(&mut acc, r);
    }
    flatten(acc)
}

fn fold_parallel(records: &[CompactionRecord]) -> Vec<(u32, u64, u64)> {
    let acc = records
        .par_iter()
        .fold(BTreeMap::new, |mut acc, r| {
            accumulate(&mut acc, r);
            acc
        })
        .reduce(BTreeMap::new, merge);
    flatten(acc)
}

fn flatten(acc: BTreeMap<u32, (u64, u64)>) -> Vec<(u32, u64, u64)> {
    acc.into_iter().map(|(level, (w, r))| (level, w, r)).collect()
}

fn accumulate(acc: &mut BTreeMap<u32, (u64, u64)>, r: &CompactionRecord) {
    let entry = acc.entry(r.level).or_insert((0, 0));
    entry.0 = entry.0.saturating_add(r.write_bytes);
    entry.1 = entry.1.saturating_add(r.read_bytes);
}

fn merge(
    mut a: BTreeMap<u32, (u64, u64)>,
    b: BTreeMap<u32, (u64, u64)>,
) -> BTreeMap<u32, (u64, u64)> {
    for (level, (w, r)) in b {
        let entry = a.entry(level).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(w);
        entry.1 = entry.1.saturating_add(r);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: u32, write_bytes: u64, read_bytes: u64) -> CompactionRecord {
        CompactionRecord {
            level,
            write_bytes,
            read_bytes,
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_io_share_sums_to_one() {
        let model = LevelCostModel::default();
        let profile = model.from_trace(
            &[
                record(0, 100, 0),
                record(1, 300, 200),
                record(2, 900, 500),
                record(1, 50, 50),
            ],
            100,
        );
        assert_eq!(profile.levels.len(), 3);
        assert!((profile.io_share_sum() - 1.0).abs() < 1e-9);

        let l1 = profile.level(1).unwrap();
        assert_eq!(l1.write_amplification, 3.5);
        assert_eq!(l1.read_amplification, 2.5);
    }

    #[test]
    fn test_efficiency_bounds() {
        let model = LevelCostModel::default();
        assert_eq!(model.efficiency(0.0, 0.0), 1.0);
        assert_eq!(model.efficiency(1.0, 0.0), 1.0);
        assert_eq!(model.efficiency(4.0, 0.0), 0.25);
        assert_eq!(model.efficiency(1e12, 0.0), crate::config::DEFAULT_MIN_EFFICIENCY);
        assert_eq!(model.efficiency(f64::INFINITY, 0.0), crate::config::DEFAULT_MIN_EFFICIENCY);
        assert!(model.efficiency(22.6, 0.0) < model.efficiency(10.0, 0.0));
    }

    #[test]
    fn test_read_amplification_weight() {
        let model = LevelCostModel::new(LevelConfig {
            read_amplification_weight: 0.5,
            ..Default::default()
        });
        assert_eq!(model.efficiency(2.0, 4.0), 0.25);
    }

    #[test]
    fn test_zero_byte_level_is_excluded() {
        let model = LevelCostModel::default();
        let profile = model.from_level_bytes(&[(0, 100, 0), (3, 0, 0)], 100);
        let l3 = profile.level(3).unwrap();
        assert_eq!(l3.io_share, 0.0);
        assert_eq!(profile.compaction_factor, 1.0);
    }

    #[test]
    fn test_no_observed_io() {
        let model = LevelCostModel::default();
        let profile = model.from_level_bytes(&[], 0);
        assert!(profile.levels.is_empty());
        assert_eq!(profile.io_share_sum(), 0.0);
        assert_eq!(profile.compaction_factor, 1.0);
        assert_eq!(profile.compaction_intensity(), 0.0);
    }

    #[test]
    fn test_tie_break_by_level_index() {
        let model = LevelCostModel::default();
        let profile = model.from_level_bytes(&[(4, 100, 0), (2, 100, 0), (1, 300, 0)], 100);
        let order: Vec<u32> = profile.levels.iter().map(|l| l.level_index).collect();
        assert_eq!(order, vec![1, 2, 4]);
    }

    #[test]
    fn test_zero_user_writes_skips_amplification() {
        let model = LevelCostModel::default();
        let profile = model.from_level_bytes(&[(1, 500, 500)], 0);
        let l1 = profile.level(1).unwrap();
        assert_eq!(l1.write_amplification, 0.0);
        assert_eq!(l1.efficiency, 1.0);
        assert_eq!(profile.total_write_amplification(), 0.0);
    }

    #[test]
    fn test_compaction_intensity() {
        let model = LevelCostModel::default();
        // 100 user bytes out of 400 physical bytes
        let profile = model.from_level_bytes(&[(0, 100, 0), (1, 200, 100)], 100);
        assert!((profile.compaction_intensity() - 0.75).abs() < 1e-12);
        assert_eq!(profile.total_write_amplification(), 3.0);
        assert_eq!(profile.total_read_amplification(), 1.0);
    }

    #[test]
    fn test_parallel_fold_matches_sequential() {
        let model = LevelCostModel::default();
        let records: Vec<CompactionRecord> = (0..10_000)
            .map(|i| record((i % 5) as u32, 10 + (i % 7) as u64, (i % 3) as u64))
            .collect();
        assert!(records.len() > PARALLEL_FOLD_THRESHOLD);

        let parallel = fold_parallel(&records);
        let sequential = fold_sequential(&records);
        assert_eq!(parallel, sequential);
        assert_eq!(
            model.from_level_bytes(&parallel, 1000),
            model.from_level_bytes(&sequential, 1000)
        );

        let profile = model.from_trace(&records, 1000);
        assert_eq!(profile, model.from_level_bytes(&sequential, 1000));
        assert_eq!(profile.levels.len(), 5);
        assert!((profile.io_share_sum() - 1.0).abs() < 1e-9);
        let expected_writes: u64 = records.iter().map(|r| r.write_bytes).sum();
        assert_eq!(profile.total_write_bytes, expected_writes);
    }

    #[test]
    fn test_single_level_factor() {
        let model = LevelCostModel::default();
        let profile = LevelProfile::from_levels(vec![LevelStats {
            level_index: 2,
            io_share: 1.0,
            write_amplification: 22.6,
            read_amplification: 0.0,
            efficiency: 0.05,
        }]);
        assert_eq!(profile.compaction_factor, 0.05);
        assert!(model.efficiency(22.6, 0.0) <= 1.0);
    }
}
