//! core/slope.rs: Scaling of the critical noise frequency with grating
//! frequency.
//!
//! If the dip center scales in proportion to the grating frequency, the
//! ratio of dip centers between two gratings equals the ratio of their
//! physical frequencies and the local slope is 1. A local slope is
//!
//! ```text
//! slope = mean_s(c_s(g_hi) / c_s(g_lo)) / (g_hi / g_lo)
//! ```
//!
//! over subjects `s` with a usable dip at both gratings. Subjects missing
//! either end of a pair drop out of that pair entirely.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{AnalysisError, Result};
use crate::core::exclusion::ExclusionPolicy;
use crate::core::freq_table::FrequencyTable;
use crate::core::stats::{mean, mean_std, nan_mean, quantile};

const LABEL_EPS: f64 = 1e-9;

/// Dip centers per subject (rows) and nominal grating (columns). `None`
/// marks a flat fit, a failed fit, or a missing condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DipTable {
    gratings: Vec<f64>,
    subjects: Vec<String>,
    centers: Vec<Vec<Option<f64>>>,
}

impl DipTable {
    pub fn new(gratings: Vec<f64>) -> Self {
        Self {
            gratings,
            subjects: Vec::new(),
            centers: Vec::new(),
        }
    }

    pub fn gratings(&self) -> &[f64] {
        &self.gratings
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    fn column(&self, grating: f64) -> Option<usize> {
        self.gratings.iter().position(|g| (g - grating).abs() <= LABEL_EPS)
    }

    fn row_mut(&mut self, subject: &str) -> &mut Vec<Option<f64>> {
        let idx = match self.subjects.iter().position(|s| s == subject) {
            Some(i) => i,
            None => {
                self.subjects.push(subject.to_string());
                self.centers.push(vec![None; self.gratings.len()]);
                self.subjects.len() - 1
            }
        };
        &mut self.centers[idx]
    }

    /// Record a subject row, creating it if needed. Unknown gratings fail.
    pub fn set(&mut self, subject: &str, grating: f64, center: Option<f64>) -> Result<()> {
        let col = self.column(grating).ok_or(AnalysisError::UnknownGrating(grating))?;
        self.row_mut(subject)[col] = center;
        Ok(())
    }

    /// Convenience for literal tables: one center per grating column.
    pub fn push_row(&mut self, subject: &str, centers: &[Option<f64>]) {
        let row = self.row_mut(subject);
        for (slot, c) in row.iter_mut().zip(centers) {
            *slot = *c;
        }
    }

    pub fn center(&self, subject: &str, grating: f64) -> Option<f64> {
        let row = self.subjects.iter().position(|s| s == subject)?;
        self.centers[row][self.column(grating)?]
    }

    /// Center with the exclusion policy applied.
    pub fn usable_center(&self, subject: &str, grating: f64, policy: &ExclusionPolicy) -> Option<f64> {
        if policy.is_excluded(subject, grating) {
            return None;
        }
        self.center(subject, grating).filter(|c| c.is_finite() && *c > 0.0)
    }

    /// Mean usable dip center per grating, skipping missing cells.
    pub fn column_means(&self, policy: &ExclusionPolicy) -> Vec<(f64, Option<f64>)> {
        self.gratings
            .iter()
            .map(|&g| {
                let m = nan_mean(self.subjects.iter().map(|s| self.usable_center(s, g, policy)));
                (g, m)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapSettings {
    #[serde(default = "BootstrapSettings::default_iterations")]
    pub iterations: usize,
    #[serde(default = "BootstrapSettings::default_seed")]
    pub seed: u64,
    #[serde(default = "BootstrapSettings::default_ci_level")]
    pub ci_level: f64,
}

impl BootstrapSettings {
    fn default_iterations() -> usize {
        10_000
    }
    fn default_seed() -> u64 {
        0x0D1D_5EED
    }
    fn default_ci_level() -> f64 {
        0.95
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            iterations: Self::default_iterations(),
            seed: Self::default_seed(),
            ci_level: Self::default_ci_level(),
        }
    }
}

/// Local slope between two gratings: point value plus bootstrap distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlopeEstimate {
    /// Nominal grating labels of the pair.
    pub from: f64,
    pub to: f64,
    /// `g_to / g_from` on the physical axis.
    pub physical_ratio: f64,
    pub point: f64,
    /// Subjects contributing a ratio, in table order.
    pub subjects: Vec<String>,
    #[serde(skip)]
    pub distribution: Vec<f64>,
}

impl SlopeEstimate {
    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    /// Percentile interval of the bootstrap distribution.
    pub fn confidence_interval(&self, level: f64) -> Option<(f64, f64)> {
        if self.distribution.is_empty() {
            return None;
        }
        let alpha = (1.0 - level.clamp(0.0, 1.0)) / 2.0;
        let mut d = self.distribution.clone();
        let lo = quantile(&mut d, alpha);
        let hi = quantile(&mut d, 1.0 - alpha);
        Some((lo, hi))
    }

    /// Mean and standard deviation of the bootstrap distribution.
    pub fn distribution_summary(&self) -> (f64, f64) {
        mean_std(&self.distribution)
    }
}

/// Per-subject ratio `c(to) / c(from)`, only for subjects usable at both.
pub fn paired_ratios(table: &DipTable, from: f64, to: f64, policy: &ExclusionPolicy) -> Vec<(String, f64)> {
    table
        .subjects()
        .iter()
        .filter_map(|s| {
            let lo = table.usable_center(s, from, policy)?;
            let hi = table.usable_center(s, to, policy)?;
            Some((s.clone(), hi / lo))
        })
        .collect()
}

/// Means of `iterations` resamples (with replacement, same length).
pub fn bootstrap_means<R: Rng>(values: &[f64], iterations: usize, rng: &mut R) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len();
    (0..iterations)
        .map(|_| {
            let mut sum = 0.0;
            for _ in 0..n {
                sum += values[rng.random_range(0..n)];
            }
            sum / n as f64
        })
        .collect()
}

/// Local slope between two nominal gratings with its bootstrap distribution.
pub fn estimate_local_slope(
    table: &DipTable,
    from: f64,
    to: f64,
    freqs: &FrequencyTable,
    policy: &ExclusionPolicy,
    bootstrap: &BootstrapSettings,
    seed: u64,
) -> Result<SlopeEstimate> {
    let physical_ratio = freqs.physical(to)? / freqs.physical(from)?;
    let ratios = paired_ratios(table, from, to, policy);
    let values: Vec<f64> = ratios.iter().map(|(_, r)| *r).collect();
    let Some(mean_ratio) = mean(&values) else {
        return Err(AnalysisError::NoUsableRatios { from, to });
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let distribution: Vec<f64> = bootstrap_means(&values, bootstrap.iterations, &mut rng)
        .into_iter()
        .map(|m| m / physical_ratio)
        .collect();

    debug!(
        from,
        to,
        n_subjects = values.len(),
        point = mean_ratio / physical_ratio,
        "local slope"
    );
    Ok(SlopeEstimate {
        from,
        to,
        physical_ratio,
        point: mean_ratio / physical_ratio,
        subjects: ratios.into_iter().map(|(s, _)| s).collect(),
        distribution,
    })
}

/// Local slopes for every adjacent pair of gratings in the table, ordered by
/// physical frequency. Each pair gets its own RNG stream derived from the
/// bootstrap seed.
pub fn estimate_slope(
    table: &DipTable,
    freqs: &FrequencyTable,
    policy: &ExclusionPolicy,
    bootstrap: &BootstrapSettings,
) -> Vec<Result<SlopeEstimate>> {
    let sorted = match freqs.sort_by_physical(table.gratings()) {
        Ok(s) => s,
        Err(e) => return vec![Err(e)],
    };
    sorted
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let seed = bootstrap.seed ^ ((i as u64 + 1) << 8);
            estimate_local_slope(table, pair[0].0, pair[1].0, freqs, policy, bootstrap, seed)
        })
        .collect()
}

/// Slope of a deterministic two-point dip series (one per model): the ratio
/// of the end-point centers over the ratio of their physical frequencies.
pub fn model_slope(series: &[(f64, Option<f64>)], freqs: &FrequencyTable) -> Result<f64> {
    let nominals: Vec<f64> = series.iter().map(|(g, _)| *g).collect();
    let sorted = freqs.sort_by_physical(&nominals)?;
    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return Err(AnalysisError::InsufficientFrequencies { found: 0 });
    };
    if sorted.len() < 2 {
        return Err(AnalysisError::InsufficientFrequencies { found: sorted.len() });
    }
    let center_at = |g: f64| {
        series
            .iter()
            .find(|(n, _)| (n - g).abs() <= LABEL_EPS)
            .and_then(|(_, c)| *c)
            .filter(|c| c.is_finite() && *c > 0.0)
    };
    match (center_at(first.0), center_at(last.0)) {
        (Some(lo), Some(hi)) => Ok((hi / lo) / (last.1 / first.1)),
        _ => Err(AnalysisError::NoUsableRatios {
            from: first.0,
            to: last.0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bootstrap_of_constant_sample_is_constant() {
        let mut rng = StdRng::seed_from_u64(7);
        let means = bootstrap_means(&[2.0, 2.0, 2.0], 50, &mut rng);
        assert_eq!(means.len(), 50);
        assert!(means.iter().all(|m| (*m - 2.0).abs() < 1e-12));
        assert!(bootstrap_means(&[], 10, &mut rng).is_empty());
    }

    #[test]
    fn table_set_rejects_unknown_grating() {
        let mut table = DipTable::new(vec![0.4, 0.8]);
        assert!(table.set("n1", 0.4, Some(2.0)).is_ok());
        assert_eq!(table.set("n1", 1.6, Some(2.0)), Err(AnalysisError::UnknownGrating(1.6)));
        assert_eq!(table.center("n1", 0.4), Some(2.0));
        assert_eq!(table.center("n1", 0.8), None);
    }

    #[test]
    fn model_slope_two_points() {
        let freqs = FrequencyTable::standard();
        let s = model_slope(&[(0.8, Some(4.0)), (0.4, Some(2.0))], &freqs).unwrap();
        assert_relative_eq!(s, 1.0, epsilon = 1e-12);
        let flat = model_slope(&[(0.4, Some(2.0)), (0.8, None)], &freqs);
        assert_eq!(flat, Err(AnalysisError::NoUsableRatios { from: 0.4, to: 0.8 }));
    }

    #[test]
    fn confidence_interval_brackets_point() {
        let mut table = DipTable::new(vec![0.4, 0.8]);
        for (i, c) in [1.8, 2.0, 2.2, 1.9, 2.1].iter().enumerate() {
            table.push_row(&format!("s{i}"), &[Some(1.0), Some(*c)]);
        }
        let est = estimate_local_slope(
            &table,
            0.4,
            0.8,
            &FrequencyTable::standard(),
            &ExclusionPolicy::none(),
            &BootstrapSettings::default(),
            11,
        )
        .unwrap();
        let (lo, hi) = est.confidence_interval(0.95).unwrap();
        assert!(lo <= est.point && est.point <= hi);
        assert_eq!(est.distribution.len(), 10_000);
    }
}
