//! core/dip_model.rs: Flat vs. inverted-Gaussian dip model.
//!
//! Illusion strength is expected to sit on a plateau except near the noise
//! frequency that disrupts it most, where it dips. The dip is modelled as an
//! inverted Gaussian in log frequency:
//!
//! ```text
//! y = baseline - (baseline - minimum) * exp(-(ln x - ln center)^2 / w^2)
//! ```
//!
//! with `w = ln(width)` (or its FWHM-normalised variant). When the row means
//! show no convincing dip a single-parameter flat line is fitted instead;
//! that outcome is `DipShape::Flat`, a normal result rather than an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::dataset::Dataset;
use crate::core::error::{AnalysisError, Result};
use crate::core::illusion::{IllusionStrengthMatrix, compute_illusion_strength};
use crate::core::lsq::{LsqOptions, Param, minimize};

/// Normalisation of the log-width in the Gaussian exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WidthNorm {
    /// `w = ln(width)`
    #[default]
    LogWidth,
    /// `w = ln(width) / sqrt(2 ln 2)`: the dip is half as deep at a log
    /// distance of `ln(width) / sqrt(2)` from the center.
    Fwhm,
}

impl WidthNorm {
    #[inline]
    fn scale(&self, log_width: f64) -> f64 {
        match self {
            WidthNorm::LogWidth => log_width,
            WidthNorm::Fwhm => log_width / (2.0 * std::f64::consts::LN_2).sqrt(),
        }
    }
}

#[inline]
pub fn inverted_gaussian(x: f64, center: f64, baseline: f64, width: f64, minimum: f64, norm: WidthNorm) -> f64 {
    let d = x.ln() - center.ln();
    let w = norm.scale(width.ln());
    let denom = (w * w).max(f64::MIN_POSITIVE);
    baseline - (baseline - minimum) * (-(d * d) / denom).exp()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DipShape {
    Flat {
        baseline: f64,
    },
    Gaussian {
        center: f64,
        baseline: f64,
        width: f64,
        minimum: f64,
    },
}

impl DipShape {
    pub fn center(&self) -> Option<f64> {
        match self {
            DipShape::Flat { .. } => None,
            DipShape::Gaussian { center, .. } => Some(*center),
        }
    }

    pub fn baseline(&self) -> f64 {
        match self {
            DipShape::Flat { baseline } | DipShape::Gaussian { baseline, .. } => *baseline,
        }
    }

    pub fn eval(&self, x: f64, norm: WidthNorm) -> f64 {
        match *self {
            DipShape::Flat { baseline } => baseline,
            DipShape::Gaussian {
                center,
                baseline,
                width,
                minimum,
            } => inverted_gaussian(x, center, baseline, width, minimum, norm),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelChoice {
    Flat,
    Gaussian,
}

/// Row-mean summary that drives the model choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionStats {
    /// Second-largest row mean; the largest alone may be a noisy outlier.
    pub baseline_est: f64,
    pub minimum_est: f64,
    pub maximum: f64,
    /// Noise frequency of the smallest row mean.
    pub argmin_freq: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamError {
    pub name: String,
    pub stderr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitReport {
    pub evaluations: usize,
    pub n_data: usize,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    /// Absent when the covariance matrix is singular.
    pub stderr: Option<Vec<ParamError>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedDipModel {
    pub shape: DipShape,
    pub width_norm: WidthNorm,
    /// `None` when the model was forced rather than selected.
    pub selection: Option<SelectionStats>,
    pub report: FitReport,
}

impl FittedDipModel {
    /// Noise frequency of maximal disruption; `None` means no measurable dip.
    pub fn center(&self) -> Option<f64> {
        self.shape.center()
    }

    pub fn is_flat(&self) -> bool {
        matches!(self.shape, DipShape::Flat { .. })
    }

    pub fn eval(&self, noise_freq: f64) -> f64 {
        self.shape.eval(noise_freq, self.width_norm)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitSettings {
    #[serde(default = "FitSettings::default_constrained")]
    pub constrained: bool,
    #[serde(default = "FitSettings::default_center_min")]
    pub center_min: f64,
    #[serde(default = "FitSettings::default_center_max")]
    pub center_max: f64,
    #[serde(default = "FitSettings::default_width_init")]
    pub width_init: f64,
    /// Start values for `baseline`/`minimum` in the unconstrained fit.
    #[serde(default = "FitSettings::default_free_baseline_init")]
    pub free_baseline_init: f64,
    #[serde(default = "FitSettings::default_free_minimum_init")]
    pub free_minimum_init: f64,
    /// Slack around the observed estimates in the constrained fit.
    #[serde(default = "FitSettings::default_bound_slack")]
    pub bound_slack: f64,
    #[serde(default)]
    pub width_norm: WidthNorm,
    /// Choose Flat when the row means, ordered by noise frequency, never
    /// change direction.
    #[serde(default = "FitSettings::default_flat_if_monotone", alias = "require_interior_minimum")]
    pub flat_if_monotone: bool,
    #[serde(default = "FitSettings::default_max_evaluations")]
    pub max_evaluations: usize,
    #[serde(default = "FitSettings::default_tolerance")]
    pub tolerance: f64,
}

impl FitSettings {
    fn default_constrained() -> bool {
        true
    }
    fn default_center_min() -> f64 {
        0.5
    }
    fn default_center_max() -> f64 {
        9.0
    }
    fn default_width_init() -> f64 {
        2.0
    }
    fn default_free_baseline_init() -> f64 {
        5.0
    }
    fn default_free_minimum_init() -> f64 {
        -2.0
    }
    fn default_bound_slack() -> f64 {
        1.0
    }
    fn default_flat_if_monotone() -> bool {
        true
    }
    fn default_max_evaluations() -> usize {
        2000
    }
    fn default_tolerance() -> f64 {
        1e-10
    }

    /// Settings for computational-model output: FWHM width, a center bound
    /// reaching down to 0.01 cpd and a wider starting width.
    pub fn model_defaults() -> Self {
        Self {
            center_min: 0.01,
            width_init: 3.0,
            width_norm: WidthNorm::Fwhm,
            ..Self::default()
        }
    }

    fn lsq_options(&self) -> LsqOptions {
        LsqOptions {
            max_evaluations: self.max_evaluations,
            ftol: self.tolerance,
            xtol: self.tolerance,
            ..LsqOptions::default()
        }
    }
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            constrained: Self::default_constrained(),
            center_min: Self::default_center_min(),
            center_max: Self::default_center_max(),
            width_init: Self::default_width_init(),
            free_baseline_init: Self::default_free_baseline_init(),
            free_minimum_init: Self::default_free_minimum_init(),
            bound_slack: Self::default_bound_slack(),
            width_norm: WidthNorm::default(),
            flat_if_monotone: Self::default_flat_if_monotone(),
            max_evaluations: Self::default_max_evaluations(),
            tolerance: Self::default_tolerance(),
        }
    }
}

/// Summarise row means. Panics on empty input; callers check the row count.
pub fn selection_stats(noise_freqs: &[f64], row_means: &[f64]) -> SelectionStats {
    let mut sorted = row_means.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let maximum = sorted[0];
    let baseline_est = sorted.get(1).copied().unwrap_or(maximum);
    // First occurrence of the minimum, as in row order.
    let mut argmin = 0;
    for (i, m) in row_means.iter().enumerate() {
        if *m < row_means[argmin] {
            argmin = i;
        }
    }
    SelectionStats {
        baseline_est,
        minimum_est: row_means[argmin],
        maximum,
        argmin_freq: noise_freqs[argmin],
    }
}

/// True when the means, taken in ascending frequency order, are all
/// non-decreasing or all non-increasing.
pub fn is_monotone(noise_freqs: &[f64], row_means: &[f64]) -> bool {
    let mut pairs: Vec<(f64, f64)> = noise_freqs.iter().copied().zip(row_means.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let rising = pairs.windows(2).all(|w| w[1].1 >= w[0].1);
    let falling = pairs.windows(2).all(|w| w[1].1 <= w[0].1);
    rising || falling
}

/// Decide between the flat and the Gaussian model from the row means.
///
/// Flat when the drop from the plateau to the minimum is smaller than the
/// excess of the maximum over the plateau, or (optionally) when the means
/// are monotone in frequency and so have no dip to locate. A minimum at
/// the edge of the sampled range still selects Gaussian.
pub fn select_model(
    stats: &SelectionStats,
    noise_freqs: &[f64],
    row_means: &[f64],
    flat_if_monotone: bool,
) -> ModelChoice {
    if stats.baseline_est - stats.minimum_est < stats.maximum - stats.baseline_est {
        return ModelChoice::Flat;
    }
    if flat_if_monotone && is_monotone(noise_freqs, row_means) {
        return ModelChoice::Flat;
    }
    ModelChoice::Gaussian
}

#[derive(Debug, Clone, Default)]
pub struct DipFitter {
    pub settings: FitSettings,
}

impl DipFitter {
    pub fn new(settings: FitSettings) -> Self {
        Self { settings }
    }

    /// Fit one subject × grating × noise-type unit.
    pub fn fit(&self, data: &Dataset, constrained: bool) -> Result<FittedDipModel> {
        let matrix = compute_illusion_strength(data)?;
        self.fit_matrix(&matrix, constrained)
    }

    /// Fit the flat model without consulting the selection heuristic.
    pub fn fit_flat(&self, data: &Dataset) -> Result<FittedDipModel> {
        self.fit_forced(data, ModelChoice::Flat, false)
    }

    /// Fit the Gaussian model without consulting the selection heuristic.
    pub fn fit_gaussian(&self, data: &Dataset, constrained: bool) -> Result<FittedDipModel> {
        self.fit_forced(data, ModelChoice::Gaussian, constrained)
    }

    fn fit_forced(&self, data: &Dataset, choice: ModelChoice, constrained: bool) -> Result<FittedDipModel> {
        let matrix = compute_illusion_strength(data)?;
        let (xs, ys) = validated_entries(&matrix)?;
        let stats = selection_stats(matrix.noise_freqs(), &matrix.row_means());
        let mut fitted = self.run(choice, &stats, constrained, &xs, &ys)?;
        fitted.selection = None;
        Ok(fitted)
    }

    pub fn fit_matrix(&self, matrix: &IllusionStrengthMatrix, constrained: bool) -> Result<FittedDipModel> {
        let (xs, ys) = validated_entries(matrix)?;
        let means = matrix.row_means();
        let stats = selection_stats(matrix.noise_freqs(), &means);
        let choice = select_model(&stats, matrix.noise_freqs(), &means, self.settings.flat_if_monotone);
        debug!(
            ?choice,
            baseline_est = stats.baseline_est,
            minimum_est = stats.minimum_est,
            maximum = stats.maximum,
            argmin_freq = stats.argmin_freq,
            "dip model selection"
        );
        self.run(choice, &stats, constrained, &xs, &ys)
    }

    fn initial_params(&self, choice: ModelChoice, stats: &SelectionStats, constrained: bool) -> Vec<Param> {
        let s = &self.settings;
        match choice {
            ModelChoice::Flat => vec![Param::free("baseline", stats.baseline_est)],
            ModelChoice::Gaussian => {
                let center = Param::bounded("center", stats.argmin_freq, s.center_min, s.center_max);
                let width = Param::free("width", s.width_init);
                let (baseline, minimum) = if constrained {
                    (
                        Param::free("baseline", stats.baseline_est),
                        Param::bounded(
                            "minimum",
                            stats.minimum_est,
                            stats.minimum_est - s.bound_slack,
                            stats.baseline_est + s.bound_slack,
                        ),
                    )
                } else {
                    (
                        Param::free("baseline", s.free_baseline_init),
                        Param::free("minimum", s.free_minimum_init),
                    )
                };
                vec![center, baseline, width, minimum]
            }
        }
    }

    fn run(
        &self,
        choice: ModelChoice,
        stats: &SelectionStats,
        constrained: bool,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<FittedDipModel> {
        let params = self.initial_params(choice, stats, constrained);
        let norm = self.settings.width_norm;
        let sol = match choice {
            ModelChoice::Flat => minimize(
                &params,
                ys.len(),
                |p, out| {
                    for (o, y) in out.iter_mut().zip(ys) {
                        *o = p[0] - y;
                    }
                },
                &self.settings.lsq_options(),
            )?,
            ModelChoice::Gaussian => minimize(
                &params,
                ys.len(),
                |p, out| {
                    for ((o, &x), y) in out.iter_mut().zip(xs).zip(ys) {
                        *o = inverted_gaussian(x, p[0], p[1], p[2], p[3], norm) - y;
                    }
                },
                &self.settings.lsq_options(),
            )?,
        };

        let shape = match choice {
            ModelChoice::Flat => DipShape::Flat {
                baseline: sol.values[0],
            },
            ModelChoice::Gaussian => DipShape::Gaussian {
                center: sol.values[0],
                baseline: sol.values[1],
                width: sol.values[2],
                minimum: sol.values[3],
            },
        };
        let stderr = sol.stderr.as_ref().map(|errs| {
            params
                .iter()
                .zip(errs)
                .map(|(p, &e)| ParamError {
                    name: p.name.to_string(),
                    stderr: e,
                })
                .collect()
        });
        Ok(FittedDipModel {
            shape,
            width_norm: norm,
            selection: Some(*stats),
            report: FitReport {
                evaluations: sol.evaluations,
                n_data: sol.n_data,
                chi_square: sol.chi_square,
                reduced_chi_square: sol.reduced_chi_square(),
                stderr,
            },
        })
    }
}

/// Flatten the matrix into `(x, y)` pairs after checking it can carry a
/// log-frequency model.
fn validated_entries(matrix: &IllusionStrengthMatrix) -> Result<(Vec<f64>, Vec<f64>)> {
    if matrix.n_freqs() < 2 {
        return Err(AnalysisError::InsufficientFrequencies {
            found: matrix.n_freqs(),
        });
    }
    if let Some(&bad) = matrix.noise_freqs().iter().find(|f| !(**f > 0.0)) {
        return Err(AnalysisError::NonPositiveFrequency(bad));
    }
    if matrix.n_reps() == 0 {
        return Err(AnalysisError::EmptyDataset);
    }
    Ok(matrix.entries().unzip())
}

/// Fit with default settings.
pub fn fit_dip_model(data: &Dataset, constrained: bool) -> Result<FittedDipModel> {
    DipFitter::default().fit(data, constrained)
}
