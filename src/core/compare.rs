//! core/compare.rs
//! Human observers vs. computational models.
//!
//! Runs the dip fit for every subject × grating (and model × grating),
//! builds the aligned dip-center table, and derives the critical-frequency
//! slopes. A failing unit is recorded and skipped; it never aborts the batch
//! and never contributes a substitute value downstream.

use serde::{Deserialize, Serialize, Serializer};
use tracing::{info, warn};

use crate::core::dataset::Dataset;
use crate::core::dip_model::{DipFitter, FitSettings, FittedDipModel};
use crate::core::error::AnalysisError;
use crate::core::exclusion::ExclusionPolicy;
use crate::core::freq_table::FrequencyTable;
use crate::core::illusion::baseline_strength;
use crate::core::observation::NoiseType;
use crate::core::slope::{BootstrapSettings, DipTable, SlopeEstimate, estimate_slope, model_slope};
use crate::core::stats::pearson;

const LABEL_EPS: f64 = 1e-9;

fn serialize_display<S: Serializer, T: std::fmt::Display>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

/// How a computational model's output is reduced before fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFitSpec {
    pub name: String,
    /// Nominal gratings left out of the model comparison.
    #[serde(default)]
    pub drop_gratings: Vec<f64>,
    /// Fit the flat model at every grating (models known to show no dip).
    #[serde(default)]
    pub force_flat: bool,
    #[serde(default)]
    pub force_flat_gratings: Vec<f64>,
    /// Fit the Gaussian directly instead of letting the row means choose.
    #[serde(default)]
    pub skip_selection: bool,
    /// Fit settings for this model; `None` reuses the human settings.
    #[serde(default)]
    pub fit: Option<FitSettings>,
}

impl ModelFitSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            drop_gratings: Vec::new(),
            force_flat: false,
            force_flat_gratings: Vec::new(),
            skip_selection: false,
            fit: None,
        }
    }

    fn drops(&self, grating: f64) -> bool {
        self.drop_gratings.iter().any(|g| (g - grating).abs() <= LABEL_EPS)
    }

    fn forces_flat(&self, grating: f64) -> bool {
        self.force_flat || self.force_flat_gratings.iter().any(|g| (g - grating).abs() <= LABEL_EPS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum UnitOutcome {
    Fitted {
        model: FittedDipModel,
    },
    Failed {
        #[serde(serialize_with = "serialize_display")]
        error: AnalysisError,
    },
}

impl UnitOutcome {
    pub fn fitted(&self) -> Option<&FittedDipModel> {
        match self {
            UnitOutcome::Fitted { model } => Some(model),
            UnitOutcome::Failed { .. } => None,
        }
    }

    /// Dip center of a successful Gaussian fit.
    pub fn center(&self) -> Option<f64> {
        self.fitted().and_then(FittedDipModel::center)
    }
}

impl From<Result<FittedDipModel, AnalysisError>> for UnitOutcome {
    fn from(r: Result<FittedDipModel, AnalysisError>) -> Self {
        match r {
            Ok(model) => UnitOutcome::Fitted { model },
            Err(error) => UnitOutcome::Failed { error },
        }
    }
}

/// One subject (or model) at one grating frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFit {
    pub grating: f64,
    pub physical: Option<f64>,
    /// Reason from the exclusion policy, if the unit is excluded from slopes.
    pub excluded: Option<String>,
    /// Illusion strength without noise at this grating.
    pub baseline_strength: Option<f64>,
    pub outcome: UnitOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectResult {
    pub subject: String,
    pub units: Vec<UnitFit>,
    /// Correlation of start value and final match across all trials.
    pub start_value_r: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResult {
    pub name: String,
    pub units: Vec<UnitFit>,
    pub slope: Option<f64>,
    pub slope_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanDip {
    pub grating: f64,
    pub physical: f64,
    pub mean_center: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlopeSummary {
    pub from: f64,
    pub to: f64,
    pub physical_ratio: f64,
    pub point: f64,
    pub n_subjects: usize,
    pub subjects: Vec<String>,
    pub ci_level: f64,
    pub ci: Option<(f64, f64)>,
    pub bootstrap_mean: f64,
    pub bootstrap_std: f64,
}

impl SlopeSummary {
    fn from_estimate(est: &SlopeEstimate, ci_level: f64) -> Self {
        let (bootstrap_mean, bootstrap_std) = est.distribution_summary();
        Self {
            from: est.from,
            to: est.to,
            physical_ratio: est.physical_ratio,
            point: est.point,
            n_subjects: est.n_subjects(),
            subjects: est.subjects.clone(),
            ci_level,
            ci: est.confidence_interval(ci_level),
            bootstrap_mean,
            bootstrap_std,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedUnit {
    pub name: String,
    pub grating: Option<f64>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub noise_type: NoiseType,
    pub subjects: Vec<SubjectResult>,
    pub models: Vec<ModelResult>,
    pub dip_table: DipTable,
    pub mean_dips: Vec<MeanDip>,
    pub slopes: Vec<SlopeSummary>,
    pub failures: Vec<FailedUnit>,
    /// Full estimates including the bootstrap distributions.
    #[serde(skip)]
    pub slope_estimates: Vec<SlopeEstimate>,
}

impl ComparisonReport {
    pub fn subject(&self, name: &str) -> Option<&SubjectResult> {
        self.subjects.iter().find(|s| s.subject == name)
    }

    pub fn model(&self, name: &str) -> Option<&ModelResult> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Comparator {
    pub fitter: DipFitter,
    pub freqs: FrequencyTable,
    pub policy: ExclusionPolicy,
    pub bootstrap: BootstrapSettings,
    pub noise_type: NoiseType,
}

impl Comparator {
    pub fn new(fitter: DipFitter, freqs: FrequencyTable, policy: ExclusionPolicy, bootstrap: BootstrapSettings) -> Self {
        Self {
            fitter,
            freqs,
            policy,
            bootstrap,
            noise_type: NoiseType::Global,
        }
    }

    fn unit_gratings(&self, data: &Dataset) -> Vec<f64> {
        let mut gratings = data.unique(|o| o.grating_freq);
        gratings.sort_by(|a, b| a.total_cmp(b));
        gratings
    }

    /// Fit every grating of one subject.
    pub fn fit_subject(&self, subject: &str, data: &Dataset) -> SubjectResult {
        let masked = data.with_noise_type(self.noise_type);
        let unmasked = data.with_noise_type(NoiseType::None);
        let constrained = self.fitter.settings.constrained;

        let units = self
            .unit_gratings(&masked)
            .into_iter()
            .map(|g| {
                let unit_data = masked.filter(|o| o.grating_freq == g);
                let outcome = UnitOutcome::from(self.fitter.fit(&unit_data, constrained));
                if let UnitOutcome::Failed { error } = &outcome {
                    warn!(subject, grating = g, %error, "unit fit failed");
                }
                UnitFit {
                    grating: g,
                    physical: self.freqs.physical(g).ok(),
                    excluded: self.policy.excludes(subject, g).map(|r| {
                        r.reason.clone().unwrap_or_else(|| "excluded".to_string())
                    }),
                    baseline_strength: baseline_strength(&unmasked.filter(|o| o.grating_freq == g)),
                    outcome,
                }
            })
            .collect();

        let (starts, matches): (Vec<f64>, Vec<f64>) = data
            .iter()
            .filter_map(|o| o.match_initial.map(|s| (s, o.match_lum)))
            .unzip();

        SubjectResult {
            subject: subject.to_string(),
            units,
            start_value_r: pearson(&starts, &matches),
        }
    }

    /// Fit one computational model and reduce it to a slope.
    pub fn fit_model(&self, spec: &ModelFitSpec, data: &Dataset) -> ModelResult {
        let masked = data.with_noise_type(self.noise_type).filter(|o| !spec.drops(o.grating_freq));
        let unmasked = data.with_noise_type(NoiseType::None);
        let own_fitter = spec.fit.clone().map(DipFitter::new);
        let fitter = own_fitter.as_ref().unwrap_or(&self.fitter);
        let constrained = fitter.settings.constrained;

        let units: Vec<UnitFit> = self
            .unit_gratings(&masked)
            .into_iter()
            .map(|g| {
                let unit_data = masked.filter(|o| o.grating_freq == g);
                let fit = if spec.forces_flat(g) {
                    fitter.fit_flat(&unit_data)
                } else if spec.skip_selection {
                    fitter.fit_gaussian(&unit_data, constrained)
                } else {
                    fitter.fit(&unit_data, constrained)
                };
                let outcome = UnitOutcome::from(fit);
                if let UnitOutcome::Failed { error } = &outcome {
                    warn!(model = %spec.name, grating = g, %error, "model fit failed");
                }
                UnitFit {
                    grating: g,
                    physical: self.freqs.physical(g).ok(),
                    excluded: None,
                    baseline_strength: baseline_strength(&unmasked.filter(|o| o.grating_freq == g)),
                    outcome,
                }
            })
            .collect();

        let series: Vec<(f64, Option<f64>)> = units.iter().map(|u| (u.grating, u.outcome.center())).collect();
        let (slope, slope_error) = match model_slope(&series, &self.freqs) {
            Ok(s) => (Some(s), None),
            Err(e) => {
                warn!(model = %spec.name, error = %e, "model slope unavailable");
                (None, Some(e.to_string()))
            }
        };
        ModelResult {
            name: spec.name.clone(),
            units,
            slope,
            slope_error,
        }
    }

    /// Fit all subjects concurrently; each subject is an independent unit.
    pub fn fit_subjects(&self, human: &Dataset) -> Vec<SubjectResult> {
        let per_subject = human.by_subject();
        std::thread::scope(|s| {
            let handles: Vec<_> = per_subject
                .iter()
                .map(|(name, data)| (name, s.spawn(move || self.fit_subject(name, data))))
                .collect();
            handles
                .into_iter()
                .map(|(name, h)| match h.join() {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(subject = %name, "subject worker panicked");
                        SubjectResult {
                            subject: name.clone(),
                            units: Vec::new(),
                            start_value_r: None,
                        }
                    }
                })
                .collect()
        })
    }

    /// Dip centers of all subjects on the gratings known to the frequency
    /// table. Flat and failed fits stay empty.
    pub fn dip_table(&self, subjects: &[SubjectResult]) -> DipTable {
        let mut gratings: Vec<f64> = Vec::new();
        for unit in subjects.iter().flat_map(|s| &s.units) {
            if unit.physical.is_some() && !gratings.iter().any(|g| (g - unit.grating).abs() <= LABEL_EPS) {
                gratings.push(unit.grating);
            }
        }
        gratings.sort_by(|a, b| a.total_cmp(b));
        let rows: Vec<Vec<Option<f64>>> = subjects
            .iter()
            .map(|subject| {
                gratings
                    .iter()
                    .map(|&g| {
                        subject
                            .units
                            .iter()
                            .find(|u| u.physical.is_some() && (u.grating - g).abs() <= LABEL_EPS)
                            .and_then(|u| u.outcome.center())
                    })
                    .collect()
            })
            .collect();
        let mut table = DipTable::new(gratings);
        for (subject, row) in subjects.iter().zip(&rows) {
            table.push_row(&subject.subject, row);
        }
        table
    }

    pub fn run(&self, human: &Dataset, models: &[(ModelFitSpec, Dataset)]) -> ComparisonReport {
        info!(
            subjects = human.subjects().len(),
            models = models.len(),
            noise_type = %self.noise_type,
            "running comparison"
        );
        let subjects = self.fit_subjects(human);
        let models: Vec<ModelResult> = models.iter().map(|(spec, data)| self.fit_model(spec, data)).collect();

        let mut failures = Vec::new();
        let all_units = subjects
            .iter()
            .map(|s| (&s.subject, &s.units))
            .chain(models.iter().map(|m| (&m.name, &m.units)));
        for (name, units) in all_units {
            for unit in units {
                if let UnitOutcome::Failed { error } = &unit.outcome {
                    failures.push(FailedUnit {
                        name: name.clone(),
                        grating: Some(unit.grating),
                        error: error.to_string(),
                    });
                }
                if unit.physical.is_none() {
                    failures.push(FailedUnit {
                        name: name.clone(),
                        grating: Some(unit.grating),
                        error: AnalysisError::UnknownGrating(unit.grating).to_string(),
                    });
                }
            }
        }

        let dip_table = self.dip_table(&subjects);
        let mean_dips = dip_table
            .column_means(&self.policy)
            .into_iter()
            .filter_map(|(g, m)| {
                let physical = self.freqs.physical(g).ok()?;
                Some(MeanDip {
                    grating: g,
                    physical,
                    mean_center: m,
                })
            })
            .collect();

        let mut slope_estimates = Vec::new();
        for result in estimate_slope(&dip_table, &self.freqs, &self.policy, &self.bootstrap) {
            match result {
                Ok(est) => slope_estimates.push(est),
                Err(e) => {
                    warn!(error = %e, "local slope unavailable");
                    failures.push(FailedUnit {
                        name: "slope".to_string(),
                        grating: None,
                        error: e.to_string(),
                    });
                }
            }
        }
        let slopes = slope_estimates
            .iter()
            .map(|e| SlopeSummary::from_estimate(e, self.bootstrap.ci_level))
            .collect();

        info!(failures = failures.len(), "comparison finished");
        ComparisonReport {
            noise_type: self.noise_type,
            subjects,
            models,
            dip_table,
            mean_dips,
            slopes,
            failures,
            slope_estimates,
        }
    }
}
