//! core/lsq.rs: Bounded Levenberg–Marquardt least squares.
//!
//! Bounds are enforced by reparameterisation: each bounded parameter is
//! optimised in an unconstrained internal coordinate and mapped back with a
//! sine (two-sided) or square-root (one-sided) transform. The optimiser only
//! ever sees the internal coordinates, so every trial point is feasible.
//!
//! Problem sizes here are tiny (≤ 4 parameters, a few hundred residuals), so
//! each step solves the damped normal equations with a Cholesky factor.

use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::debug;

use crate::core::error::{AnalysisError, Result};

const FD_STEP: f64 = 1.490_116_119_384_765_6e-8; // sqrt(f64::EPSILON)
const LAMBDA_MAX: f64 = 1e16;
const DIAG_FLOOR: f64 = 1e-12;
const RANK_RTOL: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Param {
    pub fn free(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value,
            min: None,
            max: None,
        }
    }

    pub fn bounded(name: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            value,
            min: Some(min.min(max)),
            max: Some(max.max(min)),
        }
    }

    fn clamp(&self, x: f64) -> f64 {
        let x = self.min.map_or(x, |lo| x.max(lo));
        self.max.map_or(x, |hi| x.min(hi))
    }

    fn to_internal(&self, x: f64) -> f64 {
        let x = self.clamp(x);
        match (self.min, self.max) {
            (Some(lo), Some(hi)) if hi > lo => (2.0 * (x - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin(),
            (Some(_), Some(_)) => 0.0,
            (Some(lo), None) => ((x - lo + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            (None, Some(hi)) => ((hi - x + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            (None, None) => x,
        }
    }

    fn to_external(&self, u: f64) -> f64 {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => lo + (u.sin() + 1.0) * (hi - lo) / 2.0,
            (Some(lo), None) => lo - 1.0 + (u * u + 1.0).sqrt(),
            (None, Some(hi)) => hi + 1.0 - (u * u + 1.0).sqrt(),
            (None, None) => u,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LsqOptions {
    pub max_evaluations: usize,
    /// Relative reduction of the sum of squares below which we stop.
    pub ftol: f64,
    /// Relative step size below which we stop.
    pub xtol: f64,
    /// Gradient infinity-norm below which we stop.
    pub gtol: f64,
}

impl Default for LsqOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LsqSolution {
    /// Best-fit parameter values, in the order the parameters were given.
    pub values: Vec<f64>,
    pub chi_square: f64,
    pub evaluations: usize,
    pub n_data: usize,
    /// Standard errors from `(JᵀJ)⁻¹ · χ²/(m − n)`; `None` if singular.
    pub stderr: Option<Vec<f64>>,
}

impl LsqSolution {
    pub fn reduced_chi_square(&self) -> f64 {
        let dof = self.n_data.saturating_sub(self.values.len());
        if dof == 0 {
            f64::NAN
        } else {
            self.chi_square / dof as f64
        }
    }
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

fn external(params: &[Param], u: &[f64]) -> Vec<f64> {
    params.iter().zip(u).map(|(p, &ui)| p.to_external(ui)).collect()
}

/// Forward-difference Jacobian of the residuals with respect to `x`.
fn jacobian<F>(residuals: &F, x: &[f64], r0: &[f64], map: impl Fn(&[f64]) -> Vec<f64>) -> DMatrix<f64>
where
    F: Fn(&[f64], &mut [f64]),
{
    let m = r0.len();
    let n = x.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut r1 = vec![0.0; m];
    for j in 0..n {
        let h = FD_STEP * x[j].abs().max(1.0);
        let mut xj = x.to_vec();
        xj[j] += h;
        residuals(&map(&xj), &mut r1);
        for i in 0..m {
            jac[(i, j)] = (r1[i] - r0[i]) / h;
        }
    }
    jac
}

/// `(JᵀJ)⁻¹`, or `None` when `JᵀJ` is rank deficient at working precision.
pub(crate) fn covariance(jtj: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let sv = jtj.clone().svd(false, false).singular_values;
    if !(sv.min() > sv.max() * RANK_RTOL) {
        return None;
    }
    jtj.clone().try_inverse()
}

fn standard_errors<F>(params: &[Param], residuals: &F, x: &[f64], n_data: usize) -> Option<Vec<f64>>
where
    F: Fn(&[f64], &mut [f64]),
{
    let n = params.len();
    if n_data <= n {
        return None;
    }
    let mut r0 = vec![0.0; n_data];
    residuals(x, &mut r0);
    let jac = jacobian(residuals, x, &r0, |v| v.to_vec());
    let cov = covariance(&(jac.transpose() * &jac))?;
    let redchi = sum_sq(&r0) / (n_data - n) as f64;
    cov.diagonal()
        .iter()
        .map(|&c| {
            let var = c * redchi;
            (var.is_finite() && var >= 0.0).then(|| var.sqrt())
        })
        .collect()
}

/// Minimise `Σ rᵢ(x)²`. `residuals(x, out)` writes `n_data` residuals for the
/// external parameter vector `x`.
pub fn minimize<F>(params: &[Param], n_data: usize, residuals: F, opts: &LsqOptions) -> Result<LsqSolution>
where
    F: Fn(&[f64], &mut [f64]),
{
    let n = params.len();
    if n_data < n {
        return Err(AnalysisError::FitDivergence {
            evaluations: 0,
            reason: format!("{n_data} data points for {n} parameters"),
        });
    }

    let map = |u: &[f64]| external(params, u);
    let mut u: Vec<f64> = params.iter().map(|p| p.to_internal(p.value)).collect();
    let mut r = vec![0.0; n_data];
    residuals(&map(&u), &mut r);
    let mut evaluations = 1usize;
    let mut sse = sum_sq(&r);
    if !sse.is_finite() {
        return Err(AnalysisError::FitDivergence {
            evaluations,
            reason: "non-finite residuals at initial values".into(),
        });
    }

    let mut lambda: Option<f64> = None;
    let mut r_trial = vec![0.0; n_data];

    'outer: loop {
        if sse == 0.0 {
            break;
        }
        let jac = jacobian(&residuals, &u, &r, &map);
        evaluations += n;
        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let jtr = &jt * DVector::from_column_slice(&r);
        if jtr.amax() <= opts.gtol {
            break;
        }
        let diag = jtj.diagonal().map(|d| d.max(DIAG_FLOOR));
        let mut lam = lambda.unwrap_or_else(|| 1e-3 * diag.max());
        let rhs = -&jtr;

        loop {
            if evaluations >= opts.max_evaluations {
                return Err(AnalysisError::FitDivergence {
                    evaluations,
                    reason: "evaluation budget exhausted".into(),
                });
            }
            let damped = &jtj + DMatrix::from_diagonal(&(&diag * lam));
            let delta = Cholesky::new(damped)
                .map(|c| c.solve(&rhs))
                .filter(|d| d.iter().all(|v| v.is_finite()));
            let Some(delta) = delta else {
                lam *= 10.0;
                if lam > LAMBDA_MAX {
                    break 'outer;
                }
                continue;
            };

            let u_trial: Vec<f64> = u.iter().zip(delta.iter()).map(|(ui, di)| ui + di).collect();
            residuals(&map(&u_trial), &mut r_trial);
            evaluations += 1;
            let sse_trial = sum_sq(&r_trial);

            if sse_trial.is_finite() && sse_trial < sse {
                let reduction = (sse - sse_trial) / sse;
                let step = delta.norm();
                let scale = u.iter().map(|v| v * v).sum::<f64>().sqrt();
                u = u_trial;
                std::mem::swap(&mut r, &mut r_trial);
                sse = sse_trial;
                lambda = Some((lam / 10.0).max(1e-15));
                if reduction <= opts.ftol || step <= opts.xtol * (scale + opts.xtol) {
                    break 'outer;
                }
                break;
            }

            lam *= 10.0;
            if lam > LAMBDA_MAX {
                // No descent direction left at working precision.
                break 'outer;
            }
        }
    }

    let values = map(&u);
    debug!(evaluations, chi_square = sse, "least-squares converged");
    let stderr = standard_errors(params, &residuals, &values, n_data);
    Ok(LsqSolution {
        values,
        chi_square: sse,
        evaluations,
        n_data,
        stderr,
    })
}
