//! Small descriptive statistics used across the analysis.

use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean and sample standard deviation (n − 1).
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let Some(m) = mean(values) else {
        return (0.0, 0.0);
    };
    if values.len() < 2 {
        return (m, 0.0);
    }
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() as f64 - 1.0);
    (m, var.sqrt())
}

/// Mean over the present values; `None` when every value is missing.
pub fn nan_mean(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.into_iter().flatten().filter(|v| v.is_finite()).collect();
    mean(&present)
}

/// Linear-interpolated quantile, `q` in `[0, 1]`. Sorts `values` in place.
pub fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let q = q.clamp(0.0, 1.0);
    let pos = q * (values.len().saturating_sub(1) as f64);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        values[lo]
    } else {
        let t = pos - lo as f64;
        values[lo] * (1.0 - t) + values[hi] * t
    }
}

/// Pearson correlation; `None` for fewer than 2 pairs or zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
    }
    let denom = (sxx * syy).sqrt();
    (denom > 0.0).then(|| sxy / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantile_interpolates() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0];
        assert_relative_eq!(quantile(&mut v, 0.5), 2.5);
        assert_relative_eq!(quantile(&mut v, 0.0), 1.0);
        assert_relative_eq!(quantile(&mut v, 1.0), 4.0);
        assert!(quantile(&mut [], 0.5).is_nan());
    }

    #[test]
    fn nan_mean_skips_missing() {
        assert_eq!(nan_mean([Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(nan_mean([None, None]), None);
        assert_eq!(nan_mean([Some(f64::NAN), Some(4.0)]), Some(4.0));
    }

    #[test]
    fn pearson_perfect_and_degenerate() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(pearson(&xs, &[2.0, 4.0, 6.0, 8.0]).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pearson(&xs, &[8.0, 6.0, 4.0, 2.0]).unwrap(), -1.0, epsilon = 1e-12);
        assert_eq!(pearson(&xs, &[1.0, 1.0, 1.0, 1.0]), None);
    }

    #[test]
    fn mean_std_sample() {
        let (m, s) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(m, 5.0);
        assert_relative_eq!(s, (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
    }
}
