//! core/illusion.rs
//! Paired increment/decrement differences.
//!
//! Illusion strength at one noise frequency and repetition is the match
//! luminance of the increment patch minus that of the decrement patch.
//! Pairing is positional: the r-th increment repetition is paired with the
//! r-th decrement repetition, in the order the repetitions first appear.
//! Rep indices are never sorted or joined. When the two polarities list
//! their reps in different orders (increments as 0, 25, 1, 26, ... and
//! decrements as 25, 0, 26, 1, ...), the individual cells differ from a
//! rep-sorted pairing and so do the fit's chi-square and standard errors.
//! Row means, and therefore the model choice and fitted centers, do not.
//! Sort the dataset by `rep` before building the matrix to pair by index.

use serde::Serialize;

use crate::core::dataset::Dataset;
use crate::core::error::{AnalysisError, Result};
use crate::core::observation::Polarity;

/// `[F × R]` matrix, row-major. Rows follow first-seen noise-frequency order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IllusionStrengthMatrix {
    noise_freqs: Vec<f64>,
    n_reps: usize,
    values: Vec<f64>,
}

impl IllusionStrengthMatrix {
    #[inline]
    pub fn n_freqs(&self) -> usize {
        self.noise_freqs.len()
    }

    #[inline]
    pub fn n_reps(&self) -> usize {
        self.n_reps
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_freqs(), self.n_reps)
    }

    pub fn noise_freqs(&self) -> &[f64] {
        &self.noise_freqs
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n_reps..(i + 1) * self.n_reps]
    }

    pub fn get(&self, freq_idx: usize, rep: usize) -> f64 {
        self.values[freq_idx * self.n_reps + rep]
    }

    pub fn row_means(&self) -> Vec<f64> {
        (0..self.n_freqs())
            .map(|i| {
                let row = self.row(i);
                row.iter().sum::<f64>() / row.len().max(1) as f64
            })
            .collect()
    }

    /// Every cell as `(noise_freq, strength)`, row by row.
    pub fn entries(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.noise_freqs.iter().enumerate().flat_map(move |(i, &f)| {
            self.row(i).iter().map(move |&v| (f, v))
        })
    }

    /// Copy with rows in ascending noise-frequency order.
    pub fn sorted(&self) -> Self {
        let mut order: Vec<usize> = (0..self.n_freqs()).collect();
        order.sort_by(|&a, &b| self.noise_freqs[a].total_cmp(&self.noise_freqs[b]));
        let mut values = Vec::with_capacity(self.values.len());
        for &i in &order {
            values.extend_from_slice(self.row(i));
        }
        Self {
            noise_freqs: order.iter().map(|&i| self.noise_freqs[i]).collect(),
            n_reps: self.n_reps,
            values,
        }
    }
}

/// Per-repetition match luminances of one polarity, in first-seen rep order.
fn match_by_rep(data: &Dataset, polarity: Polarity) -> Vec<f64> {
    data.with_polarity(polarity)
        .group_by(|o| o.rep)
        .into_iter()
        .flat_map(|(_, by_rep)| by_rep.match_lums())
        .collect()
}

/// Build the illusion-strength matrix for one subject and one noise type.
///
/// The caller filters the dataset; mixed subjects or noise types are not
/// detected here and would silently pool conditions.
pub fn compute_illusion_strength(data: &Dataset) -> Result<IllusionStrengthMatrix> {
    if data.is_empty() {
        return Err(AnalysisError::EmptyDataset);
    }
    let mut noise_freqs = Vec::new();
    let mut values = Vec::new();
    let mut n_reps: Option<usize> = None;

    for (noise_freq, by_nf) in data.group_by(|o| o.noise_freq) {
        let increments = match_by_rep(&by_nf, Polarity::Increment);
        let decrements = match_by_rep(&by_nf, Polarity::Decrement);
        if increments.len() != decrements.len() {
            return Err(AnalysisError::ShapeMismatch {
                noise_freq,
                increments: increments.len(),
                decrements: decrements.len(),
            });
        }
        match n_reps {
            None => n_reps = Some(increments.len()),
            Some(expected) if expected != increments.len() => {
                return Err(AnalysisError::RaggedMatrix {
                    noise_freq,
                    found: increments.len(),
                    expected,
                });
            }
            Some(_) => {}
        }
        values.extend(increments.iter().zip(&decrements).map(|(inc, dec)| inc - dec));
        noise_freqs.push(noise_freq);
    }

    Ok(IllusionStrengthMatrix {
        noise_freqs,
        n_reps: n_reps.unwrap_or(0),
        values,
    })
}

/// Illusion strength without noise: mean increment match minus mean
/// decrement match. `None` when either polarity is missing.
pub fn baseline_strength(data: &Dataset) -> Option<f64> {
    let mean = |xs: Vec<f64>| {
        (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64)
    };
    let inc = mean(data.with_polarity(Polarity::Increment).match_lums())?;
    let dec = mean(data.with_polarity(Polarity::Decrement).match_lums())?;
    Some(inc - dec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observation::{NoiseType, Observation};

    fn trial(noise_freq: f64, polarity: Polarity, rep: u32, match_lum: f64) -> Observation {
        Observation {
            subject: "s1".into(),
            trial: 0,
            noise_type: NoiseType::Global,
            noise_freq,
            polarity,
            grating_freq: 0.4,
            grating_contrast: 0.2,
            rep,
            test_lum: 44.0,
            match_lum,
            match_initial: None,
            patch_visible: None,
        }
    }

    #[test]
    fn rows_follow_first_seen_frequency() {
        let ds = Dataset::new(vec![
            trial(3.0, Polarity::Increment, 0, 10.0),
            trial(3.0, Polarity::Decrement, 0, 4.0),
            trial(1.0, Polarity::Decrement, 0, 2.0),
            trial(1.0, Polarity::Increment, 0, 9.0),
        ]);
        let m = compute_illusion_strength(&ds).unwrap();
        assert_eq!(m.noise_freqs(), &[3.0, 1.0]);
        assert_eq!(m.row(0), &[6.0]);
        assert_eq!(m.row(1), &[7.0]);

        let s = m.sorted();
        assert_eq!(s.noise_freqs(), &[1.0, 3.0]);
        assert_eq!(s.row(0), &[7.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let ds = Dataset::new(vec![
            trial(1.0, Polarity::Increment, 0, 10.0),
            trial(1.0, Polarity::Decrement, 0, 4.0),
            trial(1.0, Polarity::Increment, 1, 10.0),
            trial(1.0, Polarity::Decrement, 1, 4.0),
            trial(2.0, Polarity::Increment, 0, 10.0),
            trial(2.0, Polarity::Decrement, 0, 4.0),
        ]);
        assert_eq!(
            compute_illusion_strength(&ds),
            Err(AnalysisError::RaggedMatrix {
                noise_freq: 2.0,
                found: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn baseline_strength_uses_means() {
        let ds = Dataset::new(vec![
            trial(0.0, Polarity::Increment, 0, 50.0),
            trial(0.0, Polarity::Increment, 1, 52.0),
            trial(0.0, Polarity::Decrement, 0, 40.0),
        ]);
        assert_eq!(baseline_strength(&ds), Some(11.0));
        assert_eq!(
            baseline_strength(&ds.with_polarity(Polarity::Increment)),
            None
        );
    }
}
