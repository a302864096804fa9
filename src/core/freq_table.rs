//! Nominal grating label → physical cycles/degree.
//!
//! Stimuli are labelled by nominal frequency (.1, .2, .4, ...) but the
//! displayed gratings differ slightly; slopes are always computed on the
//! physical axis.

use serde::{Deserialize, Serialize};

use crate::core::error::{AnalysisError, Result};

const LABEL_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    pub nominal: f64,
    pub physical: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    entries: Vec<FrequencyEntry>,
}

impl FrequencyTable {
    pub fn new(entries: Vec<FrequencyEntry>) -> Self {
        Self { entries }
    }

    /// Gratings used in the noise-masking experiments.
    pub fn standard() -> Self {
        Self::new(Self::standard_entries())
    }

    pub fn standard_entries() -> Vec<FrequencyEntry> {
        [(0.1, 0.103), (0.2, 0.196), (0.4, 0.391), (0.8, 0.782), (1.6, 1.564)]
            .into_iter()
            .map(|(nominal, physical)| FrequencyEntry { nominal, physical })
            .collect()
    }

    pub fn entries(&self) -> &[FrequencyEntry] {
        &self.entries
    }

    pub fn physical(&self, nominal: f64) -> Result<f64> {
        self.entries
            .iter()
            .find(|e| (e.nominal - nominal).abs() <= LABEL_EPS)
            .map(|e| e.physical)
            .ok_or(AnalysisError::UnknownGrating(nominal))
    }

    /// Sort nominal labels by their physical frequency. Unknown labels fail.
    pub fn sort_by_physical(&self, nominals: &[f64]) -> Result<Vec<(f64, f64)>> {
        let mut out = nominals
            .iter()
            .map(|&n| self.physical(n).map(|p| (n, p)))
            .collect::<Result<Vec<_>>>()?;
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }
}

impl Default for FrequencyTable {
    fn default() -> Self {
        Self::standard()
    }
}
