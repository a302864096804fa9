//! core/error.rs
//! Failures of a single analysis unit.
//!
//! A "unit" is one subject (or model) at one grating frequency. Every variant
//! here aborts that unit only; the comparator records it and moves on.
//! A flat fit (no measurable dip) is not an error and never appears here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Increment and decrement trials at one noise frequency do not pair up.
    #[error(
        "shape mismatch at noise frequency {noise_freq}: {increments} increment vs {decrements} decrement repetitions"
    )]
    ShapeMismatch {
        noise_freq: f64,
        increments: usize,
        decrements: usize,
    },

    /// Rows of the illusion-strength matrix have different repetition counts.
    #[error("ragged matrix: noise frequency {noise_freq} has {found} repetitions, expected {expected}")]
    RaggedMatrix {
        noise_freq: f64,
        found: usize,
        expected: usize,
    },

    #[error("need at least 2 distinct noise frequencies, found {found}")]
    InsufficientFrequencies { found: usize },

    #[error("noise frequency {0} is not positive; log-frequency model is undefined")]
    NonPositiveFrequency(f64),

    #[error("fit did not converge after {evaluations} evaluations: {reason}")]
    FitDivergence { evaluations: usize, reason: String },

    #[error("grating frequency {0} is not in the frequency table")]
    UnknownGrating(f64),

    #[error("no usable dip-center ratios between gratings {from} and {to}")]
    NoUsableRatios { from: f64, to: f64 },

    #[error("dataset is empty")]
    EmptyDataset,
}
