//! One lightness-matching trial.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Spatial layout of the band-limited noise mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseType {
    None,
    Global,
    Horizontal,
    Vertical,
}

impl NoiseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseType::None => "none",
            NoiseType::Global => "global",
            NoiseType::Horizontal => "horizontal",
            NoiseType::Vertical => "vertical",
        }
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(NoiseType::None),
            "global" => Ok(NoiseType::Global),
            "horizontal" => Ok(NoiseType::Horizontal),
            "vertical" => Ok(NoiseType::Vertical),
            other => Err(format!("unknown noise type `{other}`")),
        }
    }
}

/// Coaxial polarity of the test patch. Increment patches sit on the dark
/// coaxial bar (`coaxial_lum = -1`), decrement patches on the light one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Polarity {
    Increment,
    Decrement,
}

impl Polarity {
    /// Map the raw `coaxial_lum` column (±1) to a polarity.
    pub fn from_coaxial(coaxial_lum: f64) -> Option<Self> {
        if coaxial_lum < 0.0 {
            Some(Polarity::Increment)
        } else if coaxial_lum > 0.0 {
            Some(Polarity::Decrement)
        } else {
            None
        }
    }

    pub fn coaxial_lum(&self) -> i8 {
        match self {
            Polarity::Increment => -1,
            Polarity::Decrement => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observer initials or computational model name.
    pub subject: String,
    pub trial: u32,
    pub noise_type: NoiseType,
    /// Noise mask center frequency in cycles/degree; 0 for no noise.
    pub noise_freq: f64,
    pub polarity: Polarity,
    /// Nominal grating frequency label (e.g. 0.4), not the physical value.
    pub grating_freq: f64,
    pub grating_contrast: f64,
    pub rep: u32,
    pub test_lum: f64,
    pub match_lum: f64,
    /// Luminance the adjustment started from, when recorded.
    pub match_initial: Option<f64>,
    pub patch_visible: Option<bool>,
}

impl Observation {
    pub fn is_increment(&self) -> bool {
        self.polarity == Polarity::Increment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_follows_coaxial_sign() {
        assert_eq!(Polarity::from_coaxial(-1.0), Some(Polarity::Increment));
        assert_eq!(Polarity::from_coaxial(1.0), Some(Polarity::Decrement));
        assert_eq!(Polarity::from_coaxial(0.0), None);
        assert_eq!(Polarity::Increment.coaxial_lum(), -1);
    }

    #[test]
    fn noise_type_parses_case_insensitively() {
        assert_eq!("Global".parse::<NoiseType>(), Ok(NoiseType::Global));
        assert_eq!(" none ".parse::<NoiseType>(), Ok(NoiseType::None));
        assert!("diagonal".parse::<NoiseType>().is_err());
    }
}
