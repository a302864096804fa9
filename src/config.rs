use crate::core::compare::ModelFitSpec;
use crate::core::dip_model::FitSettings;
use crate::core::exclusion::{ExclusionPolicy, ExclusionRule};
use crate::core::freq_table::{FrequencyEntry, FrequencyTable};
use crate::core::observation::NoiseType;
use crate::core::slope::BootstrapSettings;
use crate::store::LuminanceScale;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    #[serde(default = "DataConfig::default_human_dir")]
    pub human_dir: String,
    #[serde(default = "DataConfig::default_model_dir")]
    pub model_dir: String,
    /// Display encoding to cd/m² for human observers.
    #[serde(default = "DataConfig::default_luminance_scale")]
    pub luminance_scale: f64,
    #[serde(default = "DataConfig::default_noise_type")]
    pub noise_type: NoiseType,
}

impl DataConfig {
    fn default_human_dir() -> String {
        "exp_data".to_string()
    }
    fn default_model_dir() -> String {
        "data".to_string()
    }
    fn default_luminance_scale() -> f64 {
        88.0
    }
    fn default_noise_type() -> NoiseType {
        NoiseType::Global
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            human_dir: Self::default_human_dir(),
            model_dir: Self::default_model_dir(),
            luminance_scale: Self::default_luminance_scale(),
            noise_type: Self::default_noise_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub scale: LuminanceScale,
    #[serde(default)]
    pub drop_gratings: Vec<f64>,
    #[serde(default)]
    pub force_flat: bool,
    #[serde(default)]
    pub force_flat_gratings: Vec<f64>,
    #[serde(default)]
    pub skip_selection: bool,
    /// Overrides `[fit]` for this model only.
    #[serde(default)]
    pub fit: Option<FitSettings>,
}

impl ModelConfig {
    pub fn fit_spec(&self) -> ModelFitSpec {
        ModelFitSpec {
            name: self.name.clone(),
            drop_gratings: self.drop_gratings.clone(),
            force_flat: self.force_flat,
            force_flat_gratings: self.force_flat_gratings.clone(),
            skip_selection: self.skip_selection,
            fit: self.fit.clone(),
        }
    }

    fn default_models() -> Vec<Self> {
        let model = |name: &str, scale: LuminanceScale| Self {
            name: name.to_string(),
            scale,
            drop_gratings: vec![0.2],
            force_flat: false,
            force_flat_gratings: Vec::new(),
            skip_selection: true,
            fit: Some(FitSettings::model_defaults()),
        };
        vec![
            model("biwam", LuminanceScale::fixed(88.0)),
            model("flodog", LuminanceScale::reference_effect()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub fit: FitSettings,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    #[serde(default = "FrequencyTable::standard_entries")]
    pub frequencies: Vec<FrequencyEntry>,
    #[serde(default = "ExclusionPolicy::standard_rules")]
    pub exclusions: Vec<ExclusionRule>,
    #[serde(default = "ModelConfig::default_models")]
    pub models: Vec<ModelConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            fit: FitSettings::default(),
            bootstrap: BootstrapSettings::default(),
            frequencies: FrequencyTable::standard_entries(),
            exclusions: ExclusionPolicy::standard_rules(),
            models: ModelConfig::default_models(),
        }
    }
}

impl AnalysisConfig {
    pub fn frequency_table(&self) -> FrequencyTable {
        FrequencyTable::new(self.frequencies.clone())
    }

    pub fn exclusion_policy(&self) -> ExclusionPolicy {
        ExclusionPolicy::new(self.exclusions.clone())
    }

    fn round_f64(x: f64) -> f64 {
        (x * 1_000_000.0).round() / 1_000_000.0
    }

    fn format_f64_compact(x: f64) -> String {
        let mut s = format!("{:.6}", x);
        while s.contains('.') && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        if s.is_empty() { "0".to_string() } else { s }
    }

    fn rounded(mut self) -> Self {
        self.data.luminance_scale = Self::round_f64(self.data.luminance_scale);
        self.fit.width_init = Self::round_f64(self.fit.width_init);
        for fit in self.models.iter_mut().filter_map(|m| m.fit.as_mut()) {
            fit.width_init = Self::round_f64(fit.width_init);
        }
        self.bootstrap.ci_level = Self::round_f64(self.bootstrap.ci_level);
        for entry in &mut self.frequencies {
            entry.physical = Self::round_f64(entry.physical);
        }
        self
    }

    /// Comment out every line so the file documents the defaults without
    /// pinning them.
    fn commented(text: &str) -> String {
        let mut commented = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                commented.push('\n');
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') && !trimmed.contains('=') {
                commented.push_str("# ");
                commented.push_str(line);
                commented.push('\n');
            } else {
                let mut out_line = line.to_string();
                if let Some((lhs, rhs)) = line.split_once('=') {
                    let rhs_trim = rhs.trim();
                    let has_decimal = rhs_trim.contains('.');
                    if has_decimal && !rhs_trim.contains('"') && !rhs_trim.starts_with('[') {
                        if let Ok(val) = rhs_trim.parse::<f64>() {
                            if val.abs() >= 1e-6 {
                                let mut formatted = Self::format_f64_compact(val);
                                if !formatted.contains('.') {
                                    formatted.push_str(".0");
                                }
                                out_line = format!("{} = {}", lhs.trim(), formatted);
                            }
                        }
                    }
                }
                commented.push_str("# ");
                commented.push_str(&out_line);
                commented.push('\n');
            }
        }
        commented
    }

    pub fn load_or_default(path: &str) -> Self {
        let path_obj = Path::new(path);
        if path_obj.exists() {
            match fs::read_to_string(path_obj) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(cfg) => return cfg,
                    Err(err) => {
                        warn!("Failed to parse config {path}: {err}. Using defaults.");
                    }
                },
                Err(err) => {
                    warn!("Failed to read config {path}: {err}. Using defaults.");
                }
            }
            return Self::default();
        }

        // File does not exist: write defaults and return them.
        let default_cfg = Self::default().rounded();
        match toml::to_string_pretty(&default_cfg) {
            Ok(text) => {
                if let Err(err) = fs::write(path_obj, Self::commented(&text)) {
                    warn!("Failed to write default config to {path}: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize default config ({err}); continuing with defaults"),
        }
        default_cfg
    }
}
