//! Reading lightness-matching result tables from disk.
//!
//! Human data live in `<dir>/<subject>/<grating>/<contrast>/<file>`; every
//! file is a header row followed by one row per trial, separated by
//! whitespace or commas. Model outputs are a single `<dir>/<name>.csv`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::dataset::Dataset;
use crate::core::observation::{NoiseType, Observation, Polarity};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("{}: no header row", path.display())]
    MissingHeader { path: PathBuf },

    #[error("{}: missing column `{column}`", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{}:{line}: expected {expected} fields, found {found}", path.display())]
    FieldCount {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{}:{line}: bad value `{value}` in column `{column}`", path.display())]
    BadValue {
        path: PathBuf,
        line: usize,
        column: &'static str,
        value: String,
    },

    #[error("no result files under {}", .0.display())]
    NoData(PathBuf),

    #[error("model {name}: no reference effect at grating {grating} without noise")]
    NoReferenceEffect { name: String, grating: f64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// How raw model luminances are brought to cd/m².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LuminanceScale {
    Fixed {
        factor: f64,
    },
    /// Rescale so that the no-noise illusion at `grating` equals `target`.
    ReferenceEffect {
        grating: f64,
        noise_type: NoiseType,
        target: f64,
    },
}

impl LuminanceScale {
    pub fn fixed(factor: f64) -> Self {
        LuminanceScale::Fixed { factor }
    }

    pub fn reference_effect() -> Self {
        LuminanceScale::ReferenceEffect {
            grating: 0.4,
            noise_type: NoiseType::None,
            target: 3.0,
        }
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    if line.contains(',') {
        line.split(',').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    }
}

struct Columns {
    index: HashMap<String, usize>,
    width: usize,
}

impl Columns {
    fn from_header(header: &str) -> Self {
        let fields = split_fields(header);
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_ascii_lowercase(), i))
            .collect();
        Self {
            index,
            width: fields.len(),
        }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    fn require(&self, column: &'static str, path: &Path) -> StoreResult<usize> {
        self.position(column).ok_or_else(|| StoreError::MissingColumn {
            path: path.to_path_buf(),
            column,
        })
    }
}

/// One data row with the location needed for error messages.
struct Row<'a> {
    fields: Vec<&'a str>,
    path: &'a Path,
    line: usize,
}

impl Row<'_> {
    fn bad(&self, column: &'static str, value: &str) -> StoreError {
        StoreError::BadValue {
            path: self.path.to_path_buf(),
            line: self.line,
            column,
            value: value.to_string(),
        }
    }

    fn f64(&self, idx: usize, column: &'static str) -> StoreResult<f64> {
        let raw = self.fields[idx];
        raw.parse::<f64>().map_err(|_| self.bad(column, raw))
    }

    fn opt_f64(&self, idx: Option<usize>, column: &'static str) -> StoreResult<Option<f64>> {
        idx.map(|i| self.f64(i, column)).transpose()
    }

    /// Integer columns are sometimes written as `3.0`.
    fn count(&self, idx: usize, column: &'static str) -> StoreResult<u32> {
        let raw = self.fields[idx];
        if let Ok(v) = raw.parse::<u32>() {
            return Ok(v);
        }
        match raw.parse::<f64>() {
            Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(v as u32),
            _ => Err(self.bad(column, raw)),
        }
    }

    fn flag(&self, idx: usize, column: &'static str) -> StoreResult<bool> {
        let raw = self.fields[idx];
        match raw.to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" => Ok(true),
            "0" | "0.0" | "false" => Ok(false),
            _ => Err(self.bad(column, raw)),
        }
    }
}

/// Parse one result table. `path` is only used in error messages.
pub fn parse_table(text: &str, subject: &str, path: &Path) -> StoreResult<Vec<Observation>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));
    let Some((_, header)) = lines.next() else {
        return Err(StoreError::MissingHeader {
            path: path.to_path_buf(),
        });
    };
    let cols = Columns::from_header(header);

    let noise_type = cols.require("noise_type", path)?;
    let coaxial = cols.require("coaxial_lum", path)?;
    let match_lum = cols.require("match_lum", path)?;
    let grating_freq = cols.require("grating_freq", path)?;
    let noise_freq = cols.require("noise_freq", path)?;
    let rep = cols.require("rep", path)?;
    let trial = cols.position("trial");
    let test_lum = cols.position("test_lum");
    let contrast = cols.position("grating_contrast");
    let initial = cols.position("match_initial");
    let visible = cols.position("patch_visible");

    let mut out = Vec::new();
    for (line, text) in lines {
        let fields = split_fields(text);
        if fields.len() != cols.width {
            return Err(StoreError::FieldCount {
                path: path.to_path_buf(),
                line,
                expected: cols.width,
                found: fields.len(),
            });
        }
        let row = Row { fields, path, line };

        let raw_noise = row.fields[noise_type];
        let noise_type: NoiseType = raw_noise.parse().map_err(|_| row.bad("noise_type", raw_noise))?;
        let raw_coaxial = row.fields[coaxial];
        let polarity = Polarity::from_coaxial(row.f64(coaxial, "coaxial_lum")?)
            .ok_or_else(|| row.bad("coaxial_lum", raw_coaxial))?;

        out.push(Observation {
            subject: subject.to_string(),
            trial: match trial {
                Some(i) => row.count(i, "trial")?,
                None => out.len() as u32,
            },
            noise_type,
            noise_freq: row.f64(noise_freq, "noise_freq")?,
            polarity,
            grating_freq: row.f64(grating_freq, "grating_freq")?,
            grating_contrast: row.opt_f64(contrast, "grating_contrast")?.unwrap_or(f64::NAN),
            rep: row.count(rep, "rep")?,
            test_lum: row.opt_f64(test_lum, "test_lum")?.unwrap_or(f64::NAN),
            match_lum: row.f64(match_lum, "match_lum")?,
            match_initial: row.opt_f64(initial, "match_initial")?,
            patch_visible: visible.map(|i| row.flag(i, "patch_visible")).transpose()?,
        });
    }
    Ok(out)
}

fn read_table(path: &Path, subject: &str) -> StoreResult<Vec<Observation>> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_table(&text, subject, path)
}

/// Multiply every luminance column by `factor`.
fn scale_luminance(obs: &mut Observation, factor: f64) {
    obs.match_lum *= factor;
    obs.test_lum *= factor;
    if let Some(m) = obs.match_initial.as_mut() {
        *m *= factor;
    }
}

/// Load all observers under `dir`. Luminances are multiplied by `scale`
/// (display encoding to cd/m²).
pub fn load_human_data(dir: &Path, scale: f64) -> StoreResult<Dataset> {
    let mut rows = Vec::new();
    let mut files = 0usize;
    // subject / grating / contrast / file
    for entry in WalkDir::new(dir).min_depth(4).max_depth(4).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(subject) = entry
            .path()
            .strip_prefix(dir)
            .ok()
            .and_then(|rel| rel.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
        else {
            continue;
        };
        let mut table = read_table(entry.path(), &subject)?;
        debug!(path = %entry.path().display(), rows = table.len(), "read result file");
        table.iter_mut().for_each(|o| scale_luminance(o, scale));
        rows.extend(table);
        files += 1;
    }
    if files == 0 {
        return Err(StoreError::NoData(dir.to_path_buf()));
    }
    let data = Dataset::new(rows);
    info!(files, rows = data.len(), subjects = data.subjects().len(), "loaded human data");
    Ok(data)
}

/// No-noise illusion at the reference condition: increment minus decrement
/// `match_lum`, averaged over repetitions.
fn reference_effect(data: &Dataset, grating: f64, noise_type: NoiseType) -> Option<f64> {
    let reference = data
        .with_noise_type(noise_type)
        .filter(|o| (o.grating_freq - grating).abs() <= 1e-9);
    crate::core::illusion::baseline_strength(&reference).filter(|e| e.is_finite() && *e != 0.0)
}

pub fn apply_scale(data: &Dataset, name: &str, scale: &LuminanceScale) -> StoreResult<Dataset> {
    let factor = match *scale {
        LuminanceScale::Fixed { factor } => factor,
        LuminanceScale::ReferenceEffect {
            grating,
            noise_type,
            target,
        } => {
            let effect = reference_effect(data, grating, noise_type).ok_or_else(|| {
                StoreError::NoReferenceEffect {
                    name: name.to_string(),
                    grating,
                }
            })?;
            target / effect
        }
    };
    debug!(model = name, factor, "luminance scale");
    Ok(data
        .iter()
        .cloned()
        .map(|mut o| {
            o.match_lum *= factor;
            o
        })
        .collect())
}

/// Load `<dir>/<name>.csv` and bring it to the human luminance range.
pub fn load_model_data(dir: &Path, name: &str, scale: &LuminanceScale) -> StoreResult<Dataset> {
    let path = dir.join(format!("{name}.csv"));
    let raw = Dataset::new(read_table(&path, name)?);
    let data = apply_scale(&raw, name, scale)?;
    info!(model = name, rows = data.len(), "loaded model data");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MODEL_TABLE: &str = "\
Trial noise_type coaxial_lum test_lum match_lum grating_freq grating_contrast noise_freq rep
0 none -1 0.5 0.56 0.4 0.2 0 0
1 none 1 0.5 0.50 0.4 0.2 0 0
2 global -1 0.5 0.53 0.4 0.2 1.2 0
3 global 1 0.5 0.51 0.4 0.2 1.2 0
";

    #[test]
    fn parses_whitespace_table() {
        let rows = parse_table(MODEL_TABLE, "biwam", Path::new("biwam.csv")).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].subject, "biwam");
        assert_eq!(rows[0].polarity, Polarity::Increment);
        assert_eq!(rows[1].polarity, Polarity::Decrement);
        assert_eq!(rows[2].noise_type, NoiseType::Global);
        assert_eq!(rows[3].trial, 3);
        assert_relative_eq!(rows[2].noise_freq, 1.2);
        assert_eq!(rows[0].match_initial, None);
    }

    #[test]
    fn parses_comma_table_with_optional_columns() {
        let text = "noise_type,coaxial_lum,match_lum,match_initial,grating_freq,noise_freq,rep,patch_visible\n\
                    global,-1,0.55,0.40,0.8,3.0,1.0,1\n";
        let rows = parse_table(text, "n1", Path::new("x")).unwrap();
        assert_eq!(rows[0].rep, 1);
        assert_eq!(rows[0].match_initial, Some(0.40));
        assert_eq!(rows[0].patch_visible, Some(true));
        assert!(rows[0].test_lum.is_nan());
    }

    #[test]
    fn reports_missing_column_and_bad_value() {
        let missing = parse_table("noise_type coaxial_lum\nnone 1\n", "n1", Path::new("f"));
        assert!(matches!(missing, Err(StoreError::MissingColumn { column: "match_lum", .. })));

        let text = "noise_type coaxial_lum match_lum grating_freq noise_freq rep\nnone 0 0.5 0.4 0 0\n";
        let bad = parse_table(text, "n1", Path::new("f"));
        assert!(matches!(bad, Err(StoreError::BadValue { line: 2, column: "coaxial_lum", .. })));
    }

    #[test]
    fn reference_effect_scaling_hits_target() {
        let raw = Dataset::new(parse_table(MODEL_TABLE, "flodog", Path::new("f")).unwrap());
        let scaled = apply_scale(&raw, "flodog", &LuminanceScale::reference_effect()).unwrap();
        let none = scaled.with_noise_type(NoiseType::None);
        let effect = crate::core::illusion::baseline_strength(&none).unwrap();
        assert_relative_eq!(effect, 3.0, epsilon = 1e-9);

        let no_reference = raw.with_noise_type(NoiseType::Global);
        assert!(matches!(
            apply_scale(&no_reference, "flodog", &LuminanceScale::reference_effect()),
            Err(StoreError::NoReferenceEffect { .. })
        ));
    }
}
