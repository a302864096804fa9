use std::fs;
use std::path::PathBuf;

use approx::assert_relative_eq;
use noisedip::core::observation::NoiseType;
use noisedip::store::{LuminanceScale, StoreError, load_human_data, load_model_data};

fn unique_dir(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "noisedip_store_{}_{}",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    fs::create_dir_all(&path).unwrap();
    path
}

const HUMAN_HEADER: &str =
    "Trial noise_type coaxial_lum test_lum match_lum response_time match_initial grating_freq grating_contrast noise_freq rep view_count";

fn write_result(root: &PathBuf, subject: &str, grating: &str, file: &str, rows: &[&str]) {
    let dir = root.join(subject).join(grating).join("0.2");
    fs::create_dir_all(&dir).unwrap();
    let mut text = String::from(HUMAN_HEADER);
    text.push('\n');
    for r in rows {
        text.push_str(r);
        text.push('\n');
    }
    fs::write(dir.join(file), text).unwrap();
}

#[test]
fn human_tree_is_tagged_and_scaled() {
    let root = unique_dir("human");
    write_result(&root, "n1", "0.4", "a.txt", &["0 global -1 0.5 0.55 1.2 0.45 0.4 0.2 1.0 0 1"]);
    write_result(&root, "n1", "0.4", "b.txt", &["1 global 1 0.5 0.45 1.4 0.6 0.4 0.2 1.0 0 1"]);
    write_result(&root, "n2", "0.8", "a.txt", &["0 none -1 0.5 0.6 1.1 0.5 0.8 0.2 0 0 1"]);

    let data = load_human_data(&root, 88.0).unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data.subjects(), vec!["n1".to_string(), "n2".to_string()]);
    let first = &data.rows()[0];
    assert_relative_eq!(first.match_lum, 0.55 * 88.0, epsilon = 1e-9);
    assert_relative_eq!(first.test_lum, 44.0, epsilon = 1e-9);
    assert_relative_eq!(first.match_initial.unwrap(), 0.45 * 88.0, epsilon = 1e-9);
    assert_eq!(data.rows()[2].noise_type, NoiseType::None);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn empty_tree_is_an_error() {
    let root = unique_dir("empty");
    assert!(matches!(load_human_data(&root, 88.0), Err(StoreError::NoData(_))));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn model_file_uses_configured_scale() {
    let root = unique_dir("model");
    fs::write(
        root.join("biwam.csv"),
        "Trial noise_type coaxial_lum test_lum match_lum grating_freq grating_contrast noise_freq rep\n\
         0 none -1 0.5 0.52 0.4 0.2 0 0\n\
         1 none 1 0.5 0.48 0.4 0.2 0 0\n",
    )
    .unwrap();

    let fixed = load_model_data(&root, "biwam", &LuminanceScale::fixed(88.0)).unwrap();
    assert_eq!(fixed.subjects(), vec!["biwam".to_string()]);
    assert_relative_eq!(fixed.rows()[0].match_lum, 0.52 * 88.0, epsilon = 1e-9);

    let normalised = load_model_data(&root, "biwam", &LuminanceScale::reference_effect()).unwrap();
    let effect = normalised.rows()[0].match_lum - normalised.rows()[1].match_lum;
    assert_relative_eq!(effect, 3.0, epsilon = 1e-9);

    assert!(matches!(
        load_model_data(&root, "missing", &LuminanceScale::fixed(1.0)),
        Err(StoreError::Io { .. })
    ));
    let _ = fs::remove_dir_all(&root);
}
