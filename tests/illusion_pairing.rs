use approx::assert_relative_eq;
use noisedip::core::dataset::Dataset;
use noisedip::core::error::AnalysisError;
use noisedip::core::illusion::compute_illusion_strength;
use noisedip::core::observation::{NoiseType, Observation, Polarity};

fn trial(noise_freq: f64, polarity: Polarity, rep: u32, match_lum: f64) -> Observation {
    Observation {
        subject: "n1".into(),
        trial: rep,
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
fn increments_minus_decrements_by_repetition() {
    let data = Dataset::new(vec![
        trial(1.0, Polarity::Increment, 0, 10.0),
        trial(1.0, Polarity::Decrement, 0, 4.0),
        trial(1.0, Polarity::Increment, 1, 12.0),
        trial(1.0, Polarity::Decrement, 1, 6.0),
    ]);
    let m = compute_illusion_strength(&data).unwrap();
    assert_eq!(m.shape(), (1, 2));
    assert_relative_eq!(m.get(0, 0), 6.0);
    assert_relative_eq!(m.get(0, 1), 6.0);
}

#[test]
fn unequal_polarity_counts_fail_either_way() {
    let extra_increment = Dataset::new(vec![
        trial(2.0, Polarity::Increment, 0, 10.0),
        trial(2.0, Polarity::Increment, 1, 11.0),
        trial(2.0, Polarity::Decrement, 0, 4.0),
    ]);
    assert!(matches!(
        compute_illusion_strength(&extra_increment),
        Err(AnalysisError::ShapeMismatch {
            increments: 2,
            decrements: 1,
            ..
        })
    ));

    let extra_decrement = Dataset::new(vec![
        trial(2.0, Polarity::Increment, 0, 10.0),
        trial(2.0, Polarity::Decrement, 0, 4.0),
        trial(2.0, Polarity::Decrement, 1, 5.0),
    ]);
    assert!(matches!(
        compute_illusion_strength(&extra_decrement),
        Err(AnalysisError::ShapeMismatch {
            increments: 1,
            decrements: 2,
            ..
        })
    ));
}

#[test]
fn rows_follow_first_seen_noise_frequency() {
    let data = Dataset::new(vec![
        trial(3.0, Polarity::Increment, 0, 9.0),
        trial(0.5, Polarity::Increment, 0, 8.0),
        trial(0.5, Polarity::Decrement, 0, 5.0),
        trial(3.0, Polarity::Decrement, 0, 8.0),
    ]);
    let m = compute_illusion_strength(&data).unwrap();
    assert_eq!(m.noise_freqs(), &[3.0, 0.5]);
    assert_eq!(m.row_means(), vec![1.0, 3.0]);
    assert_eq!(m.sorted().noise_freqs(), &[0.5, 3.0]);
}

#[test]
fn interleaved_reps_pair_in_first_seen_order() {
    // Increments arrive as reps 0, 25, 1 and decrements as 25, 0, 1.
    let data = Dataset::new(vec![
        trial(1.0, Polarity::Increment, 0, 10.0),
        trial(1.0, Polarity::Increment, 25, 14.0),
        trial(1.0, Polarity::Increment, 1, 12.0),
        trial(1.0, Polarity::Decrement, 25, 8.0),
        trial(1.0, Polarity::Decrement, 0, 4.0),
        trial(1.0, Polarity::Decrement, 1, 6.0),
    ]);
    let m = compute_illusion_strength(&data).unwrap();
    // Positional pairing, not a join on the rep index.
    assert_eq!(m.row(0), &[2.0, 10.0, 6.0]);

    // Sorting reps first changes the entries but not the row mean.
    let mut rows: Vec<Observation> = data.iter().cloned().collect();
    rows.sort_by_key(|o| o.rep);
    let sorted = compute_illusion_strength(&Dataset::new(rows)).unwrap();
    assert_eq!(sorted.row(0), &[6.0, 6.0, 6.0]);
    assert_relative_eq!(m.row_means()[0], sorted.row_means()[0], epsilon = 1e-12);
}
