use approx::assert_relative_eq;
use noisedip::core::error::AnalysisError;
use noisedip::core::exclusion::{ExclusionPolicy, ExclusionRule};
use noisedip::core::freq_table::FrequencyTable;
use noisedip::core::slope::{BootstrapSettings, DipTable, estimate_local_slope, estimate_slope};

fn bootstrap(iterations: usize) -> BootstrapSettings {
    BootstrapSettings {
        iterations,
        ..BootstrapSettings::default()
    }
}

#[test]
fn proportional_scaling_gives_unit_slope() {
    let mut table = DipTable::new(vec![0.1, 0.4, 0.8]);
    table.push_row("a", &[Some(1.0), Some(2.0), Some(4.0)]);
    table.push_row("b", &[Some(1.2), Some(2.4), Some(4.8)]);

    let slopes: Vec<_> = estimate_slope(&table, &FrequencyTable::standard(), &ExclusionPolicy::none(), &bootstrap(500))
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(slopes.len(), 2);
    assert_eq!((slopes[0].from, slopes[0].to), (0.1, 0.4));
    assert_relative_eq!(slopes[0].point, 2.0 / (0.391 / 0.103), epsilon = 1e-12);
    assert_relative_eq!(slopes[0].point, 0.527, epsilon = 1e-3);
    assert_relative_eq!(slopes[1].point, 1.0, epsilon = 1e-12);
    assert_eq!(slopes[1].n_subjects(), 2);
}

#[test]
fn pairs_are_ordered_by_physical_frequency() {
    let mut table = DipTable::new(vec![0.8, 0.1, 0.4]);
    table.push_row("a", &[Some(4.0), Some(1.0), Some(2.0)]);
    let slopes = estimate_slope(&table, &FrequencyTable::standard(), &ExclusionPolicy::none(), &bootstrap(10));
    let pairs: Vec<(f64, f64)> = slopes.iter().map(|s| s.as_ref().map(|e| (e.from, e.to)).unwrap()).collect();
    assert_eq!(pairs, vec![(0.1, 0.4), (0.4, 0.8)]);
}

#[test]
fn subjects_drop_out_pairwise() {
    let mut table = DipTable::new(vec![0.1, 0.4, 0.8]);
    table.push_row("s1", &[Some(1.0), Some(2.0), Some(4.0)]);
    // Flat at .8 only.
    table.push_row("s2", &[Some(1.0), Some(3.0), None]);
    // Excluded at .4 by the policy.
    table.push_row("s3", &[Some(1.0), Some(9.0), Some(4.0)]);
    let policy = ExclusionPolicy::new(vec![ExclusionRule::unit("s3", 0.4, "bad session")]);

    let slopes = estimate_slope(&table, &FrequencyTable::standard(), &policy, &bootstrap(100));
    let low = slopes[0].as_ref().unwrap();
    let high = slopes[1].as_ref().unwrap();
    assert_eq!(low.subjects, vec!["s1".to_string(), "s2".to_string()]);
    assert_eq!(high.subjects, vec!["s1".to_string()]);
    // s2 is present at the low pair even though it is missing at the high one.
    let expected_low = ((2.0 + 3.0) / 2.0) / (0.391 / 0.103);
    assert_relative_eq!(low.point, expected_low, epsilon = 1e-12);
}

#[test]
fn no_overlap_is_an_error_not_a_zero() {
    let mut table = DipTable::new(vec![0.4, 0.8]);
    table.push_row("s1", &[Some(2.0), None]);
    table.push_row("s2", &[None, Some(4.0)]);
    let slopes = estimate_slope(&table, &FrequencyTable::standard(), &ExclusionPolicy::none(), &bootstrap(100));
    assert_eq!(slopes[0], Err(AnalysisError::NoUsableRatios { from: 0.4, to: 0.8 }));
}

#[test]
fn unknown_grating_is_reported() {
    let table = DipTable::new(vec![0.4, 3.2]);
    let slopes = estimate_slope(&table, &FrequencyTable::standard(), &ExclusionPolicy::none(), &bootstrap(10));
    assert_eq!(slopes, vec![Err(AnalysisError::UnknownGrating(3.2))]);
}

#[test]
fn bootstrap_mean_converges_to_point() {
    let ratios = [1.5, 2.0, 2.5, 1.8, 2.2, 1.9, 2.4, 1.6];
    let mut table = DipTable::new(vec![0.4, 0.8]);
    for (i, r) in ratios.iter().enumerate() {
        table.push_row(&format!("s{i}"), &[Some(1.0), Some(*r)]);
    }
    let freqs = FrequencyTable::standard();
    let policy = ExclusionPolicy::none();

    let small = estimate_local_slope(&table, 0.4, 0.8, &freqs, &policy, &bootstrap(100), 3).unwrap();
    let large = estimate_local_slope(&table, 0.4, 0.8, &freqs, &policy, &bootstrap(10_000), 3).unwrap();
    assert_relative_eq!(small.point, large.point);
    assert_eq!(small.distribution.len(), 100);
    assert_eq!(large.distribution.len(), 10_000);

    let (small_mean, _) = small.distribution_summary();
    let (large_mean, large_std) = large.distribution_summary();
    assert_relative_eq!(small_mean, small.point, epsilon = 0.03);
    assert_relative_eq!(large_mean, large.point, epsilon = 0.005);
    assert!(large_std > 0.0);
}

#[test]
fn same_seed_same_distribution() {
    let mut table = DipTable::new(vec![0.4, 0.8]);
    for (i, r) in [1.7, 2.1, 2.3].iter().enumerate() {
        table.push_row(&format!("s{i}"), &[Some(1.0), Some(*r)]);
    }
    let settings = bootstrap(200);
    let a = estimate_slope(&table, &FrequencyTable::standard(), &ExclusionPolicy::none(), &settings);
    let b = estimate_slope(&table, &FrequencyTable::standard(), &ExclusionPolicy::none(), &settings);
    assert_eq!(a, b);
}
