// Entry point: loads observers and model outputs, fits dip models, and
// writes the comparison report as JSON.
use std::error::Error;
use std::fmt::Write as _;
use std::fs::write;
use std::path::Path;

use clap::Parser;
use tracing::{Level, info, warn};

use noisedip::cli::Args;
use noisedip::config::AnalysisConfig;
use noisedip::core::compare::{ComparisonReport, Comparator, ModelFitSpec};
use noisedip::core::dataset::Dataset;
use noisedip::core::dip_model::DipFitter;
use noisedip::store::{load_human_data, load_model_data};

fn distribution_csv(report: &ComparisonReport) -> String {
    let mut out = String::from("from,to,sample,slope\n");
    for est in &report.slope_estimates {
        for (i, v) in est.distribution.iter().enumerate() {
            let _ = writeln!(out, "{},{},{},{}", est.from, est.to, i, v);
        }
    }
    out
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays clean for the JSON report.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config = AnalysisConfig::load_or_default(&args.config);
    if let Some(dir) = &args.human_dir {
        config.data.human_dir = dir.clone();
    }
    if let Some(dir) = &args.model_dir {
        config.data.model_dir = dir.clone();
    }

    let human = load_human_data(Path::new(&config.data.human_dir), config.data.luminance_scale)?;

    // A missing model file is not fatal; the humans are still analysed.
    let models: Vec<(ModelFitSpec, Dataset)> = config
        .models
        .iter()
        .filter_map(|m| match load_model_data(Path::new(&config.data.model_dir), &m.name, &m.scale) {
            Ok(data) => Some((m.fit_spec(), data)),
            Err(err) => {
                warn!(model = %m.name, %err, "skipping model");
                None
            }
        })
        .collect();

    let mut comparator = Comparator::new(
        DipFitter::new(config.fit.clone()),
        config.frequency_table(),
        config.exclusion_policy(),
        config.bootstrap.clone(),
    );
    comparator.noise_type = config.data.noise_type;
    let report = comparator.run(&human, &models);

    let json = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => {
            write(path, json)?;
            info!(path = %path, "wrote report");
        }
        None => println!("{json}"),
    }
    if let Some(path) = &args.distribution_csv {
        write(path, distribution_csv(&report))?;
        info!(path = %path, "wrote bootstrap distributions");
    }
    Ok(())
}
