use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to config TOML (written with defaults if missing)
    #[arg(long, default_value = "noisedip.toml")]
    pub config: String,

    /// Directory of human observer data (overrides config)
    #[arg(long)]
    pub human_dir: Option<String>,

    /// Directory of model output tables (overrides config)
    #[arg(long)]
    pub model_dir: Option<String>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    pub out: Option<String>,

    /// Dump bootstrap slope distributions as CSV
    #[arg(long)]
    pub distribution_csv: Option<String>,

    /// Debug-level logging
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}
