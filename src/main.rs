use std::path::PathBuf;
use clap::Parser;
use log::{error, info};

use run_telemetry::batch;
use run_telemetry::config::PipelineConfig;

/// Clean and derive run telemetry from exported sample tables.
#[derive(Debug, Parser)]
#[command(name = "run-telemetry", version)]
struct Cli {
    /// Folder searched recursively for per-run sample tables (.csv)
    input: PathBuf,

    /// Output folder for derived tables
    #[arg(short, long, default_value = "telemetry_output")]
    output: PathBuf,

    /// JSON pipeline configuration; overrides --preset
    #[arg(short, long, env = "RUN_TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Built-in configuration: default, cadence-chart, scatter, multi-run
    #[arg(short, long, default_value = "default")]
    preset: String,

    /// Log per-step detail
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.config {
        info!("Loading pipeline config from {}", path.display());
        return Ok(PipelineConfig::load(path)?);
    }
    PipelineConfig::from_preset(&cli.preset)
        .ok_or_else(|| format!("unknown preset '{}'", cli.preset).into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(&cli)?;
    info!(
        "Smoothing window {}, {} joint filters, bands at {:.0}%/{:.0}%",
        config.smoothing_window,
        config.filters.len(),
        config.band_lower_quantile * 100.0,
        config.band_upper_quantile * 100.0
    );

    match batch::process_folder(&cli.input, &cli.output, &config) {
        Ok(summary) => {
            info!("Summary written to {}", summary.summary_path.display());
            if let Some(radar) = &summary.radar_path {
                info!("Radar comparison written to {}", radar.display());
            }
            if summary.failed > 0 {
                error!("{} of {} runs failed", summary.failed, summary.processed + summary.failed);
            }
            Ok(())
        }
        Err(e) => {
            error!("Batch failed: {}", e);
            Err(e.into())
        }
    }
}
