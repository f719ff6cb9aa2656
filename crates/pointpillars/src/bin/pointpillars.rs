use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::config::Config;
use clap::{Parser, Subcommand};
use pointpillars::{
    create_device,
    loss::PointPillarsLossConfig,
    probe::{run_probe, ProbeOptions},
    SelectedBackend, NAME,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pointpillars")]
#[command(about = "Inspect the PointPillars detection loss")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default loss configuration as JSON
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "pointpillars_loss.json")]
        output: PathBuf,
    },

    /// Evaluate every loss term on a random detection batch
    Probe {
        /// Loss configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 1)]
        batch: usize,

        #[arg(long, default_value_t = 16)]
        height: usize,

        #[arg(long, default_value_t = 16)]
        width: usize,

        #[arg(long, default_value_t = 4)]
        anchors: usize,

        #[arg(long, default_value_t = 4)]
        classes: usize,

        /// Expected share of positively matched anchors
        #[arg(long, default_value_t = 0.05)]
        positive_fraction: f64,

        /// Expected share of ignored anchors
        #[arg(long, default_value_t = 0.05)]
        ignore_fraction: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { output } => {
            PointPillarsLossConfig::new()
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            tracing::info!(path = %output.display(), "default loss configuration written");
        }
        Commands::Probe {
            config,
            batch,
            height,
            width,
            anchors,
            classes,
            positive_fraction,
            ignore_fraction,
            seed,
        } => {
            let loss_config = match &config {
                Some(path) => {
                    tracing::info!(config = %path.display(), "loading loss configuration");
                    PointPillarsLossConfig::from_file(path)?
                }
                None => PointPillarsLossConfig::new(),
            };
            tracing::info!(
                alpha = loss_config.alpha,
                gamma = loss_config.gamma,
                hard_negative_percentile = loss_config.hard_negative_percentile,
                "configuration ready"
            );

            let options = ProbeOptions {
                batch,
                grid_h: height,
                grid_w: width,
                anchors,
                classes,
                positive_fraction,
                ignore_fraction,
                seed,
            };

            tracing::info!(backend = NAME, "running probe");
            let report = run_probe::<SelectedBackend>(&loss_config, &options, &create_device())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
