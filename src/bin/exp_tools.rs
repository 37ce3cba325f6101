//! Offline tools for saved runs: join, re-derive with a new geometry, plot.
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use ecbench::analysis;
use ecbench::measure::Geometry;

#[derive(Parser)]
#[command(name = "exp_tools", about = "Post-process electrical characterization runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Concatenate runs into `<first>-joined` (.npz, .csv and description)
    Join {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Recompute field, density and resistivity into `<stem>_a.npz`/`.csv`
    Rederive {
        file: PathBuf,
        /// cross-section in cm2
        #[arg(long)]
        area: f64,
        /// distance between voltage contacts in cm
        #[arg(long)]
        length: f64,
    },
    /// Render the charts matching the runs (V-I, resistivity, 3D clouds)
    Plot {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Join { files } => {
            if let Some(base) = analysis::write_joined(&files)? {
                info!("Joined {} runs into {}", files.len(), base.display());
            }
        }
        Command::Rederive { file, area, length } => {
            if area <= 0.0 || length <= 0.0 {
                anyhow::bail!("area and length must be positive");
            }
            analysis::rederive_file(&file, &Geometry { area, length })?;
        }
        Command::Plot { files, out_dir } => {
            let written = analysis::write_plots(&files, &out_dir)?;
            if written.is_empty() {
                warn!("No chart matches these runs");
            }
        }
    }
    Ok(())
}
