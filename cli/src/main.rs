use std::path::{Path, PathBuf};

use clap::Parser;
use pluto_toolbox_core::{Format, Simulation, SimulationOptions};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Summarizes PLUTO simulation directories.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Simulation directories
    #[arg(value_name = "PATH", default_value = ".")]
    paths: Vec<PathBuf>,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    for (i, path) in args.paths.iter().enumerate() {
        if i > 0 {
            println!();
        }
        info(path);
    }
    Ok(())
}

fn info(path: &Path) {
    let sims: Vec<Simulation> = Format::DEFAULT_PRIORITY
        .iter()
        .filter_map(|&format| {
            match SimulationOptions::new(path).format(format).open() {
                Ok(sim) => Some(sim),
                Err(e) => {
                    debug!(%format, %e, "Not opening format");
                    None
                }
            }
        })
        .collect();

    let Some(first) = sims.first() else {
        println!("No simulation found at '{}'", path.display());
        return;
    };

    print!("{first}");
    println!("Data files:");
    for sim in &sims {
        let dt = sim.output_dt();
        let last = sim
            .last_time()
            .map_or_else(|| "-".to_string(), |t| format!("{t:.2e}"));
        let mean_dt = dt
            .mean()
            .map_or_else(|| "-".to_string(), |dt| format!("{dt:.2e}"));
        println!(
            "    Format {}: {} files, last time {last}, data timestep {mean_dt}",
            sim.format(),
            sim.len(),
        );
    }
}
