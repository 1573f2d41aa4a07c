// Command-line arguments.
//
// Flags only ever switch run options on (checks, step logging, output) or
// override the seed; everything else comes from the config file, or from
// `SimConfig::default()` when no file is given.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use soil_sim::config::SimConfig;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "soil-runner",
    about = "Dig one bucket trajectory through a soil grid",
    version
)]
pub struct Args {
    /// JSON file with a full simulator configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for per-step CSV files and the run summary
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Draw the start and deepest points of the dig at random
    #[arg(long)]
    pub random_trajectory: bool,

    /// Seed from the clock instead of the configured seed
    #[arg(long)]
    pub no_fixed_seed: bool,

    /// Override the configured seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Check volume conservation and soil consistency after every step
    #[arg(long)]
    pub check: bool,

    /// Log a summary line per step
    #[arg(long)]
    pub log_steps: bool,

    /// Poses sampled along the path before resampling
    #[arg(long, default_value_t = 1000)]
    pub samples: usize,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Configuration for this invocation: the file (or defaults) with the
    /// flags applied on top.
    pub fn sim_config(&self) -> Result<SimConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
                SimConfig::from_json(&json)?
            }
            None => SimConfig::default(),
        };
        let run = &mut config.run;
        if self.no_fixed_seed {
            run.fixed_seed = false;
        }
        if let Some(seed) = self.seed {
            run.seed = seed;
        }
        run.check_outputs |= self.check;
        run.log_steps |= self.log_steps;
        run.write_outputs |= self.output.is_some();
        Ok(config)
    }

    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
