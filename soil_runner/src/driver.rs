// Trajectory construction and the run.
//
// The fixed dig starts at (-2.0, 1.5) and bottoms out at (0.1, 0.25) in the
// x-z plane; with the default bucket the base plate then reaches 0.25 m
// below the datum. `--random-trajectory` draws both points from the run's
// generator instead, after terrain generation, so a fixed seed still fixes
// the whole run. Dense samples are resampled so that no bucket corner moves
// more than one cell between poses.

use std::error::Error;

use soil_sim::error::SimResult;
use soil_sim::evolution::{RunSummary, SoilEvolution};
use soil_sim::trajectory::{ParabolicPath, resample};
use soil_sim::types::Pose;

use crate::cli::Args;
use crate::output::CsvSink;

pub const DEFAULT_START: (f32, f32) = (-2.0, 1.5);
pub const DEFAULT_DEEPEST: (f32, f32) = (0.1, 0.25);

/// Poses for one dig, at most one cell of corner motion apart.
pub fn trajectory(sim: &mut SoilEvolution, random: bool, samples: usize) -> SimResult<Vec<Pose>> {
    let path = if random {
        ParabolicPath::random(sim.rng_mut())
    } else {
        ParabolicPath::new(DEFAULT_START, DEFAULT_DEEPEST)?
    };
    log::info!(
        "dig from ({:.3}, {:.3}) through ({:.3}, {:.3})",
        path.x_i,
        path.z_i,
        path.x_min,
        path.z_min
    );
    let dense = path.sample(sim.bucket().base_to_teeth_angle(), samples)?;
    let poses = resample(&dense, sim.bucket(), sim.grid().cell_size());
    log::debug!("{} poses after resampling {} samples", poses.len(), dense.len());
    Ok(poses)
}

/// Run one invocation end to end.
pub fn execute(args: &Args) -> Result<RunSummary, Box<dyn Error>> {
    let config = args.sim_config()?;
    let mut sim = SoilEvolution::new(config)?;
    let poses = trajectory(&mut sim, args.random_trajectory, args.samples)?;

    let summary = match &args.output {
        Some(dir) => {
            let mut sink = CsvSink::new(dir)?;
            let summary = sim.run(poses, &mut sink)?;
            let written = sink.finish()?;
            std::fs::write(
                dir.join("summary.json"),
                serde_json::to_string_pretty(&summary)?,
            )?;
            log::info!("wrote {written} steps to {}", dir.display());
            summary
        }
        None => sim.run(poses, &mut ())?,
    };
    Ok(summary)
}
