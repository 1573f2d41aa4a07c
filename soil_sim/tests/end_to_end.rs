// End-to-end dig through flat ground.
//
// A bucket with its origin at the teeth follows a parabola from (0, 0) down
// to (2, -0.3) and back up to (4, 0) over a flat 5 cm grid with a 30 degree
// repose angle. The trench left behind must be a depression flanked by
// raised berms, and the soil missing from the trench must equal the soil in
// the berms plus whatever the bucket still carries.

use soil_sim::config::{BucketConfig, GridConfig, SimConfig, SoilParams};
use soil_sim::error::RunPhase;
use soil_sim::evolution::SoilEvolution;
use soil_sim::grid::Grid;
use soil_sim::relax::unstable_pairs;
use soil_sim::trajectory::{ParabolicPath, resample};
use soil_sim::types::Pose;

fn config() -> SimConfig {
    let mut config = SimConfig {
        grid: GridConfig {
            half_length_x: 6.0,
            half_length_y: 1.5,
            depth: 1.0,
            cell_size: 0.05,
            cell_height: 0.01,
        },
        soil: SoilParams {
            repose_angle: std::f32::consts::FRAC_PI_6,
            ..SoilParams::default()
        },
        bucket: BucketConfig {
            joint: [-0.7, 0.0, 0.5],
            base: [-0.7, 0.0, 0.0],
            teeth: [0.0, 0.0, 0.0],
            width: 0.5,
        },
        ..SimConfig::default()
    };
    config.run.check_outputs = true;
    config
}

fn poses(sim: &SoilEvolution) -> Vec<Pose> {
    let path = ParabolicPath::new((0.0, 0.0), (2.0, -0.3)).unwrap();
    let dense = path
        .sample(sim.bucket().base_to_teeth_angle(), 400)
        .unwrap();
    resample(&dense, sim.bucket(), sim.grid().cell_size())
}

/// (ticks below the datum, ticks above the datum) over the whole grid.
fn depression_and_berms(grid: &Grid) -> (i64, i64) {
    grid.columns().fold((0, 0), |(down, up), (_, c)| {
        let h = c.height() as i64;
        (down + (-h).max(0), up + h.max(0))
    })
}

fn height_at(grid: &Grid, x: f32, y: f32) -> i32 {
    grid.height_ticks(grid.cell_at(x, y).unwrap()).unwrap()
}

#[test]
fn dig_leaves_a_trench_with_berms() {
    let mut sim = SoilEvolution::new(config()).unwrap();
    let poses = poses(&sim);
    assert!(poses.len() > 50);
    sim.start().unwrap();

    let mut removed = 0u64;
    for pose in poses {
        let report = sim.step(pose).unwrap();
        assert!(report.warnings.is_empty(), "step {}: {:?}", report.step, report.warnings);
        removed += report.dig.removed as u64;
    }
    assert!(removed > 0);

    // Mid-dig: what left the trench is in the berms or in the bucket.
    let (down, up) = depression_and_berms(sim.grid());
    assert!(down > 0);
    assert!(!sim.body().is_empty(), "a full scoop should still be carried");
    assert_eq!(down, up + sim.body().total_ticks());

    let settled = sim.finish().unwrap();
    assert!(settled.converged);
    assert_eq!(sim.phase(), RunPhase::Done);
    assert!(sim.diagnostics().is_empty(), "{:?}", sim.diagnostics());

    let grid = sim.grid();
    let (down, up) = depression_and_berms(grid);
    assert_eq!(down, up);
    let fresh = Grid::new(&config().grid).unwrap();
    assert_eq!(grid.total_ticks(), fresh.total_ticks());

    // Trench along the centre line.
    for x in [1.0, 1.5, 2.0] {
        assert!(height_at(grid, x, 0.0) < 0, "no depression at x = {x}");
    }
    let deepest = (20..=60)
        .map(|k| height_at(grid, k as f32 * 0.05, 0.0))
        .min()
        .unwrap();
    assert!(deepest <= -10, "trench only {deepest} ticks deep");

    // Berms beside it.
    let berm = grid.columns().any(|(cell, column)| {
        let (x, y) = grid.cell_center(cell);
        column.height() > 0 && (0.0..=4.5).contains(&x) && (0.25..=0.75).contains(&y.abs())
    });
    assert!(berm, "no raised soil beside the trench");

    // Settled everywhere.
    let dh_max = sim.relax_params().dh_max;
    assert!(unstable_pairs(grid, dh_max).is_empty());
}

#[test]
fn repeated_runs_dig_the_same_trench() {
    let run = || {
        let mut sim = SoilEvolution::new(config()).unwrap();
        let poses = poses(&sim);
        let summary = sim.run(poses, &mut ()).unwrap();
        (summary, sim.grid().clone())
    };
    let (sa, ga) = run();
    let (sb, gb) = run();
    assert_eq!(sa, sb);
    assert_eq!(ga, gb);
    assert_eq!(sa.final_volume, sa.initial_volume);
}
