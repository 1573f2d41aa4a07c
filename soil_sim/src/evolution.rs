// Run orchestration: one trajectory through the soil.
//
// `SoilEvolution` is the single owner of a run's state: the grid, the
// carried soil, the bucket geometry, the validated config and the generator
// left over after terrain generation. It is a small state machine:
//
//   Idle --start--> Stepping --finish--> Done
//                      |
//                      +--fatal error--> Failed
//
// ## One step
//
// `step(pose)` performs, in order:
//
//   1. Pose validation, the movement gate, surface construction and
//      footprint rasterization. These only read state, so an error here
//      leaves the grid untouched.
//   2. Bucket occupancy for the new pose is written to the grid.
//   3. Carried soil follows the bucket (`BodySoil::advance`).
//   4. Every footprint column is classified against the terrain and each
//      digging contact is applied (`BodySoil::apply_dig`), in grid-scan order.
//   5. Columns whose height changed, plus the columns under the bucket at the
//      previous and current pose, seed the relaxation work-set.
//   6. Optional volume and consistency checks; optional per-step log line.
//
// A fatal error raised during 2-4 undoes the column changes journaled since
// the start of the step, restores the carried soil, then moves the run to
// `Failed`. Diagnostics
// (capped relaxation, checker findings) are collected in the `StepReport`
// and the run carries on.
//
// A pose that moves no bucket corner by more than
// `min_move_fraction * min(cell_size, cell_height)` since the last applied
// pose is skipped entirely; the last applied pose is kept, so small moves
// accumulate until they clear the gate.
//
// `run(poses, observer)` drives a whole pose sequence, handing a report (and
// a `Snapshot` when `write_outputs` is set) to the observer after every
// applied step. The observer may stop the run between steps.
//
// See also: `intersect.rs`, `body_soil.rs`, `relax.rs` for the per-step
// stages, `check.rs` for the optional checks, `snapshot.rs` for exports.
//
// **Critical constraint: determinism.** Given the same config (with a fixed
// seed) and the same poses, every run produces the same grid, the same
// carried soil and the same reports.

use crate::body_soil::{AdvanceOutcome, BodySoil, DigOutcome};
use crate::bucket::BucketGeometry;
use crate::check::{check_soil, check_volume};
use crate::config::SimConfig;
use crate::error::{RunPhase, SimError, SimResult};
use crate::grid::Grid;
use crate::intersect::Footprint;
use crate::prng::SoilRng;
use crate::relax::{RelaxOutcome, RelaxParams, relax, relax_all};
use crate::snapshot::Snapshot;
use crate::terrain_gen::generate_terrain;
use crate::types::Pose;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

/// Lifecycle of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Stepping,
    Done,
    /// Stopped by a fatal error. The grid is the last good one.
    Failed(SimError),
}

impl RunState {
    pub fn phase(&self) -> RunPhase {
        match self {
            RunState::Idle => RunPhase::Idle,
            RunState::Stepping => RunPhase::Stepping,
            RunState::Done => RunPhase::Done,
            RunState::Failed(_) => RunPhase::Failed,
        }
    }
}

/// What one call to `step` did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based index of the step in the run.
    pub step: u64,
    /// The pose was too close to the last applied one.
    pub skipped: bool,
    /// Columns counted as under the bucket.
    pub footprint: usize,
    /// Columns the bucket dug into.
    pub contacts: usize,
    pub dig: DigOutcome,
    pub advance: AdvanceOutcome,
    pub relax: RelaxOutcome,
    /// Non-fatal diagnostics raised during the step.
    pub warnings: Vec<SimError>,
}

/// Totals over a `run`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub steps: u64,
    pub skipped: u64,
    pub removed: u64,
    pub attached: u64,
    pub displaced: u64,
    /// Carried soil released mid-run plus what was dropped at the end.
    pub released: u64,
    pub transfers: u64,
    pub warnings: usize,
    /// The observer asked to stop before the poses ran out.
    pub stopped_early: bool,
    pub initial_volume: f64,
    pub final_volume: f64,
}

impl RunSummary {
    fn record(&mut self, report: &StepReport) {
        self.steps += 1;
        if report.skipped {
            self.skipped += 1;
        }
        self.removed += report.dig.removed as u64;
        self.attached += report.dig.attached as u64;
        self.displaced += report.dig.displaced as u64;
        self.released += report.advance.released as u64;
        self.transfers += report.relax.transfers as u64;
        self.warnings += report.warnings.len();
    }
}

/// Receives every applied step of a `run`.
pub trait StepObserver {
    /// `snapshot` is present when `RunOptions::write_outputs` is set.
    /// Returning `Break` ends the run after this step.
    fn on_step(&mut self, report: &StepReport, snapshot: Option<&Snapshot>) -> ControlFlow<()>;
}

impl StepObserver for () {
    fn on_step(&mut self, _report: &StepReport, _snapshot: Option<&Snapshot>) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// A run of the simulator.
#[derive(Clone, Debug)]
pub struct SoilEvolution {
    config: SimConfig,
    grid: Grid,
    body: BodySoil,
    bucket: BucketGeometry,
    relax_params: RelaxParams,
    rng: SoilRng,
    state: RunState,
    last_pose: Option<Pose>,
    steps: u64,
    initial_volume: f64,
    diagnostics: Vec<SimError>,
}

impl SoilEvolution {
    /// Validate `config`, build the grid and generate the initial terrain.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        let mut grid = Grid::new(&config.grid)?;
        let mut rng = config.run.make_rng();
        generate_terrain(&mut grid, &config.terrain, &mut rng)?;
        let params = RelaxParams::new(&config.soil, &grid);
        let settled = relax_all(&mut grid, &params);
        log::debug!(
            "initial terrain settled in {} sweeps ({} transfers)",
            settled.sweeps,
            settled.transfers
        );
        Self::assemble(config, grid, rng)
    }

    /// Start from a prepared grid instead of generated terrain. The grid is
    /// used as is, without relaxation.
    pub fn with_grid(config: SimConfig, grid: Grid) -> SimResult<Self> {
        config.validate()?;
        let rng = config.run.make_rng();
        Self::assemble(config, grid, rng)
    }

    fn assemble(config: SimConfig, grid: Grid, rng: SoilRng) -> SimResult<Self> {
        let bucket = BucketGeometry::new(&config.bucket)?;
        let relax_params = RelaxParams::new(&config.soil, &grid);
        let initial_volume = grid.soil_volume();
        Ok(Self {
            config,
            grid,
            body: BodySoil::new(),
            bucket,
            relax_params,
            rng,
            state: RunState::Idle,
            last_pose: None,
            steps: 0,
            initial_volume,
            diagnostics: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn body(&self) -> &BodySoil {
        &self.body
    }

    pub fn bucket(&self) -> &BucketGeometry {
        &self.bucket
    }

    pub fn relax_params(&self) -> &RelaxParams {
        &self.relax_params
    }

    /// Generator state after terrain generation. Randomized trajectories
    /// draw from here so a fixed seed fixes the whole run.
    pub fn rng_mut(&mut self) -> &mut SoilRng {
        &mut self.rng
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> RunPhase {
        self.state.phase()
    }

    /// Steps attempted so far, skipped ones included.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn last_pose(&self) -> Option<&Pose> {
        self.last_pose.as_ref()
    }

    /// Terrain volume when the run was built (m³).
    pub fn initial_volume(&self) -> f64 {
        self.initial_volume
    }

    /// Terrain plus carried volume now (m³).
    pub fn total_volume(&self) -> f64 {
        self.grid.soil_volume() + self.body.volume(self.grid.cell_volume())
    }

    /// Every diagnostic raised so far, in order.
    pub fn diagnostics(&self) -> &[SimError] {
        &self.diagnostics
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(
            self.steps,
            &self.grid,
            &self.body,
            &self.bucket,
            self.last_pose.as_ref(),
        )
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&mut self) -> SimResult<()> {
        self.require(RunPhase::Idle)?;
        self.state = RunState::Stepping;
        log::info!(
            "run started: {}x{} cells of {} m, soil volume {:.6} m³",
            self.grid.size_x(),
            self.grid.size_y(),
            self.grid.cell_size(),
            self.initial_volume
        );
        Ok(())
    }

    /// Apply one bucket pose and stabilize the terrain.
    pub fn step(&mut self, pose: Pose) -> SimResult<StepReport> {
        self.require(RunPhase::Stepping)?;
        let mut report = StepReport {
            step: self.steps,
            ..StepReport::default()
        };
        self.steps += 1;

        let (pose, footprint) = match self.prepare(pose) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                report.skipped = true;
                return Ok(report);
            }
            Err(e) => return Err(self.fail(e)),
        };

        let saved_body = self.body.clone();
        let previously_occupied = self.grid.occupied_cells();
        self.grid.begin_journal();
        if let Err(e) = self.displace(&footprint, &mut report) {
            self.grid.rollback_journal();
            self.body = saved_body;
            return Err(self.fail(e));
        }

        let mut dirty = self.grid.commit_journal();
        dirty.extend(previously_occupied);
        dirty.extend(self.grid.occupied_cells());
        report.relax = relax(&mut self.grid, dirty, &self.relax_params);
        report.warnings.extend(report.relax.diagnostic());

        if self.config.run.check_outputs {
            self.run_checks(Some(&footprint), &mut report.warnings);
        }
        self.last_pose = Some(pose);
        self.diagnostics.extend(report.warnings.iter().cloned());

        if self.config.run.log_steps {
            log::info!(
                "step {}: {} contacts, removed {} (attached {}, displaced {}), released {}, relax {} sweeps / {} transfers",
                report.step,
                report.contacts,
                report.dig.removed,
                report.dig.attached,
                report.dig.displaced,
                report.advance.released,
                report.relax.sweeps,
                report.relax.transfers
            );
        }
        Ok(report)
    }

    /// Drop the carried soil, clear the bucket and settle the terrain.
    pub fn finish(&mut self) -> SimResult<RelaxOutcome> {
        self.require(RunPhase::Stepping)?;
        let saved_body = self.body.clone();

        let mut dirty = self.grid.occupied_cells();
        dirty.extend(self.body.parcels().iter().map(|p| p.cell));
        self.grid.begin_journal();
        self.grid.clear_bucket_occupancy();
        let released = match self.body.release_all(&mut self.grid) {
            Ok(released) => released,
            Err(e) => {
                self.grid.rollback_journal();
                self.body = saved_body;
                return Err(self.fail(e));
            }
        };
        self.grid.commit_journal();

        let outcome = relax(&mut self.grid, dirty, &self.relax_params);
        let mut warnings: Vec<SimError> = outcome.diagnostic().into_iter().collect();
        if self.config.run.check_outputs {
            self.run_checks(None, &mut warnings);
        }
        self.diagnostics.extend(warnings);
        self.state = RunState::Done;
        log::info!(
            "run finished after {} steps: released {released} ticks, soil volume {:.6} m³",
            self.steps,
            self.total_volume()
        );
        Ok(outcome)
    }

    /// Step through `poses`, then `finish`. Starts the run if it is idle.
    pub fn run<I>(&mut self, poses: I, observer: &mut dyn StepObserver) -> SimResult<RunSummary>
    where
        I: IntoIterator<Item = Pose>,
    {
        if self.phase() == RunPhase::Idle {
            self.start()?;
        }
        let mut summary = RunSummary {
            initial_volume: self.initial_volume,
            ..RunSummary::default()
        };

        for pose in poses {
            let report = self.step(pose)?;
            summary.record(&report);
            if report.skipped {
                continue;
            }
            let snapshot = self.config.run.write_outputs.then(|| self.snapshot());
            if observer.on_step(&report, snapshot.as_ref()).is_break() {
                log::info!("run stopped by its observer after step {}", report.step);
                summary.stopped_early = true;
                break;
            }
        }

        let carried = self.body.total_ticks().max(0) as u64;
        let settled = self.finish()?;
        summary.released += carried;
        summary.transfers += settled.transfers as u64;
        summary.warnings = self.diagnostics.len();
        summary.final_volume = self.total_volume();
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Step stages
    // -----------------------------------------------------------------------

    /// Read-only part of a step. `None` means the pose is gated out.
    fn prepare(&self, pose: Pose) -> SimResult<Option<(Pose, Footprint)>> {
        let pose = pose.validated()?;
        if let Some(last) = &self.last_pose {
            let moved = self.bucket.max_corner_displacement(last, &pose);
            let cell_size = self.grid.cell_size();
            let gate = self.config.contact.min_move_fraction
                * cell_size.min(self.grid.cell_height());
            if moved < gate {
                log::debug!("bucket moved {moved:.5} m, below the {gate:.5} m gate; step skipped");
                return Ok(None);
            }
            if moved > 2.0 * cell_size {
                log::warn!(
                    "bucket corner moved {moved:.3} m in one step (more than two cells); soil may tunnel"
                );
            }
        }
        let surface = self.bucket.surface_at(&pose)?;
        let footprint = Footprint::rasterize(&surface, &self.grid, &self.config.contact)?;
        Ok(Some((surface.pose, footprint)))
    }

    /// Occupancy, carried-soil motion and digging for one footprint.
    fn displace(&mut self, footprint: &Footprint, report: &mut StepReport) -> SimResult<()> {
        self.grid.set_bucket_occupancy(&footprint.occupancy())?;
        report.advance = self.body.advance(&mut self.grid, footprint)?;

        let contacts = footprint.classify(&self.grid)?;
        report.footprint = contacts.iter().filter(|c| c.span.is_some()).count();
        for contact in contacts
            .iter()
            .filter(|c| c.kind.digs() && c.penetration > 0)
        {
            let outcome = self.body.apply_dig(
                &mut self.grid,
                footprint,
                contact.cell,
                contact.region,
                contact.penetration,
            )?;
            report.dig.absorb(outcome);
            report.contacts += 1;
        }
        log::debug!(
            "step {}: {} footprint columns, {} digging, {} parcels carried",
            report.step,
            report.footprint,
            report.contacts,
            self.body.parcels().len()
        );
        Ok(())
    }

    fn run_checks(&self, footprint: Option<&Footprint>, warnings: &mut Vec<SimError>) {
        let checks = [
            check_volume(&self.grid, &self.body, self.initial_volume),
            check_soil(&self.grid, &self.body, footprint),
        ];
        for err in checks.into_iter().filter_map(Result::err) {
            log::warn!("step {}: {err}", self.steps.saturating_sub(1));
            warnings.push(err);
        }
    }

    fn require(&self, phase: RunPhase) -> SimResult<()> {
        let current = self.phase();
        if current == phase {
            Ok(())
        } else {
            Err(SimError::NotRunning(current))
        }
    }

    /// Record a fatal error as the terminal state and hand it back.
    fn fail(&mut self, err: SimError) -> SimError {
        if err.is_fatal() {
            log::error!("run failed at step {}: {err}", self.steps.saturating_sub(1));
            self.state = RunState::Failed(err.clone());
        }
        err
    }
}
