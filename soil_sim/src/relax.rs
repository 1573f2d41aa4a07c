// Avalanche relaxation of the terrain.
//
// After a step changes some columns, soil slides from high columns to low
// neighbors until no 4-connected pair differs by more than the repose limit
// `dh_max = floor(cell_size * tan(repose) / cell_height)` ticks.
//
// The work-set is processed in sweeps. Each sweep visits its cells in flat
// grid-scan order (a `BTreeSet<usize>` of column indices) and, for every
// neighbor in the fixed +x, -x, +y, -y order, moves
// `clamp(ceil((diff - dh_max) * split_ratio), 1, diff / 2)` ticks from the
// higher column to the lower one. Columns that changed, and their neighbors,
// form the next sweep. Relaxation stops when a sweep changes nothing or the
// sweep cap is reached.
//
// Termination: no transfer moves more than half the difference, so each one
// strictly lowers the sum of squared heights. The cap is still kept as a
// bound on work for huge perturbations.
//
// Moved soil is taken off the top of the higher column piece by piece and
// stacked on the lower column as `Moved` layers that keep their provenance.
// A receiver under the bucket takes at most the gap up to the bucket.
// Carried soil is not in the grid and is never relaxed.
//
// **Critical constraint: determinism.** Iteration order is fully fixed
// (ordered sets, fixed neighbor order), so identical input gives an
// identical grid.
//
// See also: `grid.rs` for the column operations used here, `evolution.rs`
// which seeds the dirty set each step.

use crate::config::SoilParams;
use crate::error::SimError;
use crate::grid::Grid;
use crate::types::{CellCoord, SoilLayer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relaxation knobs resolved against a grid's resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelaxParams {
    /// Largest stable height difference between neighbors, in ticks.
    pub dh_max: u32,
    pub split_ratio: f32,
    pub max_sweeps: u32,
}

impl RelaxParams {
    pub fn new(soil: &SoilParams, grid: &Grid) -> Self {
        Self {
            dh_max: max_height_step(grid.cell_size(), grid.cell_height(), soil.repose_angle),
            split_ratio: soil.split_ratio,
            max_sweeps: soil.max_relax_iterations,
        }
    }
}

/// Angles this close to a quarter turn count as vertical.
const VERTICAL_EPSILON: f64 = 1e-6;

/// Repose limit in ticks. Never exceeds `cell_size * tan(repose)` in metres.
/// A vertical repose angle gives `u32::MAX`: every pile stands.
pub fn max_height_step(cell_size: f32, cell_height: f32, repose_angle: f32) -> u32 {
    let angle = repose_angle as f64;
    if angle >= std::f64::consts::FRAC_PI_2 - VERTICAL_EPSILON {
        return u32::MAX;
    }
    let slope = cell_size as f64 * angle.tan() / cell_height as f64;
    if !slope.is_finite() || slope >= u32::MAX as f64 {
        return u32::MAX;
    }
    (slope + 1e-6).floor().max(0.0) as u32
}

/// What one relaxation call did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaxOutcome {
    pub sweeps: u32,
    pub transfers: u32,
    pub moved_ticks: u64,
    /// The work-set emptied before the cap and no step was left too steep.
    pub converged: bool,
    /// Cells still pending when the cap was hit, or cells next to a
    /// one-tick step steeper than `dh_max`.
    pub unstable: usize,
    /// Columns whose height changed, in grid-scan order.
    pub changed: Vec<CellCoord>,
}

impl RelaxOutcome {
    /// Non-fatal diagnostic for a capped or unresolved run.
    pub fn diagnostic(&self) -> Option<SimError> {
        (!self.converged).then_some(SimError::RelaxationCapExceeded {
            iterations: self.sweeps,
            unstable: self.unstable,
        })
    }
}

/// Relax the terrain starting from `dirty` and its neighbors.
/// Out-of-bounds cells in `dirty` are ignored.
pub fn relax(
    grid: &mut Grid,
    dirty: impl IntoIterator<Item = CellCoord>,
    params: &RelaxParams,
) -> RelaxOutcome {
    let mut current = BTreeSet::new();
    for cell in dirty {
        if grid.in_bounds(cell) {
            mark(grid, &mut current, cell);
        }
    }
    run_sweeps(grid, current, params)
}

/// Relax the whole grid.
pub fn relax_all(grid: &mut Grid, params: &RelaxParams) -> RelaxOutcome {
    let current: BTreeSet<usize> = (0..grid.len()).collect();
    run_sweeps(grid, current, params)
}

fn run_sweeps(grid: &mut Grid, mut current: BTreeSet<usize>, params: &RelaxParams) -> RelaxOutcome {
    let mut outcome = RelaxOutcome::default();
    let mut changed = BTreeSet::new();
    let mut stuck = BTreeSet::new();

    while !current.is_empty() {
        if outcome.sweeps == params.max_sweeps {
            break;
        }
        outcome.sweeps += 1;
        stuck.clear();
        let mut next = BTreeSet::new();
        for i in std::mem::take(&mut current) {
            let cell = grid.coord_of(i);
            for n in grid.neighbors_of_valid(cell) {
                let moved = match settle_pair(grid, cell, n, params) {
                    Settle::Stable => continue,
                    Settle::Stuck => {
                        stuck.insert(cell);
                        stuck.insert(n);
                        continue;
                    }
                    Settle::Moved(moved) => moved,
                };
                outcome.transfers += 1;
                outcome.moved_ticks += moved as u64;
                changed.insert(cell);
                changed.insert(n);
                mark(grid, &mut next, cell);
                mark(grid, &mut next, n);
            }
        }
        current = next;
    }

    outcome.unstable = if current.is_empty() {
        stuck.len()
    } else {
        current.len()
    };
    outcome.converged = outcome.unstable == 0;
    outcome.changed = changed.into_iter().collect();
    if !current.is_empty() {
        log::warn!(
            "relaxation capped after {} sweeps with {} cells pending",
            outcome.sweeps,
            outcome.unstable
        );
    } else if !outcome.converged {
        log::warn!(
            "{} cells sit next to one-tick steps steeper than the repose angle",
            outcome.unstable
        );
    }
    log::debug!(
        "relax: {} sweeps, {} transfers, {} ticks moved",
        outcome.sweeps,
        outcome.transfers,
        outcome.moved_ticks
    );
    outcome
}

enum Settle {
    Stable,
    /// Too steep, but a single tick cannot be split between the two cells.
    Stuck,
    Moved(u32),
}

/// Move soil downhill between two neighbors if their difference exceeds
/// the limit.
fn settle_pair(grid: &mut Grid, a: CellCoord, b: CellCoord, params: &RelaxParams) -> Settle {
    let (Ok(ha), Ok(hb)) = (grid.height_ticks(a), grid.height_ticks(b)) else {
        return Settle::Stable;
    };
    let (high, low) = if ha > hb { (a, b) } else { (b, a) };
    let diff = ha.abs_diff(hb);
    if diff <= params.dh_max {
        return Settle::Stable;
    }
    if diff < 2 {
        return Settle::Stuck;
    }
    let excess = (diff - params.dh_max) as f32 * params.split_ratio;
    let mut delta = (excess.ceil() as u32).max(1).min(diff / 2);
    if let Some(room) = grid.column(low).ok().and_then(|c| c.room_below_bucket()) {
        delta = delta.min(room);
    }
    if delta == 0 {
        return Settle::Stable;
    }

    let Ok(pieces) = grid.remove_top(high, delta) else {
        return Settle::Stable;
    };
    let mut moved = 0;
    // Pieces come top-down; stacking them in reverse keeps their order.
    for piece in pieces.iter().rev() {
        if grid
            .add_layer(low, SoilLayer::moved(piece.thickness, piece.origin))
            .is_ok()
        {
            moved += piece.thickness;
        }
    }
    if moved == 0 {
        Settle::Stable
    } else {
        Settle::Moved(moved)
    }
}

fn mark(grid: &Grid, set: &mut BTreeSet<usize>, cell: CellCoord) {
    if let Some(i) = grid.index(cell) {
        set.insert(i);
    }
    for n in grid.neighbors_of_valid(cell) {
        if let Some(j) = grid.index(n) {
            set.insert(j);
        }
    }
}

/// Neighbor pairs (each counted once) whose difference exceeds `dh_max`.
pub fn unstable_pairs(grid: &Grid, dh_max: u32) -> Vec<(CellCoord, CellCoord)> {
    let mut out = Vec::new();
    for (cell, column) in grid.columns() {
        for n in [cell.offset(1, 0), cell.offset(0, 1)] {
            if grid
                .height_ticks(n)
                .is_ok_and(|h| column.height().abs_diff(h) > dh_max)
            {
                out.push((cell, n));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::grid::BucketSpans;
    use crate::types::{SoilStatus, Span};
    use std::collections::BTreeMap;

    const THIRTY_DEGREES: f32 = std::f32::consts::FRAC_PI_6;

    fn grid() -> Grid {
        Grid::new(&GridConfig {
            half_length_x: 0.5,
            half_length_y: 0.5,
            depth: 0.5,
            cell_size: 0.05,
            cell_height: 0.01,
        })
        .unwrap()
    }

    fn params(grid: &Grid) -> RelaxParams {
        RelaxParams::new(
            &SoilParams {
                repose_angle: THIRTY_DEGREES,
                ..SoilParams::default()
            },
            grid,
        )
    }

    fn with_spike(height: u32) -> (Grid, CellCoord) {
        let mut grid = grid();
        let centre = grid.cell_at(0.0, 0.0).unwrap();
        grid.add_layer(centre, SoilLayer::moved(height, centre)).unwrap();
        (grid, centre)
    }

    #[test]
    fn repose_limit_rounds_down() {
        // 0.05 * tan(30°) / 0.01 = 2.89
        assert_eq!(max_height_step(0.05, 0.01, THIRTY_DEGREES), 2);
        assert_eq!(max_height_step(0.05, 0.01, 0.0), 0);
        assert_eq!(max_height_step(0.05, 0.05, std::f32::consts::FRAC_PI_4), 1);
    }

    #[test]
    fn spike_collapses_within_slope_bound() {
        let (mut grid, centre) = with_spike(40);
        let p = params(&grid);
        let before = grid.total_ticks();
        let out = relax(&mut grid, [centre], &p);
        assert!(out.converged);
        assert!(out.transfers > 0);
        assert_eq!(grid.total_ticks(), before);
        assert!(unstable_pairs(&grid, p.dh_max).is_empty());
        assert!(grid.height_ticks(centre).unwrap() < 40);
        assert!(out.changed.contains(&centre));
    }

    #[test]
    fn stable_grid_is_untouched() {
        let (mut grid, centre) = with_spike(2);
        let p = params(&grid);
        let snapshot = grid.clone();
        let out = relax(&mut grid, [centre], &p);
        assert!(out.converged);
        assert_eq!(out.transfers, 0);
        assert_eq!(grid, snapshot);
        let out = relax_all(&mut grid, &p);
        assert_eq!(out.sweeps, 1);
        assert_eq!(grid, snapshot);
    }

    #[test]
    fn relaxation_is_deterministic() {
        let (mut a, centre) = with_spike(37);
        let other = centre.offset(3, -2);
        a.remove_top(other, 25).unwrap();
        let mut b = a.clone();
        let p = params(&a);
        let oa = relax(&mut a, [centre, other], &p);
        let ob = relax(&mut b, [other, centre], &p);
        assert_eq!(a, b);
        assert_eq!(oa, ob);
    }

    #[test]
    fn moved_soil_keeps_provenance() {
        let (mut grid, centre) = with_spike(10);
        let p = params(&grid);
        relax(&mut grid, [centre], &p);
        let east = centre.offset(1, 0);
        let top = *grid.layers_at(east).unwrap().last().unwrap();
        assert_eq!(top.status, SoilStatus::Moved);
        assert_eq!(top.origin, centre);
    }

    #[test]
    fn cap_reports_a_diagnostic() {
        let (mut grid, centre) = with_spike(200);
        let p = RelaxParams {
            max_sweeps: 2,
            ..params(&grid)
        };
        let before = grid.total_ticks();
        let out = relax(&mut grid, [centre], &p);
        assert!(!out.converged);
        assert_eq!(out.sweeps, 2);
        assert!(matches!(
            out.diagnostic(),
            Some(SimError::RelaxationCapExceeded { iterations: 2, .. })
        ));
        assert_eq!(grid.total_ticks(), before);
    }

    #[test]
    fn vertical_repose_keeps_a_pillar_standing() {
        let vertical = std::f32::consts::FRAC_PI_2;
        assert_eq!(max_height_step(0.05, 0.01, vertical), u32::MAX);
        let (mut grid, centre) = with_spike(30);
        let p = RelaxParams::new(
            &SoilParams {
                repose_angle: vertical,
                ..SoilParams::default()
            },
            &grid,
        );
        let out = relax(&mut grid, [centre], &p);
        assert!(out.converged);
        assert_eq!(out.transfers, 0);
        assert_eq!(grid.height_ticks(centre).unwrap(), 30);
    }

    #[test]
    fn unsplittable_step_is_not_reported_as_settled() {
        // 0.05 * tan(0.1) / 0.01 = 0.50, so even one tick is too steep.
        let (mut grid, centre) = with_spike(1);
        let p = RelaxParams::new(
            &SoilParams {
                repose_angle: 0.1,
                ..SoilParams::default()
            },
            &grid,
        );
        assert_eq!(p.dh_max, 0);
        let out = relax(&mut grid, [centre], &p);
        assert!(!out.converged);
        assert_eq!(out.unstable, 5);
        assert!(matches!(
            out.diagnostic(),
            Some(SimError::RelaxationCapExceeded { unstable: 5, .. })
        ));
        assert_eq!(unstable_pairs(&grid, p.dh_max).len(), 4);
    }

    #[test]
    fn soil_does_not_slide_under_a_touching_bucket() {
        let (mut grid, centre) = with_spike(20);
        let mut spans = BTreeMap::new();
        for n in grid.neighbors(centre).unwrap() {
            spans.insert(n, BucketSpans::from_slice(&[Span::new(0, 5)]));
        }
        grid.set_bucket_occupancy(&spans).unwrap();
        let p = params(&grid);
        let out = relax(&mut grid, [centre], &p);
        assert_eq!(out.transfers, 0);
        assert_eq!(grid.height_ticks(centre).unwrap(), 20);
    }
}
