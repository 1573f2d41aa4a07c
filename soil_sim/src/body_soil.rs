// Soil carried by the bucket.
//
// When the base plate cuts into a column, the removed soil enters the bucket
// through the mouth and rests on the plate. Each piece of carried soil is a
// `Parcel`: an amount in ticks anchored at a body-frame point on the plate,
// the column it currently sits over, and the column it was dug from.
//
// A column can carry soil from the top of its lowest bucket span up to the
// mouth (or up to a second span, if the bucket folds over itself there); see
// `FootprintCell::carry_room`. Whatever does not fit, and everything cut by
// the back or side plates, is pushed aside onto the terrain with
// `Grid::deposit`. That push-aside is what builds berms next to a trench.
//
// `advance` moves every parcel with the bucket: its anchor is transformed by
// the new pose, and the parcel lands in the column under the anchor or in
// one of that column's neighbors, whichever has room first. Soil that finds
// no room is released onto the terrain.
//
// Conservation: `apply_dig`, `advance` and `release_all` only move ticks
// between the grid and the parcels. Grid ticks plus carried ticks is
// constant across every call.
//
// Carried soil never enters the grid's layer stacks while it is carried, so
// relaxation never sees it.
//
// See also: `intersect.rs` for `Footprint`, `grid.rs` for `deposit`,
// `check.rs` which verifies the parcel/footprint rules.

use crate::bucket::FaceKind;
use crate::error::SimResult;
use crate::grid::Grid;
use crate::intersect::{Footprint, FootprintCell};
use crate::types::{CellCoord, Pose, SoilLayer, SoilStatus};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A piece of soil carried by the bucket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    /// Face group the soil rests on.
    pub region: FaceKind,
    /// Anchor in the bucket's body frame.
    #[serde(with = "crate::serde_glam::vec3")]
    pub local: Vec3,
    /// Column under the anchor at the current pose.
    pub cell: CellCoord,
    /// Carried amount in ticks.
    pub amount: u32,
    /// Column the soil was dug from.
    pub origin: CellCoord,
}

impl Parcel {
    /// The parcel as a layer of bucket-adhered soil.
    pub fn layer(&self) -> SoilLayer {
        SoilLayer::new(SoilStatus::BucketAdhered, self.amount, self.origin)
    }
}

/// Result of one `apply_dig`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigOutcome {
    /// Ticks taken off the terrain.
    pub removed: u32,
    /// Ticks that became carried soil.
    pub attached: u32,
    /// Ticks pushed aside onto the terrain.
    pub displaced: u32,
}

impl DigOutcome {
    pub fn absorb(&mut self, other: DigOutcome) {
        self.removed += other.removed;
        self.attached += other.attached;
        self.displaced += other.displaced;
    }
}

/// Result of one `advance`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    /// Parcels that ended in a different column.
    pub relocated: usize,
    /// Ticks released onto the terrain for lack of room.
    pub released: u32,
}

/// All soil carried by the bucket, in creation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BodySoil {
    parcels: Vec<Parcel>,
}

impl BodySoil {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn from_parcels(parcels: Vec<Parcel>) -> Self {
        Self { parcels }
    }

    pub fn parcels(&self) -> &[Parcel] {
        &self.parcels
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn total_ticks(&self) -> i64 {
        self.parcels.iter().map(|p| p.amount as i64).sum()
    }

    /// Carried volume (m³).
    pub fn volume(&self, cell_volume: f64) -> f64 {
        self.total_ticks() as f64 * cell_volume
    }

    /// Carried ticks per column.
    pub fn loads(&self) -> BTreeMap<CellCoord, u32> {
        let mut loads = BTreeMap::new();
        for p in &self.parcels {
            *loads.entry(p.cell).or_insert(0) += p.amount;
        }
        loads
    }

    pub fn load_at(&self, cell: CellCoord) -> u32 {
        self.parcels
            .iter()
            .filter(|p| p.cell == cell)
            .map(|p| p.amount)
            .sum()
    }

    // -----------------------------------------------------------------------
    // Digging
    // -----------------------------------------------------------------------

    /// Cut `penetration` ticks off `cell` and route them into the bucket.
    ///
    /// Soil cut by the base plate fills carrying room, starting at `cell`
    /// and spreading breadth-first over the footprint. Everything else is
    /// pushed aside. Cuts deeper than the available soil are truncated by
    /// `Grid::remove_top`.
    pub fn apply_dig(
        &mut self,
        grid: &mut Grid,
        footprint: &Footprint,
        cell: CellCoord,
        region: FaceKind,
        penetration: u32,
    ) -> SimResult<DigOutcome> {
        let pieces = grid.remove_top(cell, penetration)?;
        let mut outcome = DigOutcome::default();
        if pieces.is_empty() {
            return Ok(outcome);
        }

        let mut loads = self.loads();
        let targets = if region == FaceKind::Base {
            carrying_columns(grid, footprint, cell)
        } else {
            Vec::new()
        };

        for piece in pieces {
            outcome.removed += piece.thickness;
            let mut remaining = piece.thickness;
            for &(target, fc) in &targets {
                if remaining == 0 {
                    break;
                }
                let load = loads.entry(target).or_insert(0);
                let take = remaining.min(fc.carry_room(*load));
                if take == 0 {
                    continue;
                }
                *load += take;
                remaining -= take;
                outcome.attached += take;
                self.attach(grid, footprint.pose(), fc, target, take, piece.origin);
            }
            if remaining > 0 {
                grid.deposit(cell, remaining, piece.origin)?;
                outcome.displaced += remaining;
            }
        }
        Ok(outcome)
    }

    fn attach(
        &mut self,
        grid: &Grid,
        pose: &Pose,
        fc: &FootprintCell,
        cell: CellCoord,
        amount: u32,
        origin: CellCoord,
    ) {
        if let Some(existing) = self
            .parcels
            .iter_mut()
            .find(|p| p.cell == cell && p.origin == origin && p.region == fc.region)
        {
            existing.amount += amount;
            return;
        }
        self.parcels.push(Parcel {
            region: fc.region,
            local: anchor(grid, pose, fc, cell),
            cell,
            amount,
            origin,
        });
    }

    // -----------------------------------------------------------------------
    // Motion
    // -----------------------------------------------------------------------

    /// Carry every parcel to the bucket's new pose.
    ///
    /// `footprint` must belong to the new pose and its occupancy must already
    /// be written to the grid, so released soil never lands inside the
    /// bucket.
    pub fn advance(&mut self, grid: &mut Grid, footprint: &Footprint) -> SimResult<AdvanceOutcome> {
        let pose = *footprint.pose();
        let mut outcome = AdvanceOutcome::default();
        let mut loads: BTreeMap<CellCoord, u32> = BTreeMap::new();
        let mut kept: Vec<Parcel> = Vec::with_capacity(self.parcels.len());

        for parcel in std::mem::take(&mut self.parcels) {
            let world = pose.transform_point(parcel.local);
            let under = grid.locate(world.x, world.y);
            let mut remaining = parcel.amount;

            for target in candidates(grid, under) {
                if remaining == 0 {
                    break;
                }
                let Some(fc) = footprint.counted(target) else {
                    continue;
                };
                let load = loads.entry(target).or_insert(0);
                let take = remaining.min(fc.carry_room(*load));
                if take == 0 {
                    continue;
                }
                *load += take;
                remaining -= take;
                if target != parcel.cell {
                    outcome.relocated += 1;
                }
                let local = if target == under {
                    parcel.local
                } else {
                    anchor(grid, &pose, fc, target)
                };
                merge_into(
                    &mut kept,
                    Parcel {
                        local,
                        cell: target,
                        amount: take,
                        ..parcel
                    },
                );
            }

            if remaining > 0 {
                let drop_at = if grid.in_bounds(under) {
                    under
                } else {
                    parcel.cell
                };
                grid.deposit(drop_at, remaining, parcel.origin)?;
                outcome.released += remaining;
            }
        }

        if outcome.released > 0 {
            log::warn!(
                "{} ticks of carried soil had no bucket wall to rest on and were released",
                outcome.released
            );
        }
        self.parcels = kept;
        Ok(outcome)
    }

    /// Put every parcel back on the terrain at its current column. Returns
    /// the released ticks. Bucket occupancy should be cleared first if the
    /// soil is meant to land in place rather than beside the bucket.
    pub fn release_all(&mut self, grid: &mut Grid) -> SimResult<u32> {
        let mut released = 0;
        for parcel in std::mem::take(&mut self.parcels) {
            grid.deposit(parcel.cell, parcel.amount, parcel.origin)?;
            released += parcel.amount;
        }
        Ok(released)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Counted footprint columns reachable from `start` through the footprint,
/// breadth-first in neighbor order.
fn carrying_columns<'a>(
    grid: &Grid,
    footprint: &'a Footprint,
    start: CellCoord,
) -> Vec<(CellCoord, &'a FootprintCell)> {
    let mut out = Vec::new();
    let Some(first) = footprint.counted(start) else {
        return out;
    };
    let mut visited = BTreeSet::from([start]);
    let mut queue = VecDeque::from([(start, first)]);
    while let Some((cell, fc)) = queue.pop_front() {
        out.push((cell, fc));
        for n in grid.neighbors_of_valid(cell) {
            if !visited.insert(n) {
                continue;
            }
            if let Some(nfc) = footprint.counted(n) {
                queue.push_back((n, nfc));
            }
        }
    }
    out
}

/// The column under an anchor, then its in-bounds neighbors.
fn candidates(grid: &Grid, under: CellCoord) -> Vec<CellCoord> {
    let mut out = Vec::with_capacity(5);
    if grid.in_bounds(under) {
        out.push(under);
        out.extend(grid.neighbors_of_valid(under));
    }
    out
}

/// Body-frame point on top of the lowest span at the centre of `cell`.
fn anchor(grid: &Grid, pose: &Pose, fc: &FootprintCell, cell: CellCoord) -> Vec3 {
    let (x, y) = grid.cell_center(cell);
    let z = fc.lowest().map_or(0, |s| s.top);
    pose.inverse_transform_point(Vec3::new(x, y, grid.to_metres(z)))
}

fn merge_into(parcels: &mut Vec<Parcel>, parcel: Parcel) {
    if let Some(existing) = parcels.iter_mut().find(|p| {
        p.cell == parcel.cell && p.origin == parcel.origin && p.region == parcel.region
    }) {
        existing.amount += parcel.amount;
    } else {
        parcels.push(parcel);
    }
}
