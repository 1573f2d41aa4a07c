// Bucket/terrain intersection.
//
// Two stages, both pure with respect to the grid:
//
// 1. `Footprint::rasterize` projects every bucket triangle onto the lattice.
//    Each triangle is sampled on a barycentric grid fine enough to land at
//    least one sample in every sub-cell it crosses (a cell is split into
//    4x4 sub-cells). Per column we accumulate which sub-cells a solid face
//    hit, the z-range of every solid face group, which face owns the lowest
//    sample, and the lowest point of the mouth. Triangles are rasterized in
//    parallel (rayon) into private maps that are then merged; the merge is
//    order-independent (min/max/or), so the result does not depend on
//    scheduling.
//
// 2. `Footprint::classify` compares each counted column with the terrain
//    height and assigns a `ContactKind`. Columns are independent, so this
//    also runs in parallel over read-only grid access.
//
// Columns whose solid coverage is below `coverage_threshold` are reported as
// `NoContact` and do not become bucket occupancy.
//
// Vertical extents are converted to ticks with a small tolerance so that a
// face lying exactly on the terrain surface gives a span whose bottom equals
// the terrain height: zero penetration, classified `NoContact`.
//
// See also: `bucket.rs` for the triangles, `body_soil.rs` which digs and
// carries soil according to the contacts, `grid.rs` for occupancy storage.

use crate::bucket::{BucketSurface, FaceKind, Triangle};
use crate::config::ContactParams;
use crate::error::{SimError, SimResult};
use crate::grid::{BucketSpans, Grid};
use crate::types::{CellCoord, Pose, Span};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sub-cells per side used to estimate coverage.
pub const SUBDIVISIONS: usize = 4;

/// Samples per cell length along a triangle edge. Twice the sub-cell count,
/// so every crossed sub-cell is hit.
const SAMPLES_PER_CELL: f32 = 8.0;

/// Fraction of a tick absorbed when snapping face extents to ticks.
const TICK_TOLERANCE: f32 = 1e-3;

/// How the bucket meets the soil in one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContactKind {
    /// Under-threshold coverage, or the bucket exactly touching the surface.
    NoContact,
    /// Bucket clear above the soil.
    AboveSoil,
    /// The soil surface passes through the bucket span.
    CuttingSoil,
    /// The whole bucket span is below the soil surface.
    BelowSurface,
}

impl ContactKind {
    /// Contacts that displace soil.
    pub fn digs(self) -> bool {
        matches!(self, ContactKind::CuttingSoil | ContactKind::BelowSurface)
    }
}

/// One entry of `cells_under`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellContact {
    pub cell: CellCoord,
    /// Soil above the bucket bottom, in ticks.
    pub penetration: u32,
    pub kind: ContactKind,
    /// Face group owning the lowest point of the bucket in this column.
    pub region: FaceKind,
    /// Lowest bucket span, when the column counts as under the bucket.
    pub span: Option<Span>,
    /// Fraction of the column's footprint hit by a solid face.
    pub coverage: f32,
}

impl CellContact {
    /// Penetration in metres.
    pub fn penetration_depth(&self, cell_height: f32) -> f32 {
        self.penetration as f32 * cell_height
    }
}

/// Bucket extent over one column, in ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct FootprintCell {
    pub coverage: f32,
    /// Solid spans, sorted and disjoint.
    pub spans: BucketSpans,
    pub region: FaceKind,
    /// Lowest tick of the mouth above this column.
    pub ceiling: Option<i32>,
}

impl FootprintCell {
    pub fn lowest(&self) -> Option<Span> {
        self.spans.first().copied()
    }

    /// Ticks of soil the bucket can carry in this column on top of `load`.
    ///
    /// Carried soil rests on the lowest span and may rise to the mouth, or to
    /// the next span if one lies in between.
    pub fn carry_room(&self, load: u32) -> u32 {
        let (Some(lowest), Some(ceiling)) = (self.lowest(), self.ceiling) else {
            return 0;
        };
        let lid = self
            .spans
            .get(1)
            .map_or(ceiling, |upper| upper.bottom.min(ceiling));
        (lid - lowest.top - load as i32).max(0) as u32
    }
}

// ---------------------------------------------------------------------------
// Rasterization
// ---------------------------------------------------------------------------

const GROUPS: usize = 4;

fn group_of(kind: FaceKind) -> Option<usize> {
    match kind {
        FaceKind::Base => Some(0),
        FaceKind::Back => Some(1),
        FaceKind::RightSide => Some(2),
        FaceKind::LeftSide => Some(3),
        FaceKind::Mouth => None,
    }
}

/// Samples gathered over one column.
#[derive(Clone, Debug, Default)]
struct ColumnSamples {
    coverage: u16,
    ranges: [Option<(f32, f32)>; GROUPS],
    lowest: Option<(f32, FaceKind)>,
    mouth_min: Option<f32>,
}

impl ColumnSamples {
    fn add(&mut self, kind: FaceKind, sub_bit: u16, z: f32) {
        match group_of(kind) {
            Some(g) => {
                self.coverage |= sub_bit;
                self.ranges[g] = Some(match self.ranges[g] {
                    Some((lo, hi)) => (lo.min(z), hi.max(z)),
                    None => (z, z),
                });
                self.note_lowest(z, kind);
            }
            None => {
                self.mouth_min = Some(self.mouth_min.map_or(z, |m| m.min(z)));
            }
        }
    }

    fn note_lowest(&mut self, z: f32, kind: FaceKind) {
        let replace = match self.lowest {
            None => true,
            Some((lz, lk)) => z < lz || (z == lz && kind < lk),
        };
        if replace {
            self.lowest = Some((z, kind));
        }
    }

    fn merge(&mut self, other: &ColumnSamples) {
        self.coverage |= other.coverage;
        for g in 0..GROUPS {
            self.ranges[g] = match (self.ranges[g], other.ranges[g]) {
                (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
                (a, b) => a.or(b),
            };
        }
        if let Some((z, kind)) = other.lowest {
            self.note_lowest(z, kind);
        }
        if let Some(m) = other.mouth_min {
            self.mouth_min = Some(self.mouth_min.map_or(m, |s| s.min(m)));
        }
    }

    fn into_cell(self, cell_height: f32) -> Option<FootprintCell> {
        let (_, region) = self.lowest?;
        let mut spans: Vec<Span> = self
            .ranges
            .iter()
            .flatten()
            .map(|&(lo, hi)| {
                let bottom = (lo / cell_height + TICK_TOLERANCE).floor() as i32;
                let top = ((hi / cell_height - TICK_TOLERANCE).ceil() as i32).max(bottom + 1);
                Span::new(bottom, top)
            })
            .collect();
        spans.sort();
        let mut merged = BucketSpans::new();
        for span in spans {
            match merged.last_mut() {
                Some(last) if last.meets(span) => *last = last.union(span),
                _ => merged.push(span),
            }
        }
        Some(FootprintCell {
            coverage: self.coverage.count_ones() as f32 / (SUBDIVISIONS * SUBDIVISIONS) as f32,
            spans: merged,
            region,
            ceiling: self
                .mouth_min
                .map(|m| (m / cell_height + TICK_TOLERANCE).floor() as i32),
        })
    }
}

/// Sample one triangle into per-column accumulators.
fn rasterize_triangle(face: &Triangle, grid: &Grid) -> BTreeMap<CellCoord, ColumnSamples> {
    let cs = grid.cell_size();
    let [a, b, c] = face.vertices;
    let lo = a.min(b).min(c);
    let hi = a.max(b).max(c);
    let first = grid.locate(lo.x, lo.y).offset(-1, -1);
    let last = grid.locate(hi.x, hi.y).offset(1, 1);
    let w = (last.x - first.x + 1) as usize;
    let h = (last.y - first.y + 1) as usize;
    let mut local: Vec<Option<ColumnSamples>> = vec![None; w * h];

    let spacing = cs / SAMPLES_PER_CELL;
    let n = (face.longest_edge() / spacing).ceil().max(1.0) as u32;
    let inv = 1.0 / n as f32;
    for i in 0..=n {
        for j in 0..=(n - i) {
            let p = face.point(i as f32 * inv, j as f32 * inv);
            let cell = grid.locate(p.x, p.y);
            let (lx, ly) = (cell.x - first.x, cell.y - first.y);
            if lx < 0 || ly < 0 || lx as usize >= w || ly as usize >= h {
                continue;
            }
            let slot = &mut local[lx as usize * h + ly as usize];
            let samples = slot.get_or_insert_with(ColumnSamples::default);
            samples.add(face.kind, sub_cell_bit(p.x / cs, p.y / cs), p.z);
        }
    }

    local
        .into_iter()
        .enumerate()
        .filter_map(|(k, s)| {
            s.map(|s| {
                let cell = first.offset((k / h) as i32, (k % h) as i32);
                (cell, s)
            })
        })
        .collect()
}

/// Bit of the sub-cell containing a point given in cell units.
fn sub_cell_bit(u: f32, v: f32) -> u16 {
    let n = SUBDIVISIONS as f32;
    let sx = (((u - u.round()) + 0.5) * n).floor().clamp(0.0, n - 1.0) as usize;
    let sy = (((v - v.round()) + 0.5) * n).floor().clamp(0.0, n - 1.0) as usize;
    1 << (sy * SUBDIVISIONS + sx)
}

// ---------------------------------------------------------------------------
// Footprint
// ---------------------------------------------------------------------------

/// Bucket extent over the lattice for one pose.
#[derive(Clone, Debug, PartialEq)]
pub struct Footprint {
    pose: Pose,
    cells: BTreeMap<CellCoord, FootprintCell>,
    coverage_threshold: f32,
}

impl Footprint {
    /// Rasterize a bucket surface. Fails with `OutOfBounds` if any solid
    /// face reaches past the lattice.
    pub fn rasterize(
        surface: &BucketSurface,
        grid: &Grid,
        params: &ContactParams,
    ) -> SimResult<Self> {
        let per_face: Vec<BTreeMap<CellCoord, ColumnSamples>> = surface
            .faces
            .par_iter()
            .map(|face| rasterize_triangle(face, grid))
            .collect();

        let mut merged: BTreeMap<CellCoord, ColumnSamples> = BTreeMap::new();
        for face_map in &per_face {
            for (cell, samples) in face_map {
                merged.entry(*cell).or_default().merge(samples);
            }
        }

        let mut cells = BTreeMap::new();
        for (cell, samples) in merged {
            let Some(fc) = samples.into_cell(grid.cell_height()) else {
                continue;
            };
            if !grid.in_bounds(cell) {
                return Err(SimError::OutOfBounds {
                    x: cell.x,
                    y: cell.y,
                });
            }
            cells.insert(cell, fc);
        }
        Ok(Self {
            pose: surface.pose,
            cells,
            coverage_threshold: params.coverage_threshold,
        })
    }

    /// Pose of the surface this footprint was rasterized from.
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn cells(&self) -> &BTreeMap<CellCoord, FootprintCell> {
        &self.cells
    }

    /// The column counts as under the bucket.
    pub fn is_counted(&self, cell: &FootprintCell) -> bool {
        cell.coverage >= self.coverage_threshold && !cell.spans.is_empty()
    }

    /// Footprint entry of a counted column.
    pub fn counted(&self, cell: CellCoord) -> Option<&FootprintCell> {
        self.cells.get(&cell).filter(|fc| self.is_counted(fc))
    }

    /// Spans of every counted column, ready for `Grid::set_bucket_occupancy`.
    pub fn occupancy(&self) -> BTreeMap<CellCoord, BucketSpans> {
        self.cells
            .iter()
            .filter(|(_, fc)| self.is_counted(fc))
            .map(|(cell, fc)| (*cell, fc.spans.clone()))
            .collect()
    }

    /// Classify every column of the footprint against the terrain.
    pub fn classify(&self, grid: &Grid) -> SimResult<Vec<CellContact>> {
        let entries: Vec<(&CellCoord, &FootprintCell)> = self.cells.iter().collect();
        entries
            .par_iter()
            .map(|(cell, fc)| {
                let height = grid.height_ticks(**cell)?;
                Ok(self.contact_for(**cell, fc, height))
            })
            .collect()
    }

    fn contact_for(&self, cell: CellCoord, fc: &FootprintCell, height: i32) -> CellContact {
        let lowest = fc.lowest().filter(|_| self.is_counted(fc));
        let (kind, penetration) = match lowest {
            None => (ContactKind::NoContact, 0),
            Some(span) if span.bottom > height => (ContactKind::AboveSoil, 0),
            Some(span) if span.bottom == height => (ContactKind::NoContact, 0),
            Some(span) if height <= span.top => {
                (ContactKind::CuttingSoil, (height - span.bottom) as u32)
            }
            Some(span) => (ContactKind::BelowSurface, (height - span.bottom) as u32),
        };
        CellContact {
            cell,
            penetration,
            kind,
            region: fc.region,
            span: lowest,
            coverage: fc.coverage,
        }
    }
}

/// All columns under a bucket surface with their contact classification,
/// in grid-scan order.
pub fn cells_under(
    surface: &BucketSurface,
    grid: &Grid,
    params: &ContactParams,
) -> SimResult<Vec<CellContact>> {
    Footprint::rasterize(surface, grid, params)?.classify(grid)
}
