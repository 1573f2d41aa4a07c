// Terrain lattice: one soil column per cell.
//
// The grid is a regular lattice centred on the origin. With
// `half_nx = round(half_length_x / cell_size)` there are `2 * half_nx + 1`
// columns along x, and cell `i` sits at `x = (i - half_nx) * cell_size`
// (likewise for y). Columns are stored flat, x-major:
// `index = x * size_y + y`, which is also the `Ord` of `CellCoord` and
// therefore the "grid-scan order" used by relaxation.
//
// Each column holds:
// - a stack of `SoilLayer`s from the floor (`-depth`) upward, inline for
//   the common case of a handful of layers (`smallvec`);
// - the cached height of the top of that stack, in ticks;
// - the bucket spans occupying the column during the current step.
//
// Invariant: layers are contiguous from the floor, so
// `height == floor + sum(thickness)`. Every mutation goes through
// `add_layer`/`remove_top`, which keep the cached height in step.
//
// All coordinate-taking operations validate bounds and fail with
// `SimError::OutOfBounds` instead of clamping.
//
// Between `begin_journal` and `commit_journal`/`rollback_journal` the grid
// keeps the pre-change copy of every column it modifies, so a step can be
// undone and its changed columns listed without copying or scanning the
// whole lattice.
//
// `deposit` is the one place that decides where displaced soil may land: it
// never raises terrain into a bucket span, and spreads whatever does not fit
// breadth-first over neighbors.
//
// See also: `relax.rs` for the avalanche pass over these columns,
// `intersect.rs` which computes the bucket spans written by
// `set_bucket_occupancy`, `body_soil.rs` for soil carried above the spans.

use crate::config::GridConfig;
use crate::error::{SimError, SimResult};
use crate::types::{CellCoord, NEIGHBOR_OFFSETS, SoilLayer, SoilStatus, Span};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Layers per column before the oldest moved layers are fused.
pub const MAX_LAYERS: usize = 8;

pub type LayerStack = SmallVec<[SoilLayer; 4]>;
pub type BucketSpans = SmallVec<[Span; 2]>;
pub type Neighbors = SmallVec<[CellCoord; 4]>;

/// One terrain column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    layers: LayerStack,
    height: i32,
    bucket: BucketSpans,
}

impl Column {
    fn solid(floor: i32, height: i32, origin: CellCoord) -> Self {
        let mut layers = LayerStack::new();
        if height > floor {
            layers.push(SoilLayer::new(
                SoilStatus::Original,
                (height - floor) as u32,
                origin,
            ));
        }
        Self {
            layers,
            height: height.max(floor),
            bucket: BucketSpans::new(),
        }
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn layers(&self) -> &[SoilLayer] {
        &self.layers
    }

    pub fn bucket(&self) -> &[Span] {
        &self.bucket
    }

    /// Ticks of terrain this column can still take without reaching the
    /// bucket. `None` means no bucket overhead.
    pub fn room_below_bucket(&self) -> Option<u32> {
        self.bucket
            .first()
            .map(|span| (span.bottom - self.height).max(0) as u32)
    }

    fn push_layer(&mut self, layer: SoilLayer) {
        if layer.thickness == 0 {
            return;
        }
        self.height += layer.thickness as i32;
        if let Some(top) = self.layers.last_mut().filter(|top| top.merges_with(&layer)) {
            top.thickness += layer.thickness;
            return;
        }
        self.layers.push(layer);
        if self.layers.len() > MAX_LAYERS {
            self.compact();
        }
    }

    /// Fuse the lowest adjacent pair of non-original layers. Provenance of
    /// the upper one is lost; the total thickness is kept. Without such a
    /// pair the bottom two fuse, and moved soil is never relabelled original.
    fn compact(&mut self) {
        let disturbed = |layer: &SoilLayer| layer.status != SoilStatus::Original;
        let pair = (0..self.layers.len() - 1)
            .find(|&i| disturbed(&self.layers[i]) && disturbed(&self.layers[i + 1]))
            .unwrap_or(0);
        let upper = self.layers.remove(pair + 1);
        let lower = &mut self.layers[pair];
        lower.thickness += upper.thickness;
        if lower.status == SoilStatus::Original && disturbed(&upper) {
            lower.status = upper.status;
            lower.origin = upper.origin;
        }
    }

    fn pop_ticks(&mut self, amount: u32, floor: i32) -> LayerStack {
        let mut removed = LayerStack::new();
        let available = (self.height - floor).max(0) as u32;
        let mut remaining = amount.min(available);
        while remaining > 0 {
            let Some(top) = self.layers.last_mut() else {
                break;
            };
            let take = remaining.min(top.thickness);
            removed.push(SoilLayer::new(top.status, take, top.origin));
            top.thickness -= take;
            if top.thickness == 0 {
                self.layers.pop();
            }
            self.height -= take as i32;
            remaining -= take;
        }
        removed
    }
}

/// Terrain lattice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    columns: Vec<Column>,
    size_x: u32,
    size_y: u32,
    half_x: i32,
    half_y: i32,
    cell_size: f32,
    cell_height: f32,
    /// Lowest soil level in ticks (`-depth`).
    floor: i32,
    /// Flat indices of columns with bucket spans, for cheap clearing.
    occupied: Vec<usize>,
    #[serde(skip)]
    journal: Option<Journal>,
}

/// Undo record for the columns modified since `Grid::begin_journal`.
#[derive(Clone, Debug, Default, PartialEq)]
struct Journal {
    columns: BTreeMap<usize, Column>,
    occupied: Vec<usize>,
}

impl Grid {
    /// Flat terrain at z = 0 over the configured extent.
    pub fn new(config: &GridConfig) -> SimResult<Self> {
        if !(config.cell_size > 0.0 && config.cell_height > 0.0) {
            return Err(SimError::InvalidConfig(
                "cell dimensions must be positive".into(),
            ));
        }
        if config.cell_height > config.cell_size {
            return Err(SimError::InvalidConfig(format!(
                "cell_height ({}) must not exceed cell_size ({})",
                config.cell_height, config.cell_size
            )));
        }
        let half_x = (config.half_length_x / config.cell_size).round() as i32;
        let half_y = (config.half_length_y / config.cell_size).round() as i32;
        let floor = -(config.depth / config.cell_height).round() as i32;
        if half_x < 1 || half_y < 1 || floor >= 0 {
            return Err(SimError::InvalidConfig(
                "grid must be at least 3x3 cells with positive depth".into(),
            ));
        }
        let size_x = (2 * half_x + 1) as u32;
        let size_y = (2 * half_y + 1) as u32;
        let mut columns = Vec::with_capacity(size_x as usize * size_y as usize);
        for x in 0..size_x as i32 {
            for y in 0..size_y as i32 {
                columns.push(Column::solid(floor, 0, CellCoord::new(x, y)));
            }
        }
        Ok(Self {
            columns,
            size_x,
            size_y,
            half_x,
            half_y,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
            floor,
            occupied: Vec::new(),
            journal: None,
        })
    }

    // -----------------------------------------------------------------------
    // Geometry and indexing
    // -----------------------------------------------------------------------

    pub fn size_x(&self) -> u32 {
        self.size_x
    }

    pub fn size_y(&self) -> u32 {
        self.size_y
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn cell_height(&self) -> f32 {
        self.cell_height
    }

    /// Floor of the diggable soil, in ticks.
    pub fn floor(&self) -> i32 {
        self.floor
    }

    /// Volume of one tick of soil in one column (m³).
    pub fn cell_volume(&self) -> f64 {
        self.cell_size as f64 * self.cell_size as f64 * self.cell_height as f64
    }

    pub fn in_bounds(&self, cell: CellCoord) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as u32) < self.size_x && (cell.y as u32) < self.size_y
    }

    /// Flat index of an in-bounds cell.
    pub fn index(&self, cell: CellCoord) -> Option<usize> {
        self.in_bounds(cell)
            .then(|| cell.x as usize * self.size_y as usize + cell.y as usize)
    }

    fn checked_index(&self, cell: CellCoord) -> SimResult<usize> {
        self.index(cell).ok_or(SimError::OutOfBounds {
            x: cell.x,
            y: cell.y,
        })
    }

    pub fn coord_of(&self, index: usize) -> CellCoord {
        let sy = self.size_y as usize;
        CellCoord::new((index / sy) as i32, (index % sy) as i32)
    }

    /// Cell containing a world-space point, without a bounds check.
    pub fn locate(&self, x: f32, y: f32) -> CellCoord {
        CellCoord::new(
            (x / self.cell_size).round() as i32 + self.half_x,
            (y / self.cell_size).round() as i32 + self.half_y,
        )
    }

    /// Cell containing a world-space point.
    pub fn cell_at(&self, x: f32, y: f32) -> SimResult<CellCoord> {
        let cell = self.locate(x, y);
        if self.in_bounds(cell) {
            Ok(cell)
        } else {
            Err(SimError::PositionOutOfBounds { x, y })
        }
    }

    /// World-space centre of a cell.
    pub fn cell_center(&self, cell: CellCoord) -> (f32, f32) {
        (
            (cell.x - self.half_x) as f32 * self.cell_size,
            (cell.y - self.half_y) as f32 * self.cell_size,
        )
    }

    /// Nearest tick to a height in metres.
    pub fn to_ticks(&self, z: f32) -> i32 {
        (z / self.cell_height).round() as i32
    }

    pub fn to_metres(&self, ticks: i32) -> f32 {
        ticks as f32 * self.cell_height
    }

    /// In-bounds 4-connected neighbors in the order +x, -x, +y, -y.
    pub fn neighbors(&self, cell: CellCoord) -> SimResult<Neighbors> {
        self.checked_index(cell)?;
        Ok(self.neighbors_of_valid(cell))
    }

    pub(crate) fn neighbors_of_valid(&self, cell: CellCoord) -> Neighbors {
        NEIGHBOR_OFFSETS
            .iter()
            .map(|&(dx, dy)| cell.offset(dx, dy))
            .filter(|&n| self.in_bounds(n))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Column access
    // -----------------------------------------------------------------------

    pub fn column(&self, cell: CellCoord) -> SimResult<&Column> {
        let i = self.checked_index(cell)?;
        Ok(&self.columns[i])
    }

    pub fn column_at_index(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Columns in grid-scan order.
    pub fn columns(&self) -> impl Iterator<Item = (CellCoord, &Column)> + '_ {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (self.coord_of(i), c))
    }

    /// Terrain height in ticks.
    pub fn height_ticks(&self, cell: CellCoord) -> SimResult<i32> {
        Ok(self.column(cell)?.height)
    }

    /// Terrain height in metres.
    pub fn height_at(&self, cell: CellCoord) -> SimResult<f32> {
        Ok(self.to_metres(self.height_ticks(cell)?))
    }

    /// Layer stack of a column, bottom to top.
    pub fn layers_at(&self, cell: CellCoord) -> SimResult<&[SoilLayer]> {
        Ok(self.column(cell)?.layers())
    }

    /// Put a layer on top of a column. Zero-thickness layers are ignored.
    pub fn add_layer(&mut self, cell: CellCoord, layer: SoilLayer) -> SimResult<()> {
        let i = self.checked_index(cell)?;
        self.column_mut(i).push_layer(layer);
        Ok(())
    }

    /// Take up to `amount` ticks off the top of a column.
    ///
    /// The request is truncated to the soil above the floor. The removed
    /// pieces are returned top-down with their status and provenance.
    pub fn remove_top(&mut self, cell: CellCoord, amount: u32) -> SimResult<LayerStack> {
        let i = self.checked_index(cell)?;
        let floor = self.floor;
        Ok(self.column_mut(i).pop_ticks(amount, floor))
    }

    /// Replace a column by undisturbed soil up to `height` ticks. Used when
    /// generating the initial terrain.
    pub fn reset_column(&mut self, cell: CellCoord, height: i32) -> SimResult<()> {
        let i = self.checked_index(cell)?;
        let floor = self.floor;
        let column = self.column_mut(i);
        let bucket = std::mem::take(&mut column.bucket);
        *column = Column::solid(floor, height, cell);
        column.bucket = bucket;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bucket occupancy
    // -----------------------------------------------------------------------

    pub fn bucket_spans(&self, cell: CellCoord) -> SimResult<&[Span]> {
        Ok(self.column(cell)?.bucket())
    }

    /// Replace the bucket occupancy for this step. Every cell is validated
    /// before anything is written.
    pub fn set_bucket_occupancy(
        &mut self,
        spans: &BTreeMap<CellCoord, BucketSpans>,
    ) -> SimResult<()> {
        let mut indices = Vec::with_capacity(spans.len());
        for &cell in spans.keys() {
            indices.push(self.checked_index(cell)?);
        }
        self.clear_bucket_occupancy();
        for (i, cell_spans) in indices.into_iter().zip(spans.values()) {
            if cell_spans.is_empty() {
                continue;
            }
            self.column_mut(i).bucket = cell_spans.clone();
            self.occupied.push(i);
        }
        Ok(())
    }

    pub fn clear_bucket_occupancy(&mut self) {
        for i in std::mem::take(&mut self.occupied) {
            self.column_mut(i).bucket.clear();
        }
    }

    /// Cells with bucket spans, in grid-scan order.
    pub fn occupied_cells(&self) -> Vec<CellCoord> {
        let mut cells: Vec<CellCoord> = self.occupied.iter().map(|&i| self.coord_of(i)).collect();
        cells.sort();
        cells
    }

    // -----------------------------------------------------------------------
    // Displaced soil
    // -----------------------------------------------------------------------

    /// Land `amount` ticks of displaced soil as near to `start` as possible.
    ///
    /// A column takes soil up to the bottom of its lowest bucket span, or
    /// without limit when the bucket is absent. Leftovers spread breadth-first
    /// over neighbors. Returns where the soil went, in placement order.
    pub fn deposit(
        &mut self,
        start: CellCoord,
        amount: u32,
        origin: CellCoord,
    ) -> SimResult<Vec<(CellCoord, u32)>> {
        self.checked_index(start)?;
        let mut placed = Vec::new();
        let mut remaining = amount;
        if remaining == 0 {
            return Ok(placed);
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(cell) = queue.pop_front() {
            let i = cell.x as usize * self.size_y as usize + cell.y as usize;
            let room = self.columns[i].room_below_bucket().unwrap_or(u32::MAX);
            let take = remaining.min(room);
            if take > 0 {
                self.column_mut(i).push_layer(SoilLayer::moved(take, origin));
                placed.push((cell, take));
                remaining -= take;
                if remaining == 0 {
                    break;
                }
            }
            for n in self.neighbors_of_valid(cell) {
                if visited.insert(n) {
                    queue.push_back(n);
                }
            }
        }

        if remaining > 0 {
            log::warn!("no free column for {remaining} ticks of soil; leaving them at {start}");
            let i = self.checked_index(start)?;
            self.column_mut(i).push_layer(SoilLayer::moved(remaining, origin));
            placed.push((start, remaining));
        }
        Ok(placed)
    }

    // -----------------------------------------------------------------------
    // Change journal
    // -----------------------------------------------------------------------

    /// Start recording modified columns. Any open journal is discarded.
    pub fn begin_journal(&mut self) {
        self.journal = Some(Journal {
            columns: BTreeMap::new(),
            occupied: self.occupied.clone(),
        });
    }

    /// Close the journal, keeping every change. Returns the cells whose
    /// height differs from when the journal was opened.
    pub fn commit_journal(&mut self) -> BTreeSet<CellCoord> {
        let Some(journal) = self.journal.take() else {
            return BTreeSet::new();
        };
        journal
            .columns
            .iter()
            .filter(|(i, before)| before.height != self.columns[**i].height)
            .map(|(&i, _)| self.coord_of(i))
            .collect()
    }

    /// Close the journal, restoring every column it recorded.
    pub fn rollback_journal(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (i, column) in journal.columns {
            self.columns[i] = column;
        }
        self.occupied = journal.occupied;
    }

    fn column_mut(&mut self, i: usize) -> &mut Column {
        if let Some(journal) = self.journal.as_mut() {
            let columns = &self.columns;
            journal.columns.entry(i).or_insert_with(|| columns[i].clone());
        }
        &mut self.columns[i]
    }

    // -----------------------------------------------------------------------
    // Totals
    // -----------------------------------------------------------------------

    /// Soil above the floor, summed over all columns, in ticks.
    pub fn total_ticks(&self) -> i64 {
        self.columns
            .iter()
            .map(|c| (c.height - self.floor) as i64)
            .sum()
    }

    /// Soil volume above the floor (m³).
    pub fn soil_volume(&self) -> f64 {
        self.total_ticks() as f64 * self.cell_volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> Grid {
        Grid::new(&GridConfig {
            half_length_x: 0.5,
            half_length_y: 0.3,
            depth: 0.2,
            cell_size: 0.1,
            cell_height: 0.05,
        })
        .unwrap()
    }

    #[test]
    fn lattice_is_centred() {
        let grid = small_grid();
        assert_eq!(grid.size_x(), 11);
        assert_eq!(grid.size_y(), 7);
        assert_eq!(grid.floor(), -4);
        let centre = grid.cell_at(0.0, 0.0).unwrap();
        assert_eq!(centre, CellCoord::new(5, 3));
        let (x, y) = grid.cell_center(CellCoord::new(0, 0));
        assert!((x + 0.5).abs() < 1e-6 && (y + 0.3).abs() < 1e-6);
        assert_eq!(grid.cell_at(0.04, -0.26).unwrap(), CellCoord::new(5, 0));
    }

    #[test]
    fn rejects_cell_height_above_size() {
        let err = Grid::new(&GridConfig {
            cell_height: 0.2,
            ..GridConfig::default()
        });
        assert!(matches!(err, Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let mut grid = small_grid();
        let outside = CellCoord::new(11, 0);
        assert_eq!(
            grid.height_at(outside),
            Err(SimError::OutOfBounds { x: 11, y: 0 })
        );
        assert!(grid.add_layer(outside, SoilLayer::moved(1, outside)).is_err());
        assert!(grid.remove_top(CellCoord::new(-1, 2), 1).is_err());
        assert!(grid.neighbors(CellCoord::new(0, 7)).is_err());
        assert!(matches!(
            grid.cell_at(2.0, 0.0),
            Err(SimError::PositionOutOfBounds { .. })
        ));
    }

    #[test]
    fn flat_start_has_one_original_layer() {
        let grid = small_grid();
        let cell = CellCoord::new(2, 2);
        assert_eq!(grid.height_ticks(cell).unwrap(), 0);
        let layers = grid.layers_at(cell).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].status, SoilStatus::Original);
        assert_eq!(layers[0].thickness, 4);
    }

    #[test]
    fn add_layer_updates_cached_height_and_merges() {
        let mut grid = small_grid();
        let cell = CellCoord::new(3, 3);
        let origin = CellCoord::new(4, 3);
        grid.add_layer(cell, SoilLayer::moved(2, origin)).unwrap();
        grid.add_layer(cell, SoilLayer::moved(3, origin)).unwrap();
        assert_eq!(grid.height_ticks(cell).unwrap(), 5);
        assert_eq!(grid.layers_at(cell).unwrap().len(), 2);
        assert!((grid.height_at(cell).unwrap() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn remove_top_returns_pieces_top_down() {
        let mut grid = small_grid();
        let cell = CellCoord::new(3, 3);
        let origin = CellCoord::new(0, 0);
        grid.add_layer(cell, SoilLayer::moved(2, origin)).unwrap();
        let removed = grid.remove_top(cell, 3).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0], SoilLayer::moved(2, origin));
        assert_eq!(removed[1].status, SoilStatus::Original);
        assert_eq!(removed[1].thickness, 1);
        assert_eq!(grid.height_ticks(cell).unwrap(), -1);
    }

    #[test]
    fn digging_past_the_floor_truncates() {
        let mut grid = small_grid();
        let cell = CellCoord::new(1, 1);
        let removed = grid.remove_top(cell, 100).unwrap();
        let total: u32 = removed.iter().map(|l| l.thickness).sum();
        assert_eq!(total, 4);
        assert_eq!(grid.height_ticks(cell).unwrap(), grid.floor());
        assert!(grid.remove_top(cell, 1).unwrap().is_empty());
        assert!(grid.layers_at(cell).unwrap().is_empty());
    }

    #[test]
    fn stack_is_bounded() {
        let mut grid = small_grid();
        let cell = CellCoord::new(5, 3);
        for i in 0..20 {
            grid.add_layer(cell, SoilLayer::moved(1, CellCoord::new(i % 11, 0)))
                .unwrap();
        }
        let layers = grid.layers_at(cell).unwrap();
        assert!(layers.len() <= MAX_LAYERS);
        let sum: u32 = layers.iter().map(|l| l.thickness).sum();
        assert_eq!(grid.height_ticks(cell).unwrap(), grid.floor() + sum as i32);
        assert_eq!(grid.height_ticks(cell).unwrap(), 20);
    }

    #[test]
    fn compaction_never_relabels_moved_soil() {
        let mut grid = small_grid();
        let cell = CellCoord::new(5, 3);
        let source = CellCoord::new(0, 0);
        for k in 0..8 {
            let layer = if k % 2 == 0 {
                SoilLayer::moved(1, source)
            } else {
                SoilLayer::new(SoilStatus::Original, 1, cell)
            };
            grid.add_layer(cell, layer).unwrap();
        }
        let layers = grid.layers_at(cell).unwrap();
        assert_eq!(layers.len(), MAX_LAYERS);
        let ticks = |status: SoilStatus| -> u32 {
            layers
                .iter()
                .filter(|l| l.status == status)
                .map(|l| l.thickness)
                .sum()
        };
        assert!(ticks(SoilStatus::Moved) >= 4);
        assert_eq!(ticks(SoilStatus::Moved) + ticks(SoilStatus::Original), 12);
        assert_eq!(grid.height_ticks(cell).unwrap(), 8);
    }

    #[test]
    fn neighbors_follow_fixed_order() {
        let grid = small_grid();
        let n = grid.neighbors(CellCoord::new(5, 3)).unwrap();
        assert_eq!(
            n.as_slice(),
            &[
                CellCoord::new(6, 3),
                CellCoord::new(4, 3),
                CellCoord::new(5, 4),
                CellCoord::new(5, 2)
            ]
        );
        let corner = grid.neighbors(CellCoord::new(0, 0)).unwrap();
        assert_eq!(
            corner.as_slice(),
            &[CellCoord::new(1, 0), CellCoord::new(0, 1)]
        );
    }

    #[test]
    fn occupancy_is_replaced_each_step() {
        let mut grid = small_grid();
        let a = CellCoord::new(2, 2);
        let b = CellCoord::new(3, 2);
        let mut spans = BTreeMap::new();
        spans.insert(a, BucketSpans::from_slice(&[Span::new(1, 3)]));
        grid.set_bucket_occupancy(&spans).unwrap();
        assert_eq!(grid.bucket_spans(a).unwrap(), &[Span::new(1, 3)]);

        let mut next = BTreeMap::new();
        next.insert(b, BucketSpans::from_slice(&[Span::new(0, 2)]));
        grid.set_bucket_occupancy(&next).unwrap();
        assert!(grid.bucket_spans(a).unwrap().is_empty());
        assert_eq!(grid.occupied_cells(), vec![b]);

        let mut bad = BTreeMap::new();
        bad.insert(CellCoord::new(40, 0), BucketSpans::from_slice(&[Span::new(0, 1)]));
        assert!(grid.set_bucket_occupancy(&bad).is_err());
        assert_eq!(grid.occupied_cells(), vec![b], "failed update leaves state untouched");
    }

    #[test]
    fn journal_lists_only_columns_that_changed_height() {
        let mut grid = small_grid();
        let dug = CellCoord::new(1, 1);
        let filled = CellCoord::new(4, 2);
        let covered = CellCoord::new(2, 4);
        let mut spans = BTreeMap::new();
        spans.insert(covered, BucketSpans::from_slice(&[Span::new(1, 3)]));

        grid.begin_journal();
        grid.set_bucket_occupancy(&spans).unwrap();
        grid.remove_top(dug, 2).unwrap();
        grid.deposit(filled, 2, dug).unwrap();
        grid.remove_top(CellCoord::new(0, 0), 0).unwrap();
        let changed = grid.commit_journal();

        assert_eq!(changed, BTreeSet::from([dug, filled]));
        assert!(grid.commit_journal().is_empty(), "journal is closed");
    }

    #[test]
    fn rollback_restores_columns_and_occupancy() {
        let mut grid = small_grid();
        let cell = CellCoord::new(3, 3);
        let before = grid.clone();
        let mut spans = BTreeMap::new();
        spans.insert(cell, BucketSpans::from_slice(&[Span::new(2, 4)]));

        grid.begin_journal();
        grid.set_bucket_occupancy(&spans).unwrap();
        grid.deposit(cell, 5, cell).unwrap();
        grid.add_layer(CellCoord::new(0, 6), SoilLayer::moved(3, cell)).unwrap();
        grid.rollback_journal();

        assert_eq!(grid, before);
        assert!(grid.occupied_cells().is_empty());
    }

    #[test]
    fn deposit_fills_under_bucket_then_spreads() {
        let mut grid = small_grid();
        let start = CellCoord::new(5, 3);
        let mut spans = BTreeMap::new();
        spans.insert(start, BucketSpans::from_slice(&[Span::new(2, 4)]));
        spans.insert(CellCoord::new(6, 3), BucketSpans::from_slice(&[Span::new(0, 4)]));
        grid.set_bucket_occupancy(&spans).unwrap();

        let before = grid.total_ticks();
        let placed = grid.deposit(start, 5, start).unwrap();
        assert_eq!(placed[0], (start, 2), "fills up to the span bottom");
        assert_eq!(
            placed[1],
            (CellCoord::new(4, 3), 3),
            "+x neighbour is blocked, -x is next"
        );
        assert_eq!(grid.total_ticks(), before + 5);
        assert_eq!(grid.height_ticks(start).unwrap(), 2);
    }

    #[test]
    fn totals_track_volume() {
        let mut grid = small_grid();
        let cells = (grid.size_x() * grid.size_y()) as i64;
        assert_eq!(grid.total_ticks(), cells * 4);
        grid.remove_top(CellCoord::new(0, 0), 2).unwrap();
        assert_eq!(grid.total_ticks(), cells * 4 - 2);
        let expected = (cells * 4 - 2) as f64 * grid.cell_volume();
        assert!((grid.soil_volume() - expected).abs() < 1e-9);
    }
}
