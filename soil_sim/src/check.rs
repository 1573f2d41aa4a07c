// Consistency checks over the grid and the carried soil.
//
// Both checks are read-only and optional; the orchestrator runs them after
// each step when `RunOptions::check_outputs` is set, and tests call them
// directly. A failure is a `SimError` diagnostic (`VolumeMismatch` or
// `Inconsistent`), never corrected in place: masking it would hide a
// modelling bug.

use crate::body_soil::BodySoil;
use crate::error::{SimError, SimResult};
use crate::grid::{Grid, MAX_LAYERS};
use crate::intersect::Footprint;

/// Compare terrain plus carried volume with `expected` (m³). The tolerance
/// is half a tick of one column.
pub fn check_volume(grid: &Grid, body: &BodySoil, expected: f64) -> SimResult<()> {
    let cell_volume = grid.cell_volume();
    let actual = grid.soil_volume() + body.volume(cell_volume);
    if (actual - expected).abs() > 0.5 * cell_volume {
        return Err(SimError::VolumeMismatch { expected, actual });
    }
    Ok(())
}

/// Structural rules of the grid and the carried soil.
///
/// When `footprint` is given it must be the one whose occupancy is written
/// to the grid; carried loads are then checked against its carrying room.
pub fn check_soil(grid: &Grid, body: &BodySoil, footprint: Option<&Footprint>) -> SimResult<()> {
    match soil_issues(grid, body, footprint).into_iter().next() {
        Some(issue) => Err(SimError::Inconsistent(issue)),
        None => Ok(()),
    }
}

/// Every rule violation found, in grid-scan order then parcel order.
pub fn soil_issues(grid: &Grid, body: &BodySoil, footprint: Option<&Footprint>) -> Vec<String> {
    let mut issues = Vec::new();

    for (cell, column) in grid.columns() {
        let layers = column.layers();
        let sum: i64 = layers.iter().map(|l| l.thickness as i64).sum();
        if grid.floor() as i64 + sum != column.height() as i64 {
            issues.push(format!(
                "column {cell}: layers sum to {sum} ticks but height is {}",
                column.height()
            ));
        }
        if layers.iter().any(|l| l.thickness == 0) {
            issues.push(format!("column {cell}: zero-thickness layer"));
        }
        if layers.len() > MAX_LAYERS {
            issues.push(format!("column {cell}: {} layers", layers.len()));
        }

        let spans = column.bucket();
        if spans.iter().any(|s| s.bottom >= s.top) {
            issues.push(format!("column {cell}: empty bucket span"));
        }
        if spans.windows(2).any(|w| w[0].top >= w[1].bottom) {
            issues.push(format!("column {cell}: bucket spans overlap or are unsorted"));
        }
        if let Some(lowest) = spans.first().filter(|s| column.height() > s.bottom) {
            issues.push(format!(
                "column {cell}: terrain at {} is inside the bucket (bottom {})",
                column.height(),
                lowest.bottom
            ));
        }
    }

    for (i, parcel) in body.parcels().iter().enumerate() {
        if parcel.amount == 0 {
            issues.push(format!("parcel {i}: empty"));
        }
        match grid.bucket_spans(parcel.cell) {
            Ok(spans) if !spans.is_empty() => {}
            Ok(_) => issues.push(format!(
                "parcel {i}: column {} has no bucket to rest on",
                parcel.cell
            )),
            Err(e) => issues.push(format!("parcel {i}: {e}")),
        }
    }

    if let Some(footprint) = footprint {
        for (cell, load) in body.loads() {
            let room = footprint.counted(cell).map_or(0, |fc| fc.carry_room(0));
            if load > room {
                issues.push(format!(
                    "column {cell}: carries {load} ticks, room for {room}"
                ));
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::grid::BucketSpans;
    use crate::types::{CellCoord, SoilLayer, Span};
    use std::collections::BTreeMap;

    fn grid() -> Grid {
        Grid::new(&GridConfig {
            half_length_x: 0.3,
            half_length_y: 0.3,
            depth: 0.1,
            cell_size: 0.1,
            cell_height: 0.05,
        })
        .unwrap()
    }

    #[test]
    fn fresh_grid_is_consistent() {
        let grid = grid();
        let body = BodySoil::new();
        check_soil(&grid, &body, None).unwrap();
        check_volume(&grid, &body, grid.soil_volume()).unwrap();
    }

    #[test]
    fn added_soil_is_a_volume_mismatch() {
        let mut grid = grid();
        let body = BodySoil::new();
        let expected = grid.soil_volume();
        grid.add_layer(CellCoord::new(1, 1), SoilLayer::moved(1, CellCoord::new(1, 1)))
            .unwrap();
        let err = check_volume(&grid, &body, expected).unwrap_err();
        assert!(matches!(err, SimError::VolumeMismatch { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn terrain_inside_the_bucket_is_reported() {
        let mut grid = grid();
        let cell = CellCoord::new(2, 2);
        let mut spans = BTreeMap::new();
        spans.insert(cell, BucketSpans::from_slice(&[Span::new(-1, 2)]));
        grid.set_bucket_occupancy(&spans).unwrap();
        let issues = soil_issues(&grid, &BodySoil::new(), None);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("inside the bucket"));
        assert!(matches!(
            check_soil(&grid, &BodySoil::new(), None),
            Err(SimError::Inconsistent(_))
        ));
    }

    #[test]
    fn overlapping_spans_are_reported() {
        let mut grid = grid();
        let mut spans = BTreeMap::new();
        spans.insert(
            CellCoord::new(0, 0),
            BucketSpans::from_slice(&[Span::new(1, 4), Span::new(3, 6)]),
        );
        grid.set_bucket_occupancy(&spans).unwrap();
        let issues = soil_issues(&grid, &BodySoil::new(), None);
        assert!(issues.iter().any(|i| i.contains("overlap")));
    }
}
