// Per-step state export.
//
// A `Snapshot` is a self-contained, serde-serializable copy of what an
// external sink needs after a stabilized step: terrain heights, carried
// soil, layer provenance of disturbed soil, and the bucket pose and corners.
// Everything is in metres and world frame except the provenance rows, which
// keep lattice indices.
//
// The row types implement `Row`, a minimal tabular interface (a header plus
// one comma-separated line per row) that the runner uses to write CSV files.
// The library itself performs no file I/O.

use crate::body_soil::BodySoil;
use crate::bucket::{BucketCorners, BucketGeometry};
use crate::error::{SimError, SimResult};
use crate::grid::Grid;
use crate::types::{CellCoord, Pose, SoilStatus};
use serde::{Deserialize, Serialize};

/// One record of a tabular export.
pub trait Row {
    const HEADER: &'static str;

    fn line(&self) -> String;
}

/// Terrain surface at a cell centre.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainRow {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Row for TerrainRow {
    const HEADER: &'static str = "x,y,z";

    fn line(&self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }
}

/// One carried parcel. A column holding soil dug from several places gets
/// one row per parcel, all at the same `x, y`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodySoilRow {
    pub x: f32,
    pub y: f32,
    /// Bottom of the carried soil (top of the bucket plate).
    pub z: f32,
    /// Thickness of the carried soil in metres.
    pub h: f32,
    pub status: SoilStatus,
    pub origin: CellCoord,
}

impl Row for BodySoilRow {
    const HEADER: &'static str = "x,y,z,h,status,origin_i,origin_j";

    fn line(&self) -> String {
        format!(
            "{},{},{},{},{:?},{},{}",
            self.x, self.y, self.z, self.h, self.status, self.origin.x, self.origin.y
        )
    }
}

/// A disturbed layer of a column's stack.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerRow {
    pub cell: CellCoord,
    /// Position in the stack, 0 at the floor.
    pub level: usize,
    pub status: SoilStatus,
    pub thickness: f32,
    pub origin: CellCoord,
}

impl Row for LayerRow {
    const HEADER: &'static str = "i,j,level,status,thickness,origin_i,origin_j";

    fn line(&self) -> String {
        format!(
            "{},{},{},{:?},{},{},{}",
            self.cell.x,
            self.cell.y,
            self.level,
            self.status,
            self.thickness,
            self.origin.x,
            self.origin.y
        )
    }
}

/// Bucket pose and corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketRow {
    pub pose: Pose,
    pub corners: BucketCorners,
}

impl Row for BucketRow {
    const HEADER: &'static str = "corner,x,y,z";

    fn line(&self) -> String {
        const NAMES: [&str; 6] = [
            "joint_right",
            "joint_left",
            "base_right",
            "base_left",
            "teeth_right",
            "teeth_left",
        ];
        NAMES
            .iter()
            .zip(self.corners.as_array())
            .map(|(name, c)| format!("{name},{},{},{}", c.x, c.y, c.z))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// State after one stabilized step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: u64,
    pub bucket: Option<BucketRow>,
    pub terrain: Vec<TerrainRow>,
    pub body_soil: Vec<BodySoilRow>,
    pub layers: Vec<LayerRow>,
    /// Terrain plus carried volume (m³).
    pub volume: f64,
}

impl Snapshot {
    pub fn capture(
        step: u64,
        grid: &Grid,
        body: &BodySoil,
        bucket: &BucketGeometry,
        pose: Option<&Pose>,
    ) -> Self {
        let terrain = grid
            .columns()
            .map(|(cell, column)| {
                let (x, y) = grid.cell_center(cell);
                TerrainRow {
                    x,
                    y,
                    z: grid.to_metres(column.height()),
                }
            })
            .collect();

        let body_soil = match pose {
            Some(pose) => body
                .parcels()
                .iter()
                .map(|p| {
                    let world = pose.transform_point(p.local);
                    let (x, y) = grid.cell_center(p.cell);
                    let layer = p.layer();
                    BodySoilRow {
                        x,
                        y,
                        z: world.z,
                        h: grid.to_metres(layer.thickness as i32),
                        status: layer.status,
                        origin: layer.origin,
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let mut layers = Vec::new();
        for (cell, column) in grid.columns() {
            for (level, layer) in column.layers().iter().enumerate() {
                if layer.status == SoilStatus::Original && layer.origin == cell {
                    continue;
                }
                layers.push(LayerRow {
                    cell,
                    level,
                    status: layer.status,
                    thickness: grid.to_metres(layer.thickness as i32),
                    origin: layer.origin,
                });
            }
        }

        Self {
            step,
            bucket: pose.map(|pose| BucketRow {
                pose: *pose,
                corners: bucket.corners(pose),
            }),
            terrain,
            body_soil,
            layers,
            volume: grid.soil_volume() + body.volume(grid.cell_volume()),
        }
    }

    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string(self).map_err(|e| SimError::InvalidConfig(e.to_string()))
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        serde_json::from_str(json).map_err(|e| SimError::InvalidConfig(e.to_string()))
    }
}

/// Header line followed by one line per row.
pub fn to_table<R: Row>(rows: &[R]) -> String {
    let mut out = String::from(R::HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&row.line());
        out.push('\n');
    }
    out
}
