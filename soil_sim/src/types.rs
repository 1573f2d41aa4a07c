// Core value types shared across the simulator.
//
// `CellCoord` addresses a column of the terrain lattice, `Span` is a vertical
// interval inside a column measured in height ticks, `SoilLayer` is one entry
// of a column's layer stack, and `Pose` is the bucket's rigid-body placement.
//
// Heights are integer "ticks", multiples of `GridConfig::cell_height`. All
// soil bookkeeping (terrain layers, carried parcels, relaxation transfers) is
// done in ticks so that conservation checks are exact rather than
// tolerance-based. Conversion to metres happens only at the API edge
// (`Grid::height_at`, snapshots).

use crate::error::{SimError, SimResult};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Lattice addressing
// ---------------------------------------------------------------------------

/// Index of a terrain column. `x` varies along the lattice's first axis.
///
/// The derived `Ord` (x, then y) matches the grid's flat storage order, so a
/// `BTreeMap<CellCoord, _>` iterates in grid-scan order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Neighbor offsets in the one order used everywhere: +x, -x, +y, -y.
pub const NEIGHBOR_OFFSETS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Vertical interval `[bottom, top]` in ticks. `bottom` is the min and `top`
/// the max of a contiguous occupied range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub bottom: i32,
    pub top: i32,
}

impl Span {
    pub const fn new(bottom: i32, top: i32) -> Self {
        Self { bottom, top }
    }

    pub const fn thickness(self) -> i32 {
        self.top - self.bottom
    }

    /// Two spans overlap or touch.
    pub const fn meets(self, other: Span) -> bool {
        self.bottom <= other.top && other.bottom <= self.top
    }

    pub fn union(self, other: Span) -> Span {
        Span::new(self.bottom.min(other.bottom), self.top.max(other.top))
    }
}

// ---------------------------------------------------------------------------
// Soil layers
// ---------------------------------------------------------------------------

/// Where a layer of soil currently stands in its life cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SoilStatus {
    /// Undisturbed soil, present since initialization.
    Original,
    /// Soil that has been dug, pushed aside or avalanched at least once.
    Moved,
    /// Soil carried by the bucket. Never stored in the grid's layer stacks;
    /// it only appears in snapshots of body soil.
    BucketAdhered,
}

/// One entry of a column's layer stack, bottom to top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilLayer {
    pub status: SoilStatus,
    /// Thickness in ticks. Stacks never hold zero-thickness layers.
    pub thickness: u32,
    /// Column the soil was originally taken from.
    pub origin: CellCoord,
}

impl SoilLayer {
    pub const fn new(status: SoilStatus, thickness: u32, origin: CellCoord) -> Self {
        Self {
            status,
            thickness,
            origin,
        }
    }

    pub const fn moved(thickness: u32, origin: CellCoord) -> Self {
        Self::new(SoilStatus::Moved, thickness, origin)
    }

    /// Two layers can be fused into one without losing provenance.
    pub fn merges_with(&self, other: &SoilLayer) -> bool {
        self.status == other.status && self.origin == other.origin
    }
}

// ---------------------------------------------------------------------------
// Bucket pose
// ---------------------------------------------------------------------------

/// Rigid placement of the bucket: origin position plus orientation.
///
/// `orientation` rotates body-frame vectors into the world frame
/// (`world = position + orientation * body`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(with = "crate::serde_glam::vec3")]
    pub position: Vec3,
    #[serde(with = "crate::serde_glam::quat")]
    pub orientation: Quat,
}

impl Pose {
    pub const fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Pose whose body x-axis is pitched by `pitch` radians in the x-z plane.
    /// Positive pitch raises the body x-axis toward +z.
    pub fn from_pitch(position: Vec3, pitch: f32) -> Self {
        Self::new(position, Quat::from_rotation_y(-pitch))
    }

    /// Reject non-finite components and degenerate quaternions; return the
    /// pose with its orientation normalized.
    pub fn validated(self) -> SimResult<Pose> {
        if !self.position.is_finite() {
            return Err(SimError::InvalidPose(format!(
                "non-finite position {}",
                self.position
            )));
        }
        if !self.orientation.is_finite() {
            return Err(SimError::InvalidPose(format!(
                "non-finite orientation {}",
                self.orientation
            )));
        }
        let norm = self.orientation.length();
        if norm < 1e-6 {
            return Err(SimError::InvalidPose(format!(
                "degenerate orientation (norm {norm:e})"
            )));
        }
        Ok(Pose::new(self.position, self.orientation / norm))
    }

    pub fn transform_point(&self, body: Vec3) -> Vec3 {
        self.position + self.orientation * body
    }

    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * (world - self.position)
    }

    /// Pose a fraction `t` of the way to `other`: linear in position,
    /// spherical in orientation. Both orientations must be normalized.
    pub fn interpolate(&self, other: &Pose, t: f32) -> Pose {
        Pose::new(
            self.position.lerp(other.position, t),
            self.orientation.slerp(other.orientation, t),
        )
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_order_is_scan_order() {
        let mut cells = vec![
            CellCoord::new(1, 0),
            CellCoord::new(0, 2),
            CellCoord::new(0, 1),
        ];
        cells.sort();
        assert_eq!(
            cells,
            vec![
                CellCoord::new(0, 1),
                CellCoord::new(0, 2),
                CellCoord::new(1, 0)
            ]
        );
    }

    #[test]
    fn span_union_and_meets() {
        let a = Span::new(0, 3);
        let b = Span::new(3, 5);
        let c = Span::new(7, 9);
        assert!(a.meets(b));
        assert!(!a.meets(c));
        assert_eq!(a.union(b), Span::new(0, 5));
        assert_eq!(c.thickness(), 2);
    }

    #[test]
    fn layer_merge_requires_same_provenance() {
        let here = CellCoord::new(2, 2);
        let there = CellCoord::new(3, 2);
        assert!(SoilLayer::moved(1, here).merges_with(&SoilLayer::moved(4, here)));
        assert!(!SoilLayer::moved(1, here).merges_with(&SoilLayer::moved(1, there)));
        assert!(
            !SoilLayer::new(SoilStatus::Original, 1, here)
                .merges_with(&SoilLayer::moved(1, here))
        );
    }

    #[test]
    fn positive_pitch_raises_body_x_axis() {
        let pose = Pose::from_pitch(Vec3::ZERO, 0.3);
        let x = pose.transform_point(Vec3::X);
        assert!((x.x - 0.3f32.cos()).abs() < 1e-6);
        assert!((x.z - 0.3f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn transform_roundtrip() {
        let pose = Pose::new(
            Vec3::new(1.0, -2.0, 0.5),
            Quat::from_euler(glam::EulerRot::ZYX, 0.4, -0.2, 0.1),
        );
        let p = Vec3::new(0.3, 0.1, -0.7);
        let back = pose.inverse_transform_point(pose.transform_point(p));
        assert!((back - p).length() < 1e-5);
    }

    #[test]
    fn validation_normalizes_and_rejects() {
        let scaled = Pose::new(Vec3::ZERO, Quat::from_xyzw(0.0, 0.0, 0.0, 2.0));
        let ok = scaled.validated().unwrap();
        assert!((ok.orientation.length() - 1.0).abs() < 1e-6);

        let nan = Pose::new(Vec3::new(f32::NAN, 0.0, 0.0), Quat::IDENTITY);
        assert!(matches!(nan.validated(), Err(SimError::InvalidPose(_))));

        let zero = Pose::new(Vec3::ZERO, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert!(matches!(zero.validated(), Err(SimError::InvalidPose(_))));
    }

    #[test]
    fn interpolation_hits_both_ends_and_the_middle() {
        let a = Pose::from_pitch(Vec3::ZERO, 0.0);
        let b = Pose::from_pitch(Vec3::new(2.0, 0.0, -1.0), 0.4);
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.position - Vec3::new(1.0, 0.0, -0.5)).length() < 1e-6);
        let x = mid.transform_point(Vec3::X) - mid.position;
        assert!((x.z.atan2(x.x) - 0.2).abs() < 1e-5);
        assert!(a.interpolate(&b, 1.0).position.abs_diff_eq(b.position, 1e-6));
    }

    #[test]
    fn pose_serializes_through_proxies() {
        let pose = Pose::from_pitch(Vec3::new(0.5, 0.0, -0.25), 0.2);
        let json = serde_json::to_string(&pose).unwrap();
        let back: Pose = serde_json::from_str(&json).unwrap();
        assert_eq!(pose, back);
    }
}
