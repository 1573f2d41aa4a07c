// Bucket geometry: the triangular prism that digs.
//
// The bucket is described in body frame by three reference points and a
// width:
//
//   joint (j) ---- back plate ---- base (b) ---- base plate ---- teeth (t)
//
// The side plates are the triangles (j, b, t) offset by ±width/2 along the
// normal of that triangle ("right" is the +normal side). The open side of
// the prism, from the joint edge to the teeth edge, is the mouth.
//
// `surface_at(pose)` is a pure function: it rotates the reference points by
// the (normalized) pose quaternion, translates them, builds the six corners
// and returns the faces as world-frame triangles. Solid faces are the base
// plate, back plate and both side plates. The mouth is returned too, tagged
// `FaceKind::Mouth`, because it bounds how high carried soil may pile.
//
// See also: `intersect.rs`, which rasterizes these triangles onto the grid;
// `trajectory.rs`, which uses `base_to_teeth_angle` to keep the base plate
// tangent to a dig path.

use crate::config::BucketConfig;
use crate::error::{SimError, SimResult};
use crate::types::Pose;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Which part of the bucket a triangle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaceKind {
    Base,
    Back,
    RightSide,
    LeftSide,
    /// Open side of the prism. Not solid.
    Mouth,
}

impl FaceKind {
    pub fn is_solid(self) -> bool {
        self != FaceKind::Mouth
    }
}

/// World-frame triangle of the bucket surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub kind: FaceKind,
    pub vertices: [Vec3; 3],
}

impl Triangle {
    pub fn new(kind: FaceKind, a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            kind,
            vertices: [a, b, c],
        }
    }

    /// Longest edge length.
    pub fn longest_edge(&self) -> f32 {
        let [a, b, c] = self.vertices;
        a.distance(b).max(b.distance(c)).max(c.distance(a))
    }

    /// Point at barycentric weights `(1 - u - v, u, v)`.
    pub fn point(&self, u: f32, v: f32) -> Vec3 {
        let [a, b, c] = self.vertices;
        a + (b - a) * u + (c - a) * v
    }
}

/// The six prism corners in world frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketCorners {
    #[serde(with = "crate::serde_glam::vec3")]
    pub joint_right: Vec3,
    #[serde(with = "crate::serde_glam::vec3")]
    pub joint_left: Vec3,
    #[serde(with = "crate::serde_glam::vec3")]
    pub base_right: Vec3,
    #[serde(with = "crate::serde_glam::vec3")]
    pub base_left: Vec3,
    #[serde(with = "crate::serde_glam::vec3")]
    pub teeth_right: Vec3,
    #[serde(with = "crate::serde_glam::vec3")]
    pub teeth_left: Vec3,
}

impl BucketCorners {
    pub fn as_array(&self) -> [Vec3; 6] {
        [
            self.joint_right,
            self.joint_left,
            self.base_right,
            self.base_left,
            self.teeth_right,
            self.teeth_left,
        ]
    }
}

pub type Faces = SmallVec<[Triangle; 8]>;

/// Bucket surface for one pose.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketSurface {
    pub pose: Pose,
    pub corners: BucketCorners,
    pub faces: Faces,
}

impl BucketSurface {
    pub fn solid_faces(&self) -> impl Iterator<Item = &Triangle> {
        self.faces.iter().filter(|f| f.kind.is_solid())
    }
}

/// Rigid bucket shape in body frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketGeometry {
    joint: Vec3,
    base: Vec3,
    teeth: Vec3,
    width: f32,
}

impl BucketGeometry {
    pub fn new(config: &BucketConfig) -> SimResult<Self> {
        let joint = Vec3::from_array(config.joint);
        let base = Vec3::from_array(config.base);
        let teeth = Vec3::from_array(config.teeth);
        if !(joint.is_finite() && base.is_finite() && teeth.is_finite()) {
            return Err(SimError::InvalidGeometry(
                "reference points must be finite".into(),
            ));
        }
        for (name, a, b) in [
            ("joint and base", joint, base),
            ("base and teeth", base, teeth),
            ("joint and teeth", joint, teeth),
        ] {
            if a.distance(b) < 1e-6 {
                return Err(SimError::InvalidGeometry(format!(
                    "{name} points coincide"
                )));
            }
        }
        if (base - joint).cross(teeth - joint).length() < 1e-9 {
            return Err(SimError::InvalidGeometry(
                "joint, base and teeth are collinear".into(),
            ));
        }
        if !(config.width.is_finite() && config.width > 0.0) {
            return Err(SimError::InvalidGeometry(format!(
                "width must be positive, got {}",
                config.width
            )));
        }
        Ok(Self {
            joint,
            base,
            teeth,
            width: config.width,
        })
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    /// Angle of the base plate (base to teeth) above the body x-axis.
    pub fn base_to_teeth_angle(&self) -> f32 {
        (self.teeth.z - self.base.z).atan2(self.teeth.x - self.base.x)
    }

    /// Corners for a pose. The pose must already be validated.
    pub fn corners(&self, pose: &Pose) -> BucketCorners {
        let j = pose.transform_point(self.joint);
        let b = pose.transform_point(self.base);
        let t = pose.transform_point(self.teeth);
        let half = (b - j).cross(t - j).normalize() * (0.5 * self.width);
        BucketCorners {
            joint_right: j + half,
            joint_left: j - half,
            base_right: b + half,
            base_left: b - half,
            teeth_right: t + half,
            teeth_left: t - half,
        }
    }

    /// World-frame faces of the bucket at `pose`.
    pub fn surface_at(&self, pose: &Pose) -> SimResult<BucketSurface> {
        let pose = pose.validated()?;
        let c = self.corners(&pose);
        let mut faces = Faces::new();
        faces.push(Triangle::new(FaceKind::Base, c.base_right, c.base_left, c.teeth_left));
        faces.push(Triangle::new(FaceKind::Base, c.base_right, c.teeth_left, c.teeth_right));
        faces.push(Triangle::new(FaceKind::Back, c.base_right, c.base_left, c.joint_left));
        faces.push(Triangle::new(FaceKind::Back, c.base_right, c.joint_left, c.joint_right));
        faces.push(Triangle::new(
            FaceKind::RightSide,
            c.joint_right,
            c.base_right,
            c.teeth_right,
        ));
        faces.push(Triangle::new(
            FaceKind::LeftSide,
            c.joint_left,
            c.base_left,
            c.teeth_left,
        ));
        faces.push(Triangle::new(FaceKind::Mouth, c.joint_right, c.joint_left, c.teeth_left));
        faces.push(Triangle::new(FaceKind::Mouth, c.joint_right, c.teeth_left, c.teeth_right));
        Ok(BucketSurface {
            pose,
            corners: c,
            faces,
        })
    }

    /// Largest distance any corner travels between two poses.
    pub fn max_corner_displacement(&self, from: &Pose, to: &Pose) -> f32 {
        let a = self.corners(from).as_array();
        let b = self.corners(to).as_array();
        a.iter()
            .zip(b.iter())
            .map(|(p, q)| p.distance(*q))
            .fold(0.0, f32::max)
    }
}
