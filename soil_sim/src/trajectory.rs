// Parabolic dig trajectories.
//
// A scoop is modelled as the bucket origin following a parabola in the x-z
// plane that passes through a start point `(x_i, z_i)` and has its vertex at
// the deepest point `(x_min, z_min)`. The path runs from `x_i` to the mirror
// point `2 * x_min - x_i`, so it ends at the start height. The bucket pitch
// follows the path gradient, offset by the bucket's own base-to-teeth angle,
// so the base plate stays tangent to the path and the teeth lead the cut.
//
// `ParabolicPath::sample` gives evenly spaced poses in x; `resample` then
// thins or subdivides them so that no bucket corner moves more than a given
// distance between consecutive poses.
//
// This module is the only producer of poses in the crate, but the
// orchestrator takes any pose iterator; callers are free to drive it with
// their own kinematics.
//
// See also: `bucket.rs` for `max_corner_displacement`, `evolution.rs` for
// `SoilEvolution::run`.

use crate::bucket::BucketGeometry;
use crate::error::{SimError, SimResult};
use crate::prng::SoilRng;
use crate::types::Pose;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Parabola through a start point with its vertex at the deepest point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParabolicPath {
    pub x_i: f32,
    pub z_i: f32,
    pub x_min: f32,
    pub z_min: f32,
}

impl ParabolicPath {
    pub fn new(start: (f32, f32), deepest: (f32, f32)) -> SimResult<Self> {
        let path = Self {
            x_i: start.0,
            z_i: start.1,
            x_min: deepest.0,
            z_min: deepest.1,
        };
        if ![path.x_i, path.z_i, path.x_min, path.z_min]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(SimError::InvalidConfig(
                "trajectory points must be finite".into(),
            ));
        }
        if path.x_i == path.x_min {
            return Err(SimError::InvalidConfig(
                "start and deepest point share the same x".into(),
            ));
        }
        Ok(path)
    }

    /// Random scoop: start in x ∈ [-3, -1], z ∈ [0.5, 2]; deepest point in
    /// x ∈ [-0.5, 0], z ∈ [-0.25, 0.25].
    pub fn random(rng: &mut SoilRng) -> Self {
        let x_i = -3.0 + 2.0 * rng.next_f32();
        let z_i = 0.5 + 1.5 * rng.next_f32();
        let x_min = -0.5 * rng.next_f32();
        let z_min = -0.25 + 0.5 * rng.next_f32();
        Self {
            x_i,
            z_i,
            x_min,
            z_min,
        }
    }

    /// Coefficients `(a, b, c)` of `z = a x² + b x + c`, expanded from the
    /// vertex form `a (x - x_min)² + z_min`. A level path gives `a = 0`.
    pub fn coefficients(&self) -> (f32, f32, f32) {
        let dx = self.x_i - self.x_min;
        let a = (self.z_i - self.z_min) / (dx * dx);
        let b = -2.0 * a * self.x_min;
        let c = a * self.x_min * self.x_min + self.z_min;
        (a, b, c)
    }

    /// `count` poses evenly spaced in x from the start to the mirror point.
    /// `origin_angle` is the bucket's base-to-teeth angle in body frame.
    pub fn sample(&self, origin_angle: f32, count: usize) -> SimResult<Vec<Pose>> {
        if count < 2 {
            return Err(SimError::InvalidConfig(format!(
                "a trajectory needs at least 2 poses, got {count}"
            )));
        }
        let (a, b, c) = self.coefficients();
        if !(a.is_finite() && b.is_finite() && c.is_finite()) {
            return Err(SimError::InvalidConfig(format!(
                "trajectory coefficients overflow: ({a}, {b}, {c})"
            )));
        }
        let step = 2.0 * (self.x_min - self.x_i) / (count - 1) as f32;
        Ok((0..count)
            .map(|k| {
                let x = self.x_i + k as f32 * step;
                let z = a * x * x + b * x + c;
                let pitch = (2.0 * a * x + b).atan() - origin_angle;
                Pose::from_pitch(Vec3::new(x, 0.0, z), pitch)
            })
            .collect())
    }
}

/// Thin or subdivide `poses` so that no bucket corner moves more than
/// `max_step` between consecutive poses. The first and last poses are kept.
pub fn resample(poses: &[Pose], bucket: &BucketGeometry, max_step: f32) -> Vec<Pose> {
    let (Some(&first), Some(&last)) = (poses.first(), poses.last()) else {
        return Vec::new();
    };
    let mut out = vec![first];
    for pair in poses.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let Some(&emitted) = out.last() else {
            break;
        };
        if bucket.max_corner_displacement(&emitted, &b) <= max_step {
            continue;
        }
        if emitted != a {
            out.push(a);
        }
        let gap = bucket.max_corner_displacement(&a, &b);
        if gap > max_step {
            out.extend(subdivide(&a, &b, bucket, max_step, gap));
        }
    }
    if out.last() != Some(&last) {
        out.push(last);
    }
    out
}

/// Interior poses between `a` and `b` such that every hop is at most
/// `max_step`. Corners travel on arcs, so the even split suggested by the
/// chord is refined until it holds.
fn subdivide(a: &Pose, b: &Pose, bucket: &BucketGeometry, max_step: f32, gap: f32) -> Vec<Pose> {
    const MAX_REFINEMENTS: u32 = 8;
    let mut pieces = (gap / max_step).ceil().max(1.0) as u32;
    let mut refinements = 0;
    loop {
        let points: Vec<Pose> = (1..=pieces)
            .map(|k| a.interpolate(b, k as f32 / pieces as f32))
            .collect();
        let mut previous = *a;
        let fits = points.iter().all(|p| {
            let hop = bucket.max_corner_displacement(&previous, p);
            previous = *p;
            hop <= max_step
        });
        if fits || refinements == MAX_REFINEMENTS {
            let mut interior = points;
            interior.pop();
            return interior;
        }
        pieces *= 2;
        refinements += 1;
    }
}
