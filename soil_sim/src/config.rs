// Simulation configuration.
//
// Every tunable the simulator reads lives in `SimConfig`, which loads from
// JSON (`SimConfig::from_json`) and validates itself before a run starts.
// Parameters are grouped the way the pipeline consumes them:
//
// - `GridConfig`: lattice extent and resolution.
// - `SoilParams`: repose angle and relaxation knobs.
// - `ContactParams`: intersection coverage threshold and movement gate.
// - `BucketConfig`: body-frame reference points of the bucket prism.
// - `TerrainParams`: fractal-noise relief of the initial surface.
// - `RunOptions`: seed handling and per-step check/log/output toggles.
//
// The coverage threshold and the relaxation split ratio are heuristics, not
// physical constants, which is why they are configuration rather than code.
//
// See also: `evolution.rs`, which owns a validated `SimConfig` for the length
// of a run; `grid.rs` for how `GridConfig` becomes a lattice.

use crate::error::{SimError, SimResult};
use crate::prng::SoilRng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameter groups
// ---------------------------------------------------------------------------

/// Lattice extent and resolution. Lengths in metres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Half extent along x. The lattice spans `[-half_length_x, half_length_x]`.
    pub half_length_x: f32,
    /// Half extent along y.
    pub half_length_y: f32,
    /// Depth of diggable soil below z = 0. Columns never go below `-depth`.
    pub depth: f32,
    /// Lateral size of a cell.
    pub cell_size: f32,
    /// Vertical resolution; every height is a multiple of this. Must not
    /// exceed `cell_size`.
    pub cell_height: f32,
}

/// Soil behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoilParams {
    /// Repose angle in radians, in `[0, π/2]`.
    pub repose_angle: f32,
    /// Fraction of the excess height difference moved per transfer. 0.5
    /// splits the excess evenly between the two cells.
    pub split_ratio: f32,
    /// Sweep cap for one relaxation call.
    pub max_relax_iterations: u32,
}

/// Bucket/terrain contact heuristics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactParams {
    /// Minimum fraction of a cell's footprint a solid face must cover for the
    /// cell to count as under the bucket.
    pub coverage_threshold: f32,
    /// A pose change moving no bucket corner farther than this fraction of
    /// the smaller cell dimension is skipped.
    pub min_move_fraction: f32,
}

/// Bucket prism in body frame: joint, base and teeth points plus width.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub joint: [f32; 3],
    pub base: [f32; 3],
    pub teeth: [f32; 3],
    pub width: f32,
}

/// Initial terrain surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainParams {
    /// Relief of the noise surface in metres. The normalized octave sum is
    /// multiplied by this. 0.0 gives a flat surface at z = 0.
    pub noise_amplitude: f32,
    /// Number of simplex octaves, each at double frequency and half weight.
    pub octaves: u32,
}

/// Run-level switches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Seed the generator with `seed`. When false the seed comes from the
    /// clock and runs are not reproducible.
    pub fixed_seed: bool,
    pub seed: u64,
    /// Run the volume and consistency checks after every step.
    pub check_outputs: bool,
    /// Log a one-line summary per step at `info` level.
    pub log_steps: bool,
    /// Hand a snapshot to the step observer after every step.
    pub write_outputs: bool,
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Complete configuration of one simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub grid: GridConfig,
    pub soil: SoilParams,
    pub contact: ContactParams,
    pub bucket: BucketConfig,
    pub terrain: TerrainParams,
    pub run: RunOptions,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            half_length_x: 4.0,
            half_length_y: 4.0,
            depth: 4.0,
            cell_size: 0.05,
            cell_height: 0.01,
        }
    }
}

impl Default for SoilParams {
    fn default() -> Self {
        Self {
            repose_angle: 0.85,
            split_ratio: 0.5,
            max_relax_iterations: 1000,
        }
    }
}

impl Default for ContactParams {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.1,
            min_move_fraction: 0.5,
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            joint: [0.0, 0.0, 0.0],
            base: [0.0, 0.0, -0.5],
            teeth: [0.7, 0.0, -0.5],
            width: 0.5,
        }
    }
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            noise_amplitude: 0.0,
            octaves: 4,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fixed_seed: true,
            seed: 1234,
            check_outputs: false,
            log_steps: false,
            write_outputs: false,
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: SimConfig =
            serde_json::from_str(json).map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::InvalidConfig(e.to_string()))
    }

    /// Check every value the simulator relies on. Bucket geometry is checked
    /// by `BucketGeometry::new`, which this calls.
    pub fn validate(&self) -> SimResult<()> {
        let g = &self.grid;
        for (name, value) in [
            ("grid.half_length_x", g.half_length_x),
            ("grid.half_length_y", g.half_length_y),
            ("grid.depth", g.depth),
            ("grid.cell_size", g.cell_size),
            ("grid.cell_height", g.cell_height),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if g.cell_height > g.cell_size {
            return Err(SimError::InvalidConfig(format!(
                "cell_height ({}) must not exceed cell_size ({})",
                g.cell_height, g.cell_size
            )));
        }

        let s = &self.soil;
        if !(0.0..=std::f32::consts::FRAC_PI_2).contains(&s.repose_angle) {
            return Err(SimError::InvalidConfig(format!(
                "repose_angle must be within [0, pi/2], got {}",
                s.repose_angle
            )));
        }
        if crate::relax::max_height_step(g.cell_size, g.cell_height, s.repose_angle) == 0 {
            return Err(SimError::InvalidConfig(format!(
                "repose_angle {} allows less than one cell_height ({}) of rise over one cell_size ({})",
                s.repose_angle, g.cell_height, g.cell_size
            )));
        }
        if !(s.split_ratio > 0.0 && s.split_ratio <= 0.5) {
            return Err(SimError::InvalidConfig(format!(
                "split_ratio must be within (0, 0.5], got {}",
                s.split_ratio
            )));
        }
        if s.max_relax_iterations == 0 {
            return Err(SimError::InvalidConfig(
                "max_relax_iterations must be at least 1".into(),
            ));
        }

        let c = &self.contact;
        if !(0.0..=1.0).contains(&c.coverage_threshold) {
            return Err(SimError::InvalidConfig(format!(
                "coverage_threshold must be within [0, 1], got {}",
                c.coverage_threshold
            )));
        }
        if !(c.min_move_fraction.is_finite() && c.min_move_fraction >= 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "min_move_fraction must be non-negative, got {}",
                c.min_move_fraction
            )));
        }

        crate::bucket::BucketGeometry::new(&self.bucket)?;
        Ok(())
    }
}

impl RunOptions {
    /// Generator for this run's randomized inputs (noise, random trajectory).
    pub fn make_rng(&self) -> SoilRng {
        if self.fixed_seed {
            SoilRng::new(self.seed)
        } else {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(self.seed);
            SoilRng::new(nanos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn default_config_roundtrips_through_json() {
        let config = SimConfig::default();
        let json = config.to_json().unwrap();
        let back = SimConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn config_loads_from_json_string() {
        let json = r#"{
            "grid": {
                "half_length_x": 2.0,
                "half_length_y": 1.0,
                "depth": 1.0,
                "cell_size": 0.1,
                "cell_height": 0.02
            },
            "soil": {
                "repose_angle": 0.5235988,
                "split_ratio": 0.5,
                "max_relax_iterations": 200
            },
            "contact": { "coverage_threshold": 0.25, "min_move_fraction": 0.5 },
            "bucket": {
                "joint": [0.0, 0.0, 0.0],
                "base": [0.0, 0.0, -0.4],
                "teeth": [0.5, 0.0, -0.4],
                "width": 0.3
            },
            "terrain": { "noise_amplitude": 0.1, "octaves": 3 },
            "run": {
                "fixed_seed": true,
                "seed": 7,
                "check_outputs": true,
                "log_steps": false,
                "write_outputs": false
            }
        }"#;
        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(config.grid.cell_size, 0.1);
        assert_eq!(config.soil.max_relax_iterations, 200);
        assert_eq!(config.bucket.teeth, [0.5, 0.0, -0.4]);
        assert!(config.run.check_outputs);
    }

    #[test]
    fn rejects_cell_height_above_cell_size() {
        let mut config = SimConfig::default();
        config.grid.cell_height = 0.1;
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_repose_outside_quarter_turn() {
        let mut config = SimConfig::default();
        config.soil.repose_angle = 2.0;
        assert!(config.validate().is_err());
        config.soil.repose_angle = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn vertical_repose_is_accepted() {
        let mut config = SimConfig::default();
        config.soil.repose_angle = std::f32::consts::FRAC_PI_2;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_repose_too_shallow_for_the_resolution() {
        // 0.05 * tan(0.1) = 0.005 m, half of one 0.01 m tick.
        let mut config = SimConfig::default();
        config.soil.repose_angle = 0.1;
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
        config.soil.repose_angle = 0.0;
        assert!(config.validate().is_err());
        config.grid.cell_height = 0.005;
        config.soil.repose_angle = 0.1;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_overshooting_split_ratio() {
        let mut config = SimConfig::default();
        config.soil.split_ratio = 0.75;
        assert!(config.validate().is_err());
        config.soil.split_ratio = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_bucket() {
        let mut config = SimConfig::default();
        config.bucket.teeth = config.bucket.base;
        assert!(matches!(config.validate(), Err(SimError::InvalidGeometry(_))));
        let mut config = SimConfig::default();
        config.bucket.width = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fixed_seed_rng_is_reproducible() {
        let run = RunOptions::default();
        assert_eq!(run.make_rng().next_u64(), run.make_rng().next_u64());
    }
}
