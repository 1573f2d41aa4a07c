// soil_sim: cellular-automaton soil displacement under an excavator bucket.
//
// The terrain is a 2D lattice of soil columns with integer heights. A rigid
// bucket (a triangular prism) moves along a trajectory; at each pose the
// columns under it are found, soil the bucket cuts is either carried in the
// bucket or pushed aside, and an avalanche pass lets steep slopes collapse
// to the repose angle. The crate performs no file I/O and installs no
// logger; see `soil_runner` for a command-line driver.
//
// Module overview:
// - `types.rs`:       CellCoord, Span, SoilLayer/SoilStatus, Pose.
// - `error.rs`:       SimError (fatal vs. diagnostic) and RunPhase.
// - `config.rs`:      SimConfig and its parameter groups, JSON loading, validation.
// - `serde_glam.rs`:  serde proxies for glam vectors and quaternions.
// - `grid.rs`:        Column layer stacks, bucket occupancy, push-aside deposit.
// - `bucket.rs`:      Bucket prism geometry: corners and world-frame faces.
// - `intersect.rs`:   Footprint rasterization and contact classification.
// - `body_soil.rs`:   Soil carried by the bucket (dig, advance, release).
// - `relax.rs`:       Avalanche relaxation to the repose angle.
// - `evolution.rs`:   SoilEvolution, the per-step orchestrator and run state machine.
// - `check.rs`:       Volume and structural consistency checks.
// - `snapshot.rs`:    Serializable per-step state and row export.
// - `terrain_gen.rs`: Simplex-noise initial terrain.
// - `trajectory.rs`:  Parabolic dig paths and pose resampling.
// - `prng`:           Re-exported from `soil_prng`, xoshiro256++ PRNG with SplitMix64 seeding.
//
// **Critical constraint: determinism.** A run is a pure function of its
// config and pose sequence. All randomness comes from the seeded `prng`; no
// `HashMap`, no OS entropy (unless `fixed_seed` is turned off). Ordered
// collections (`BTreeMap`, `BTreeSet`) fix every iteration order, and
// parallel stages merge their results in grid-scan order.

pub mod body_soil;
pub mod bucket;
pub mod check;
pub mod config;
pub mod error;
pub mod evolution;
pub mod grid;
pub mod intersect;
pub use soil_prng as prng;
pub mod relax;
pub mod serde_glam;
pub mod snapshot;
pub mod terrain_gen;
pub mod trajectory;
pub mod types;
