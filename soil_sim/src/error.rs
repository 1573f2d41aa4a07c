// Error kinds raised by the simulator.
//
// Geometry and grid errors (`OutOfBounds`, `PositionOutOfBounds`,
// `InvalidPose`, `InvalidGeometry`) are fatal: the orchestrator moves to
// `RunState::Failed` and stops stepping. `RelaxationCapExceeded`,
// `VolumeMismatch` and `Inconsistent` are diagnostics; they are logged and
// collected in step reports while the run continues.

use serde::{Deserialize, Serialize};

/// Alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;

/// Phase of a run without any attached failure detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Stepping,
    Done,
    Failed,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SimError {
    /// A cell index lies outside the lattice.
    #[error("cell ({x}, {y}) is outside the grid")]
    OutOfBounds { x: i32, y: i32 },

    /// A world-space position projects outside the lattice.
    #[error("position ({x:.3}, {y:.3}) is outside the grid")]
    PositionOutOfBounds { x: f32, y: f32 },

    /// Non-finite pose or degenerate orientation.
    #[error("invalid pose: {0}")]
    InvalidPose(String),

    /// Bucket reference points that do not span a prism.
    #[error("invalid bucket geometry: {0}")]
    InvalidGeometry(String),

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Total soil volume differs from the expected value (m³).
    #[error("soil volume mismatch: expected {expected:.6} m³, found {actual:.6} m³")]
    VolumeMismatch { expected: f64, actual: f64 },

    /// Relaxation stopped with cells still unstable: at its sweep cap, or
    /// next to a step too small to split.
    #[error("relaxation stopped after {iterations} sweeps with {unstable} cells still unstable")]
    RelaxationCapExceeded { iterations: u32, unstable: usize },

    /// A structural rule of the grid or body soil does not hold.
    #[error("inconsistent soil state: {0}")]
    Inconsistent(String),

    /// An orchestrator operation was called in the wrong phase.
    #[error("operation not allowed while the run is {0:?}")]
    NotRunning(RunPhase),
}

impl SimError {
    /// Fatal errors halt the timestep loop; the rest are diagnostics.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SimError::RelaxationCapExceeded { .. }
                | SimError::VolumeMismatch { .. }
                | SimError::Inconsistent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_not_fatal() {
        assert!(
            !SimError::RelaxationCapExceeded {
                iterations: 3,
                unstable: 1
            }
            .is_fatal()
        );
        assert!(
            !SimError::VolumeMismatch {
                expected: 1.0,
                actual: 2.0
            }
            .is_fatal()
        );
        assert!(SimError::OutOfBounds { x: -1, y: 0 }.is_fatal());
        assert!(SimError::InvalidPose("nan".into()).is_fatal());
    }

    #[test]
    fn messages_name_the_cell() {
        let msg = SimError::OutOfBounds { x: 5, y: -2 }.to_string();
        assert_eq!(msg, "cell (5, -2) is outside the grid");
    }
}
