// Initial terrain generation.
//
// Builds the starting surface from fractal simplex noise (`noise::Fbm` over
// `noise::Simplex`). Octave `k` (starting at 0) is sampled at frequency `2^k`
// with weight `2^-k`, over grid coordinates rescaled to [0, 1] on each axis,
// and `Fbm` normalizes the sum back to roughly [-1, 1]. The result is
// multiplied by `TerrainParams::noise_amplitude` and rounded to the nearest
// height tick, so the generated terrain obeys the same tick arithmetic as
// everything else. With amplitude 0 the surface stays flat at z = 0.
//
// See also: `grid.rs` (`reset_column`), `config.rs` for `TerrainParams`,
// `evolution.rs` which calls `generate_terrain` when a run is built.
//
// **Critical constraint: determinism.** The noise seed is the only random
// input and it is drawn from the caller's `SoilRng`, once per call, whether
// or not the amplitude is zero.

use crate::config::TerrainParams;
use crate::error::SimResult;
use crate::grid::Grid;
use crate::prng::SoilRng;
use noise::{Fbm, MultiFractal, NoiseFn, Simplex};

/// Fractal surface for one terrain, seeded from `rng`.
pub fn surface_noise(params: &TerrainParams, rng: &mut SoilRng) -> Fbm<Simplex> {
    Fbm::<Simplex>::new(rng.next_u64() as u32)
        .set_octaves(params.octaves.max(1) as usize)
        .set_frequency(1.0)
        .set_lacunarity(2.0)
        .set_persistence(0.5)
}

/// Overwrite every column with undisturbed soil up to the noise surface.
/// Returns the number of columns whose height is not zero.
pub fn generate_terrain(
    grid: &mut Grid,
    params: &TerrainParams,
    rng: &mut SoilRng,
) -> SimResult<usize> {
    let noise = surface_noise(params, rng);
    let (x_first, y_first) = grid.cell_center(grid.coord_of(0));
    let span_x = -2.0 * x_first;
    let span_y = -2.0 * y_first;

    let mut raised = 0;
    for i in 0..grid.len() {
        let cell = grid.coord_of(i);
        let (x, y) = grid.cell_center(cell);
        let u = ((x - x_first) / span_x) as f64;
        let v = ((y - y_first) / span_y) as f64;
        let z = params.noise_amplitude * noise.get([u, v]) as f32;
        let ticks = grid.to_ticks(z).max(grid.floor());
        grid.reset_column(cell, ticks)?;
        if ticks != 0 {
            raised += 1;
        }
    }
    log::debug!("terrain: {raised} of {} columns off the datum", grid.len());
    Ok(raised)
}
