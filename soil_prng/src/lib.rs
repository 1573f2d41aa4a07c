// Seedable random source for the soil simulator.
//
// xoshiro256++ (Blackman & Vigna) expanded from a single `u64` seed through
// SplitMix64. The generator is written out by hand so that a given seed
// yields the same stream on every platform and toolchain, which is what makes
// randomized terrains and randomized dig trajectories reproducible in tests.
//
// Consumers in `soil_sim`:
// - `terrain_gen.rs` draws the seed of the fractal noise surface.
// - `trajectory.rs` draws the start and deepest points of a random scoop.
//
// **Critical constraint: determinism.** No floating point in the core
// generator and no platform entropy anywhere in this crate. Seeding from the
// clock, when a caller wants it, happens outside (see `RunOptions::make_rng`).

use serde::{Deserialize, Serialize};

/// xoshiro256++ state. Cheap to clone; cloning forks the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilRng {
    state: [u64; 4],
}

impl SoilRng {
    /// Seed a generator. Equal seeds give equal streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        let mut state = [0u64; 4];
        for word in &mut state {
            *word = splitmix64(&mut sm);
        }
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let s = &mut self.state;
        let out = s[0].wrapping_add(s[3]).rotate_left(23).wrapping_add(s[0]);
        let shifted = s[1] << 17;

        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];
        s[2] ^= shifted;
        s[3] = s[3].rotate_left(45);

        out
    }

    /// Uniform `f32` in [0, 1), built from the top 24 bits.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform `f32` in `[low, high)`. Returns `low` when the range is empty.
    pub fn range_f32(&mut self, low: f32, high: f32) -> f32 {
        if high <= low {
            return low;
        }
        low + self.next_f32() * (high - low)
    }

    /// Uniform integer in `[0, bound]`, inclusive on both ends.
    ///
    /// Rejection sampling keeps the distribution free of modulo bias.
    pub fn up_to(&mut self, bound: u64) -> u64 {
        if bound == u64::MAX {
            return self.next_u64();
        }
        let span = bound + 1;
        if span.is_power_of_two() {
            return self.next_u64() & (span - 1);
        }
        let reject_below = span.wrapping_neg() % span;
        loop {
            let r = self.next_u64();
            if r >= reject_below {
                return r % span;
            }
        }
    }
}

/// SplitMix64 step, used only to expand the seed.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SoilRng::new(1234);
        let mut b = SoilRng::new(1234);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SoilRng::new(1234);
        let mut b = SoilRng::new(1235);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn unit_floats_stay_in_range() {
        let mut rng = SoilRng::new(7);
        for _ in 0..10_000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v), "out of range: {v}");
        }
    }

    #[test]
    fn range_f32_respects_bounds() {
        let mut rng = SoilRng::new(99);
        for _ in 0..10_000 {
            let v = rng.range_f32(-3.0, -1.0);
            assert!((-3.0..-1.0).contains(&v), "out of range: {v}");
        }
        assert_eq!(rng.range_f32(2.0, 2.0), 2.0);
    }

    #[test]
    fn up_to_is_inclusive() {
        let mut rng = SoilRng::new(5);
        let mut seen = [false; 4];
        for _ in 0..1000 {
            let v = rng.up_to(3) as usize;
            assert!(v <= 3);
            seen[v] = true;
        }
        assert!(seen.iter().all(|&s| s), "every value in 0..=3 should appear");
        assert_eq!(rng.up_to(0), 0);
    }

    #[test]
    fn serde_roundtrip_continues_stream() {
        let mut rng = SoilRng::new(42);
        for _ in 0..50 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: SoilRng = serde_json::from_str(&json).unwrap();
        for _ in 0..50 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
