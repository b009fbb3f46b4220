// HTFE - seed streams for randomized kernels

use rand::Rng;

use crate::helpers::*;

/// Upper bound (exclusive) of each seed word drawn from a host generator.
pub const SEED_RANGE: u32 = 100_000;

/// Two-word seed handed to a kernel invocation that needs randomness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SeedPair {
    pub x: u32,
    pub y: u32,
}

impl SeedPair {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Draw both words uniformly from `[0, SEED_RANGE)`.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let x = rng.gen_range(0..SEED_RANGE);
        let y = rng.gen_range(0..SEED_RANGE);
        Self { x, y }
    }

    /// PCG state for site `site` of a dispatch seeded with this pair.
    /// `salt` separates tensors that share one seed pair.
    pub fn site_state(self, salt: u64, site: usize) -> u64 {
        let base = ((self.x as u64) << 32 | self.y as u64)
            .wrapping_add(salt.wrapping_mul(0x9e3779b97f4a7c15));
        rand_get_state(base.wrapping_add((site as u64).wrapping_mul(RAND_SUBSEED_OFFSET)))
    }
}

/// Supplies seed pairs to the activation pass.
///
/// `step` is the network's step counter and `ordinal` counts seeded kernel
/// invocations within the step in pass order (ascend layers bottom to top,
/// then descend layers top to bottom).
pub trait SeedSource {
    fn next_seed_pair(&mut self, step: u64, ordinal: u32) -> SeedPair;
}

/// Seeds as a pure function of `(seed, step, ordinal)`, so a run can be
/// reproduced without replaying the generator call sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedStream {
    seed: u64,
}

impl SeedStream {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed_pair(&self, step: u64, ordinal: u32) -> SeedPair {
        let mut state = rand_get_state(
            self.seed
                .wrapping_add(step.wrapping_mul(RAND_SUBSEED_OFFSET))
                .wrapping_add((ordinal as u64) << 48),
        );
        let x = rand_step(&mut state) % SEED_RANGE;
        let y = rand_step(&mut state) % SEED_RANGE;
        SeedPair { x, y }
    }
}

impl SeedSource for SeedStream {
    fn next_seed_pair(&mut self, step: u64, ordinal: u32) -> SeedPair {
        self.seed_pair(step, ordinal)
    }
}

/// Draws seed pairs from a host generator in call order.
#[derive(Clone, Debug)]
pub struct RngSeeds<R>(pub R);

impl<R: Rng> SeedSource for RngSeeds<R> {
    fn next_seed_pair(&mut self, _step: u64, _ordinal: u32) -> SeedPair {
        SeedPair::draw(&mut self.0)
    }
}
