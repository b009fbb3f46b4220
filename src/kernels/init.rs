// HTFE - weight initialization kernels

use crate::buffers::Image3D;
use crate::compute::{ComputeSystem, Kernel, KernelId};
use crate::helpers::*;
use crate::seeds::SeedPair;

/// Salts separating the tensors initialized from one seed pair.
pub const SALT_SPATIAL: u64 = 0;
pub const SALT_PREDICTIVE_RECONSTRUCTION: u64 = 1;
pub const SALT_PREDICTIVE: u64 = 2;
pub const SALT_LATERAL: u64 = 3;
pub const SALT_FEEDBACK: u64 = 4;

#[derive(Clone, Copy, Debug)]
pub struct InitializeWeightsArgs {
    pub seed: SeedPair,
    pub salt: u64,
    pub min_weight: f32,
    pub max_weight: f32,
}

/// Fill every weight uniformly in `[min_weight, max_weight]` with zero
/// previous delta. Serves both `initializeSpatialWeights` and
/// `initializeTemporalWeights`.
pub fn initialize_weights(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: InitializeWeightsArgs,
    weights: &mut Image3D<Float2>,
) {
    debug_assert!(matches!(
        kernel.id(),
        KernelId::InitializeSpatialWeights | KernelId::InitializeTemporalWeights
    ));

    let depth = weights.depth().max(1);

    cs.dispatch(kernel, weights.data_mut(), depth, |i, site| {
        let mut state = args.seed.site_state(args.salt, i);
        for w in site.iter_mut() {
            *w = Float2::new(randf_range_step(args.min_weight, args.max_weight, &mut state), 0.0);
        }
    });
}
