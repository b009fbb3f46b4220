// HTFE - reconstruction kernels (transposed decodes and predicted spatial)

use crate::buffers::{Image2D, Image3D, Plane};
use crate::compute::{ComputeSystem, Kernel, KernelId};
use crate::helpers::*;
use crate::seeds::SeedPair;

use super::{field_center, forward_sum, reverse_sum};

/// Arguments for decoding a map back through the transpose of the weights that
/// encoded it.
#[derive(Clone, Copy, Debug)]
pub struct ReconstructArgs<'a> {
    /// Activity of the hidden sites that own `weights`.
    pub hidden: Plane<'a>,
    pub weights: &'a Image3D<Float2>,
    /// Forward radius of `weights`.
    pub radius: i32,
}

/// Sigmoid transposed decode. Serves `layerInputReconstruct`,
/// `layerSpatialReconstruct`, `layerTemporalReconstruct` and
/// `layerNextTemporalReconstruct`, which differ only in their buffers.
pub fn reconstruct(cs: &ComputeSystem, kernel: &Kernel, args: ReconstructArgs<'_>, out: &mut Image2D<f32>) {
    debug_assert!(matches!(
        kernel.id(),
        KernelId::InputReconstruct
            | KernelId::SpatialReconstruct
            | KernelId::TemporalReconstruct
            | KernelId::NextTemporalReconstruct
    ));

    let size = out.size();

    cs.dispatch(kernel, out.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        site[0] = sigmoidf(reverse_sum(pos, size, args.hidden, args.weights, args.radius));
    });
}

#[derive(Clone, Copy, Debug)]
pub struct LinearReconstructArgs<'a> {
    pub decode: ReconstructArgs<'a>,
    /// Amplitude of the uniform noise added to each site.
    pub noise: f32,
    pub seed: SeedPair,
}

/// Linear transposed decode with additive noise, used where the decoded map
/// is the raw input frame.
pub fn reconstruct_linear(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: LinearReconstructArgs<'_>,
    out: &mut Image2D<f32>,
) {
    debug_assert_eq!(kernel.id(), KernelId::InputReconstructLinear);

    let size = out.size();
    let decode = args.decode;

    cs.dispatch(kernel, out.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        let mut state = args.seed.site_state(0, i);
        let noise = args.noise * randf_range_step(-1.0, 1.0, &mut state);
        site[0] = reverse_sum(pos, size, decode.hidden, decode.weights, decode.radius) + noise;
    });
}

#[derive(Clone, Copy, Debug)]
pub struct SpatialPredictiveArgs<'a> {
    pub temporal_states: &'a Image2D<Float2>,
    pub weights: &'a Image3D<Float2>,
    pub radius: i32,
}

/// Predicted next spatial code: `sigmoid(bias + Σ w·T)` over each spatial
/// site's window into the temporal map.
pub fn spatial_predictive_reconstruct(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: SpatialPredictiveArgs<'_>,
    predicted: &mut Image2D<f32>,
) {
    debug_assert_eq!(kernel.id(), KernelId::SpatialPredictiveReconstruct);

    let size = predicted.size();
    let temporal_size = args.temporal_states.size();
    let bias = args.weights.depth() - 1;

    cs.dispatch(kernel, predicted.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        let weights = args.weights.site(pos);
        let sum = forward_sum(
            Plane::from(args.temporal_states),
            weights,
            field_center(pos, size, temporal_size),
            args.radius,
        );
        site[0] = sigmoidf(weights[bias].x + sum);
    });
}
