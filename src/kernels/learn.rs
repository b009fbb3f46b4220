// HTFE - weight update kernels

use crate::buffers::{Image2D, Image3D, Plane};
use crate::compute::{ComputeSystem, Kernel, KernelId};
use crate::helpers::*;

use super::{field_center, momentum_step, Window};

/// Step size, L2 decay and momentum of one connection type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LearningRates {
    pub alpha: f32,
    pub lambda: f32,
    pub momentum: f32,
}

/// Update of weights used both as an encoder (forward) and as a decoder
/// (transposed). The error is measured on the decoded side.
#[derive(Clone, Copy, Debug)]
pub struct DecoderUpdateArgs<'a> {
    /// States of the sites owning the weights, as they were when the
    /// reconstruction was decoded.
    pub hidden: &'a Image2D<Float2>,
    /// What the decode should have produced.
    pub target: Plane<'a>,
    /// What the decode produced.
    pub reconstruction: &'a Image2D<f32>,
    pub prev_weights: &'a Image3D<Float2>,
    pub radius: i32,
    pub rates: LearningRates,
    pub min_derivative: f32,
    /// The decode had no output nonlinearity.
    pub linear: bool,
    /// Target sparsity driving the fused bias in the last weight slot, when
    /// the weights carry one.
    pub bias_sparsity: Option<f32>,
}

/// `layerUpdateSpatialWeights`: the spatial encoder against the map it encodes.
pub fn update_spatial_weights(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: DecoderUpdateArgs<'_>,
    weights: &mut Image3D<Float2>,
) {
    debug_assert_eq!(kernel.id(), KernelId::UpdateSpatialWeights);
    update_decoder(cs, kernel, args, weights);
}

/// `layerUpdateTemporalWeights` and its top-layer variant. Dispatched once per
/// temporal tensor (predictive, lateral and, below the top, feedback).
pub fn update_temporal_weights(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: DecoderUpdateArgs<'_>,
    weights: &mut Image3D<Float2>,
) {
    debug_assert!(matches!(
        kernel.id(),
        KernelId::UpdateTemporalWeights | KernelId::UpdateTemporalWeightsLast
    ));
    update_decoder(cs, kernel, args, weights);
}

fn update_decoder(cs: &ComputeSystem, kernel: &Kernel, args: DecoderUpdateArgs<'_>, weights: &mut Image3D<Float2>) {
    debug_assert_eq!(args.prev_weights.size(), weights.size());
    debug_assert_eq!(args.target.size(), args.reconstruction.size());

    let hidden_size = weights.size2();
    let visible_size = args.reconstruction.size();
    let depth = weights.depth();
    let rates = args.rates;

    cs.dispatch(kernel, weights.data_mut(), depth, |i, site| {
        let pos = site_position(i, hidden_size);
        let prev = args.prev_weights.site(pos);
        site.copy_from_slice(prev);

        let hidden = args.hidden.data()[i];
        let post = hidden.x;

        let center = field_center(pos, hidden_size, visible_size);
        Window::around(center, args.radius, visible_size).for_each(|v, wi| {
            let recon = *args.reconstruction.get(v);
            let err = args.target.value(v) - recon;
            let deriv = if args.linear {
                1.0
            } else {
                sigmoid_derivf(recon, args.min_derivative)
            };
            site[wi] = momentum_step(prev[wi], post * err * deriv, rates.alpha, rates.lambda, rates.momentum);
        });

        if let Some(sparsity) = args.bias_sparsity {
            let b = depth - 1;
            site[b] = momentum_step(prev[b], sparsity - hidden.y, rates.alpha, 0.0, rates.momentum);
        }
    });
}

#[derive(Clone, Copy, Debug)]
pub struct PredictiveReconstructionUpdateArgs<'a> {
    /// Temporal states the previous prediction was made from.
    pub prev_temporal_states: &'a Image2D<Float2>,
    /// The spatial code that actually followed.
    pub spatial_states: &'a Image2D<Float2>,
    /// The previous step's predicted spatial code.
    pub prev_predicted: &'a Image2D<f32>,
    pub prev_weights: &'a Image3D<Float2>,
    pub radius: i32,
    pub rates: LearningRates,
    pub min_derivative: f32,
}

/// Delta rule on the predicted-spatial decoder, bias in the last slot.
pub fn update_predictive_reconstruction_weights(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: PredictiveReconstructionUpdateArgs<'_>,
    weights: &mut Image3D<Float2>,
) {
    debug_assert_eq!(kernel.id(), KernelId::UpdatePredictiveReconstructionWeights);

    let size = weights.size2();
    let temporal_size = args.prev_temporal_states.size();
    let depth = weights.depth();
    let rates = args.rates;

    cs.dispatch(kernel, weights.data_mut(), depth, |i, site| {
        let pos = site_position(i, size);
        let prev = args.prev_weights.site(pos);
        site.copy_from_slice(prev);

        let predicted = args.prev_predicted.data()[i];
        let err = args.spatial_states.data()[i].x - predicted;
        let gain = err * sigmoid_derivf(predicted, args.min_derivative);

        let center = field_center(pos, size, temporal_size);
        Window::around(center, args.radius, temporal_size).for_each(|v, wi| {
            let pre = args.prev_temporal_states.get(v).x;
            site[wi] = momentum_step(prev[wi], pre * gain, rates.alpha, rates.lambda, rates.momentum);
        });

        let b = depth - 1;
        site[b] = momentum_step(prev[b], err, rates.alpha, 0.0, rates.momentum);
    });
}
