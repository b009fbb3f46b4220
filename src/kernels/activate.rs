// HTFE - activation kernels (spatial encoder, temporal plane)

use crate::buffers::{Image2D, Image3D, Plane};
use crate::compute::{ComputeSystem, Kernel, KernelId};
use crate::helpers::*;

use super::{field_center, forward_sum};

#[derive(Clone, Copy, Debug)]
pub struct SpatialActivateArgs<'a> {
    /// The map below: the input frame or the spatial states of the layer below.
    pub input: Plane<'a>,
    pub weights: &'a Image3D<Float2>,
    pub radius: i32,
}

/// `bias + Σ w·x` over each spatial site's receptive field.
pub fn spatial_activate(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: SpatialActivateArgs<'_>,
    activations: &mut Image2D<f32>,
) {
    debug_assert_eq!(kernel.id(), KernelId::SpatialActivate);

    let size = activations.size();
    let input_size = args.input.size();
    let bias = args.weights.depth() - 1;

    cs.dispatch(kernel, activations.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        let weights = args.weights.site(pos);
        let center = field_center(pos, size, input_size);
        site[0] = weights[bias].x + forward_sum(args.input, weights, center, args.radius);
    });
}

/// The lateral contribution to a temporal activation.
#[derive(Clone, Copy, Debug)]
pub struct LateralInput<'a> {
    /// This layer's temporal states one step back.
    pub prev_states: &'a Image2D<Float2>,
    pub weights: &'a Image3D<Float2>,
    pub radius: i32,
    pub scalar: f32,
}

impl LateralInput<'_> {
    fn contribution(&self, pos: Int2) -> f32 {
        self.scalar * forward_sum(Plane::from(self.prev_states), self.weights.site(pos), pos, self.radius)
    }
}

/// The feedback contribution from the temporal code of the layer above.
#[derive(Clone, Copy, Debug)]
pub struct FeedbackInput<'a> {
    pub states: &'a Image2D<Float2>,
    pub weights: &'a Image3D<Float2>,
    pub radius: i32,
    pub scalar: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct TemporalActivateArgs<'a> {
    pub spatial_states: &'a Image2D<Float2>,
    pub predictive_weights: &'a Image3D<Float2>,
    pub predictive_radius: i32,
    pub lateral: LateralInput<'a>,
    pub feedback: FeedbackInput<'a>,
}

/// Predictive sum over the layer's spatial code plus gained lateral and
/// feedback terms.
pub fn temporal_activate(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: TemporalActivateArgs<'_>,
    activations: &mut Image2D<f32>,
) {
    debug_assert_eq!(kernel.id(), KernelId::TemporalActivate);

    let size = activations.size();
    let spatial_size = args.spatial_states.size();
    let above_size = args.feedback.states.size();
    let bias = args.predictive_weights.depth() - 1;

    cs.dispatch(kernel, activations.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);

        let predictive = args.predictive_weights.site(pos);
        let prediction = predictive[bias].x
            + forward_sum(
                Plane::from(args.spatial_states),
                predictive,
                field_center(pos, size, spatial_size),
                args.predictive_radius,
            );

        let feedback = args.feedback.scalar
            * forward_sum(
                Plane::from(args.feedback.states),
                args.feedback.weights.site(pos),
                field_center(pos, size, above_size),
                args.feedback.radius,
            );

        site[0] = prediction + args.lateral.contribution(pos) + feedback;
    });
}

#[derive(Clone, Copy, Debug)]
pub struct TemporalActivateLastArgs<'a> {
    pub spatial_activations: &'a Image2D<f32>,
    pub lateral: LateralInput<'a>,
}

/// Top-layer temporal activation: the spatial activation at the projected
/// site plus the lateral term. There is no layer above to feed back.
pub fn temporal_activate_last(
    cs: &ComputeSystem,
    kernel: &Kernel,
    args: TemporalActivateLastArgs<'_>,
    activations: &mut Image2D<f32>,
) {
    debug_assert_eq!(kernel.id(), KernelId::TemporalActivateLast);

    let size = activations.size();
    let spatial_size = args.spatial_activations.size();

    cs.dispatch(kernel, activations.data_mut(), 1, |i, site| {
        let pos = site_position(i, size);
        let spatial = *args.spatial_activations.get(field_center(pos, size, spatial_size));
        site[0] = spatial + args.lateral.contribution(pos);
    });
}
