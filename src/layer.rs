// HTFE - layer descriptors and per-layer buffer state

use serde::{Deserialize, Serialize};

use crate::buffers::{CircleBuffer, Image2D, Image3D};
use crate::error::{HtfeError, Result};
use crate::helpers::*;

/// Generations kept for quantities read one step back.
pub(crate) const DOUBLE: usize = 2;
/// Generations kept for the temporal state, which is read two steps back.
pub(crate) const TRIPLE: usize = 3;

/// Largest map, in sites, a layer or the input frame may have.
pub const MAX_MAP_SITES: usize = 1 << 22;
/// Largest weight tensor, in elements, a layer may allocate.
pub const MAX_WEIGHT_ELEMENTS: usize = 1 << 26;

/// Structural and learning hyperparameters for one layer.
///
/// Passed to [`Htfe::build`](crate::htfe::Htfe::build) and fixed thereafter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerDesc {
    /// Spatial map size (feed-forward code of the layer below).
    pub spatial_width: i32,
    pub spatial_height: i32,
    /// Temporal map size (recurrent/predictive code).
    pub temporal_width: i32,
    pub temporal_height: i32,

    /// Radius over the map below read by the spatial encoder.
    pub receptive_field_radius: i32,
    /// Radius over the temporal map read by the predicted-spatial decoder.
    pub reconstruction_radius: i32,
    /// Radius over the spatial map read by the temporal plane.
    pub predictive_radius: i32,
    /// Radius over the previous temporal state read by the temporal plane.
    pub lateral_connection_radius: i32,
    pub spatial_inhibition_radius: i32,
    pub temporal_inhibition_radius: i32,
    /// Radius over the next layer's temporal map read as feedback.
    pub feedback_connection_radius: i32,

    /// Fraction of units active per inhibition window.
    pub spatial_sparsity: f32,
    pub temporal_sparsity: f32,

    pub duty_cycle_decay: f32,

    pub spatial_alpha: f32,
    pub predictive_alpha: f32,
    pub lateral_alpha: f32,
    pub feedback_alpha: f32,
    pub reconstruction_alpha: f32,

    pub spatial_lambda: f32,
    pub temporal_lambda: f32,

    pub spatial_momentum: f32,
    pub predictive_momentum: f32,
    pub lateral_momentum: f32,
    pub feedback_momentum: f32,
    pub reconstruction_momentum: f32,

    /// Gain applied to the lateral term of the temporal activation.
    pub lateral_scalar: f32,
    /// Gain applied to the feedback term of the temporal activation.
    pub feedback_scalar: f32,

    /// Standard deviation of the Gaussian blur over the predicted input.
    pub blur_kernel_width: f32,
    /// Number of X/Y blur pass pairs. `0` disables blurring.
    pub num_blur_passes: usize,

    /// Amplitude of the noise added by the bottom layer's linear decoder.
    pub gaussian_noise: f32,

    /// Lower clamp on the logistic derivative used by weight updates.
    pub min_derivative: f32,
}

impl Default for LayerDesc {
    fn default() -> Self {
        Self {
            spatial_width: 16,
            spatial_height: 16,
            temporal_width: 16,
            temporal_height: 16,
            receptive_field_radius: 5,
            reconstruction_radius: 6,
            predictive_radius: 6,
            lateral_connection_radius: 6,
            spatial_inhibition_radius: 4,
            temporal_inhibition_radius: 6,
            feedback_connection_radius: 6,
            spatial_sparsity: 2.01 / 81.0,
            temporal_sparsity: 2.01 / 81.0,
            duty_cycle_decay: 0.01,
            spatial_alpha: 0.01,
            predictive_alpha: 0.01,
            lateral_alpha: 0.01,
            feedback_alpha: 0.01,
            reconstruction_alpha: 0.1,
            spatial_lambda: 0.5,
            temporal_lambda: 0.5,
            spatial_momentum: 0.5,
            predictive_momentum: 0.5,
            lateral_momentum: 0.5,
            feedback_momentum: 0.5,
            reconstruction_momentum: 0.5,
            lateral_scalar: 0.01,
            feedback_scalar: 0.01,
            blur_kernel_width: 1.0,
            num_blur_passes: 0,
            gaussian_noise: 0.05,
            min_derivative: 0.01,
        }
    }
}

/// Number of sites in a square window of the given radius.
pub fn window_area(radius: i32) -> usize {
    let diam = (radius * 2 + 1) as usize;
    diam * diam
}

/// Target number of active units in a full inhibition window.
pub fn local_activity(sparsity: f32, radius: i32) -> f32 {
    (sparsity * window_area(radius) as f32).round()
}

impl LayerDesc {
    pub fn spatial_size(&self) -> Int2 {
        Int2::new(self.spatial_width, self.spatial_height)
    }

    pub fn temporal_size(&self) -> Int2 {
        Int2::new(self.temporal_width, self.temporal_height)
    }

    /// Depth of the spatial encoder weights (window plus fused bias).
    pub fn spatial_weight_depth(&self) -> usize {
        window_area(self.receptive_field_radius) + 1
    }

    /// Depth of the predicted-spatial decoder weights (window plus fused bias).
    pub fn predictive_reconstruction_weight_depth(&self) -> usize {
        window_area(self.reconstruction_radius) + 1
    }

    /// Depth of the temporal predictive weights (window plus fused bias).
    pub fn predictive_weight_depth(&self) -> usize {
        window_area(self.predictive_radius) + 1
    }

    pub fn lateral_weight_depth(&self) -> usize {
        window_area(self.lateral_connection_radius)
    }

    pub fn feedback_weight_depth(&self) -> usize {
        window_area(self.feedback_connection_radius)
    }

    /// Check this descriptor against the sizes of the map below it and, when
    /// one exists, the temporal map of the layer above it.
    pub fn validate(&self, layer: usize, below: Int2, above_temporal: Option<Int2>) -> Result<()> {
        let fail = |message: String| Err(HtfeError::InvalidLayerDesc { layer, message });

        if self.spatial_width < 1 || self.spatial_height < 1 {
            return fail(format!(
                "spatial map {}x{} must be at least 1x1",
                self.spatial_width, self.spatial_height
            ));
        }
        if self.temporal_width < 1 || self.temporal_height < 1 {
            return fail(format!(
                "temporal map {}x{} must be at least 1x1",
                self.temporal_width, self.temporal_height
            ));
        }

        let spatial = self.spatial_size();
        let temporal = self.temporal_size();

        for (what, size) in [("spatial", spatial), ("temporal", temporal)] {
            if !size.checked_area().is_some_and(|n| n <= MAX_MAP_SITES) {
                return fail(format!(
                    "{what} map {}x{} exceeds {MAX_MAP_SITES} sites",
                    size.x, size.y
                ));
            }
        }

        let mut radii = vec![
            ("receptive_field_radius", self.receptive_field_radius, below, "map below"),
            ("predictive_radius", self.predictive_radius, spatial, "spatial map"),
            ("reconstruction_radius", self.reconstruction_radius, temporal, "temporal map"),
            ("lateral_connection_radius", self.lateral_connection_radius, temporal, "temporal map"),
            ("spatial_inhibition_radius", self.spatial_inhibition_radius, spatial, "spatial map"),
            ("temporal_inhibition_radius", self.temporal_inhibition_radius, temporal, "temporal map"),
        ];
        if let Some(next) = above_temporal {
            radii.push((
                "feedback_connection_radius",
                self.feedback_connection_radius,
                next,
                "temporal map of the layer above",
            ));
        }

        for (name, radius, size, what) in radii {
            if radius < 0 {
                return fail(format!("{name} = {radius} must not be negative"));
            }
            if radius >= size.x || radius >= size.y {
                return fail(format!(
                    "{name} = {radius} must be smaller than the {what} ({}x{})",
                    size.x, size.y
                ));
            }
        }

        let mut tensors = vec![
            ("spatial", spatial, self.spatial_weight_depth()),
            ("predictive reconstruction", spatial, self.predictive_reconstruction_weight_depth()),
            ("predictive", temporal, self.predictive_weight_depth()),
            ("lateral", temporal, self.lateral_weight_depth()),
        ];
        if above_temporal.is_some() {
            tensors.push(("feedback", temporal, self.feedback_weight_depth()));
        }
        for (what, size, depth) in tensors {
            if !size
                .checked_area()
                .and_then(|n| n.checked_mul(depth))
                .is_some_and(|n| n <= MAX_WEIGHT_ELEMENTS)
            {
                return fail(format!(
                    "{what} weights ({}x{}x{depth}) exceed {MAX_WEIGHT_ELEMENTS} elements",
                    size.x, size.y
                ));
            }
        }

        for (name, sparsity, radius) in [
            ("spatial_sparsity", self.spatial_sparsity, self.spatial_inhibition_radius),
            ("temporal_sparsity", self.temporal_sparsity, self.temporal_inhibition_radius),
        ] {
            if !(sparsity > 0.0 && sparsity <= 1.0) {
                return fail(format!("{name} = {sparsity} must be in (0, 1]"));
            }
            if local_activity(sparsity, radius) < 1.0 {
                return fail(format!(
                    "{name} = {sparsity} selects no active unit in a window of radius {radius}"
                ));
            }
        }

        for (name, value) in [
            ("duty_cycle_decay", self.duty_cycle_decay),
            ("spatial_momentum", self.spatial_momentum),
            ("predictive_momentum", self.predictive_momentum),
            ("lateral_momentum", self.lateral_momentum),
            ("feedback_momentum", self.feedback_momentum),
            ("reconstruction_momentum", self.reconstruction_momentum),
        ] {
            if !(0.0..1.0).contains(&value) {
                return fail(format!("{name} = {value} must be in [0, 1)"));
            }
        }

        for (name, value) in [
            ("spatial_alpha", self.spatial_alpha),
            ("predictive_alpha", self.predictive_alpha),
            ("lateral_alpha", self.lateral_alpha),
            ("feedback_alpha", self.feedback_alpha),
            ("reconstruction_alpha", self.reconstruction_alpha),
            ("spatial_lambda", self.spatial_lambda),
            ("temporal_lambda", self.temporal_lambda),
            ("lateral_scalar", self.lateral_scalar),
            ("feedback_scalar", self.feedback_scalar),
            ("gaussian_noise", self.gaussian_noise),
            ("min_derivative", self.min_derivative),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{name} = {value} must be finite and non-negative"));
            }
        }

        if self.num_blur_passes > 0 && !(self.blur_kernel_width.is_finite() && self.blur_kernel_width > 0.0) {
            return fail(format!(
                "blur_kernel_width = {} must be positive when blurring is enabled",
                self.blur_kernel_width
            ));
        }

        Ok(())
    }
}

/// Buffers belonging to one layer.
///
/// Weight tensors are two-generation rings: `get(1)` is the snapshot every
/// kernel reads during a step, `front()` is what the learning pass writes.
/// Weight elements hold `(weight, previous delta)`; state elements hold
/// `(state, duty cycle)`.
#[derive(Clone, Debug)]
pub struct Layer {
    pub(crate) spatial_activations: Image2D<f32>,
    pub(crate) spatial_states: CircleBuffer<Image2D<Float2>>,

    pub(crate) temporal_activations: Image2D<f32>,
    pub(crate) temporal_states: CircleBuffer<Image2D<Float2>>,

    pub(crate) spatial_weights: CircleBuffer<Image3D<Float2>>,
    pub(crate) predictive_reconstruction_weights: CircleBuffer<Image3D<Float2>>,
    pub(crate) predictive_weights: CircleBuffer<Image3D<Float2>>,
    pub(crate) lateral_weights: CircleBuffer<Image3D<Float2>>,
    pub(crate) feedback_weights: Option<CircleBuffer<Image3D<Float2>>>,

    pub(crate) spatial_reconstruction: Image2D<f32>,
    pub(crate) temporal_reconstruction: CircleBuffer<Image2D<f32>>,
    pub(crate) next_temporal_reconstruction: Option<Image2D<f32>>,
    pub(crate) predicted_spatial: CircleBuffer<Image2D<f32>>,

    pub(crate) input_reconstruction: Image2D<f32>,
    pub(crate) predicted_input_reconstruction: Image2D<f32>,
    pub(crate) blur_scratch: Image2D<f32>,
}

impl Layer {
    /// Allocate zeroed buffers for a layer reading a map of size `below` and,
    /// unless it is the top layer, fed back from a temporal map of size `above_temporal`.
    pub(crate) fn allocate(desc: &LayerDesc, below: Int2, above_temporal: Option<Int2>) -> Self {
        let spatial = desc.spatial_size();
        let temporal = desc.temporal_size();

        let weights = |size: Int2, depth: usize| {
            CircleBuffer::with_generations(DOUBLE, Image3D::new(Int3::new(size.x, size.y, depth as i32)))
        };

        Self {
            spatial_activations: Image2D::new(spatial),
            spatial_states: CircleBuffer::with_generations(DOUBLE, Image2D::new(spatial)),
            temporal_activations: Image2D::new(temporal),
            temporal_states: CircleBuffer::with_generations(TRIPLE, Image2D::new(temporal)),
            spatial_weights: weights(spatial, desc.spatial_weight_depth()),
            predictive_reconstruction_weights: weights(
                spatial,
                desc.predictive_reconstruction_weight_depth(),
            ),
            predictive_weights: weights(temporal, desc.predictive_weight_depth()),
            lateral_weights: weights(temporal, desc.lateral_weight_depth()),
            feedback_weights: above_temporal.map(|_| weights(temporal, desc.feedback_weight_depth())),
            spatial_reconstruction: Image2D::new(spatial),
            temporal_reconstruction: CircleBuffer::with_generations(DOUBLE, Image2D::new(temporal)),
            next_temporal_reconstruction: above_temporal.map(Image2D::new),
            predicted_spatial: CircleBuffer::with_generations(DOUBLE, Image2D::new(spatial)),
            input_reconstruction: Image2D::new(below),
            predicted_input_reconstruction: Image2D::new(below),
            blur_scratch: Image2D::new(below),
        }
    }

    /// Copy every front generation into its older twins.
    pub(crate) fn snapshot(&mut self) {
        self.spatial_states.snapshot_front();
        self.temporal_states.snapshot_front();
        self.spatial_weights.snapshot_front();
        self.predictive_reconstruction_weights.snapshot_front();
        self.predictive_weights.snapshot_front();
        self.lateral_weights.snapshot_front();
        if let Some(feedback) = &mut self.feedback_weights {
            feedback.snapshot_front();
        }
        self.temporal_reconstruction.snapshot_front();
        self.predicted_spatial.snapshot_front();
    }

    /// Rotate state generations at the end of a step.
    pub(crate) fn rotate_states(&mut self) {
        self.spatial_states.push_front();
        self.temporal_states.push_front();
        self.temporal_reconstruction.push_front();
        self.predicted_spatial.push_front();
    }

    /// Rotate weight generations, committing the ones written by `learn`.
    pub(crate) fn rotate_weights(&mut self) {
        self.spatial_weights.push_front();
        self.predictive_reconstruction_weights.push_front();
        self.predictive_weights.push_front();
        self.lateral_weights.push_front();
        if let Some(feedback) = &mut self.feedback_weights {
            feedback.push_front();
        }
    }

    /// Zero the temporal state and its history.
    pub(crate) fn clear_temporal_state(&mut self) {
        for generation in self.temporal_states.iter_mut() {
            generation.fill(Float2::default());
        }
    }

    // --- Read access ---

    pub fn spatial_activations(&self) -> &Image2D<f32> {
        &self.spatial_activations
    }

    /// Spatial state and duty cycle `steps_back` steps ago (0 = this step).
    pub fn spatial_states(&self, steps_back: usize) -> &Image2D<Float2> {
        self.spatial_states.get(steps_back)
    }

    pub fn temporal_activations(&self) -> &Image2D<f32> {
        &self.temporal_activations
    }

    /// Temporal state and duty cycle `steps_back` steps ago (0 = this step).
    pub fn temporal_states(&self, steps_back: usize) -> &Image2D<Float2> {
        self.temporal_states.get(steps_back)
    }

    /// Committed spatial encoder weights (the snapshot read by kernels).
    pub fn spatial_weights(&self) -> &Image3D<Float2> {
        self.spatial_weights.get(1)
    }

    pub fn predictive_reconstruction_weights(&self) -> &Image3D<Float2> {
        self.predictive_reconstruction_weights.get(1)
    }

    pub fn predictive_weights(&self) -> &Image3D<Float2> {
        self.predictive_weights.get(1)
    }

    pub fn lateral_weights(&self) -> &Image3D<Float2> {
        self.lateral_weights.get(1)
    }

    /// `None` on the top layer.
    pub fn feedback_weights(&self) -> Option<&Image3D<Float2>> {
        self.feedback_weights.as_ref().map(|w| w.get(1))
    }

    /// Weights written by the learning pass of the current step, not yet committed.
    pub fn pending_spatial_weights(&self) -> &Image3D<Float2> {
        self.spatial_weights.front()
    }

    pub fn spatial_reconstruction(&self) -> &Image2D<f32> {
        &self.spatial_reconstruction
    }

    pub fn temporal_reconstruction(&self) -> &Image2D<f32> {
        self.temporal_reconstruction.front()
    }

    pub fn next_temporal_reconstruction(&self) -> Option<&Image2D<f32>> {
        self.next_temporal_reconstruction.as_ref()
    }

    pub fn predicted_spatial(&self) -> &Image2D<f32> {
        self.predicted_spatial.front()
    }

    pub fn input_reconstruction(&self) -> &Image2D<f32> {
        &self.input_reconstruction
    }

    pub fn predicted_input_reconstruction(&self) -> &Image2D<f32> {
        &self.predicted_input_reconstruction
    }

    /// Every committed weight tensor of this layer.
    pub fn committed_weights(&self) -> Vec<&Image3D<Float2>> {
        let mut all = vec![
            self.spatial_weights(),
            self.predictive_reconstruction_weights(),
            self.predictive_weights(),
            self.lateral_weights(),
        ];
        all.extend(self.feedback_weights());
        all
    }
}
