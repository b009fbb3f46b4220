// HTFE - network engine (build, activate, learn, step rotation, persistence)

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::buffers::{CircleBuffer, Image2D, Plane};
use crate::compute::{ComputeProgram, ComputeSystem, Kernel, KernelId};
use crate::config::{validate_network, NetworkConfig};
use crate::error::{HtfeError, Result};
use crate::helpers::*;
use crate::kernels::*;
use crate::layer::{Layer, LayerDesc, DOUBLE};
use crate::seeds::{SeedPair, SeedSource};

const MAGIC: &[u8; 4] = b"HTFE";
const VERSION: u32 = 1;
const MAX_DESC_BYTES: usize = 1 << 20;

/// Where the network is within the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Between steps: input may be written, memory cleared, state saved.
    Ready,
    /// The activation pass ran; the prediction is readable.
    Activated,
    /// The learning pass ran; updated weights are pending until `step_end`.
    Learned,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ready => write!(f, "ready"),
            Phase::Activated => write!(f, "activated"),
            Phase::Learned => write!(f, "learned"),
        }
    }
}

/// Kernel handles resolved once at build.
#[derive(Clone, Copy, Debug)]
struct Kernels {
    initialize_spatial_weights: Kernel,
    initialize_temporal_weights: Kernel,
    inhibit: Kernel,
    spatial_activate: Kernel,
    temporal_activate: Kernel,
    temporal_activate_last: Kernel,
    input_reconstruct: Kernel,
    input_reconstruct_linear: Kernel,
    spatial_reconstruct: Kernel,
    temporal_reconstruct: Kernel,
    next_temporal_reconstruct: Kernel,
    spatial_predictive_reconstruct: Kernel,
    update_spatial_weights: Kernel,
    update_temporal_weights: Kernel,
    update_temporal_weights_last: Kernel,
    update_predictive_reconstruction_weights: Kernel,
    gaussian_blur_x: Kernel,
    gaussian_blur_y: Kernel,
}

impl Kernels {
    fn resolve(program: &ComputeProgram) -> Result<Self> {
        let k = |id: KernelId| program.kernel(id.name());
        Ok(Self {
            initialize_spatial_weights: k(KernelId::InitializeSpatialWeights)?,
            initialize_temporal_weights: k(KernelId::InitializeTemporalWeights)?,
            inhibit: k(KernelId::Inhibit)?,
            spatial_activate: k(KernelId::SpatialActivate)?,
            temporal_activate: k(KernelId::TemporalActivate)?,
            temporal_activate_last: k(KernelId::TemporalActivateLast)?,
            input_reconstruct: k(KernelId::InputReconstruct)?,
            input_reconstruct_linear: k(KernelId::InputReconstructLinear)?,
            spatial_reconstruct: k(KernelId::SpatialReconstruct)?,
            temporal_reconstruct: k(KernelId::TemporalReconstruct)?,
            next_temporal_reconstruct: k(KernelId::NextTemporalReconstruct)?,
            spatial_predictive_reconstruct: k(KernelId::SpatialPredictiveReconstruct)?,
            update_spatial_weights: k(KernelId::UpdateSpatialWeights)?,
            update_temporal_weights: k(KernelId::UpdateTemporalWeights)?,
            update_temporal_weights_last: k(KernelId::UpdateTemporalWeightsLast)?,
            update_predictive_reconstruction_weights: k(KernelId::UpdatePredictiveReconstructionWeights)?,
            gaussian_blur_x: k(KernelId::GaussianBlurX)?,
            gaussian_blur_y: k(KernelId::GaussianBlurY)?,
        })
    }
}

/// Hierarchical temporal feature extractor.
///
/// Each step is `set_input` → [`activate`](Htfe::activate) →
/// (optionally) [`learn`](Htfe::learn) → [`step_end`](Htfe::step_end).
/// The prediction of the next input frame is readable after `activate`.
#[derive(Clone, Debug)]
pub struct Htfe {
    input_size: Int2,
    layer_descs: Vec<LayerDesc>,
    layers: Vec<Layer>,
    kernels: Kernels,
    init_range: (f32, f32),

    input: FloatBuffer,
    input_frame: CircleBuffer<Image2D<f32>>,
    prediction: FloatBuffer,

    phase: Phase,
    step: u64,
}

/// Borrow layer `l` mutably alongside its neighbours.
fn split_layers(layers: &mut [Layer], l: usize) -> (Option<&Layer>, &mut Layer, Option<&Layer>) {
    let (below, rest) = layers.split_at_mut(l);
    let (layer, above) = rest.split_at_mut(1);
    (below.last(), &mut layer[0], above.first())
}

impl Htfe {
    /// Validate the topology, resolve kernels and allocate zeroed buffers.
    fn allocate(
        program: &ComputeProgram,
        input_size: Int2,
        layer_descs: Vec<LayerDesc>,
        init_range: (f32, f32),
    ) -> Result<Self> {
        validate_network(input_size, &layer_descs, init_range)?;
        let kernels = Kernels::resolve(program)?;

        let mut layers = Vec::with_capacity(layer_descs.len());
        let mut below = input_size;
        for (l, desc) in layer_descs.iter().enumerate() {
            let above = layer_descs.get(l + 1).map(LayerDesc::temporal_size);
            layers.push(Layer::allocate(desc, below, above));
            below = desc.spatial_size();
        }

        Ok(Self {
            input_size,
            layer_descs,
            layers,
            kernels,
            init_range,
            input: vec![0.0; input_size.area()],
            input_frame: CircleBuffer::with_generations(DOUBLE, Image2D::new(input_size)),
            prediction: vec![0.0; input_size.area()],
            phase: Phase::Ready,
            step: 0,
        })
    }

    /// Build a network over a `input_width` × `input_height` input frame.
    ///
    /// Weights are drawn uniformly from `init_range`. Two seed pairs are drawn
    /// from `rng` per layer, in layer order: one for the spatial weight group
    /// and one for the temporal weight group.
    pub fn build<R: Rng + ?Sized>(
        cs: &ComputeSystem,
        program: &ComputeProgram,
        input_width: i32,
        input_height: i32,
        layer_descs: &[LayerDesc],
        init_range: (f32, f32),
        rng: &mut R,
    ) -> Result<Self> {
        let mut net = Self::allocate(
            program,
            Int2::new(input_width, input_height),
            layer_descs.to_vec(),
            init_range,
        )?;

        let k = net.kernels;
        let (min_weight, max_weight) = init_range;

        for layer in net.layers.iter_mut() {
            let spatial_seed = SeedPair::draw(&mut *rng);
            let temporal_seed = SeedPair::draw(&mut *rng);

            let spatial = |salt| InitializeWeightsArgs {
                seed: spatial_seed,
                salt,
                min_weight,
                max_weight,
            };
            let temporal = |salt| InitializeWeightsArgs {
                seed: temporal_seed,
                salt,
                min_weight,
                max_weight,
            };

            initialize_weights(
                cs,
                &k.initialize_spatial_weights,
                spatial(SALT_SPATIAL),
                layer.spatial_weights.front_mut(),
            );
            initialize_weights(
                cs,
                &k.initialize_spatial_weights,
                spatial(SALT_PREDICTIVE_RECONSTRUCTION),
                layer.predictive_reconstruction_weights.front_mut(),
            );
            initialize_weights(
                cs,
                &k.initialize_temporal_weights,
                temporal(SALT_PREDICTIVE),
                layer.predictive_weights.front_mut(),
            );
            initialize_weights(
                cs,
                &k.initialize_temporal_weights,
                temporal(SALT_LATERAL),
                layer.lateral_weights.front_mut(),
            );
            if let Some(feedback) = &mut layer.feedback_weights {
                initialize_weights(
                    cs,
                    &k.initialize_temporal_weights,
                    temporal(SALT_FEEDBACK),
                    feedback.front_mut(),
                );
            }

            layer.snapshot();
        }

        log::info!(
            "built HTFE network: {} layers over a {}x{} input",
            net.layers.len(),
            input_width,
            input_height
        );
        for (l, desc) in net.layer_descs.iter().enumerate() {
            log::debug!(
                "layer {}: spatial {}x{}, temporal {}x{}",
                l,
                desc.spatial_width,
                desc.spatial_height,
                desc.temporal_width,
                desc.temporal_height
            );
        }

        Ok(net)
    }

    /// Build from a [`NetworkConfig`], seeding weights from a ChaCha generator
    /// keyed by `config.seed`.
    pub fn from_config(cs: &ComputeSystem, program: &ComputeProgram, config: &NetworkConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self::build(
            cs,
            program,
            config.input_width,
            config.input_height,
            &config.layers,
            (config.min_init_weight, config.max_init_weight),
            &mut rng,
        )
    }

    fn expect_phase(&self, operation: &'static str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(HtfeError::OutOfOrder {
                operation,
                phase: self.phase,
            })
        }
    }

    // --- Input / output ---

    /// Set one element of the input frame (row-major index).
    pub fn set_input(&mut self, index: usize, value: f32) -> Result<()> {
        let len = self.input.len();
        let slot = self
            .input
            .get_mut(index)
            .ok_or(HtfeError::OutOfBounds { index, len })?;
        *slot = value;
        Ok(())
    }

    pub fn set_input_xy(&mut self, x: i32, y: i32, value: f32) -> Result<()> {
        let index = self.xy_index(x, y)?;
        self.set_input(index, value)
    }

    /// Predicted value of one element of the next input frame.
    pub fn get_prediction(&self, index: usize) -> Result<f32> {
        self.prediction.get(index).copied().ok_or(HtfeError::OutOfBounds {
            index,
            len: self.prediction.len(),
        })
    }

    pub fn get_prediction_xy(&self, x: i32, y: i32) -> Result<f32> {
        self.get_prediction(self.xy_index(x, y)?)
    }

    /// The whole predicted frame, row-major.
    pub fn prediction(&self) -> &[f32] {
        &self.prediction
    }

    /// The host input buffer as it will be read by the next `activate`.
    pub fn input(&self) -> &[f32] {
        &self.input
    }

    /// The input frame consumed by the previous step.
    pub fn previous_input(&self) -> &[f32] {
        self.input_frame.get(1).data()
    }

    fn xy_index(&self, x: i32, y: i32) -> Result<usize> {
        let pos = Int2::new(x, y);
        if !in_bounds0(pos, self.input_size) {
            let index = if x >= 0 && y >= 0 {
                x as usize + y as usize * self.input_size.x.max(0) as usize
            } else {
                usize::MAX
            };
            return Err(HtfeError::OutOfBounds {
                index,
                len: self.input.len(),
            });
        }
        Ok(address2(pos, self.input_size))
    }

    // --- Step ---

    /// Run the ascend (bottom-up) and descend (top-down) passes.
    ///
    /// `seeds` supplies the seed pairs of the two noisy bottom-layer decodes:
    /// ordinal 0 for the input reconstruction, ordinal 1 for the prediction.
    pub fn activate<S: SeedSource + ?Sized>(&mut self, cs: &ComputeSystem, seeds: &mut S) -> Result<()> {
        self.expect_phase("activate", &[Phase::Ready])?;

        let ascend_seed = seeds.next_seed_pair(self.step, 0);
        let descend_seed = seeds.next_seed_pair(self.step, 1);

        self.input_frame.front_mut().data_mut().copy_from_slice(&self.input);

        let k = &self.kernels;
        let num_layers = self.layers.len();

        for l in 0..num_layers {
            let (below, layer, _) = split_layers(&mut self.layers, l);
            let input = match below {
                Some(below) => Plane::from(below.spatial_states.front()),
                None => Plane::from(self.input_frame.front()),
            };
            let seed = (l == 0).then_some(ascend_seed);
            ascend_layer(cs, k, &self.layer_descs[l], input, layer, seed);
        }

        for l in (0..num_layers).rev() {
            let (_, layer, above) = split_layers(&mut self.layers, l);
            let seed = (l == 0).then_some(descend_seed);
            descend_layer(cs, k, &self.layer_descs[l], layer, above, seed);
        }

        self.prediction
            .copy_from_slice(self.layers[0].predicted_input_reconstruction.data());

        self.phase = Phase::Activated;
        log::debug!("step {}: activated", self.step);
        Ok(())
    }

    /// Compute updated weights from this step's states and the committed
    /// weights. The updates take effect at `step_end`.
    pub fn learn(&mut self, cs: &ComputeSystem) -> Result<()> {
        self.expect_phase("learn", &[Phase::Activated])?;

        let k = &self.kernels;

        for l in 0..self.layers.len() {
            let (below, layer, above) = split_layers(&mut self.layers, l);
            let input = match below {
                Some(below) => Plane::from(below.spatial_states.front()),
                None => Plane::from(self.input_frame.front()),
            };
            learn_layer(cs, k, &self.layer_descs[l], input, layer, above, l == 0);
        }

        self.phase = Phase::Learned;
        log::debug!("step {}: learned", self.step);
        Ok(())
    }

    /// Close the step: rotate state history and, if `learn` ran, commit the
    /// updated weights.
    pub fn step_end(&mut self) -> Result<()> {
        self.expect_phase("step_end", &[Phase::Activated, Phase::Learned])?;

        let commit = self.phase == Phase::Learned;
        for layer in self.layers.iter_mut() {
            layer.rotate_states();
            if commit {
                layer.rotate_weights();
            }
        }
        self.input_frame.push_front();

        log::debug!("step {}: ended (weights committed: {})", self.step, commit);
        self.step += 1;
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Forget the temporal context. Weights, duty cycles of the spatial plane
    /// and the step counter are kept. Also accepted right after `learn`; the
    /// pending weight updates still commit at `step_end`.
    pub fn clear_memory(&mut self) -> Result<()> {
        self.expect_phase("clear_memory", &[Phase::Ready, Phase::Learned])?;
        for layer in self.layers.iter_mut() {
            layer.clear_temporal_state();
        }
        log::debug!("step {}: temporal memory cleared", self.step);
        Ok(())
    }

    // --- Accessors ---

    pub fn input_size(&self) -> Int2 {
        self.input_size
    }

    pub fn layer_descs(&self) -> &[LayerDesc] {
        &self.layer_descs
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, l: usize) -> &Layer {
        &self.layers[l]
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of completed steps.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn init_range(&self) -> (f32, f32) {
        self.init_range
    }

    // --- Serialization ---

    /// Write the topology, recurrent state and committed weights.
    pub fn write(&self, writer: &mut dyn StreamWriter) -> Result<()> {
        self.expect_phase("write", &[Phase::Ready])?;

        writer.write_bytes(MAGIC);
        writer.write_u32(VERSION);
        writer.write_int2(self.input_size);
        writer.write_u32(self.layer_descs.len() as u32);
        for desc in &self.layer_descs {
            let json = serde_json::to_vec(desc)?;
            writer.write_u32(json.len() as u32);
            writer.write_bytes(&json);
        }
        writer.write_f32(self.init_range.0);
        writer.write_f32(self.init_range.1);
        writer.write_u64(self.step);

        self.write_state(writer)?;
        self.write_weights(writer)
    }

    /// Rebuild a network written by [`write`](Htfe::write).
    pub fn read(program: &ComputeProgram, reader: &mut dyn StreamReader) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_bytes(&mut magic)?;
        if &magic != MAGIC {
            return Err(HtfeError::Serialization(format!("bad magic {:?}", magic)));
        }
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(HtfeError::Serialization(format!(
                "unsupported version {} (expected {})",
                version, VERSION
            )));
        }

        let input_size = reader.read_int2()?;
        let num_layers = reader.read_u32()? as usize;
        let mut layer_descs = Vec::new();
        for _ in 0..num_layers {
            let len = reader.read_u32()? as usize;
            if len > MAX_DESC_BYTES {
                return Err(HtfeError::Serialization(format!(
                    "layer descriptor of {} bytes exceeds limit",
                    len
                )));
            }
            let mut json = vec![0u8; len];
            reader.read_bytes(&mut json)?;
            layer_descs.push(serde_json::from_slice::<LayerDesc>(&json)?);
        }
        let min = reader.read_f32()?;
        let max = reader.read_f32()?;
        let step = reader.read_u64()?;

        let mut net = Self::allocate(program, input_size, layer_descs, (min, max))?;
        net.step = step;
        net.read_state(reader)?;
        net.read_weights(reader)?;

        log::info!("read HTFE network: {} layers at step {}", net.layers.len(), step);
        Ok(net)
    }

    /// Write the recurrent state: every state history generation, the
    /// double-buffered reconstructions, the previous input frame and the
    /// current prediction.
    pub fn write_state(&self, writer: &mut dyn StreamWriter) -> Result<()> {
        self.expect_phase("write_state", &[Phase::Ready])?;

        for layer in &self.layers {
            write_ring(writer, &layer.spatial_states, |w, g| w.write_float2_slice(g.data()));
            write_ring(writer, &layer.temporal_states, |w, g| w.write_float2_slice(g.data()));
            write_ring(writer, &layer.temporal_reconstruction, |w, g| w.write_f32_slice(g.data()));
            write_ring(writer, &layer.predicted_spatial, |w, g| w.write_f32_slice(g.data()));
        }
        write_ring(writer, &self.input_frame, |w, g| w.write_f32_slice(g.data()));
        writer.write_f32_slice(&self.prediction);
        Ok(())
    }

    pub fn read_state(&mut self, reader: &mut dyn StreamReader) -> Result<()> {
        self.expect_phase("read_state", &[Phase::Ready])?;

        for layer in self.layers.iter_mut() {
            read_ring(reader, &mut layer.spatial_states, |r, g| r.read_float2_slice(g.data_mut()))?;
            read_ring(reader, &mut layer.temporal_states, |r, g| r.read_float2_slice(g.data_mut()))?;
            read_ring(reader, &mut layer.temporal_reconstruction, |r, g| r.read_f32_slice(g.data_mut()))?;
            read_ring(reader, &mut layer.predicted_spatial, |r, g| r.read_f32_slice(g.data_mut()))?;
        }
        read_ring(reader, &mut self.input_frame, |r, g| r.read_f32_slice(g.data_mut()))?;
        reader.read_f32_slice(&mut self.prediction)
    }

    /// Write the committed weights of every layer, including momentum.
    pub fn write_weights(&self, writer: &mut dyn StreamWriter) -> Result<()> {
        self.expect_phase("write_weights", &[Phase::Ready])?;

        for layer in &self.layers {
            for weights in layer.committed_weights() {
                writer.write_float2_slice(weights.data());
            }
        }
        Ok(())
    }

    pub fn read_weights(&mut self, reader: &mut dyn StreamReader) -> Result<()> {
        self.expect_phase("read_weights", &[Phase::Ready])?;

        for layer in self.layers.iter_mut() {
            reader.read_float2_slice(layer.spatial_weights.front_mut().data_mut())?;
            reader.read_float2_slice(layer.predictive_reconstruction_weights.front_mut().data_mut())?;
            reader.read_float2_slice(layer.predictive_weights.front_mut().data_mut())?;
            reader.read_float2_slice(layer.lateral_weights.front_mut().data_mut())?;
            if let Some(feedback) = &mut layer.feedback_weights {
                reader.read_float2_slice(feedback.front_mut().data_mut())?;
            }

            layer.spatial_weights.snapshot_front();
            layer.predictive_reconstruction_weights.snapshot_front();
            layer.predictive_weights.snapshot_front();
            layer.lateral_weights.snapshot_front();
            if let Some(feedback) = &mut layer.feedback_weights {
                feedback.snapshot_front();
            }
        }
        Ok(())
    }
}

/// Generations are written newest first so the ring offset is not persisted.
fn write_ring<T>(
    writer: &mut dyn StreamWriter,
    ring: &CircleBuffer<T>,
    write: impl Fn(&mut dyn StreamWriter, &T),
) {
    for g in 0..ring.len() {
        write(writer, ring.get(g));
    }
}

fn read_ring<T>(
    reader: &mut dyn StreamReader,
    ring: &mut CircleBuffer<T>,
    read: impl Fn(&mut dyn StreamReader, &mut T) -> Result<()>,
) -> Result<()> {
    for g in 0..ring.len() {
        read(reader, ring.get_mut(g))?;
    }
    Ok(())
}

// --- Per-layer passes ---

fn ascend_layer(
    cs: &ComputeSystem,
    k: &Kernels,
    desc: &LayerDesc,
    input: Plane<'_>,
    layer: &mut Layer,
    noise_seed: Option<SeedPair>,
) {
    spatial_activate(
        cs,
        &k.spatial_activate,
        SpatialActivateArgs {
            input,
            weights: layer.spatial_weights.get(1),
            radius: desc.receptive_field_radius,
        },
        &mut layer.spatial_activations,
    );

    let (states, prev_states) = layer.spatial_states.front_and_prev_mut();
    inhibit(
        cs,
        &k.inhibit,
        InhibitArgs {
            activations: &layer.spatial_activations,
            prev_states,
            radius: desc.spatial_inhibition_radius,
            sparsity: desc.spatial_sparsity,
            duty_cycle_decay: desc.duty_cycle_decay,
        },
        states,
    );

    let decode = ReconstructArgs {
        hidden: Plane::from(layer.spatial_states.front()),
        weights: layer.spatial_weights.get(1),
        radius: desc.receptive_field_radius,
    };
    decode_input(cs, k, decode, desc.gaussian_noise, noise_seed, &mut layer.input_reconstruction);
}

fn descend_layer(
    cs: &ComputeSystem,
    k: &Kernels,
    desc: &LayerDesc,
    layer: &mut Layer,
    above: Option<&Layer>,
    noise_seed: Option<SeedPair>,
) {
    let lateral = LateralInput {
        prev_states: layer.temporal_states.get(1),
        weights: layer.lateral_weights.get(1),
        radius: desc.lateral_connection_radius,
        scalar: desc.lateral_scalar,
    };

    match (above, layer.feedback_weights.as_ref()) {
        (Some(above), Some(feedback)) => temporal_activate(
            cs,
            &k.temporal_activate,
            TemporalActivateArgs {
                spatial_states: layer.spatial_states.front(),
                predictive_weights: layer.predictive_weights.get(1),
                predictive_radius: desc.predictive_radius,
                lateral,
                feedback: FeedbackInput {
                    states: above.temporal_states.front(),
                    weights: feedback.get(1),
                    radius: desc.feedback_connection_radius,
                    scalar: desc.feedback_scalar,
                },
            },
            &mut layer.temporal_activations,
        ),
        _ => temporal_activate_last(
            cs,
            &k.temporal_activate_last,
            TemporalActivateLastArgs {
                spatial_activations: &layer.spatial_activations,
                lateral,
            },
            &mut layer.temporal_activations,
        ),
    }

    let (states, prev_states) = layer.temporal_states.front_and_prev_mut();
    inhibit(
        cs,
        &k.inhibit,
        InhibitArgs {
            activations: &layer.temporal_activations,
            prev_states,
            radius: desc.temporal_inhibition_radius,
            sparsity: desc.temporal_sparsity,
            duty_cycle_decay: desc.duty_cycle_decay,
        },
        states,
    );

    let temporal = Plane::from(layer.temporal_states.front());

    reconstruct(
        cs,
        &k.spatial_reconstruct,
        ReconstructArgs {
            hidden: temporal,
            weights: layer.predictive_weights.get(1),
            radius: desc.predictive_radius,
        },
        &mut layer.spatial_reconstruction,
    );

    reconstruct(
        cs,
        &k.temporal_reconstruct,
        ReconstructArgs {
            hidden: temporal,
            weights: layer.lateral_weights.get(1),
            radius: desc.lateral_connection_radius,
        },
        layer.temporal_reconstruction.front_mut(),
    );

    if let (Some(feedback), Some(next)) = (
        layer.feedback_weights.as_ref(),
        layer.next_temporal_reconstruction.as_mut(),
    ) {
        reconstruct(
            cs,
            &k.next_temporal_reconstruct,
            ReconstructArgs {
                hidden: temporal,
                weights: feedback.get(1),
                radius: desc.feedback_connection_radius,
            },
            next,
        );
    }

    spatial_predictive_reconstruct(
        cs,
        &k.spatial_predictive_reconstruct,
        SpatialPredictiveArgs {
            temporal_states: layer.temporal_states.front(),
            weights: layer.predictive_reconstruction_weights.get(1),
            radius: desc.reconstruction_radius,
        },
        layer.predicted_spatial.front_mut(),
    );

    let decode = ReconstructArgs {
        hidden: Plane::from(layer.predicted_spatial.front()),
        weights: layer.spatial_weights.get(1),
        radius: desc.receptive_field_radius,
    };
    decode_input(
        cs,
        k,
        decode,
        desc.gaussian_noise,
        noise_seed,
        &mut layer.predicted_input_reconstruction,
    );

    for _ in 0..desc.num_blur_passes {
        gaussian_blur_x(
            cs,
            &k.gaussian_blur_x,
            GaussianBlurArgs {
                source: &layer.predicted_input_reconstruction,
                kernel_width: desc.blur_kernel_width,
            },
            &mut layer.blur_scratch,
        );
        gaussian_blur_y(
            cs,
            &k.gaussian_blur_y,
            GaussianBlurArgs {
                source: &layer.blur_scratch,
                kernel_width: desc.blur_kernel_width,
            },
            &mut layer.predicted_input_reconstruction,
        );
    }
}

/// Decode into the map below. A seed marks the bottom layer, whose decode is
/// linear with additive noise.
fn decode_input(
    cs: &ComputeSystem,
    k: &Kernels,
    decode: ReconstructArgs<'_>,
    noise: f32,
    noise_seed: Option<SeedPair>,
    out: &mut Image2D<f32>,
) {
    match noise_seed {
        Some(seed) => reconstruct_linear(
            cs,
            &k.input_reconstruct_linear,
            LinearReconstructArgs { decode, noise, seed },
            out,
        ),
        None => reconstruct(cs, &k.input_reconstruct, decode, out),
    }
}

fn learn_layer(
    cs: &ComputeSystem,
    k: &Kernels,
    desc: &LayerDesc,
    input: Plane<'_>,
    layer: &mut Layer,
    above: Option<&Layer>,
    bottom: bool,
) {
    // Spatial encoder against the map below
    let (weights, prev_weights) = layer.spatial_weights.front_and_prev_mut();
    update_spatial_weights(
        cs,
        &k.update_spatial_weights,
        DecoderUpdateArgs {
            hidden: layer.spatial_states.front(),
            target: input,
            reconstruction: &layer.input_reconstruction,
            prev_weights,
            radius: desc.receptive_field_radius,
            rates: LearningRates {
                alpha: desc.spatial_alpha,
                lambda: desc.spatial_lambda,
                momentum: desc.spatial_momentum,
            },
            min_derivative: desc.min_derivative,
            linear: bottom,
            bias_sparsity: Some(desc.spatial_sparsity),
        },
        weights,
    );

    let temporal_kernel = if above.is_some() {
        &k.update_temporal_weights
    } else {
        &k.update_temporal_weights_last
    };

    // Predictive: this step's temporal code decoding this step's spatial code
    let (weights, prev_weights) = layer.predictive_weights.front_and_prev_mut();
    update_temporal_weights(
        cs,
        temporal_kernel,
        DecoderUpdateArgs {
            hidden: layer.temporal_states.front(),
            target: Plane::from(layer.spatial_states.front()),
            reconstruction: &layer.spatial_reconstruction,
            prev_weights,
            radius: desc.predictive_radius,
            rates: LearningRates {
                alpha: desc.predictive_alpha,
                lambda: desc.temporal_lambda,
                momentum: desc.predictive_momentum,
            },
            min_derivative: desc.min_derivative,
            linear: false,
            bias_sparsity: Some(desc.temporal_sparsity),
        },
        weights,
    );

    // Lateral: last step's reconstruction of the state two steps back
    let (weights, prev_weights) = layer.lateral_weights.front_and_prev_mut();
    update_temporal_weights(
        cs,
        temporal_kernel,
        DecoderUpdateArgs {
            hidden: layer.temporal_states.get(1),
            target: Plane::from(layer.temporal_states.get(2)),
            reconstruction: layer.temporal_reconstruction.get(1),
            prev_weights,
            radius: desc.lateral_connection_radius,
            rates: LearningRates {
                alpha: desc.lateral_alpha,
                lambda: desc.temporal_lambda,
                momentum: desc.lateral_momentum,
            },
            min_derivative: desc.min_derivative,
            linear: false,
            bias_sparsity: None,
        },
        weights,
    );

    if let (Some(above), Some(feedback), Some(next)) = (
        above,
        layer.feedback_weights.as_mut(),
        layer.next_temporal_reconstruction.as_ref(),
    ) {
        let (weights, prev_weights) = feedback.front_and_prev_mut();
        update_temporal_weights(
            cs,
            temporal_kernel,
            DecoderUpdateArgs {
                hidden: layer.temporal_states.front(),
                target: Plane::from(above.temporal_states.front()),
                reconstruction: next,
                prev_weights,
                radius: desc.feedback_connection_radius,
                rates: LearningRates {
                    alpha: desc.feedback_alpha,
                    lambda: desc.temporal_lambda,
                    momentum: desc.feedback_momentum,
                },
                min_derivative: desc.min_derivative,
                linear: false,
                bias_sparsity: None,
            },
            weights,
        );
    }

    // Predicted spatial: last step's prediction against this step's code
    let (weights, prev_weights) = layer.predictive_reconstruction_weights.front_and_prev_mut();
    update_predictive_reconstruction_weights(
        cs,
        &k.update_predictive_reconstruction_weights,
        PredictiveReconstructionUpdateArgs {
            prev_temporal_states: layer.temporal_states.get(1),
            spatial_states: layer.spatial_states.front(),
            prev_predicted: layer.predicted_spatial.get(1),
            prev_weights,
            radius: desc.reconstruction_radius,
            rates: LearningRates {
                alpha: desc.reconstruction_alpha,
                lambda: desc.temporal_lambda,
                momentum: desc.reconstruction_momentum,
            },
            min_derivative: desc.min_derivative,
        },
        weights,
    );
}
