use approx::assert_relative_eq;
use htfe::buffers::{Image2D, Image3D, Plane};
use htfe::helpers::{address2, site_position, Float2, Int2, Int3};
use htfe::kernels::*;
use htfe::layer::{local_activity, window_area};
use htfe::{ComputeProgram, ComputeSystem, DeviceType, KernelId, SeedPair};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn setup() -> (ComputeSystem, ComputeProgram) {
    let cs = ComputeSystem::create(DeviceType::Serial);
    let program = ComputeProgram::load(&cs);
    (cs, program)
}

fn image(size: Int2, value: f32) -> Image2D<f32> {
    let mut image = Image2D::new(size);
    image.fill(value);
    image
}

fn weights(size: Int2, depth: i32, value: f32) -> Image3D<Float2> {
    let mut weights = Image3D::new(Int3::new(size.x, size.y, depth));
    weights.data_mut().fill(Float2::new(value, 0.0));
    weights
}

#[test]
fn test_inhibition_tracks_sparsity() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::Inhibit.name()).unwrap();

    let size = Int2::new(16, 16);
    let radius = 2;
    let sparsity = 0.2;
    let decay = 0.1;

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut activations = Image2D::<f32>::new(size);
    for a in activations.data_mut() {
        *a = rng.gen_range(0.0..1.0);
    }
    let prev_states = Image2D::<Float2>::new(size);
    let mut states = Image2D::<Float2>::new(size);

    inhibit(
        &cs,
        &kernel,
        InhibitArgs {
            activations: &activations,
            prev_states: &prev_states,
            radius,
            sparsity,
            duty_cycle_decay: decay,
        },
        &mut states,
    );

    let active = states.data().iter().filter(|s| s.x == 1.0).count();
    let fraction = active as f32 / size.area() as f32;
    assert!((0.1..=0.32).contains(&fraction), "active fraction {fraction}");

    // Each site follows the window rule exactly.
    let activity = local_activity(sparsity, radius);
    let area = window_area(radius) as f32;
    for i in 0..size.area() {
        let pos = site_position(i, size);
        let own = activations.data()[i] + sparsity;
        let mut higher = 0;
        let mut count = 0;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let other = Int2::new(pos.x + dx, pos.y + dy);
                if other.x < 0 || other.y < 0 || other.x >= size.x || other.y >= size.y {
                    continue;
                }
                count += 1;
                let j = address2(other, size);
                let score = activations.data()[j] + sparsity;
                if j != i && (score > own || (score == own && j < i)) {
                    higher += 1;
                }
            }
        }
        let expected = if (higher as f32) < activity * count as f32 / area { 1.0 } else { 0.0 };
        assert_eq!(states.data()[i].x, expected, "site {i}");
        assert_relative_eq!(states.data()[i].y, decay * expected);
    }
}

#[test]
fn test_inhibition_window_count_matches_local_activity() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::Inhibit.name()).unwrap();

    let size = Int2::new(24, 24);
    let radius = 2;
    let sparsity = 0.2;

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut activations = Image2D::<f32>::new(size);
    for a in activations.data_mut() {
        *a = rng.gen_range(0.0..1.0);
    }
    let prev_states = Image2D::<Float2>::new(size);
    let mut states = Image2D::<Float2>::new(size);

    inhibit(
        &cs,
        &kernel,
        InhibitArgs {
            activations: &activations,
            prev_states: &prev_states,
            radius,
            sparsity,
            duty_cycle_decay: 0.0,
        },
        &mut states,
    );

    // Average active count over every window that lies fully inside the map.
    let mut total = 0usize;
    let mut windows = 0usize;
    for cy in radius..size.y - radius {
        for cx in radius..size.x - radius {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let j = address2(Int2::new(cx + dx, cy + dy), size);
                    if states.data()[j].x == 1.0 {
                        total += 1;
                    }
                }
            }
            windows += 1;
        }
    }

    let mean = total as f32 / windows as f32;
    let target = local_activity(sparsity, radius);
    assert_eq!(target, 5.0);
    assert!((mean - target).abs() <= 0.75, "mean active per window {mean}, target {target}");
}

#[test]
fn test_inhibition_breaks_ties_by_index() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::Inhibit.name()).unwrap();

    let size = Int2::new(3, 3);
    let activations = image(size, 0.5);
    let prev_states = Image2D::<Float2>::new(size);
    let mut states = Image2D::<Float2>::new(size);

    // One winner per full window: only the lowest index survives.
    inhibit(
        &cs,
        &kernel,
        InhibitArgs {
            activations: &activations,
            prev_states: &prev_states,
            radius: 1,
            sparsity: 1.0 / 9.0,
            duty_cycle_decay: 0.0,
        },
        &mut states,
    );

    assert_eq!(states.data()[0].x, 1.0);
    assert_eq!(states.data()[4].x, 0.0);
    assert_eq!(states.data()[8].x, 0.0);
}

#[test]
fn test_spatial_activate_sums_window_and_bias() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::SpatialActivate.name()).unwrap();

    let size = Int2::new(4, 4);
    let input = image(size, 1.0);
    let mut w = weights(size, 10, 0.5);
    for site in w.data_mut().chunks_mut(10) {
        site[9].x = 0.25;
    }
    let mut activations = Image2D::new(size);

    spatial_activate(
        &cs,
        &kernel,
        SpatialActivateArgs {
            input: Plane::from(&input),
            weights: &w,
            radius: 1,
        },
        &mut activations,
    );

    assert_relative_eq!(*activations.get(Int2::new(1, 1)), 9.0 * 0.5 + 0.25);
    assert_relative_eq!(*activations.get(Int2::new(0, 0)), 4.0 * 0.5 + 0.25);
    assert_relative_eq!(*activations.get(Int2::new(3, 1)), 6.0 * 0.5 + 0.25);
}

#[test]
fn test_temporal_activate_last_copies_projected_spatial() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::TemporalActivateLast.name()).unwrap();

    let spatial_size = Int2::new(4, 4);
    let temporal_size = Int2::new(2, 2);
    let mut spatial = Image2D::new(spatial_size);
    for (i, a) in spatial.data_mut().iter_mut().enumerate() {
        *a = i as f32;
    }
    let prev_states = Image2D::<Float2>::new(temporal_size);
    let lateral = weights(temporal_size, 1, 1.0);
    let mut activations = Image2D::new(temporal_size);

    temporal_activate_last(
        &cs,
        &kernel,
        TemporalActivateLastArgs {
            spatial_activations: &spatial,
            lateral: LateralInput {
                prev_states: &prev_states,
                weights: &lateral,
                radius: 0,
                scalar: 0.5,
            },
        },
        &mut activations,
    );

    // (t + 0.5) * 2 lands on spatial site (1, 1), (3, 1), (1, 3), (3, 3)
    assert_eq!(activations.data(), &[5.0f32, 7.0, 13.0, 15.0]);
}

#[test]
fn test_linear_reconstruction_noise_is_seeded_and_bounded() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::InputReconstructLinear.name()).unwrap();

    let visible = Int2::new(8, 8);
    let hidden_size = Int2::new(4, 4);
    let hidden = image(hidden_size, 1.0);
    let w = weights(hidden_size, 9, 0.1);

    let run = |noise: f32, seed: SeedPair| {
        let mut out = Image2D::new(visible);
        reconstruct_linear(
            &cs,
            &kernel,
            LinearReconstructArgs {
                decode: ReconstructArgs {
                    hidden: Plane::from(&hidden),
                    weights: &w,
                    radius: 1,
                },
                noise,
                seed,
            },
            &mut out,
        );
        out
    };

    let clean = run(0.0, SeedPair::new(1, 2));
    let noisy = run(0.05, SeedPair::new(1, 2));
    let again = run(0.05, SeedPair::new(1, 2));
    let other = run(0.05, SeedPair::new(3, 4));

    assert_eq!(noisy, again);
    assert_ne!(noisy, other);
    for (n, c) in noisy.data().iter().zip(clean.data()) {
        assert!((n - c).abs() <= 0.05 + 1e-6);
    }
}

#[test]
fn test_sigmoid_reconstruction_in_unit_interval() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::SpatialReconstruct.name()).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let hidden_size = Int2::new(6, 6);
    let mut hidden = Image2D::<Float2>::new(hidden_size);
    for s in hidden.data_mut() {
        s.x = if rng.gen_bool(0.3) { 1.0 } else { 0.0 };
    }
    let mut w = weights(hidden_size, 26, 0.0);
    for v in w.data_mut() {
        v.x = rng.gen_range(-1.0..1.0);
    }

    let mut out = Image2D::new(Int2::new(9, 9));
    reconstruct(
        &cs,
        &kernel,
        ReconstructArgs {
            hidden: Plane::from(&hidden),
            weights: &w,
            radius: 2,
        },
        &mut out,
    );

    assert!(out.data().iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_gaussian_blur_preserves_constant_and_mass() {
    let (cs, program) = setup();
    let blur_x = program.kernel(KernelId::GaussianBlurX.name()).unwrap();
    let blur_y = program.kernel(KernelId::GaussianBlurY.name()).unwrap();

    assert_relative_eq!(gaussian_taps(1.5).iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    assert_eq!(gaussian_taps(1.0).len(), 5);

    let size = Int2::new(11, 11);
    let constant = image(size, 0.7);
    let mut scratch = Image2D::new(size);
    gaussian_blur_x(&cs, &blur_x, GaussianBlurArgs { source: &constant, kernel_width: 1.0 }, &mut scratch);
    for &v in scratch.data() {
        assert_relative_eq!(v, 0.7, epsilon = 1e-5);
    }

    let mut impulse = Image2D::<f32>::new(size);
    impulse.data_mut()[address2(Int2::new(5, 5), size)] = 1.0;
    gaussian_blur_x(&cs, &blur_x, GaussianBlurArgs { source: &impulse, kernel_width: 1.0 }, &mut scratch);
    let mut out = Image2D::new(size);
    gaussian_blur_y(&cs, &blur_y, GaussianBlurArgs { source: &scratch, kernel_width: 1.0 }, &mut out);

    assert_relative_eq!(out.data().iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    let center = *out.get(Int2::new(5, 5));
    assert!(out.data().iter().all(|&v| v <= center));
    assert_relative_eq!(*out.get(Int2::new(3, 5)), *out.get(Int2::new(7, 5)));
}

#[test]
fn test_spatial_update_moves_window_and_bias_only() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::UpdateSpatialWeights.name()).unwrap();

    let size = Int2::new(4, 4);
    let mut hidden = Image2D::<Float2>::new(size);
    hidden.fill(Float2::new(1.0, 0.0));
    let target = image(size, 1.0);
    let reconstruction = image(size, 0.0);
    let prev = weights(size, 10, 0.2);
    let mut next = prev.clone();

    update_spatial_weights(
        &cs,
        &kernel,
        DecoderUpdateArgs {
            hidden: &hidden,
            target: Plane::from(&target),
            reconstruction: &reconstruction,
            prev_weights: &prev,
            radius: 1,
            rates: LearningRates {
                alpha: 0.1,
                lambda: 0.0,
                momentum: 0.0,
            },
            min_derivative: 0.01,
            linear: true,
            bias_sparsity: Some(0.2),
        },
        &mut next,
    );

    // Corner site: only the lower-right 2x2 of its 3x3 field is in bounds.
    let corner = next.site(Int2::new(0, 0));
    for (wi, w) in corner[..9].iter().enumerate() {
        let in_window = wi % 3 >= 1 && wi / 3 >= 1;
        let expected = if in_window { 0.3 } else { 0.2 };
        assert_relative_eq!(w.x, expected, epsilon = 1e-6);
    }
    assert_relative_eq!(corner[9].x, 0.2 + 0.1 * 0.2, epsilon = 1e-6);
    assert_relative_eq!(corner[9].y, 0.1 * 0.2, epsilon = 1e-6);
}

#[test]
fn test_update_without_rate_or_momentum_is_identity() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::UpdatePredictiveReconstructionWeights.name()).unwrap();

    let spatial_size = Int2::new(6, 6);
    let temporal_size = Int2::new(4, 4);
    let mut temporal = Image2D::<Float2>::new(temporal_size);
    temporal.fill(Float2::new(1.0, 0.1));
    let mut spatial = Image2D::<Float2>::new(spatial_size);
    spatial.fill(Float2::new(1.0, 0.1));
    let predicted = image(spatial_size, 0.3);

    let mut prev = weights(spatial_size, 10, 0.4);
    for (i, w) in prev.data_mut().iter_mut().enumerate() {
        w.y = i as f32 * 0.001;
    }
    let mut next = Image3D::new(prev.size());

    update_predictive_reconstruction_weights(
        &cs,
        &kernel,
        PredictiveReconstructionUpdateArgs {
            prev_temporal_states: &temporal,
            spatial_states: &spatial,
            prev_predicted: &predicted,
            prev_weights: &prev,
            radius: 1,
            rates: LearningRates {
                alpha: 0.0,
                lambda: 0.5,
                momentum: 0.0,
            },
            min_derivative: 0.01,
        },
        &mut next,
    );

    for (a, b) in next.data().iter().zip(prev.data()) {
        assert_eq!(a.x, b.x);
    }
}

#[test]
fn test_weight_initialization_range_and_salts() {
    let (cs, program) = setup();
    let kernel = program.kernel(KernelId::InitializeTemporalWeights.name()).unwrap();

    let init = |salt: u64| {
        let mut w = Image3D::<Float2>::new(Int3::new(5, 5, 9));
        initialize_weights(
            &cs,
            &kernel,
            InitializeWeightsArgs {
                seed: SeedPair::new(10, 20),
                salt,
                min_weight: -0.5,
                max_weight: 0.5,
            },
            &mut w,
        );
        w
    };

    let lateral = init(SALT_LATERAL);
    assert!(lateral.data().iter().all(|w| (-0.5..=0.5).contains(&w.x) && w.y == 0.0));
    assert_eq!(lateral, init(SALT_LATERAL));
    assert_ne!(lateral, init(SALT_FEEDBACK));
}
