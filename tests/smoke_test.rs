use htfe::helpers::{SliceReader, StreamWriter, VecWriter};
use htfe::{ComputeProgram, ComputeSystem, DeviceType, Htfe, HtfeError, LayerDesc, NetworkConfig, Phase, SeedStream};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn small_layer(size: i32) -> LayerDesc {
    LayerDesc {
        spatial_width: size,
        spatial_height: size,
        temporal_width: size,
        temporal_height: size,
        receptive_field_radius: 2,
        reconstruction_radius: 2,
        predictive_radius: 2,
        lateral_connection_radius: 2,
        spatial_inhibition_radius: 2,
        temporal_inhibition_radius: 2,
        feedback_connection_radius: 2,
        spatial_sparsity: 0.1,
        temporal_sparsity: 0.1,
        ..Default::default()
    }
}

fn moving_bar(t: usize, size: usize) -> Vec<f32> {
    (0..size * size)
        .map(|i| if i % size == t % size { 1.0 } else { 0.0 })
        .collect()
}

fn feed(net: &mut Htfe, frame: &[f32]) {
    for (i, &v) in frame.iter().enumerate() {
        net.set_input(i, v).unwrap();
    }
}

#[test]
fn test_htfe_create_and_step() {
    let cs = ComputeSystem::create(DeviceType::Cpu);
    let program = ComputeProgram::load(&cs);
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    let mut net = Htfe::build(&cs, &program, 8, 8, &[small_layer(8)], (-0.1, 0.1), &mut rng).unwrap();
    let mut seeds = SeedStream::new(3);

    assert_eq!(net.num_layers(), 1);
    assert_eq!(net.phase(), Phase::Ready);

    for t in 0..5 {
        feed(&mut net, &moving_bar(t, 8));
        net.activate(&cs, &mut seeds).unwrap();
        net.learn(&cs).unwrap();
        net.step_end().unwrap();
    }

    assert_eq!(net.step(), 5);
    assert_eq!(net.phase(), Phase::Ready);
    assert_eq!(net.prediction().len(), 64);
    for &p in net.prediction() {
        assert!(p.is_finite(), "prediction {p} is not finite");
    }
}

#[test]
fn test_htfe_two_layers() {
    let cs = ComputeSystem::create(DeviceType::Cpu);
    let program = ComputeProgram::load(&cs);
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    let layers = vec![small_layer(8), small_layer(6)];
    let mut net = Htfe::build(&cs, &program, 8, 8, &layers, (-0.1, 0.1), &mut rng).unwrap();
    let mut seeds = SeedStream::new(4);

    assert_eq!(net.num_layers(), 2);
    assert!(net.layer(0).feedback_weights().is_some());
    assert!(net.layer(1).feedback_weights().is_none());
    assert!(net.layer(1).next_temporal_reconstruction().is_none());

    for t in 0..3 {
        feed(&mut net, &moving_bar(t, 8));
        net.activate(&cs, &mut seeds).unwrap();
        net.learn(&cs).unwrap();
        net.step_end().unwrap();
    }

    let next = net.layer(0).next_temporal_reconstruction().unwrap();
    assert_eq!(next.len(), 36);
    for &p in net.prediction() {
        assert!(p.is_finite());
    }
}

#[test]
fn test_htfe_clear_memory() {
    let cs = ComputeSystem::create(DeviceType::Cpu);
    let program = ComputeProgram::load(&cs);
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let mut net = Htfe::build(&cs, &program, 8, 8, &[small_layer(8)], (-0.1, 0.1), &mut rng).unwrap();
    let mut seeds = SeedStream::new(6);

    for t in 0..4 {
        feed(&mut net, &moving_bar(t, 8));
        net.activate(&cs, &mut seeds).unwrap();
        net.learn(&cs).unwrap();
        net.step_end().unwrap();
    }

    net.clear_memory().unwrap();

    for g in 0..3 {
        assert!(net.layer(0).temporal_states(g).data().iter().all(|s| s.x == 0.0 && s.y == 0.0));
    }
    assert_eq!(net.step(), 4);
}

#[test]
fn test_htfe_serialization_roundtrip() {
    let cs = ComputeSystem::create(DeviceType::Cpu);
    let program = ComputeProgram::load(&cs);
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let layers = vec![small_layer(8), small_layer(6)];
    let mut net = Htfe::build(&cs, &program, 8, 8, &layers, (-0.1, 0.1), &mut rng).unwrap();
    let mut seeds = SeedStream::new(8);

    for t in 0..6 {
        feed(&mut net, &moving_bar(t, 8));
        net.activate(&cs, &mut seeds).unwrap();
        net.learn(&cs).unwrap();
        net.step_end().unwrap();
    }

    let mut writer = VecWriter::new();
    net.write(&mut writer).unwrap();

    let mut reader = SliceReader::new(&writer.data);
    let mut restored = Htfe::read(&program, &mut reader).unwrap();

    assert_eq!(restored.step(), net.step());
    assert_eq!(restored.layer_descs(), net.layer_descs());
    assert_eq!(restored.prediction(), net.prediction());

    let frame = moving_bar(6, 8);
    feed(&mut net, &frame);
    feed(&mut restored, &frame);
    net.activate(&cs, &mut seeds).unwrap();
    restored.activate(&cs, &mut seeds).unwrap();

    assert_eq!(net.prediction(), restored.prediction(), "predictions differ after round-trip");
}

#[test]
fn test_htfe_state_roundtrip() {
    let cs = ComputeSystem::create(DeviceType::Cpu);
    let program = ComputeProgram::load(&cs);

    let quiet = |size| LayerDesc {
        gaussian_noise: 0.0,
        ..small_layer(size)
    };
    let layers = vec![quiet(8), quiet(6)];

    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut net = Htfe::build(&cs, &program, 8, 8, &layers, (-0.1, 0.1), &mut rng).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut other = Htfe::build(&cs, &program, 8, 8, &layers, (-0.1, 0.1), &mut rng).unwrap();
    let mut seeds = SeedStream::new(10);

    // Inference only, so both networks keep the same weights.
    for t in 0..4 {
        feed(&mut net, &moving_bar(t, 8));
        net.activate(&cs, &mut seeds).unwrap();
        net.step_end().unwrap();
    }

    let mut writer = VecWriter::new();
    net.write_state(&mut writer).unwrap();
    let mut reader = SliceReader::new(&writer.data);
    other.read_state(&mut reader).unwrap();

    assert_eq!(other.prediction(), net.prediction());
    assert_eq!(other.previous_input(), net.previous_input());
    for l in 0..2 {
        for g in 0..3 {
            assert_eq!(other.layer(l).temporal_states(g), net.layer(l).temporal_states(g));
        }
        assert_eq!(other.layer(l).spatial_states(1), net.layer(l).spatial_states(1));
    }

    let frame = moving_bar(4, 8);
    feed(&mut net, &frame);
    feed(&mut other, &frame);
    net.activate(&cs, &mut seeds).unwrap();
    other.activate(&cs, &mut seeds).unwrap();
    assert_eq!(net.prediction(), other.prediction());
}

#[test]
fn test_htfe_weights_roundtrip() {
    let cs = ComputeSystem::create(DeviceType::Cpu);
    let program = ComputeProgram::load(&cs);

    let layers = vec![small_layer(8), small_layer(6)];
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut net = Htfe::build(&cs, &program, 8, 8, &layers, (-0.1, 0.1), &mut rng).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(12);
    let mut other = Htfe::build(&cs, &program, 8, 8, &layers, (-0.1, 0.1), &mut rng).unwrap();
    let mut seeds = SeedStream::new(13);

    for t in 0..4 {
        feed(&mut net, &moving_bar(t, 8));
        net.activate(&cs, &mut seeds).unwrap();
        net.learn(&cs).unwrap();
        net.step_end().unwrap();
    }
    assert_ne!(net.layer(0).committed_weights(), other.layer(0).committed_weights());

    let mut writer = VecWriter::new();
    net.write_weights(&mut writer).unwrap();
    let mut reader = SliceReader::new(&writer.data);
    other.read_weights(&mut reader).unwrap();

    for l in 0..2 {
        assert_eq!(other.layer(l).committed_weights(), net.layer(l).committed_weights());
    }
    // Recurrent state is not part of the weights stream.
    assert!(other.layer(0).temporal_states(1).data().iter().all(|s| s.x == 0.0));
}

#[test]
fn test_htfe_read_rejects_oversized_header() {
    let cs = ComputeSystem::create(DeviceType::Serial);
    let program = ComputeProgram::load(&cs);

    let json = serde_json::to_vec(&LayerDesc::default()).unwrap();
    let mut writer = VecWriter::new();
    writer.write_bytes(b"HTFE");
    writer.write_u32(1);
    writer.write_i32(100_000);
    writer.write_i32(100_000);
    writer.write_u32(1);
    writer.write_u32(json.len() as u32);
    writer.write_bytes(&json);
    writer.write_f32(-0.1);
    writer.write_f32(0.1);
    writer.write_u64(0);

    let mut reader = SliceReader::new(&writer.data);
    match Htfe::read(&program, &mut reader) {
        Err(HtfeError::InvalidConfig(_)) => {}
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("oversized network was accepted"),
    }
}

#[test]
fn test_htfe_from_config() {
    let json = r#"{
        "input_width": 8,
        "input_height": 8,
        "seed": 11,
        "device": "serial",
        "layers": [{
            "spatial_width": 8, "spatial_height": 8,
            "temporal_width": 8, "temporal_height": 8,
            "receptive_field_radius": 2, "reconstruction_radius": 2,
            "predictive_radius": 2, "lateral_connection_radius": 2,
            "spatial_inhibition_radius": 2, "temporal_inhibition_radius": 2,
            "feedback_connection_radius": 2,
            "spatial_sparsity": 0.1, "temporal_sparsity": 0.1
        }]
    }"#;

    let config = NetworkConfig::from_json_str(json).unwrap();
    assert_eq!(config.device, DeviceType::Serial);
    assert_eq!(config.layers[0].reconstruction_alpha, LayerDesc::default().reconstruction_alpha);

    let cs = ComputeSystem::create(config.device);
    let program = ComputeProgram::load(&cs);
    let mut net = Htfe::from_config(&cs, &program, &config).unwrap();
    let mut seeds = SeedStream::new(config.seed);

    net.activate(&cs, &mut seeds).unwrap();
    net.step_end().unwrap();
    assert_eq!(net.step(), 1);
}
