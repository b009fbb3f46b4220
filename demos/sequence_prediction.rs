// Sequence prediction demo for the HTFE network
//
// Trains on a few synthetic piano-roll sequences (notes 21..109 laid out on a
// 10x10 input frame), then replays them without learning and reports how
// often the thresholded prediction disagrees with the next frame.
//
// Run with: cargo run --release --example sequence_prediction [config.json]
// Set RUST_LOG=debug to trace the step phases.

use htfe::{ComputeProgram, ComputeSystem, Htfe, LayerDesc, NetworkConfig, SeedStream};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const MIN_NOTE: usize = 21;
const MAX_NOTE: usize = 109;
const NUM_NOTES: usize = MAX_NOTE - MIN_NOTE;

/// A looping chord progression with a random melody note on top.
fn make_sequence(rng: &mut ChaCha8Rng, len: usize) -> Vec<Vec<usize>> {
    let roots = [48usize, 53, 55, 48];
    (0..len)
        .map(|t| {
            let root = roots[(t / 4) % roots.len()];
            let mut chord = vec![root, root + 4, root + 7];
            if t % 2 == 0 {
                chord.push(root + 12 + rng.gen_range(0..5) * 2);
            }
            chord
        })
        .collect()
}

fn load_frame(net: &mut Htfe, notes: &[usize]) -> htfe::Result<Vec<f32>> {
    let mut frame = vec![0.0; net.input().len()];
    for &note in notes {
        frame[note - MIN_NOTE] = 1.0;
    }
    for (i, &v) in frame.iter().enumerate() {
        net.set_input(i, v)?;
    }
    Ok(frame)
}

fn default_config() -> NetworkConfig {
    let side = (NUM_NOTES as f32).sqrt().ceil() as i32;
    let layer = |size: i32| LayerDesc {
        spatial_width: size,
        spatial_height: size,
        temporal_width: size,
        temporal_height: size,
        ..Default::default()
    };
    NetworkConfig {
        input_width: side,
        input_height: side,
        seed: 1234,
        layers: vec![layer(16), layer(12), layer(8)],
        ..Default::default()
    }
}

fn main() -> htfe::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => default_config(),
    };
    config.apply_runtime();

    let cs = ComputeSystem::create(config.device);
    let program = ComputeProgram::load(&cs);
    let mut net = Htfe::from_config(&cs, &program, &config)?;
    let mut seeds = SeedStream::new(config.seed);

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let sequences: Vec<_> = (0..4).map(|_| make_sequence(&mut rng, 64)).collect();

    // --- Training ---

    let train_iterations = 3;
    for iteration in 0..train_iterations {
        for (s, sequence) in sequences.iter().enumerate() {
            for notes in sequence {
                load_frame(&mut net, notes)?;
                net.activate(&cs, &mut seeds)?;
                net.learn(&cs)?;
                net.step_end()?;
            }
            net.clear_memory()?;
            println!("Training sequence {} of {} completed.", s + 1, sequences.len());
        }
        println!("Training iteration {} of {} completed.", iteration + 1, train_iterations);
    }

    // --- Testing ---

    let mut errors = 0usize;
    let mut total = 0usize;

    for (s, sequence) in sequences.iter().enumerate() {
        let mut prediction: Option<Vec<f32>> = None;

        for notes in sequence {
            let frame = load_frame(&mut net, notes)?;

            if let Some(prediction) = &prediction {
                for k in 0..NUM_NOTES {
                    if (prediction[k] > 0.5) != (frame[k] > 0.5) {
                        errors += 1;
                    }
                    total += 1;
                }
            }

            net.activate(&cs, &mut seeds)?;
            net.step_end()?;
            prediction = Some(net.prediction().to_vec());
        }

        net.clear_memory()?;
        println!("Test sequence {} of {} tested.", s + 1, sequences.len());
    }

    println!("Error percent: {:.2}%", errors as f32 / total.max(1) as f32 * 100.0);
    Ok(())
}
