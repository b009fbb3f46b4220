// HTFE - hierarchical temporal feature extractor
//
// A stack of layers, each with a sparse spatial code of the layer below and a
// sparse temporal code that predicts it, trained online with local rules and
// executed as data-parallel kernel dispatches.

pub mod buffers;
pub mod compute;
pub mod config;
pub mod error;
pub mod helpers;
pub mod htfe;
pub mod kernels;
pub mod layer;
pub mod seeds;

pub use compute::{ComputeProgram, ComputeSystem, DeviceType, KernelId};
pub use config::NetworkConfig;
pub use error::{HtfeError, Result};
pub use htfe::{Htfe, Phase};
pub use layer::{Layer, LayerDesc};
pub use seeds::{RngSeeds, SeedPair, SeedSource, SeedStream};
