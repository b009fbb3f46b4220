// HTFE - compute system (device, kernel program, grid dispatch)

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{HtfeError, Result};
use crate::helpers::get_num_threads;

/// Where kernel dispatches execute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Data-parallel over the rayon thread pool, one task per site chunk.
    #[default]
    Cpu,
    /// In-order on the calling thread. Produces the same results as `Cpu`.
    Serial,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Serial => write!(f, "serial"),
        }
    }
}

/// Identity of every kernel entry point the engine dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelId {
    InitializeSpatialWeights,
    InitializeTemporalWeights,
    Inhibit,
    SpatialActivate,
    TemporalActivate,
    TemporalActivateLast,
    InputReconstruct,
    InputReconstructLinear,
    SpatialReconstruct,
    TemporalReconstruct,
    NextTemporalReconstruct,
    SpatialPredictiveReconstruct,
    UpdateSpatialWeights,
    UpdateTemporalWeights,
    UpdateTemporalWeightsLast,
    UpdatePredictiveReconstructionWeights,
    GaussianBlurX,
    GaussianBlurY,
}

const NUM_KERNELS: usize = 18;

impl KernelId {
    pub const ALL: [KernelId; NUM_KERNELS] = [
        KernelId::InitializeSpatialWeights,
        KernelId::InitializeTemporalWeights,
        KernelId::Inhibit,
        KernelId::SpatialActivate,
        KernelId::TemporalActivate,
        KernelId::TemporalActivateLast,
        KernelId::InputReconstruct,
        KernelId::InputReconstructLinear,
        KernelId::SpatialReconstruct,
        KernelId::TemporalReconstruct,
        KernelId::NextTemporalReconstruct,
        KernelId::SpatialPredictiveReconstruct,
        KernelId::UpdateSpatialWeights,
        KernelId::UpdateTemporalWeights,
        KernelId::UpdateTemporalWeightsLast,
        KernelId::UpdatePredictiveReconstructionWeights,
        KernelId::GaussianBlurX,
        KernelId::GaussianBlurY,
    ];

    /// Entry-point name used to look the kernel up in a [`ComputeProgram`].
    pub fn name(self) -> &'static str {
        match self {
            KernelId::InitializeSpatialWeights => "initializeSpatialWeights",
            KernelId::InitializeTemporalWeights => "initializeTemporalWeights",
            KernelId::Inhibit => "layerInhibit",
            KernelId::SpatialActivate => "layerSpatialActivate",
            KernelId::TemporalActivate => "layerTemporalActivate",
            KernelId::TemporalActivateLast => "layerTemporalActivateLast",
            KernelId::InputReconstruct => "layerInputReconstruct",
            KernelId::InputReconstructLinear => "layerInputReconstructLinear",
            KernelId::SpatialReconstruct => "layerSpatialReconstruct",
            KernelId::TemporalReconstruct => "layerTemporalReconstruct",
            KernelId::NextTemporalReconstruct => "layerNextTemporalReconstruct",
            KernelId::SpatialPredictiveReconstruct => "layerSpatialPredictiveReconstruct",
            KernelId::UpdateSpatialWeights => "layerUpdateSpatialWeights",
            KernelId::UpdateTemporalWeights => "layerUpdateTemporalWeights",
            KernelId::UpdateTemporalWeightsLast => "layerUpdateTemporalWeightsLast",
            KernelId::UpdatePredictiveReconstructionWeights => {
                "layerUpdatePredictiveReconstructionWeights"
            }
            KernelId::GaussianBlurX => "gaussianBlurX",
            KernelId::GaussianBlurY => "gaussianBlurY",
        }
    }

    pub fn from_name(name: &str) -> Option<KernelId> {
        Self::ALL.iter().copied().find(|id| id.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dispatchable handle obtained from [`ComputeProgram::kernel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kernel {
    id: KernelId,
}

impl Kernel {
    pub fn id(&self) -> KernelId {
        self.id
    }
}

/// The set of entry points available for dispatch.
#[derive(Clone, Debug)]
pub struct ComputeProgram {
    entry_points: Vec<KernelId>,
}

impl ComputeProgram {
    /// Load every built-in kernel for the given compute system.
    pub fn load(cs: &ComputeSystem) -> Self {
        log::debug!(
            "loaded {} kernel entry points for {} device",
            NUM_KERNELS,
            cs.device()
        );
        Self {
            entry_points: KernelId::ALL.to_vec(),
        }
    }

    /// A program exposing only the listed entry points.
    pub fn with_entry_points(entry_points: &[KernelId]) -> Self {
        Self {
            entry_points: entry_points.to_vec(),
        }
    }

    /// Look up an entry point by name.
    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        KernelId::from_name(name)
            .filter(|id| self.entry_points.contains(id))
            .map(|id| Kernel { id })
            .ok_or_else(|| HtfeError::MissingKernel(name.to_string()))
    }

    pub fn entry_points(&self) -> &[KernelId] {
        &self.entry_points
    }
}

/// Executes kernel dispatches and keeps per-kernel dispatch counts.
#[derive(Debug)]
pub struct ComputeSystem {
    device: DeviceType,
    dispatches: [AtomicU64; NUM_KERNELS],
}

impl ComputeSystem {
    pub fn create(device: DeviceType) -> Self {
        log::info!(
            "compute system created on {} device ({} worker threads)",
            device,
            match get_num_threads() {
                0 => rayon::current_num_threads(),
                n => n,
            }
        );
        Self {
            device,
            dispatches: Default::default(),
        }
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    /// Run `f` once per site of `out`. Each site owns `stride` consecutive
    /// elements; `f` receives the site index and that site's slice. Sites are
    /// independent, so the order of execution does not affect the result.
    pub fn dispatch<T, F>(&self, kernel: &Kernel, out: &mut [T], stride: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        debug_assert!(stride > 0 && out.len() % stride == 0);
        self.dispatches[kernel.id.index()].fetch_add(1, Ordering::Relaxed);
        log::trace!("dispatch {} over {} sites", kernel.id, out.len() / stride);

        match self.device {
            DeviceType::Cpu => out
                .par_chunks_mut(stride)
                .enumerate()
                .for_each(|(i, site)| f(i, site)),
            DeviceType::Serial => out
                .chunks_mut(stride)
                .enumerate()
                .for_each(|(i, site)| f(i, site)),
        }
    }

    /// Number of dispatches issued for `id` so far.
    pub fn dispatch_count(&self, id: KernelId) -> u64 {
        self.dispatches[id.index()].load(Ordering::Relaxed)
    }
}

impl Default for ComputeSystem {
    fn default() -> Self {
        Self::create(DeviceType::default())
    }
}
