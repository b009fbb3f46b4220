// HTFE - network configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compute::DeviceType;
use crate::error::{HtfeError, Result};
use crate::helpers::*;
use crate::layer::{LayerDesc, MAX_MAP_SITES};

/// Everything needed to build a network, loadable from JSON.
///
/// ```json
/// {
///   "input_width": 16,
///   "input_height": 16,
///   "seed": 7,
///   "device": "cpu",
///   "layers": [{ "spatial_width": 16, "spatial_height": 16 }]
/// }
/// ```
///
/// Omitted layer fields take the [`LayerDesc`] defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub input_width: i32,
    pub input_height: i32,
    pub min_init_weight: f32,
    pub max_init_weight: f32,
    /// Seed for the ChaCha generator that draws weight seeds.
    pub seed: u64,
    pub device: DeviceType,
    /// Size of the global worker pool. `None` leaves rayon's default.
    pub num_threads: Option<usize>,
    pub layers: Vec<LayerDesc>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_width: 16,
            input_height: 16,
            min_init_weight: -0.1,
            max_init_weight: 0.1,
            seed: 0,
            device: DeviceType::Cpu,
            num_threads: None,
            layers: vec![LayerDesc::default()],
        }
    }
}

impl NetworkConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NetworkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("loading network config from {}", path.display());
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn input_size(&self) -> Int2 {
        Int2::new(self.input_width, self.input_height)
    }

    /// Check the network-level fields and every layer against its neighbours.
    pub fn validate(&self) -> Result<()> {
        validate_network(self.input_size(), &self.layers, (self.min_init_weight, self.max_init_weight))?;
        if self.num_threads == Some(0) {
            return Err(HtfeError::InvalidConfig("num_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply the process-wide settings (worker pool size).
    pub fn apply_runtime(&self) {
        if let Some(n) = self.num_threads {
            set_num_threads(n);
        }
    }
}

/// Validation shared by [`NetworkConfig::validate`] and network build.
pub(crate) fn validate_network(input_size: Int2, layers: &[LayerDesc], init_range: (f32, f32)) -> Result<()> {
    if input_size.x < 1 || input_size.y < 1 {
        return Err(HtfeError::InvalidConfig(format!(
            "input size {}x{} must be at least 1x1",
            input_size.x, input_size.y
        )));
    }
    if !input_size.checked_area().is_some_and(|n| n <= MAX_MAP_SITES) {
        return Err(HtfeError::InvalidConfig(format!(
            "input size {}x{} exceeds {MAX_MAP_SITES} sites",
            input_size.x, input_size.y
        )));
    }
    if layers.is_empty() {
        return Err(HtfeError::InvalidConfig("at least one layer is required".into()));
    }
    let (min, max) = init_range;
    if !(min.is_finite() && max.is_finite() && min <= max) {
        return Err(HtfeError::InvalidConfig(format!(
            "initial weight range [{min}, {max}] must be finite and ordered"
        )));
    }

    let mut below = input_size;
    for (l, desc) in layers.iter().enumerate() {
        let above = layers.get(l + 1).map(LayerDesc::temporal_size);
        desc.validate(l, below, above)?;
        below = desc.spatial_size();
    }
    Ok(())
}
