// HTFE - error types

use thiserror::Error;

use crate::htfe::Phase;

/// Errors reported by network construction, stepping and persistence.
#[derive(Debug, Error)]
pub enum HtfeError {
    /// A layer descriptor is inconsistent with the map sizes it connects.
    #[error("layer {layer}: {message}")]
    InvalidLayerDesc { layer: usize, message: String },

    /// The network-level configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The compute program does not provide a required entry point.
    #[error("kernel entry point `{0}` not found in program")]
    MissingKernel(String),

    /// An operation was called outside its place in the step cycle.
    #[error("`{operation}` called while the network is {phase}")]
    OutOfOrder {
        operation: &'static str,
        phase: Phase,
    },

    #[error("index {index} out of bounds for buffer of length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HtfeError>;
