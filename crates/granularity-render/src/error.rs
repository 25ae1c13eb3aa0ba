//! Renderer error type

use crate::binding::BindingError;
use crate::gpu::{GpuError, StateError};
use crate::shader_table::ShaderTableError;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create {what}")]
    ResourceCreation {
        what: String,
        #[source]
        source: GpuError,
    },

    #[error("failed to load {what}: {reason}")]
    ShaderOrAssetLoad { what: String, reason: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    ShaderTable(#[from] ShaderTableError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("acceleration structure: {0}")]
    AccelerationStructure(String),

    #[error("frame slot {slot} is out of range (frame count {count})")]
    InvalidFrameSlot { slot: usize, count: usize },

    #[error("invalid mesh '{name}': {reason}")]
    InvalidMesh { name: String, reason: String },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Attach what was being created to a backend failure.
pub(crate) trait GpuResultExt<T> {
    fn creating(self, what: impl Into<String>) -> Result<T, RenderError>;
}

impl<T> GpuResultExt<T> for Result<T, GpuError> {
    fn creating(self, what: impl Into<String>) -> Result<T, RenderError> {
        self.map_err(|source| match source {
            GpuError::ShaderNotFound(name) => RenderError::ShaderOrAssetLoad {
                what: name,
                reason: "compiled shader not found".to_string(),
            },
            source => RenderError::ResourceCreation {
                what: what.into(),
                source,
            },
        })
    }
}
