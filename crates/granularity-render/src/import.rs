//! Seam to the file importers that feed the renderer.

use std::path::Path;

use vulkano::format::Format;

use crate::mesh::MeshData;

/// Boxed error an importer reports; the renderer only needs its message.
pub type ImportError = Box<dyn std::error::Error + Send + Sync>;

/// Decoded environment texture, tightly packed rows.
#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub data: Vec<u8>,
}

/// Loads the model mesh and environment map for [`HybridRenderer::init`](crate::HybridRenderer::init).
pub trait SceneImporter {
    fn import_mesh(&self, path: &Path) -> Result<MeshData, ImportError>;

    fn import_environment(&self, path: &Path) -> Result<EnvironmentMap, ImportError>;
}
