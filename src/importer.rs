//! Bridges the asset server to the renderer's importer seam.

use std::path::{Path, PathBuf};

use granularity_assets::{AssetServer, TextureAsset, TextureFormat};
use granularity_render::{EnvironmentMap, ImportError, MeshData, SceneImporter};
use parking_lot::Mutex;
use vulkano::format::Format;

/// [`SceneImporter`] backed by a caching [`AssetServer`].
pub struct AssetImporter {
    server: Mutex<AssetServer>,
}

impl AssetImporter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            server: Mutex::new(AssetServer::new(base_path)),
        }
    }
}

impl SceneImporter for AssetImporter {
    fn import_mesh(&self, path: &Path) -> Result<MeshData, ImportError> {
        let mesh = self.server.lock().load_mesh(path)?;
        Ok(MeshData::from_streams(
            &mesh.positions,
            &mesh.normals,
            mesh.indices.clone(),
        ))
    }

    fn import_environment(&self, path: &Path) -> Result<EnvironmentMap, ImportError> {
        let texture = self.server.lock().load_texture(path)?;
        Ok(environment_map(&texture))
    }
}

fn texture_format(format: TextureFormat) -> Format {
    match format {
        TextureFormat::Rgba8 => Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba32Float => Format::R32G32B32A32_SFLOAT,
    }
}

fn environment_map(texture: &TextureAsset) -> EnvironmentMap {
    EnvironmentMap {
        width: texture.width,
        height: texture.height,
        format: texture_format(texture.format),
        data: texture.data.clone(),
    }
}
