use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::AssetError;
use crate::mesh::MeshAsset;
use crate::texture::{self, TextureAsset};
use crate::{gltf_loader, obj_loader};

/// Mesh file formats the server can import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Obj,
    Gltf,
}

impl MeshFormat {
    /// Pick a loader from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "obj" => Some(MeshFormat::Obj),
            "gltf" | "glb" => Some(MeshFormat::Gltf),
            _ => None,
        }
    }
}

/// Loads and caches the meshes and environment maps a scene is built from.
///
/// Relative paths resolve against the base path. Repeated loads of the same
/// file return the cached asset.
pub struct AssetServer {
    base_path: PathBuf,
    meshes: HashMap<PathBuf, Arc<MeshAsset>>,
    textures: HashMap<PathBuf, Arc<TextureAsset>>,
}

impl AssetServer {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        info!("AssetServer created with base path: {}", base_path.display());
        Self {
            base_path,
            meshes: HashMap::new(),
            textures: HashMap::new(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Load a triangle mesh, dispatching on the file extension.
    pub fn load_mesh(&mut self, path: &Path) -> Result<Arc<MeshAsset>, AssetError> {
        let full_path = self.resolve(path);

        if let Some(mesh) = self.meshes.get(&full_path) {
            return Ok(Arc::clone(mesh));
        }

        let format = MeshFormat::from_path(&full_path)
            .ok_or_else(|| AssetError::UnsupportedFormat(full_path.clone()))?;

        if !full_path.exists() {
            return Err(AssetError::NotFound(full_path));
        }

        let mesh = match format {
            MeshFormat::Obj => obj_loader::load_obj(&full_path)?,
            MeshFormat::Gltf => gltf_loader::load_gltf(&full_path)?,
        };

        if mesh.triangle_count() == 0 {
            return Err(AssetError::EmptyMesh(full_path));
        }

        info!(
            "Loaded mesh '{}' ({} triangles)",
            mesh.name,
            mesh.triangle_count()
        );
        let mesh = Arc::new(mesh);
        self.meshes.insert(full_path, Arc::clone(&mesh));
        Ok(mesh)
    }

    /// Load an image file (PNG, HDR, EXR, ...) as a texture.
    pub fn load_texture(&mut self, path: &Path) -> Result<Arc<TextureAsset>, AssetError> {
        let full_path = self.resolve(path);

        if let Some(tex) = self.textures.get(&full_path) {
            return Ok(Arc::clone(tex));
        }

        if !full_path.exists() {
            return Err(AssetError::NotFound(full_path));
        }

        let tex = Arc::new(texture::load_texture(&full_path)?);
        self.textures.insert(full_path, Arc::clone(&tex));
        Ok(tex)
    }

    /// Number of distinct meshes currently cached.
    pub fn cached_meshes(&self) -> usize {
        self.meshes.len()
    }

    /// The base path this server resolves relative paths against.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_returns_error() {
        let mut server = AssetServer::new("/nonexistent");
        match server.load_mesh(Path::new("does_not_exist.glb")) {
            Err(AssetError::NotFound(_)) => {}
            other => panic!("expected NotFound, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let mut server = AssetServer::new("/nonexistent");
        assert!(matches!(
            server.load_mesh(Path::new("model.fbx")),
            Err(AssetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(MeshFormat::from_path(Path::new("a/bunny.OBJ")), Some(MeshFormat::Obj));
        assert_eq!(MeshFormat::from_path(Path::new("scene.glb")), Some(MeshFormat::Gltf));
        assert_eq!(MeshFormat::from_path(Path::new("scene.gltf")), Some(MeshFormat::Gltf));
        assert_eq!(MeshFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let server = AssetServer::new("/home/user/assets");
        assert_eq!(
            server.resolve(Path::new("/absolute/path.obj")),
            PathBuf::from("/absolute/path.obj")
        );
        assert_eq!(
            server.resolve(Path::new("models/bunny.obj")),
            PathBuf::from("/home/user/assets/models/bunny.obj")
        );
    }

    #[test]
    fn obj_is_loaded_once_and_cached() {
        let dir = std::env::temp_dir().join(format!("granularity-assets-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tri.obj");
        fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

        let mut server = AssetServer::new(&dir);
        let first = server.load_mesh(Path::new("tri.obj")).unwrap();
        let second = server.load_mesh(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.triangle_count(), 1);
        assert_eq!(server.cached_meshes(), 1);

        fs::remove_dir_all(&dir).ok();
    }
}
