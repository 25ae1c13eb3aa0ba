use std::path::PathBuf;

/// Errors that can occur during asset loading.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load OBJ file '{0}': {1}")]
    ObjLoadFailed(PathBuf, #[source] tobj::LoadError),

    #[error("failed to load glTF file '{0}': {1}")]
    GltfLoadFailed(PathBuf, String),

    #[error("failed to load image '{0}': {1}")]
    ImageLoadFailed(PathBuf, String),

    #[error("unsupported mesh format in '{0}'")]
    UnsupportedFormat(PathBuf),

    #[error("mesh '{0}' has no triangles")]
    EmptyMesh(PathBuf),
}
