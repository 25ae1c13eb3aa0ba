use std::path::Path;

use tracing::debug;

use crate::error::AssetError;
use crate::mesh::MeshAsset;

/// Load a glTF 2.0 file (.gltf or .glb) and merge every triangle primitive of
/// every mesh into one position+normal mesh.
pub fn load_gltf(path: &Path) -> Result<MeshAsset, AssetError> {
    let (document, buffers, _images) = gltf::import(path)
        .map_err(|e| AssetError::GltfLoadFailed(path.to_path_buf(), e.to_string()))?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");
    let mut merged = MeshAsset::new(name);

    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                debug!(
                    "Skipping non-triangle primitive in mesh '{}'",
                    mesh.name().unwrap_or("unnamed")
                );
                continue;
            }

            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .map(|iter| iter.collect())
                .unwrap_or_default();

            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|iter| iter.collect())
                .unwrap_or_default();

            let indices: Vec<u32> = reader
                .read_indices()
                .map(|idx| idx.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            merged.append(&positions, &normals, &indices);
        }
    }

    merged.recompute_missing_normals();
    debug!(
        "glTF '{}': {} vertices, {} triangles",
        path.display(),
        merged.vertex_count(),
        merged.triangle_count()
    );

    Ok(merged)
}
