use std::io::BufRead;
use std::path::Path;

use tracing::debug;

use crate::error::AssetError;
use crate::mesh::MeshAsset;

/// Load a Wavefront OBJ file, merging all of its models into one mesh.
pub fn load_obj(path: &Path) -> Result<MeshAsset, AssetError> {
    let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .map_err(|e| AssetError::ObjLoadFailed(path.to_path_buf(), e))?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");
    Ok(merge_models(name, &models))
}

/// Parse OBJ source from a reader. Material libraries are ignored.
pub fn parse_obj(name: &str, reader: &mut impl BufRead) -> Result<MeshAsset, AssetError> {
    let (models, _materials) =
        tobj::load_obj_buf(reader, &tobj::GPU_LOAD_OPTIONS, |_| Ok(Default::default()))
            .map_err(|e| AssetError::ObjLoadFailed(name.into(), e))?;
    Ok(merge_models(name, &models))
}

fn merge_models(name: &str, models: &[tobj::Model]) -> MeshAsset {
    let mut mesh = MeshAsset::new(name);

    for model in models {
        let positions: Vec<[f32; 3]> = model
            .mesh
            .positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        let normals: Vec<[f32; 3]> = model
            .mesh
            .normals
            .chunks_exact(3)
            .map(|n| [n[0], n[1], n[2]])
            .collect();
        mesh.append(&positions, &normals, &model.mesh.indices);
    }

    mesh.recompute_missing_normals();
    debug!(
        "OBJ '{}': {} models, {} vertices, {} triangles",
        name,
        models.len(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";

    #[test]
    fn quad_is_triangulated() {
        let mesh = parse_obj("quad", &mut QUAD.as_bytes()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        for normal in &mesh.normals {
            assert!((normal[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let result = load_obj(Path::new("/nonexistent/model.obj"));
        assert!(matches!(result, Err(AssetError::ObjLoadFailed(..))));
    }
}
