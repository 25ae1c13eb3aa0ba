//! Mesh data and the procedural ground cube

use crate::vertex::Vertex;

/// Grid resolution (vertices per edge) of each ground cube face.
pub const GROUND_GRID: u32 = 64;

/// CPU-side indexed triangle mesh
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Build from separate position and normal streams. Missing normals are
    /// zero-filled.
    pub fn from_streams(positions: &[[f32; 3]], normals: &[[f32; 3]], indices: Vec<u32>) -> Self {
        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| Vertex::new(p, normals.get(i).copied().unwrap_or([0.0; 3])))
            .collect();
        Self { vertices, indices }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count() / 3
    }

    /// Check that the mesh is a non-empty triangle list with in-range indices.
    pub fn validate(&self) -> Result<(), String> {
        if self.indices.is_empty() {
            return Err("mesh has no triangles".into());
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!("{} indices is not a triangle list", self.indices.len()));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i >= self.vertex_count()) {
            return Err(format!(
                "index {} out of range for {} vertices",
                bad,
                self.vertex_count()
            ));
        }
        Ok(())
    }

    /// Unit cube `[-1, 1]³` with every face subdivided into an `n`×`n` vertex
    /// grid. Faces are emitted +y, -y, -x, +x, -z, +z; each grid cell becomes
    /// two triangles wound counter-clockwise seen from outside.
    pub fn ground_cube(n: u32) -> Self {
        assert!(n >= 2, "a face grid needs at least 2 vertices per edge");

        let step = |k: u32| 2.0 * k as f32 / (n - 1) as f32;
        let mut vertices = Vec::with_capacity((6 * n * n) as usize);

        type FacePoint = fn(f32, f32) -> [f32; 3];
        let faces: [(FacePoint, [f32; 3]); 6] = [
            (|u, v| [-1.0 + u, 1.0, 1.0 - v], [0.0, 1.0, 0.0]),
            (|u, v| [-1.0 + u, -1.0, 1.0 - v], [0.0, -1.0, 0.0]),
            (|u, v| [-1.0, -1.0 + u, 1.0 - v], [-1.0, 0.0, 0.0]),
            (|u, v| [1.0, -1.0 + u, 1.0 - v], [1.0, 0.0, 0.0]),
            (|u, v| [-1.0 + u, 1.0 - v, -1.0], [0.0, 0.0, -1.0]),
            (|u, v| [-1.0 + u, 1.0 - v, 1.0], [0.0, 0.0, 1.0]),
        ];

        for (point, normal) in faces {
            for i in 0..n {
                for j in 0..n {
                    vertices.push(Vertex::new(point(step(j), step(i)), normal));
                }
            }
        }

        // Faces of a pair mirror each other, so the second one of each pair
        // flips its winding.
        let cells = n - 1;
        let mut indices = Vec::with_capacity((36 * cells * cells) as usize);
        for face in 0..6u32 {
            let base = face * n * n;
            let flipped = face % 2 == 1;
            for i in 0..cells {
                for j in 0..cells {
                    let a = base + i * n + j;
                    let b = a + 1;
                    let c = a + n + 1;
                    let d = a + n;
                    if flipped {
                        indices.extend_from_slice(&[a, c, b, a, d, c]);
                    } else {
                        indices.extend_from_slice(&[a, b, c, a, c, d]);
                    }
                }
            }
        }

        Self { vertices, indices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_ground_cube_counts() {
        let cube = MeshData::ground_cube(GROUND_GRID);
        assert_eq!(cube.vertex_count(), 6 * 64 * 64);
        assert_eq!(cube.index_count(), 36 * 63 * 63);
        assert!(cube.validate().is_ok());
    }

    /// Face winding must agree with the vertex normals of the face
    /// (pointing away from the cube center).
    #[test]
    fn test_ground_cube_faces_point_outward() {
        let cube = MeshData::ground_cube(4);
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| cube.vertices[i as usize]);
            let pa = Vec3::from(a.position);
            let face_normal = (Vec3::from(b.position) - pa).cross(Vec3::from(c.position) - pa);
            let vertex_normal = Vec3::from(a.normal);

            assert!(face_normal.dot(vertex_normal) > 0.0, "inward triangle {:?}", tri);
            // Every vertex of a face lies on the plane its normal describes.
            assert!((pa.dot(vertex_normal) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_validate_rejects_bad_meshes() {
        let empty = MeshData::default();
        assert!(empty.validate().is_err());

        let out_of_range = MeshData::from_streams(&[[0.0; 3]; 3], &[], vec![0, 1, 3]);
        assert!(out_of_range.validate().is_err());

        let partial = MeshData::from_streams(&[[0.0; 3]; 3], &[], vec![0, 1]);
        assert!(partial.validate().is_err());
    }
}
