/// An indexed triangle mesh with position and normal streams
/// (renderer-agnostic). Every primitive of the source file is merged into one
/// index space.
#[derive(Debug, Clone, Default)]
pub struct MeshAsset {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl MeshAsset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Append one primitive, rebasing its indices after the existing vertices.
    /// Missing normals are left zeroed and filled in by
    /// [`recompute_missing_normals`](Self::recompute_missing_normals).
    pub fn append(&mut self, positions: &[[f32; 3]], normals: &[[f32; 3]], indices: &[u32]) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(positions);
        if normals.len() == positions.len() {
            self.normals.extend_from_slice(normals);
        } else {
            self.normals
                .extend(std::iter::repeat([0.0; 3]).take(positions.len()));
        }
        self.indices.extend(indices.iter().map(|i| i + base));
    }

    /// Replace zero-length normals by area-weighted face normals.
    pub fn recompute_missing_normals(&mut self) {
        let is_missing = |n: &[f32; 3]| n[0] == 0.0 && n[1] == 0.0 && n[2] == 0.0;
        if !self.normals.iter().any(is_missing) {
            return;
        }

        let mut accumulated = vec![[0.0f32; 3]; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let (pa, pb, pc) = (self.positions[a], self.positions[b], self.positions[c]);
            let e1 = [pb[0] - pa[0], pb[1] - pa[1], pb[2] - pa[2]];
            let e2 = [pc[0] - pa[0], pc[1] - pa[1], pc[2] - pa[2]];
            // Unnormalized cross product weights by triangle area.
            let face = [
                e1[1] * e2[2] - e1[2] * e2[1],
                e1[2] * e2[0] - e1[0] * e2[2],
                e1[0] * e2[1] - e1[1] * e2[0],
            ];
            for v in [a, b, c] {
                for k in 0..3 {
                    accumulated[v][k] += face[k];
                }
            }
        }

        for (normal, sum) in self.normals.iter_mut().zip(accumulated) {
            if !is_missing(normal) {
                continue;
            }
            let len = (sum[0] * sum[0] + sum[1] * sum[1] + sum[2] * sum[2]).sqrt();
            if len > 0.0 {
                *normal = [sum[0] / len, sum[1] / len, sum[2] / len];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_rebases_indices() {
        let mut mesh = MeshAsset::new("two");
        let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        mesh.append(&tri, &[], &[0, 1, 2]);
        mesh.append(&tri, &[], &[0, 1, 2]);
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(&mesh.indices[3..], &[3, 4, 5]);
        assert_eq!(mesh.normals.len(), 6);
    }

    #[test]
    fn missing_normals_follow_winding() {
        let mut mesh = MeshAsset::new("tri");
        mesh.append(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[],
            &[0, 1, 2],
        );
        mesh.recompute_missing_normals();
        for normal in &mesh.normals {
            assert_eq!(*normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn existing_normals_are_kept() {
        let mut mesh = MeshAsset::new("tri");
        let normals = [[0.0, 1.0, 0.0]; 3];
        mesh.append(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &normals,
            &[0, 1, 2],
        );
        mesh.recompute_missing_normals();
        assert_eq!(mesh.normals, normals.to_vec());
    }
}
