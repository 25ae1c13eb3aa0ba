//! Per-mesh tessellation budgets derived from the current factor.

use granularity_core::{
    clamp_tess_factor, max_vertices_per_patch, MeshRole, PerMesh, MAX_TESS_FACTOR, MIN_TESS_FACTOR,
};
use tracing::warn;

use crate::constants::CbTessellation;
use crate::error::RenderError;
use crate::gpu::GpuError;

/// Factor, per-patch budget and per-mesh vertex counts, always recomputed as
/// one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TessellationBudget {
    factor: u32,
    per_patch: u32,
    max_tess_vertices: PerMesh<u32>,
}

impl TessellationBudget {
    /// Budget for `factor` (clamped into the supported range) and the given
    /// per-mesh index counts.
    ///
    /// Fails when a mesh's vertex count does not fit in 32 bits.
    pub fn new(factor: u32, index_counts: PerMesh<u32>) -> Result<Self, RenderError> {
        let requested = factor;
        let factor = clamp_tess_factor(requested);
        if factor != requested {
            warn!(
                "Tessellation factor {} is outside {}..={}, using {}",
                requested, MIN_TESS_FACTOR, MAX_TESS_FACTOR, factor
            );
        }
        let per_patch = max_vertices_per_patch(factor);
        let max_tess_vertices = PerMesh::try_from_fn(|role| {
            let triangles = index_counts[role] / 3;
            triangles
                .checked_mul(per_patch)
                .ok_or_else(|| RenderError::ResourceCreation {
                    what: format!("{} tessellation budget", role.name()),
                    source: GpuError::OutOfMemory(format!(
                        "{} triangles x {} vertices per patch",
                        triangles, per_patch
                    )),
                })
        })?;
        Ok(Self {
            factor,
            per_patch,
            max_tess_vertices,
        })
    }

    /// Budget at the largest supported factor. Buffers are sized with it.
    pub fn maximum(index_counts: PerMesh<u32>) -> Result<Self, RenderError> {
        Self::new(MAX_TESS_FACTOR, index_counts)
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    pub fn per_patch(&self) -> u32 {
        self.per_patch
    }

    /// Tessellated vertices the mesh can produce, which is also its ray
    /// dispatch width.
    pub fn max_tess_vertices(&self, role: MeshRole) -> u32 {
        self.max_tess_vertices[role]
    }

    pub fn all_max_tess_vertices(&self) -> PerMesh<u32> {
        self.max_tess_vertices
    }

    /// Inline constants for draws and dispatches of `role`.
    pub fn constants(&self, role: MeshRole) -> CbTessellation {
        CbTessellation {
            instance_index: role.index() as u32,
            tess_factor: self.factor,
            max_vertices_per_patch: self.per_patch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_scales_with_triangle_count() {
        let budget = TessellationBudget::new(4, PerMesh::new(36 * 63 * 63, 300)).unwrap();
        assert_eq!(budget.per_patch(), 19);
        assert_eq!(budget.max_tess_vertices(MeshRole::Ground), 12 * 63 * 63 * 19);
        assert_eq!(budget.max_tess_vertices(MeshRole::Model), 100 * 19);
    }

    #[test]
    fn test_factor_change_replaces_every_mesh() {
        let counts = PerMesh::new(36, 300);
        let before = TessellationBudget::new(2, counts).unwrap();
        let after = TessellationBudget::new(3, counts).unwrap();
        for role in MeshRole::ALL {
            assert_eq!(before.max_tess_vertices(role), counts[role] / 3 * 7);
            assert_eq!(after.max_tess_vertices(role), counts[role] / 3 * 13);
            assert_eq!(after.constants(role).max_vertices_per_patch, 13);
        }
    }

    #[test]
    fn test_factor_is_clamped() {
        let counts = PerMesh::new(3, 3);
        assert_eq!(TessellationBudget::new(0, counts).unwrap().factor(), 1);
        assert_eq!(
            TessellationBudget::new(99, counts).unwrap(),
            TessellationBudget::maximum(counts).unwrap()
        );
    }

    #[test]
    fn test_factor_above_range_uses_the_largest_budget() {
        let counts = PerMesh::new(36, 300);
        let budget = TessellationBudget::new(20, counts).unwrap();
        assert_eq!(budget.factor(), MAX_TESS_FACTOR);
        assert_eq!(budget.per_patch(), 223);
        assert_eq!(budget.max_tess_vertices(MeshRole::Model), 100 * 223);
        assert_eq!(budget.constants(MeshRole::Model).tess_factor, 16);
    }

    #[test]
    fn test_vertex_count_overflow_is_an_error() {
        // 20M triangles at 223 vertices per patch exceed u32.
        let counts = PerMesh::new(3, 60_000_000);
        match TessellationBudget::maximum(counts) {
            Err(RenderError::ResourceCreation { what, source: GpuError::OutOfMemory(_) }) => {
                assert_eq!(what, "Model tessellation budget")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(TessellationBudget::new(1, counts).is_ok());
    }

    #[test]
    fn test_constants_carry_mesh_index() {
        let budget = TessellationBudget::new(2, PerMesh::new(3, 3)).unwrap();
        assert_eq!(budget.constants(MeshRole::Ground).instance_index, 0);
        assert_eq!(budget.constants(MeshRole::Model).instance_index, 1);
    }
}
