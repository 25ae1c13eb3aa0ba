//! Core types used throughout the renderer

use std::ops::{Index, IndexMut};

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Number of mesh instances in the scene.
pub const MESH_COUNT: usize = 2;

/// Identifies one of the two meshes the scene is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshRole {
    /// Procedurally generated ground cube
    Ground,
    /// Imported model
    Model,
}

impl MeshRole {
    /// All roles in shader index order.
    pub const ALL: [MeshRole; MESH_COUNT] = [MeshRole::Ground, MeshRole::Model];

    /// Index used by shaders to address per-mesh arrays.
    pub const fn index(self) -> usize {
        match self {
            MeshRole::Ground => 0,
            MeshRole::Model => 1,
        }
    }

    /// Human readable name, used for resource labels.
    pub const fn name(self) -> &'static str {
        match self {
            MeshRole::Ground => "Ground",
            MeshRole::Model => "Model",
        }
    }
}

/// One value per mesh role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerMesh<T> {
    pub ground: T,
    pub model: T,
}

impl<T> PerMesh<T> {
    pub fn new(ground: T, model: T) -> Self {
        Self { ground, model }
    }

    /// Build a value for every role.
    pub fn from_fn(mut f: impl FnMut(MeshRole) -> T) -> Self {
        Self {
            ground: f(MeshRole::Ground),
            model: f(MeshRole::Model),
        }
    }

    /// Build a value for every role, stopping at the first error.
    pub fn try_from_fn<E>(mut f: impl FnMut(MeshRole) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            ground: f(MeshRole::Ground)?,
            model: f(MeshRole::Model)?,
        })
    }

    pub fn map<U>(&self, mut f: impl FnMut(MeshRole, &T) -> U) -> PerMesh<U> {
        PerMesh {
            ground: f(MeshRole::Ground, &self.ground),
            model: f(MeshRole::Model, &self.model),
        }
    }

    /// Iterate `(role, value)` pairs in shader index order.
    pub fn iter(&self) -> impl Iterator<Item = (MeshRole, &T)> {
        MeshRole::ALL.into_iter().map(move |role| (role, &self[role]))
    }

    /// Values in shader index order.
    pub fn to_array(&self) -> [T; MESH_COUNT]
    where
        T: Clone,
    {
        [self.ground.clone(), self.model.clone()]
    }
}

impl<T> Index<MeshRole> for PerMesh<T> {
    type Output = T;

    fn index(&self, role: MeshRole) -> &T {
        match role {
            MeshRole::Ground => &self.ground,
            MeshRole::Model => &self.model,
        }
    }
}

impl<T> IndexMut<MeshRole> for PerMesh<T> {
    fn index_mut(&mut self, role: MeshRole) -> &mut T {
        match role {
            MeshRole::Ground => &mut self.ground,
            MeshRole::Model => &mut self.model,
        }
    }
}

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Create a transform from position and scale
    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale,
        }
    }

    /// Compute the model matrix (scale, then rotate, then translate)
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Rotate by the given quaternion
    pub fn rotate(&mut self, rotation: Quat) {
        self.rotation = rotation * self.rotation;
    }
}

/// Top three rows of an affine matrix, row-major.
///
/// This is the layout acceleration-structure instances and the shaders'
/// `float3x4` normal matrices expect.
pub fn affine_rows(m: Mat4) -> [[f32; 4]; 3] {
    [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_matrix() {
        let transform = Transform::from_position_scale(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE);
        let matrix = transform.matrix();
        let translation = matrix.col(3).truncate();
        assert_eq!(translation, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_affine_rows_keep_translation_in_last_column() {
        let m = Transform::from_position_scale(Vec3::new(4.0, 5.0, 6.0), Vec3::splat(2.0)).matrix();
        let rows = affine_rows(m);
        assert_eq!(rows[0], [2.0, 0.0, 0.0, 4.0]);
        assert_eq!(rows[1], [0.0, 2.0, 0.0, 5.0]);
        assert_eq!(rows[2], [0.0, 0.0, 2.0, 6.0]);
    }

    #[test]
    fn test_per_mesh_indexing_follows_roles() {
        let mut values = PerMesh::from_fn(|role| role.index() * 10);
        assert_eq!(values[MeshRole::Ground], 0);
        assert_eq!(values[MeshRole::Model], 10);

        values[MeshRole::Model] = 7;
        let collected: Vec<_> = values.iter().map(|(role, v)| (role, *v)).collect();
        assert_eq!(collected, vec![(MeshRole::Ground, 0), (MeshRole::Model, 7)]);
    }

    #[test]
    fn test_per_mesh_try_from_fn_stops_at_first_error() {
        let mut visited = Vec::new();
        let result: Result<PerMesh<u32>, &str> = PerMesh::try_from_fn(|role| {
            visited.push(role);
            Err("boom")
        });
        assert!(result.is_err());
        assert_eq!(visited, vec![MeshRole::Ground]);
    }
}
