//! GPU constant block layouts
//!
//! Matrices are stored column-major, as `glam` keeps them.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use granularity_core::{affine_rows, PerMesh, MESH_COUNT};

/// Payload of the ray generation (and radiance hit group) shader records.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RayGenConstants {
    pub proj_to_world: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

impl RayGenConstants {
    pub fn new(proj_to_world: Mat4, eye: Vec3) -> Self {
        Self {
            proj_to_world: proj_to_world.to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
        }
    }
}

/// Per-frame transforms of every mesh, read by the ray tracing shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CbGlobal {
    pub normal_matrices: [[[f32; 4]; 3]; MESH_COUNT],
    pub worlds: [[[f32; 4]; 4]; MESH_COUNT],
}

impl CbGlobal {
    pub fn new(worlds: &PerMesh<Mat4>) -> Self {
        Self {
            normal_matrices: worlds.map(|_, w| normal_matrix_rows(*w)).to_array(),
            worlds: worlds.map(|_, w| w.to_cols_array_2d()).to_array(),
        }
    }
}

/// Surface parameters of one mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    /// rgb base color, w specular exponent
    pub base_color: Vec4,
    pub albedo: Vec4,
}

impl Material {
    pub fn defaults() -> PerMesh<Material> {
        PerMesh::new(
            Material {
                base_color: Vec4::new(0.3, 0.1, 0.1, 10.0),
                albedo: Vec4::new(0.9, 0.1, 0.0, 0.0),
            },
            Material {
                base_color: Vec4::new(1.0, 1.0, 1.0, 1425.0),
                albedo: Vec4::new(0.0, 10.0, 0.8, 0.0),
            },
        )
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CbMaterial {
    pub base_colors: [[f32; 4]; MESH_COUNT],
    pub albedos: [[f32; 4]; MESH_COUNT],
}

impl CbMaterial {
    pub fn new(materials: &PerMesh<Material>) -> Self {
        Self {
            base_colors: materials.map(|_, m| m.base_color.to_array()).to_array(),
            albedos: materials.map(|_, m| m.albedo.to_array()).to_array(),
        }
    }
}

/// Per-mesh constants of the rasterized passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CbGraphics {
    pub world_view_proj: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 3],
    /// Sub-pixel projection jitter in clip units
    pub proj_bias: [f32; 2],
    pub _pad: [f32; 2],
}

impl CbGraphics {
    pub fn new(world: Mat4, view_proj: Mat4, proj_bias: Vec2) -> Self {
        Self {
            world_view_proj: (view_proj * world).to_cols_array_2d(),
            normal_matrix: normal_matrix_rows(world),
            proj_bias: proj_bias.to_array(),
            _pad: [0.0; 2],
        }
    }
}

/// Constants of the environment prepass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CbEnv {
    pub proj_to_world: [[f32; 4]; 4],
    pub eye: [f32; 4],
    pub viewport: [f32; 2],
    pub _pad: [f32; 2],
}

impl CbEnv {
    pub fn new(proj_to_world: Mat4, eye: Vec3, width: u32, height: u32) -> Self {
        Self {
            proj_to_world: proj_to_world.to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
            viewport: [width as f32, height as f32],
            _pad: [0.0; 2],
        }
    }
}

/// Inline constants selecting the mesh and tessellation level of a draw or
/// dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CbTessellation {
    pub instance_index: u32,
    pub tess_factor: u32,
    pub max_vertices_per_patch: u32,
}

impl CbTessellation {
    /// Number of 32-bit values the block occupies.
    pub const WORDS: u32 = (std::mem::size_of::<Self>() / 4) as u32;

    pub fn words(&self) -> Vec<u32> {
        bytemuck::cast_slice(std::slice::from_ref(self)).to_vec()
    }
}

/// Inverse transpose of the upper 3x3 of `world`, as three padded rows.
fn normal_matrix_rows(world: Mat4) -> [[f32; 4]; 3] {
    let normal = Mat3::from_mat4(world).inverse().transpose();
    affine_rows(Mat4::from_mat3(normal))
}
