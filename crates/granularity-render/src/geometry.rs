//! GPU-resident vertex and index buffers of the scene meshes.

use granularity_core::{MeshRole, PerMesh};
use tracing::debug;
use vulkano::buffer::BufferUsage;
use vulkano::format::Format;

use crate::error::{GpuResultExt, RenderError};
use crate::gpu::{
    BufferDesc, CommandList, Device, GeometryView, MemoryLocation, ResourceId, ResourceState,
    StateTracker,
};
use crate::mesh::MeshData;
use crate::vertex::Vertex;

/// Buffers of one uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertex_buffer: ResourceId,
    pub index_buffer: ResourceId,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl MeshBuffers {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn view(&self) -> GeometryView {
        GeometryView {
            vertex_buffer: self.vertex_buffer,
            vertex_count: self.vertex_count,
            vertex_stride: Vertex::STRIDE,
            vertex_format: Format::R32G32B32_SFLOAT,
            index_buffer: self.index_buffer,
            index_count: self.index_count,
        }
    }
}

/// Owns the vertex and index buffers of every mesh role.
#[derive(Debug, Clone)]
pub struct SceneGeometryStore {
    meshes: PerMesh<MeshBuffers>,
}

impl SceneGeometryStore {
    /// Create the buffers and record their uploads.
    ///
    /// Buffers end up shader readable once `cmd` executes. Any invalid mesh or
    /// failed allocation aborts before later meshes are touched.
    pub fn upload(
        device: &dyn Device,
        cmd: &mut CommandList,
        states: &mut StateTracker,
        meshes: PerMesh<&MeshData>,
    ) -> Result<Self, RenderError> {
        let buffers = PerMesh::try_from_fn(|role| {
            let mesh = meshes[role];
            mesh.validate().map_err(|reason| RenderError::InvalidMesh {
                name: role.name().to_string(),
                reason,
            })?;
            create_mesh_buffers(device, states, role, mesh)
        })?;

        cmd.begin_pass("geometry upload");
        let ids: Vec<ResourceId> = buffers
            .iter()
            .flat_map(|(_, b)| [b.vertex_buffer, b.index_buffer])
            .collect();
        cmd.barriers(states.transition_all(ids.iter().copied(), ResourceState::TransferDestination)?);
        for (role, b) in buffers.iter() {
            let mesh = meshes[role];
            cmd.upload_buffer(b.vertex_buffer, bytemuck::cast_slice(&mesh.vertices).to_vec());
            cmd.upload_buffer(b.index_buffer, bytemuck::cast_slice(&mesh.indices).to_vec());
        }
        cmd.barriers(states.transition_all(ids, ResourceState::ShaderReadable)?);

        for (role, b) in buffers.iter() {
            debug!(
                "{} mesh: {} vertices, {} triangles",
                role.name(),
                b.vertex_count,
                b.triangle_count()
            );
        }
        Ok(Self { meshes: buffers })
    }

    pub fn mesh(&self, role: MeshRole) -> &MeshBuffers {
        &self.meshes[role]
    }

    pub fn views(&self) -> PerMesh<GeometryView> {
        self.meshes.map(|_, b| b.view())
    }

    pub fn index_counts(&self) -> PerMesh<u32> {
        self.meshes.map(|_, b| b.index_count)
    }
}

fn create_mesh_buffers(
    device: &dyn Device,
    states: &mut StateTracker,
    role: MeshRole,
    mesh: &MeshData,
) -> Result<MeshBuffers, RenderError> {
    let geometry_usage = BufferUsage::TRANSFER_DST
        | BufferUsage::STORAGE_BUFFER
        | BufferUsage::SHADER_DEVICE_ADDRESS
        | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY;

    let vertex_label = format!("{} vertex buffer", role.name());
    let vertex_buffer = device
        .create_buffer(&BufferDesc {
            label: vertex_label.clone(),
            size: (mesh.vertices.len() * std::mem::size_of::<Vertex>()) as u64,
            usage: geometry_usage | BufferUsage::VERTEX_BUFFER,
            location: MemoryLocation::DeviceLocal,
        })
        .creating(vertex_label)?;
    states.register(vertex_buffer, ResourceState::Uninitialized);

    let index_label = format!("{} index buffer", role.name());
    let index_buffer = device
        .create_buffer(&BufferDesc {
            label: index_label.clone(),
            size: (mesh.indices.len() * std::mem::size_of::<u32>()) as u64,
            usage: geometry_usage | BufferUsage::INDEX_BUFFER,
            location: MemoryLocation::DeviceLocal,
        })
        .creating(index_label)?;
    states.register(index_buffer, ResourceState::Uninitialized);

    Ok(MeshBuffers {
        vertex_buffer,
        index_buffer,
        vertex_count: mesh.vertex_count(),
        index_count: mesh.index_count(),
    })
}
