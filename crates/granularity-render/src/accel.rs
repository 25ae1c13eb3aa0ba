//! Bottom- and top-level acceleration structures of the scene.
//!
//! Each mesh gets one bottom-level structure, built once. The top-level
//! structure holds exactly one instance per mesh and is built with updates
//! allowed, so later frames only refit it with new transforms. Every frame
//! slot owns its own instance buffer.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use granularity_core::{affine_rows, MeshRole, PerMesh, MESH_COUNT};
use tracing::{debug, info};
use vulkano::buffer::BufferUsage;

use crate::error::{GpuResultExt, RenderError};
use crate::gpu::{
    AccelerationStructureBuild, AccelerationStructureDesc, AccelerationStructureInputs, BufferDesc,
    BuildSource, CommandList, Device, GeometryView, MemoryLocation, PrebuildInfo, ResourceId,
};

const INSTANCE_MASK: u32 = 0xFF;

/// One top-level instance as the device consumes it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceDesc {
    /// Row-major 3x4 object-to-world transform
    pub transform: [[f32; 4]; 3],
    /// Custom index in the low 24 bits, visibility mask in the high 8
    pub id_and_mask: u32,
    /// Hit group offset in the low 24 bits, flags in the high 8
    pub sbt_offset_and_flags: u32,
    pub blas_address: u64,
}

impl InstanceDesc {
    pub fn new(role: MeshRole, world: Mat4, blas_address: u64) -> Self {
        Self {
            transform: affine_rows(world),
            id_and_mask: (role.index() as u32 & 0x00FF_FFFF) | (INSTANCE_MASK << 24),
            sbt_offset_and_flags: 0,
            blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.id_and_mask & 0x00FF_FFFF
    }
}

#[derive(Debug)]
pub struct SpatialIndexManager {
    geometries: PerMesh<GeometryView>,
    blas: PerMesh<ResourceId>,
    blas_addresses: PerMesh<u64>,
    tlas: ResourceId,
    scratch: ResourceId,
    scratch_size: u64,
    instance_buffers: Vec<ResourceId>,
    built: bool,
}

impl SpatialIndexManager {
    /// Size and create every structure, the shared scratch buffer and one
    /// instance buffer per frame slot. Nothing is built yet.
    pub fn prebuild(
        device: &dyn Device,
        geometries: PerMesh<GeometryView>,
        frame_count: usize,
    ) -> Result<Self, RenderError> {
        let blas_info = PerMesh::try_from_fn(|role| {
            device
                .acceleration_structure_prebuild_info(
                    &AccelerationStructureInputs::Bottom(geometries[role]),
                    false,
                )
                .creating(format!("{} bottom-level prebuild info", role.name()))
        })?;
        let tlas_inputs = AccelerationStructureInputs::Top {
            instance_count: MESH_COUNT as u32,
        };
        let tlas_info = device
            .acceleration_structure_prebuild_info(&tlas_inputs, true)
            .creating("top-level prebuild info")?;

        let scratch_size = blas_info
            .iter()
            .map(|(_, info)| info.scratch_size)
            .chain([tlas_info.scratch_size, tlas_info.update_scratch_size])
            .max()
            .unwrap_or_default();
        let scratch = device
            .create_buffer(&BufferDesc {
                label: "acceleration structure scratch".into(),
                size: scratch_size,
                usage: BufferUsage::STORAGE_BUFFER | BufferUsage::SHADER_DEVICE_ADDRESS,
                location: MemoryLocation::DeviceLocal,
            })
            .creating("acceleration structure scratch")?;

        let blas = PerMesh::try_from_fn(|role| {
            create_structure(
                device,
                format!("{} bottom-level structure", role.name()),
                AccelerationStructureInputs::Bottom(geometries[role]),
                false,
                &blas_info[role],
            )
        })?;
        let tlas = create_structure(device, "top-level structure".into(), tlas_inputs, true, &tlas_info)?;
        let blas_addresses = PerMesh::try_from_fn(|role| {
            device
                .acceleration_structure_address(blas[role])
                .creating(format!("{} bottom-level address", role.name()))
        })?;

        let instance_buffers = (0..frame_count)
            .map(|slot| {
                let label = format!("instance buffer {slot}");
                device
                    .create_buffer(&BufferDesc {
                        label: label.clone(),
                        size: (MESH_COUNT * std::mem::size_of::<InstanceDesc>()) as u64,
                        usage: BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY
                            | BufferUsage::SHADER_DEVICE_ADDRESS,
                        location: MemoryLocation::Upload,
                    })
                    .creating(label)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Prebuilt acceleration structures: scratch {} bytes, top level {} bytes",
            scratch_size, tlas_info.result_size
        );
        Ok(Self {
            geometries,
            blas,
            blas_addresses,
            tlas,
            scratch,
            scratch_size,
            instance_buffers,
            built: false,
        })
    }

    /// Record the bottom-level builds and the first top-level build from the
    /// slot's instance buffer.
    pub fn build(
        &mut self,
        device: &dyn Device,
        cmd: &mut CommandList,
        slot: usize,
        transforms: &PerMesh<Mat4>,
    ) -> Result<(), RenderError> {
        let instances = self.write_instances(device, slot, transforms)?;

        cmd.begin_pass("acceleration structure build");
        for (role, geometry) in self.geometries.iter() {
            cmd.build_acceleration_structure(AccelerationStructureBuild {
                destination: self.blas[role],
                source: BuildSource::Triangles(*geometry),
                scratch: self.scratch,
                update: false,
            });
            cmd.uav_barrier(self.scratch);
        }
        for blas in self.blas.to_array() {
            cmd.uav_barrier(blas);
        }
        cmd.build_acceleration_structure(self.tlas_build(instances, false));
        cmd.uav_barrier(self.tlas);

        self.built = true;
        info!("Recorded acceleration structure build for {} instances", MESH_COUNT);
        Ok(())
    }

    /// Write new transforms into the slot's instance buffer and record an in
    /// place top-level update.
    pub fn update(
        &mut self,
        device: &dyn Device,
        cmd: &mut CommandList,
        slot: usize,
        transforms: &PerMesh<Mat4>,
    ) -> Result<(), RenderError> {
        if !self.built {
            return Err(RenderError::AccelerationStructure(
                "top-level update before the first build".into(),
            ));
        }
        let instances = self.write_instances(device, slot, transforms)?;
        cmd.build_acceleration_structure(self.tlas_build(instances, true));
        cmd.uav_barrier(self.tlas);
        Ok(())
    }

    /// Instances for the given transforms, in mesh index order.
    pub fn instances(&self, transforms: &PerMesh<Mat4>) -> [InstanceDesc; MESH_COUNT] {
        PerMesh::from_fn(|role| InstanceDesc::new(role, transforms[role], self.blas_addresses[role]))
            .to_array()
    }

    fn write_instances(
        &self,
        device: &dyn Device,
        slot: usize,
        transforms: &PerMesh<Mat4>,
    ) -> Result<ResourceId, RenderError> {
        let buffer = self.instance_buffer(slot)?;
        device.write_buffer(buffer, 0, bytemuck::cast_slice(&self.instances(transforms)))?;
        Ok(buffer)
    }

    fn tlas_build(&self, instances: ResourceId, update: bool) -> AccelerationStructureBuild {
        AccelerationStructureBuild {
            destination: self.tlas,
            source: BuildSource::Instances {
                buffer: instances,
                count: MESH_COUNT as u32,
            },
            scratch: self.scratch,
            update,
        }
    }

    pub fn instance_buffer(&self, slot: usize) -> Result<ResourceId, RenderError> {
        self.instance_buffers
            .get(slot)
            .copied()
            .ok_or(RenderError::InvalidFrameSlot {
                slot,
                count: self.instance_buffers.len(),
            })
    }

    pub fn instance_count(&self) -> u32 {
        MESH_COUNT as u32
    }

    pub fn tlas(&self) -> ResourceId {
        self.tlas
    }

    pub fn blas(&self, role: MeshRole) -> ResourceId {
        self.blas[role]
    }

    pub fn scratch_size(&self) -> u64 {
        self.scratch_size
    }

    pub fn is_built(&self) -> bool {
        self.built
    }
}

fn create_structure(
    device: &dyn Device,
    label: String,
    inputs: AccelerationStructureInputs,
    allow_update: bool,
    info: &PrebuildInfo,
) -> Result<ResourceId, RenderError> {
    device
        .create_acceleration_structure(&AccelerationStructureDesc {
            label: label.clone(),
            inputs,
            allow_update,
            size: info.result_size,
        })
        .creating(label)
}
