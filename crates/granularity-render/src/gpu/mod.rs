//! Backend abstraction the renderer records against.
//!
//! Resource descriptions use Vulkan vocabulary from `vulkano`. The renderer
//! never talks to a driver directly: it creates objects through [`Device`],
//! records [`CommandList`]s and hands them to a [`Queue`].

pub mod command;
pub mod headless;
pub mod state;

use vulkano::buffer::BufferUsage;
use vulkano::format::Format;
use vulkano::image::ImageUsage;
use vulkano::pipeline::graphics::vertex_input::VertexBufferDescription;
use vulkano::shader::ShaderStages;

pub use command::{
    AccelerationStructureBuild, BuildSource, Command, CommandList, DepthAttachment,
    DispatchTables, TableRange,
};
pub use headless::{HeadlessDevice, HeadlessQueue, SubmissionRecord};
pub use state::{Barrier, ResourceState, StateError, StateTracker};

/// Monotonic completion counter value shared by all queues.
pub type FenceValue = u64;

/// Buffer, texture or acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineLayoutId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorTableId(pub u32);

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("out of memory while allocating '{0}'")]
    OutOfMemory(String),

    #[error("shader '{0}' not found")]
    ShaderNotFound(String),

    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),

    #[error("pipeline has no export named '{0}'")]
    UnknownExport(String),

    #[error("write of {len} bytes at offset {offset} overflows '{label}'")]
    OutOfBounds { label: String, offset: u64, len: usize },

    #[error("{context}: {reason}")]
    Validation { context: String, reason: String },

    #[error("CPU write to '{label}' while the GPU may still read it (fence {pending} pending, {completed} completed)")]
    Hazard {
        label: String,
        pending: FenceValue,
        completed: FenceValue,
    },

    #[error("fence value {0} was never signaled")]
    UnsignaledFence(FenceValue),
}

/// Which heap a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// GPU only, filled through uploads recorded in a command list
    DeviceLocal,
    /// CPU-visible and written directly with [`Device::write_buffer`]
    Upload,
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: ImageUsage,
}

/// Triangle geometry consumed by bottom-level builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryView {
    pub vertex_buffer: ResourceId,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub vertex_format: Format,
    pub index_buffer: ResourceId,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureInputs {
    Bottom(GeometryView),
    Top { instance_count: u32 },
}

#[derive(Debug, Clone)]
pub struct AccelerationStructureDesc {
    pub label: String,
    pub inputs: AccelerationStructureInputs,
    /// Allows later in-place updates (refit) of the structure
    pub allow_update: bool,
    pub size: u64,
}

/// Memory requirements reported before an acceleration structure is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
    pub update_scratch_size: u64,
}

#[derive(Debug, Clone)]
pub struct ShaderDesc {
    /// Compiled shader file name
    pub name: String,
    pub stage: ShaderStages,
}

/// Class of descriptors a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorClass {
    Srv,
    Uav,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerPreset {
    AnisotropicWrap,
}

/// One view placed in a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Srv(ResourceId),
    Uav(ResourceId),
    Sampler(SamplerPreset),
}

impl Descriptor {
    pub fn class(&self) -> DescriptorClass {
        match self {
            Descriptor::Srv(_) => DescriptorClass::Srv,
            Descriptor::Uav(_) => DescriptorClass::Uav,
            Descriptor::Sampler(_) => DescriptorClass::Sampler,
        }
    }

    pub fn resource(&self) -> Option<ResourceId> {
        match *self {
            Descriptor::Srv(id) | Descriptor::Uav(id) => Some(id),
            Descriptor::Sampler(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorTableDesc {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

/// What a pipeline layout slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Inline 32-bit constants
    Constants,
    /// Constant buffer view into upload memory
    ConstantBuffer,
    /// Top-level acceleration structure
    AccelerationStructure,
    /// Descriptor table of one class
    Table(DescriptorClass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry {
    pub kind: BindingKind,
    /// Descriptor count for tables, number of 32-bit values for constants
    pub count: u32,
    pub register: u32,
    pub space: u32,
    pub visibility: ShaderStages,
}

#[derive(Debug, Clone)]
pub struct PipelineLayoutDesc {
    pub label: String,
    pub entries: Vec<LayoutEntry>,
    /// Local layouts feed shader records instead of command-list bindings
    pub local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleList,
    PatchList3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMode {
    Disabled,
    Write,
    /// Depth test `EQUAL` against a read-only depth buffer
    ReadEqual,
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub shaders: Vec<ShaderId>,
    pub vertex_input: Option<VertexBufferDescription>,
    pub topology: Topology,
    pub depth: DepthMode,
    pub depth_format: Option<Format>,
    pub color_formats: Vec<Format>,
}

#[derive(Debug, Clone)]
pub struct HitGroupDesc {
    pub name: String,
    pub closest_hit: String,
}

#[derive(Debug, Clone)]
pub struct LocalLayoutAssociation {
    pub layout: PipelineLayoutId,
    pub exports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RayTracingPipelineDesc {
    pub label: String,
    pub library: ShaderId,
    /// Entry points the library exports
    pub exports: Vec<String>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
    pub global_layout: PipelineLayoutId,
    pub local_layouts: Vec<LocalLayoutAssociation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Graphics, compute and ray tracing
    Graphics,
    /// Transfers only
    Copy,
}

/// Object creation and CPU-visible memory access.
pub trait Device: Send + Sync {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<ResourceId, GpuError>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<ResourceId, GpuError>;

    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
        allow_update: bool,
    ) -> Result<PrebuildInfo, GpuError>;

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<ResourceId, GpuError>;

    /// Device address used to reference a bottom-level structure from instances.
    fn acceleration_structure_address(&self, id: ResourceId) -> Result<u64, GpuError>;

    /// Write into an `Upload` buffer.
    fn write_buffer(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> Result<(), GpuError>;

    fn load_shader(&self, desc: &ShaderDesc) -> Result<ShaderId, GpuError>;

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc)
        -> Result<PipelineLayoutId, GpuError>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc)
        -> Result<PipelineId, GpuError>;

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<PipelineId, GpuError>;

    fn create_descriptor_table(
        &self,
        desc: &DescriptorTableDesc,
    ) -> Result<DescriptorTableId, GpuError>;

    /// Size in bytes of a shader identifier in a shader record.
    fn shader_identifier_size(&self) -> u32;

    /// Opaque identifier of an entry point or hit group of a ray tracing pipeline.
    fn shader_identifier(&self, pipeline: PipelineId, export: &str) -> Result<Vec<u8>, GpuError>;
}

/// A command stream consumed asynchronously by the GPU.
pub trait Queue {
    fn kind(&self) -> QueueKind;

    /// Submit a recorded list. Returns the fence value signaled on completion.
    fn submit(&self, commands: CommandList) -> Result<FenceValue, GpuError>;

    /// Highest fence value the GPU has completed.
    fn completed_value(&self) -> FenceValue;

    /// Block until `value` has completed.
    fn wait_for(&self, value: FenceValue) -> Result<(), GpuError>;
}
