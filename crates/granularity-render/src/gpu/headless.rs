//! Software backend that validates command lists without executing them.
//!
//! `HeadlessDevice` keeps its own view of every resource's state and replays
//! each submitted list against it: barrier before-states, descriptor states at
//! every draw and dispatch, attachment states, upload targets, acceleration
//! structure scratch sizes and update legality. CPU writes into upload memory
//! are checked against the fence stamp of the last submission that read the
//! buffer, so reusing a frame slot too early is reported as a hazard.
//!
//! Submissions complete only when a queue is waited on. All queues share one
//! fence timeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::command::{AccelerationStructureBuild, BuildSource, Command, CommandList, DepthAttachment, TableRange};
use super::state::ResourceState;
use super::{
    AccelerationStructureDesc, AccelerationStructureInputs, BindingKind, BufferDesc, Descriptor,
    DescriptorTableDesc, DescriptorTableId, DepthMode, Device, FenceValue, GpuError,
    GraphicsPipelineDesc, MemoryLocation, PipelineId, PipelineLayoutDesc, PipelineLayoutId,
    PrebuildInfo, Queue, QueueKind, RayTracingPipelineDesc, ResourceId, ShaderDesc, ShaderId,
    TextureDesc,
};

const SHADER_IDENTIFIER_SIZE: u32 = 32;

/// What the device observed for one accepted submission.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub queue: QueueKind,
    pub label: String,
    pub fence: FenceValue,
    pub passes: Vec<String>,
    pub barriers: usize,
    pub draws: u32,
    /// Width of every ray dispatch, in order
    pub dispatch_widths: Vec<u32>,
    /// Acceleration structure builds as `(destination, was_update)`
    pub builds: Vec<(ResourceId, bool)>,
}

enum ResourceKind {
    Buffer {
        size: u64,
        location: MemoryLocation,
        data: Vec<u8>,
    },
    Texture,
    AccelerationStructure {
        inputs: AccelerationStructureInputs,
        allow_update: bool,
        info: PrebuildInfo,
    },
}

struct Resource {
    label: String,
    kind: ResourceKind,
}

enum Pipeline {
    Graphics(GraphicsPipelineDesc),
    RayTracing(RayTracingPipelineDesc),
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    resources: HashMap<ResourceId, Resource>,
    states: HashMap<ResourceId, ResourceState>,
    built: HashSet<ResourceId>,
    shaders: HashMap<ShaderId, ShaderDesc>,
    layouts: HashMap<PipelineLayoutId, PipelineLayoutDesc>,
    pipelines: HashMap<PipelineId, Pipeline>,
    tables: HashMap<DescriptorTableId, DescriptorTableDesc>,
    last_use: HashMap<ResourceId, FenceValue>,
    submitted: FenceValue,
    completed: FenceValue,
    missing_shaders: HashSet<String>,
    failing_allocations: HashSet<String>,
    submissions: Vec<SubmissionRecord>,
}

impl Inner {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_allocation(&self, label: &str) -> Result<(), GpuError> {
        if self.failing_allocations.contains(label) {
            warn!("Injected allocation failure for '{}'", label);
            return Err(GpuError::OutOfMemory(label.to_string()));
        }
        Ok(())
    }

    fn add_resource(&mut self, label: &str, kind: ResourceKind, tracked: bool) -> ResourceId {
        let id = ResourceId(self.allocate_id());
        self.resources.insert(
            id,
            Resource {
                label: label.to_string(),
                kind,
            },
        );
        if tracked {
            self.states.insert(id, ResourceState::Uninitialized);
        }
        id
    }

    fn resource(&self, id: ResourceId) -> Result<&Resource, GpuError> {
        self.resources.get(&id).ok_or(GpuError::UnknownResource(id))
    }

    fn label(&self, id: ResourceId) -> String {
        self.resources
            .get(&id)
            .map(|r| r.label.clone())
            .unwrap_or_else(|| format!("{id:?}"))
    }

    fn ray_tracing_pipeline(&self, id: PipelineId) -> Result<&RayTracingPipelineDesc, GpuError> {
        match self.pipelines.get(&id) {
            Some(Pipeline::RayTracing(desc)) => Ok(desc),
            _ => Err(invalid("shader identifier", format!("{id:?} is not a ray tracing pipeline"))),
        }
    }
}

fn invalid(context: impl Into<String>, reason: impl Into<String>) -> GpuError {
    GpuError::Validation {
        context: context.into(),
        reason: reason.into(),
    }
}

/// Deterministic stand-in for driver sizing of acceleration structures.
fn prebuild_sizes(inputs: &AccelerationStructureInputs, allow_update: bool) -> PrebuildInfo {
    let (elements, per_element) = match inputs {
        AccelerationStructureInputs::Bottom(geometry) => (u64::from(geometry.index_count / 3), 64),
        AccelerationStructureInputs::Top { instance_count } => (u64::from(*instance_count), 128),
    };
    PrebuildInfo {
        result_size: 256 + elements * per_element,
        scratch_size: 128 + elements * per_element / 2,
        update_scratch_size: if allow_update {
            64 + elements * per_element / 4
        } else {
            0
        },
    }
}

/// Validating device with no GPU behind it.
#[derive(Clone, Default)]
pub struct HeadlessDevice {
    inner: Arc<Mutex<Inner>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make loading the named shader fail.
    pub fn with_missing_shader(self, name: impl Into<String>) -> Self {
        self.inner.lock().missing_shaders.insert(name.into());
        self
    }

    /// Make allocating a resource with this label fail.
    pub fn with_failing_allocation(self, label: impl Into<String>) -> Self {
        self.inner.lock().failing_allocations.insert(label.into());
        self
    }

    /// A queue of the given kind on this device's fence timeline.
    pub fn queue(&self, kind: QueueKind) -> HeadlessQueue {
        HeadlessQueue {
            kind,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.inner.lock().submissions.clone()
    }

    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.inner.lock().states.get(&id).copied()
    }

    pub fn find_resource(&self, label: &str) -> Option<ResourceId> {
        let inner = self.inner.lock();
        inner
            .resources
            .iter()
            .filter(|(_, r)| r.label == label)
            .map(|(id, _)| *id)
            .min()
    }

    /// Current bytes of an upload buffer.
    pub fn buffer_contents(&self, id: ResourceId) -> Option<Vec<u8>> {
        match &self.inner.lock().resources.get(&id)?.kind {
            ResourceKind::Buffer {
                location: MemoryLocation::Upload,
                data,
                ..
            } => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_built(&self, id: ResourceId) -> bool {
        self.inner.lock().built.contains(&id)
    }
}

impl Device for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<ResourceId, GpuError> {
        let mut inner = self.inner.lock();
        inner.check_allocation(&desc.label)?;
        if desc.size == 0 {
            return Err(invalid(&desc.label, "zero-sized buffer"));
        }
        let data = match desc.location {
            MemoryLocation::Upload => vec![0; desc.size as usize],
            MemoryLocation::DeviceLocal => Vec::new(),
        };
        let tracked = desc.location == MemoryLocation::DeviceLocal;
        let kind = ResourceKind::Buffer {
            size: desc.size,
            location: desc.location,
            data,
        };
        let id = inner.add_resource(&desc.label, kind, tracked);
        debug!("Created buffer '{}' ({} bytes) as {:?}", desc.label, desc.size, id);
        Ok(id)
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<ResourceId, GpuError> {
        let mut inner = self.inner.lock();
        inner.check_allocation(&desc.label)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(invalid(&desc.label, "zero-sized texture"));
        }
        let id = inner.add_resource(&desc.label, ResourceKind::Texture, true);
        debug!(
            "Created texture '{}' {}x{} {:?} as {:?}",
            desc.label, desc.width, desc.height, desc.format, id
        );
        Ok(id)
    }

    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
        allow_update: bool,
    ) -> Result<PrebuildInfo, GpuError> {
        if let AccelerationStructureInputs::Bottom(geometry) = inputs {
            if geometry.index_count == 0 || geometry.index_count % 3 != 0 {
                return Err(invalid(
                    "acceleration structure prebuild",
                    format!("{} indices do not form triangles", geometry.index_count),
                ));
            }
        }
        Ok(prebuild_sizes(inputs, allow_update))
    }

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<ResourceId, GpuError> {
        let mut inner = self.inner.lock();
        inner.check_allocation(&desc.label)?;
        let info = prebuild_sizes(&desc.inputs, desc.allow_update);
        if desc.size < info.result_size {
            return Err(invalid(
                &desc.label,
                format!("{} bytes is below the required {}", desc.size, info.result_size),
            ));
        }
        let kind = ResourceKind::AccelerationStructure {
            inputs: desc.inputs,
            allow_update: desc.allow_update,
            info,
        };
        Ok(inner.add_resource(&desc.label, kind, false))
    }

    fn acceleration_structure_address(&self, id: ResourceId) -> Result<u64, GpuError> {
        let inner = self.inner.lock();
        match inner.resource(id)?.kind {
            ResourceKind::AccelerationStructure { .. } => Ok(0x1000_0000 + u64::from(id.0) * 0x1_0000),
            _ => Err(invalid("acceleration structure address", format!("{id:?} is not an acceleration structure"))),
        }
    }

    fn write_buffer(&self, buffer: ResourceId, offset: u64, bytes: &[u8]) -> Result<(), GpuError> {
        let mut inner = self.inner.lock();
        let completed = inner.completed;
        let pending = inner.last_use.get(&buffer).copied().unwrap_or(0);
        let label = inner.label(buffer);

        if pending > completed {
            return Err(GpuError::Hazard {
                label,
                pending,
                completed,
            });
        }

        let resource = inner
            .resources
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownResource(buffer))?;
        match &mut resource.kind {
            ResourceKind::Buffer {
                location: MemoryLocation::Upload,
                data,
                ..
            } => {
                let start = offset as usize;
                let end = start + bytes.len();
                if end > data.len() {
                    return Err(GpuError::OutOfBounds {
                        label,
                        offset,
                        len: bytes.len(),
                    });
                }
                data[start..end].copy_from_slice(bytes);
                Ok(())
            }
            _ => Err(invalid(label, "CPU writes need an upload buffer")),
        }
    }

    fn load_shader(&self, desc: &ShaderDesc) -> Result<ShaderId, GpuError> {
        let mut inner = self.inner.lock();
        if inner.missing_shaders.contains(&desc.name) {
            return Err(GpuError::ShaderNotFound(desc.name.clone()));
        }
        let id = ShaderId(inner.allocate_id());
        inner.shaders.insert(id, desc.clone());
        Ok(id)
    }

    fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDesc,
    ) -> Result<PipelineLayoutId, GpuError> {
        let mut inner = self.inner.lock();
        inner.check_allocation(&desc.label)?;
        let id = PipelineLayoutId(inner.allocate_id());
        inner.layouts.insert(id, desc.clone());
        Ok(id)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineId, GpuError> {
        let mut inner = self.inner.lock();
        match inner.layouts.get(&desc.layout) {
            Some(layout) if !layout.local => {}
            Some(_) => return Err(invalid(&desc.label, "graphics pipelines need a global layout")),
            None => return Err(invalid(&desc.label, "unknown pipeline layout")),
        }
        if let Some(missing) = desc.shaders.iter().find(|s| !inner.shaders.contains_key(*s)) {
            return Err(invalid(&desc.label, format!("unknown shader {missing:?}")));
        }
        if desc.depth != DepthMode::Disabled && desc.depth_format.is_none() {
            return Err(invalid(&desc.label, "depth testing without a depth format"));
        }
        let id = PipelineId(inner.allocate_id());
        inner.pipelines.insert(id, Pipeline::Graphics(desc.clone()));
        Ok(id)
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<PipelineId, GpuError> {
        let mut inner = self.inner.lock();
        if !inner.shaders.contains_key(&desc.library) {
            return Err(invalid(&desc.label, "unknown shader library"));
        }
        match inner.layouts.get(&desc.global_layout) {
            Some(layout) if !layout.local => {}
            _ => return Err(invalid(&desc.label, "missing global pipeline layout")),
        }

        let is_export = |name: &str| {
            desc.exports.iter().any(|e| e == name) || desc.hit_groups.iter().any(|g| g.name == name)
        };
        for group in &desc.hit_groups {
            if !desc.exports.contains(&group.closest_hit) {
                return Err(GpuError::UnknownExport(group.closest_hit.clone()));
            }
        }
        for association in &desc.local_layouts {
            match inner.layouts.get(&association.layout) {
                Some(layout) if layout.local => {}
                _ => return Err(invalid(&desc.label, "local association needs a local layout")),
            }
            if let Some(name) = association.exports.iter().find(|n| !is_export(n.as_str())) {
                return Err(GpuError::UnknownExport(name.clone()));
            }
        }
        if desc.max_recursion_depth == 0 {
            return Err(invalid(&desc.label, "recursion depth must be at least 1"));
        }

        let id = PipelineId(inner.allocate_id());
        inner.pipelines.insert(id, Pipeline::RayTracing(desc.clone()));
        Ok(id)
    }

    fn create_descriptor_table(
        &self,
        desc: &DescriptorTableDesc,
    ) -> Result<DescriptorTableId, GpuError> {
        let mut inner = self.inner.lock();
        let first = desc
            .descriptors
            .first()
            .ok_or_else(|| invalid(&desc.label, "empty descriptor table"))?;
        if desc.descriptors.iter().any(|d| d.class() != first.class()) {
            return Err(invalid(&desc.label, "descriptor classes are mixed"));
        }
        for resource in desc.descriptors.iter().filter_map(Descriptor::resource) {
            inner.resource(resource)?;
        }
        let id = DescriptorTableId(inner.allocate_id());
        inner.tables.insert(id, desc.clone());
        Ok(id)
    }

    fn shader_identifier_size(&self) -> u32 {
        SHADER_IDENTIFIER_SIZE
    }

    fn shader_identifier(&self, pipeline: PipelineId, export: &str) -> Result<Vec<u8>, GpuError> {
        let inner = self.inner.lock();
        let desc = inner.ray_tracing_pipeline(pipeline)?;
        let index = desc
            .exports
            .iter()
            .position(|e| e == export)
            .or_else(|| {
                desc.hit_groups
                    .iter()
                    .position(|g| g.name == export)
                    .map(|i| desc.exports.len() + i)
            })
            .ok_or_else(|| GpuError::UnknownExport(export.to_string()))?;

        let mut identifier = vec![0u8; SHADER_IDENTIFIER_SIZE as usize];
        identifier[..4].copy_from_slice(&pipeline.0.to_le_bytes());
        identifier[4..8].copy_from_slice(&(index as u32 + 1).to_le_bytes());
        Ok(identifier)
    }
}

/// Queue on a [`HeadlessDevice`].
pub struct HeadlessQueue {
    kind: QueueKind,
    inner: Arc<Mutex<Inner>>,
}

impl Queue for HeadlessQueue {
    fn kind(&self) -> QueueKind {
        self.kind
    }

    fn submit(&self, commands: CommandList) -> Result<FenceValue, GpuError> {
        let mut inner = self.inner.lock();
        let fence = inner.submitted + 1;

        let outcome = {
            let mut replay = Replay::new(&inner, self.kind, &commands, fence);
            for command in commands.commands() {
                replay.execute(command)?;
            }
            replay.finish()
        };

        inner.states = outcome.states;
        inner.built = outcome.built;
        for resource in outcome.read_uploads {
            inner.last_use.insert(resource, fence);
        }
        inner.submitted = fence;
        debug!(
            "Accepted '{}' on {:?} queue as fence {}",
            commands.label(),
            self.kind,
            fence
        );
        inner.submissions.push(outcome.record);
        Ok(fence)
    }

    fn completed_value(&self) -> FenceValue {
        self.inner.lock().completed
    }

    fn wait_for(&self, value: FenceValue) -> Result<(), GpuError> {
        let mut inner = self.inner.lock();
        if value > inner.submitted {
            return Err(GpuError::UnsignaledFence(value));
        }
        inner.completed = inner.completed.max(value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    Constants,
    ConstantBuffer,
    AccelerationStructure(ResourceId),
    Table(DescriptorTableId),
}

struct Outcome {
    states: HashMap<ResourceId, ResourceState>,
    built: HashSet<ResourceId>,
    read_uploads: HashSet<ResourceId>,
    record: SubmissionRecord,
}

/// Replays one command list against a copy of the device state.
struct Replay<'a> {
    device: &'a Inner,
    queue: QueueKind,
    context: String,
    states: HashMap<ResourceId, ResourceState>,
    built: HashSet<ResourceId>,
    read_uploads: HashSet<ResourceId>,
    layout: Option<PipelineLayoutId>,
    bindings: HashMap<u32, Binding>,
    pipeline: Option<PipelineId>,
    color: Option<ResourceId>,
    depth: Option<DepthAttachment>,
    has_viewport: bool,
    vertex_buffer: Option<ResourceId>,
    index_buffer: Option<ResourceId>,
    unsynchronized_scratch: HashSet<ResourceId>,
    record: SubmissionRecord,
}

impl<'a> Replay<'a> {
    fn new(device: &'a Inner, queue: QueueKind, commands: &CommandList, fence: FenceValue) -> Self {
        Self {
            device,
            queue,
            context: format!("command list '{}'", commands.label()),
            states: device.states.clone(),
            built: device.built.clone(),
            read_uploads: HashSet::new(),
            layout: None,
            bindings: HashMap::new(),
            pipeline: None,
            color: None,
            depth: None,
            has_viewport: false,
            vertex_buffer: None,
            index_buffer: None,
            unsynchronized_scratch: HashSet::new(),
            record: SubmissionRecord {
                queue,
                label: commands.label().to_string(),
                fence,
                passes: Vec::new(),
                barriers: 0,
                draws: 0,
                dispatch_widths: Vec::new(),
                builds: Vec::new(),
            },
        }
    }

    fn finish(self) -> Outcome {
        Outcome {
            states: self.states,
            built: self.built,
            read_uploads: self.read_uploads,
            record: self.record,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> GpuError {
        let pass = self.record.passes.last().map(String::as_str).unwrap_or("setup");
        invalid(format!("{} ({})", self.context, pass), reason)
    }

    fn label(&self, id: ResourceId) -> String {
        self.device.label(id)
    }

    fn expect_state(&self, id: ResourceId, expected: ResourceState, usage: &str) -> Result<(), GpuError> {
        let actual = self
            .states
            .get(&id)
            .copied()
            .ok_or_else(|| self.fail(format!("'{}' has no tracked state", self.label(id))))?;
        if actual != expected {
            return Err(self.fail(format!(
                "{} '{}' is {}, needs {}",
                usage,
                self.label(id),
                actual,
                expected
            )));
        }
        Ok(())
    }

    fn upload_buffer_size(&self, id: ResourceId) -> Result<u64, GpuError> {
        match self.device.resource(id)?.kind {
            ResourceKind::Buffer {
                size,
                location: MemoryLocation::Upload,
                ..
            } => Ok(size),
            _ => Err(self.fail(format!("'{}' is not an upload buffer", self.label(id)))),
        }
    }

    fn layout_entry(&self, index: u32) -> Result<super::LayoutEntry, GpuError> {
        let layout = self
            .layout
            .and_then(|id| self.device.layouts.get(&id))
            .ok_or_else(|| self.fail("binding without a pipeline layout"))?;
        layout
            .entries
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.fail(format!("layout '{}' has no slot {}", layout.label, index)))
    }

    fn execute(&mut self, command: &Command) -> Result<(), GpuError> {
        if self.queue == QueueKind::Copy
            && !matches!(
                command,
                Command::BeginPass(_)
                    | Command::Barrier(_)
                    | Command::UploadBuffer { .. }
                    | Command::UploadTexture { .. }
            )
        {
            return Err(self.fail("copy queues only accept barriers and uploads"));
        }

        match command {
            Command::BeginPass(name) => self.record.passes.push(name.to_string()),
            Command::Barrier(barriers) => {
                for barrier in barriers {
                    let actual = self.states.get(&barrier.resource).copied().ok_or_else(|| {
                        self.fail(format!("barrier on untracked '{}'", self.label(barrier.resource)))
                    })?;
                    if actual != barrier.before {
                        return Err(self.fail(format!(
                            "barrier on '{}' expects {} but it is {}",
                            self.label(barrier.resource),
                            barrier.before,
                            actual
                        )));
                    }
                    self.states.insert(barrier.resource, barrier.after);
                }
                self.record.barriers += barriers.len();
            }
            Command::UavBarrier(resource) => {
                self.unsynchronized_scratch.remove(resource);
            }
            Command::UploadBuffer {
                destination,
                offset,
                data,
            } => {
                let size = match self.device.resource(*destination)?.kind {
                    ResourceKind::Buffer {
                        size,
                        location: MemoryLocation::DeviceLocal,
                        ..
                    } => size,
                    _ => return Err(self.fail("uploads target device-local buffers")),
                };
                if offset + data.len() as u64 > size {
                    return Err(self.fail(format!("upload overflows '{}'", self.label(*destination))));
                }
                self.expect_state(*destination, ResourceState::TransferDestination, "upload target")?;
            }
            Command::UploadTexture { destination, data } => {
                if !matches!(self.device.resource(*destination)?.kind, ResourceKind::Texture) {
                    return Err(self.fail("texture upload into a non-texture"));
                }
                if data.is_empty() {
                    return Err(self.fail("empty texture upload"));
                }
                self.expect_state(*destination, ResourceState::TransferDestination, "upload target")?;
            }
            Command::SetRenderTargets { color, depth } => {
                self.color = *color;
                self.depth = *depth;
            }
            Command::ClearDepth { target, .. } => {
                self.expect_state(*target, ResourceState::WriteTarget, "depth clear")?;
            }
            Command::SetViewport { width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(self.fail("empty viewport"));
                }
                self.has_viewport = true;
            }
            Command::SetPipelineLayout(id) => {
                match self.device.layouts.get(id) {
                    Some(layout) if !layout.local => {}
                    _ => return Err(self.fail(format!("{id:?} is not a global layout"))),
                }
                self.layout = Some(*id);
                self.bindings.clear();
            }
            Command::SetPipeline(id) => {
                if !self.device.pipelines.contains_key(id) {
                    return Err(self.fail(format!("unknown pipeline {id:?}")));
                }
                self.pipeline = Some(*id);
            }
            Command::SetConstants { index, values } => {
                let entry = self.layout_entry(*index)?;
                if entry.kind != BindingKind::Constants || entry.count as usize != values.len() {
                    return Err(self.fail(format!(
                        "slot {} takes {:?} x{}, got {} constants",
                        index,
                        entry.kind,
                        entry.count,
                        values.len()
                    )));
                }
                self.bindings.insert(*index, Binding::Constants);
            }
            Command::SetConstantBuffer {
                index,
                buffer,
                offset,
            } => {
                let entry = self.layout_entry(*index)?;
                if entry.kind != BindingKind::ConstantBuffer {
                    return Err(self.fail(format!("slot {} is {:?}, not a constant buffer", index, entry.kind)));
                }
                if *offset >= self.upload_buffer_size(*buffer)? {
                    return Err(self.fail("constant buffer offset past the end"));
                }
                self.read_uploads.insert(*buffer);
                self.bindings.insert(*index, Binding::ConstantBuffer);
            }
            Command::SetAccelerationStructure { index, structure } => {
                let entry = self.layout_entry(*index)?;
                if entry.kind != BindingKind::AccelerationStructure {
                    return Err(self.fail(format!("slot {} does not take an acceleration structure", index)));
                }
                match self.device.resource(*structure)?.kind {
                    ResourceKind::AccelerationStructure {
                        inputs: AccelerationStructureInputs::Top { .. },
                        ..
                    } => {}
                    _ => return Err(self.fail("only top-level structures can be bound")),
                }
                self.bindings.insert(*index, Binding::AccelerationStructure(*structure));
            }
            Command::SetTable { index, table } => {
                let entry = self.layout_entry(*index)?;
                let desc = self
                    .device
                    .tables
                    .get(table)
                    .ok_or_else(|| self.fail(format!("unknown descriptor table {table:?}")))?;
                let class = desc.descriptors.first().map(Descriptor::class);
                let fits = match entry.kind {
                    BindingKind::Table(expected) => Some(expected) == class,
                    _ => false,
                };
                if !fits || entry.count as usize != desc.descriptors.len() {
                    return Err(self.fail(format!(
                        "table '{}' does not match slot {} ({:?} x{})",
                        desc.label, index, entry.kind, entry.count
                    )));
                }
                self.bindings.insert(*index, Binding::Table(*table));
            }
            Command::SetVertexBuffer { buffer, .. } => self.vertex_buffer = Some(*buffer),
            Command::SetIndexBuffer(buffer) => self.index_buffer = Some(*buffer),
            Command::Draw { .. } => self.validate_draw(false)?,
            Command::DrawIndexed { .. } => self.validate_draw(true)?,
            Command::DispatchRays { tables, width, .. } => {
                self.validate_dispatch(&[tables.ray_gen, tables.hit_group, tables.miss], *width)?
            }
            Command::BuildAccelerationStructure(build) => self.validate_build(build)?,
        }
        Ok(())
    }

    /// Every slot of the current layout is bound and every bound view is in
    /// the state its access needs.
    fn validate_bindings(&self, layout: PipelineLayoutId) -> Result<(), GpuError> {
        let device = self.device;
        if self.layout != Some(layout) {
            return Err(self.fail("pipeline and bound layout differ"));
        }
        let desc = device
            .layouts
            .get(&layout)
            .ok_or_else(|| self.fail("unknown layout"))?;

        for index in 0..desc.entries.len() as u32 {
            match self.bindings.get(&index).copied() {
                None => {
                    return Err(self.fail(format!("slot {} of '{}' is not bound", index, desc.label)));
                }
                Some(Binding::Table(table)) => {
                    let descriptors = device
                        .tables
                        .get(&table)
                        .map(|t| t.descriptors.as_slice())
                        .unwrap_or_default();
                    for descriptor in descriptors.iter().copied() {
                        match descriptor {
                            Descriptor::Srv(id) => {
                                self.expect_state(id, ResourceState::ShaderReadable, "shader resource")?
                            }
                            Descriptor::Uav(id) => {
                                self.expect_state(id, ResourceState::WriteTarget, "unordered access view")?
                            }
                            Descriptor::Sampler(_) => {}
                        }
                    }
                }
                Some(Binding::AccelerationStructure(id)) => {
                    if !self.built.contains(&id) {
                        return Err(self.fail(format!("'{}' is bound before it was built", self.label(id))));
                    }
                }
                Some(Binding::Constants) | Some(Binding::ConstantBuffer) => {}
            }
        }
        Ok(())
    }

    fn validate_draw(&mut self, indexed: bool) -> Result<(), GpuError> {
        let device = self.device;
        let desc = match self.pipeline.and_then(|id| device.pipelines.get(&id)) {
            Some(Pipeline::Graphics(desc)) => desc,
            _ => return Err(self.fail("draw without a graphics pipeline")),
        };
        if !self.has_viewport {
            return Err(self.fail("draw without a viewport"));
        }
        self.validate_bindings(desc.layout)?;

        match (desc.depth, self.depth) {
            (DepthMode::Disabled, _) => {}
            (DepthMode::Write, Some(depth)) if !depth.read_only => {
                self.expect_state(depth.resource, ResourceState::WriteTarget, "depth attachment")?
            }
            (DepthMode::ReadEqual, Some(depth)) if depth.read_only => {
                self.expect_state(depth.resource, ResourceState::ShaderReadable, "read-only depth")?
            }
            (mode, _) => return Err(self.fail(format!("depth attachment does not suit {mode:?}"))),
        }

        if !desc.color_formats.is_empty() {
            let color = self.color.ok_or_else(|| self.fail("draw without a color target"))?;
            self.expect_state(color, ResourceState::WriteTarget, "color target")?;
        }

        if desc.vertex_input.is_some() {
            let vertices = self.vertex_buffer.ok_or_else(|| self.fail("no vertex buffer bound"))?;
            self.expect_state(vertices, ResourceState::ShaderReadable, "vertex buffer")?;
        }
        if indexed {
            let indices = self.index_buffer.ok_or_else(|| self.fail("no index buffer bound"))?;
            self.expect_state(indices, ResourceState::ShaderReadable, "index buffer")?;
        }

        self.record.draws += 1;
        Ok(())
    }

    fn validate_dispatch(&mut self, tables: &[TableRange], width: u32) -> Result<(), GpuError> {
        let device = self.device;
        let desc = match self.pipeline.and_then(|id| device.pipelines.get(&id)) {
            Some(Pipeline::RayTracing(desc)) => desc,
            _ => return Err(self.fail("ray dispatch without a ray tracing pipeline")),
        };
        self.validate_bindings(desc.global_layout)?;
        if width == 0 {
            return Err(self.fail("empty ray dispatch"));
        }

        for range in tables {
            let capacity = self.upload_buffer_size(range.buffer)?;
            if range.stride < u64::from(SHADER_IDENTIFIER_SIZE)
                || range.size == 0
                || range.size % range.stride != 0
                || range.size > capacity
            {
                return Err(self.fail(format!(
                    "shader table '{}' has an invalid range {:?}",
                    self.label(range.buffer),
                    range
                )));
            }
            self.read_uploads.insert(range.buffer);
        }

        self.record.dispatch_widths.push(width);
        Ok(())
    }

    fn validate_build(&mut self, build: &AccelerationStructureBuild) -> Result<(), GpuError> {
        let (inputs, allow_update, info) = match self.device.resource(build.destination)?.kind {
            ResourceKind::AccelerationStructure {
                inputs,
                allow_update,
                info,
            } => (inputs, allow_update, info),
            _ => return Err(self.fail("build destination is not an acceleration structure")),
        };

        let scratch_size = match self.device.resource(build.scratch)?.kind {
            ResourceKind::Buffer {
                size,
                location: MemoryLocation::DeviceLocal,
                ..
            } => size,
            _ => return Err(self.fail("scratch must be a device-local buffer")),
        };
        if self.unsynchronized_scratch.contains(&build.scratch) {
            return Err(self.fail("scratch buffer reused without a UAV barrier"));
        }
        let needed = if build.update {
            info.update_scratch_size
        } else {
            info.scratch_size
        };
        if scratch_size < needed {
            return Err(self.fail(format!(
                "scratch holds {} bytes, '{}' needs {}",
                scratch_size,
                self.label(build.destination),
                needed
            )));
        }

        if build.update {
            if !allow_update {
                return Err(self.fail("update of a structure built without allow-update"));
            }
            if !self.built.contains(&build.destination) {
                return Err(self.fail("update before the first build"));
            }
        }

        match (inputs, build.source) {
            (AccelerationStructureInputs::Bottom(expected), BuildSource::Triangles(geometry)) => {
                if expected != geometry {
                    return Err(self.fail("geometry differs from the prebuild inputs"));
                }
                self.expect_state(geometry.vertex_buffer, ResourceState::ShaderReadable, "build vertices")?;
                self.expect_state(geometry.index_buffer, ResourceState::ShaderReadable, "build indices")?;
            }
            (AccelerationStructureInputs::Top { instance_count }, BuildSource::Instances { buffer, count }) => {
                if count != instance_count {
                    return Err(self.fail(format!(
                        "{} instances, structure was sized for {}",
                        count, instance_count
                    )));
                }
                self.upload_buffer_size(buffer)?;
                self.read_uploads.insert(buffer);
            }
            _ => return Err(self.fail("build source does not match the structure level")),
        }

        self.built.insert(build.destination);
        self.unsynchronized_scratch.insert(build.scratch);
        self.record.builds.push((build.destination, build.update));
        Ok(())
    }
}
