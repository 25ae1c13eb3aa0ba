//! Recorded command lists.
//!
//! A [`CommandList`] is plain data: the renderer records into it, a queue
//! consumes it. Uploads carry their staging bytes inline.

use super::state::Barrier;
use super::{DescriptorTableId, GeometryView, PipelineId, PipelineLayoutId, ResourceId};

/// Depth buffer binding for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthAttachment {
    pub resource: ResourceId,
    pub read_only: bool,
}

/// Region of a shader table buffer used by a ray dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRange {
    pub buffer: ResourceId,
    pub size: u64,
    pub stride: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTables {
    pub ray_gen: TableRange,
    pub hit_group: TableRange,
    pub miss: TableRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSource {
    Triangles(GeometryView),
    Instances { buffer: ResourceId, count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelerationStructureBuild {
    pub destination: ResourceId,
    pub source: BuildSource,
    pub scratch: ResourceId,
    /// Refit in place instead of building from scratch
    pub update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Debug marker opening a named pass
    BeginPass(&'static str),
    Barrier(Vec<Barrier>),
    /// Orders two unordered-access uses of the same resource
    UavBarrier(ResourceId),
    UploadBuffer {
        destination: ResourceId,
        offset: u64,
        data: Vec<u8>,
    },
    UploadTexture {
        destination: ResourceId,
        data: Vec<u8>,
    },
    SetRenderTargets {
        color: Option<ResourceId>,
        depth: Option<DepthAttachment>,
    },
    ClearDepth {
        target: ResourceId,
        depth: f32,
    },
    SetViewport {
        width: u32,
        height: u32,
    },
    SetPipelineLayout(PipelineLayoutId),
    SetPipeline(PipelineId),
    SetConstants {
        index: u32,
        values: Vec<u32>,
    },
    SetConstantBuffer {
        index: u32,
        buffer: ResourceId,
        offset: u64,
    },
    SetAccelerationStructure {
        index: u32,
        structure: ResourceId,
    },
    SetTable {
        index: u32,
        table: DescriptorTableId,
    },
    SetVertexBuffer {
        buffer: ResourceId,
        stride: u32,
    },
    SetIndexBuffer(ResourceId),
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
    },
    DispatchRays {
        tables: DispatchTables,
        width: u32,
        height: u32,
        depth: u32,
    },
    BuildAccelerationStructure(AccelerationStructureBuild),
}

#[derive(Debug, Clone)]
pub struct CommandList {
    label: String,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn begin_pass(&mut self, name: &'static str) {
        self.push(Command::BeginPass(name));
    }

    /// Record a batch of barriers. Empty batches are dropped.
    pub fn barriers(&mut self, barriers: impl IntoIterator<Item = Barrier>) {
        let barriers: Vec<Barrier> = barriers.into_iter().collect();
        if !barriers.is_empty() {
            self.push(Command::Barrier(barriers));
        }
    }

    pub fn uav_barrier(&mut self, resource: ResourceId) {
        self.push(Command::UavBarrier(resource));
    }

    pub fn upload_buffer(&mut self, destination: ResourceId, data: Vec<u8>) {
        self.push(Command::UploadBuffer {
            destination,
            offset: 0,
            data,
        });
    }

    pub fn upload_texture(&mut self, destination: ResourceId, data: Vec<u8>) {
        self.push(Command::UploadTexture { destination, data });
    }

    pub fn set_render_targets(&mut self, color: Option<ResourceId>, depth: Option<DepthAttachment>) {
        self.push(Command::SetRenderTargets { color, depth });
    }

    pub fn clear_depth(&mut self, target: ResourceId, depth: f32) {
        self.push(Command::ClearDepth { target, depth });
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.push(Command::SetViewport { width, height });
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.push(Command::SetPipeline(pipeline));
    }

    pub fn set_vertex_buffer(&mut self, buffer: ResourceId, stride: u32) {
        self.push(Command::SetVertexBuffer { buffer, stride });
    }

    pub fn set_index_buffer(&mut self, buffer: ResourceId) {
        self.push(Command::SetIndexBuffer(buffer));
    }

    pub fn draw(&mut self, vertex_count: u32) {
        self.push(Command::Draw { vertex_count });
    }

    pub fn draw_indexed(&mut self, index_count: u32) {
        self.push(Command::DrawIndexed { index_count });
    }

    pub fn dispatch_rays(&mut self, tables: DispatchTables, width: u32) {
        self.push(Command::DispatchRays {
            tables,
            width,
            height: 1,
            depth: 1,
        });
    }

    pub fn build_acceleration_structure(&mut self, build: AccelerationStructureBuild) {
        self.push(Command::BuildAccelerationStructure(build));
    }

    /// Names of the passes recorded so far, in order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::BeginPass(name) => Some(*name),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ResourceState;

    #[test]
    fn test_empty_barrier_batches_are_dropped() {
        let mut cmd = CommandList::new("test");
        cmd.barriers(Vec::new());
        assert!(cmd.is_empty());

        cmd.barriers([Barrier::new(
            ResourceId(1),
            ResourceState::Uninitialized,
            ResourceState::WriteTarget,
        )]);
        assert_eq!(cmd.len(), 1);
    }

    #[test]
    fn test_pass_names_in_recording_order() {
        let mut cmd = CommandList::new("frame");
        cmd.begin_pass("first");
        cmd.draw(3);
        cmd.begin_pass("second");
        assert_eq!(cmd.pass_names(), vec!["first", "second"]);
    }
}
