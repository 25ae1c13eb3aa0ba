//! Frame slots and fence-gated slot reuse.

use granularity_core::{MeshRole, PerMesh};
use tracing::debug;
use vulkano::buffer::BufferUsage;

use crate::constants::{CbEnv, CbGlobal, CbGraphics};
use crate::error::{GpuResultExt, RenderError};
use crate::gpu::{BufferDesc, CommandList, Device, FenceValue, GpuError, MemoryLocation, Queue, ResourceId};

/// Frames in flight. The CPU runs at most `FRAME_COUNT - 1` frames ahead.
pub const FRAME_COUNT: usize = 3;

/// Constant buffers owned by one in-flight frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub cb_global: ResourceId,
    pub cb_env: ResourceId,
    pub cb_graphics: PerMesh<ResourceId>,
}

impl FrameSlot {
    pub fn create(device: &dyn Device, slot: usize) -> Result<Self, RenderError> {
        let constant_buffer = |label: String, size: usize| {
            device
                .create_buffer(&BufferDesc {
                    label: label.clone(),
                    size: size as u64,
                    usage: BufferUsage::UNIFORM_BUFFER,
                    location: MemoryLocation::Upload,
                })
                .creating(label)
        };
        Ok(Self {
            cb_global: constant_buffer(format!("global constants {slot}"), std::mem::size_of::<CbGlobal>())?,
            cb_env: constant_buffer(format!("environment constants {slot}"), std::mem::size_of::<CbEnv>())?,
            cb_graphics: PerMesh::try_from_fn(|role: MeshRole| {
                constant_buffer(
                    format!("{} graphics constants {slot}", role.name()),
                    std::mem::size_of::<CbGraphics>(),
                )
            })?,
        })
    }
}

/// Tracks the fence each frame slot was last submitted with.
#[derive(Debug, Default)]
pub struct FrameSync {
    fence_values: [FenceValue; FRAME_COUNT],
    frame_index: usize,
}

impl FrameSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot the CPU is currently recording.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Fence the slot's latest submission signals, `None` for a slot out of
    /// range.
    pub fn fence_value(&self, slot: usize) -> Option<FenceValue> {
        self.fence_values.get(slot).copied()
    }

    /// Submit work for the current slot and remember its fence.
    pub fn submit(&mut self, queue: &dyn Queue, commands: CommandList) -> Result<FenceValue, GpuError> {
        let fence = queue.submit(commands)?;
        self.fence_values[self.frame_index] = fence;
        Ok(fence)
    }

    /// Advance to the next slot and block until its previous frame is done.
    pub fn move_to_next_frame(&mut self, queue: &dyn Queue) -> Result<usize, GpuError> {
        self.frame_index = (self.frame_index + 1) % FRAME_COUNT;
        let pending = self.fence_values[self.frame_index];
        if queue.completed_value() < pending {
            debug!("Waiting for fence {} before reusing slot {}", pending, self.frame_index);
            queue.wait_for(pending)?;
        }
        Ok(self.frame_index)
    }

    /// Block until every submitted frame has completed.
    pub fn wait_for_gpu(&mut self, queue: &dyn Queue) -> Result<(), GpuError> {
        let last = self.fence_values.iter().copied().max().unwrap_or_default();
        if last > 0 {
            queue.wait_for(last)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessDevice, QueueKind};

    #[test]
    fn test_slots_cycle_and_wait_for_their_own_fence() {
        let device = HeadlessDevice::new();
        let queue = device.queue(QueueKind::Graphics);
        let mut sync = FrameSync::new();

        for frame in 0..FRAME_COUNT {
            assert_eq!(sync.frame_index(), frame);
            sync.submit(&queue, CommandList::new(format!("frame {frame}"))).unwrap();
            sync.move_to_next_frame(&queue).unwrap();
        }
        // Back at slot 0, whose first submission had to complete.
        assert_eq!(sync.frame_index(), 0);
        assert!(queue.completed_value() >= sync.fence_value(0).unwrap());
        assert!(queue.completed_value() < sync.fence_value(2).unwrap());
        assert_eq!(sync.fence_value(FRAME_COUNT), None);

        sync.wait_for_gpu(&queue).unwrap();
        assert_eq!(queue.completed_value(), FRAME_COUNT as FenceValue);
    }

    #[test]
    fn test_frame_slot_buffers_are_distinct() {
        let device = HeadlessDevice::new();
        let a = FrameSlot::create(&device, 0).unwrap();
        let b = FrameSlot::create(&device, 1).unwrap();
        assert_ne!(a.cb_global, b.cb_global);
        assert_ne!(a.cb_graphics.ground, a.cb_graphics.model);
        assert_eq!(device.find_resource("Model graphics constants 1"), Some(b.cb_graphics.model));
    }
}
