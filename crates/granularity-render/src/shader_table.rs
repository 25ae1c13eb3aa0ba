//! Shader record tables consumed by ray dispatches.
//!
//! A table is an upload buffer of fixed-stride records, each a shader
//! identifier followed by an optional payload. The stride is the identifier
//! size plus the largest payload in the table. Tables are never patched: a
//! rebuild resets the record list, refills it and rewrites the whole buffer.

use tracing::debug;
use vulkano::buffer::BufferUsage;

use crate::constants::RayGenConstants;
use crate::error::{GpuResultExt, RenderError};
use crate::gpu::{
    BufferDesc, Device, DispatchTables, MemoryLocation, PipelineId, ResourceId, TableRange,
};
use crate::pipeline::{
    HIT_GROUP_RADIANCE, MISS_RADIANCE_EXPORT, MISS_SHADOW_EXPORT, RAY_GEN_EXPORT,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShaderTableError {
    #[error("shader table '{label}' is full ({capacity} records)")]
    Full { label: String, capacity: u32 },

    #[error("payload of {size} bytes exceeds the {max} bytes '{label}' was sized for")]
    PayloadTooLarge { label: String, size: usize, max: u32 },

    #[error("shader identifier of {size} bytes, the device uses {expected}")]
    IdentifierSize { size: usize, expected: u32 },
}

/// Shader identifier plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRecord {
    pub identifier: Vec<u8>,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct ShaderTable {
    label: String,
    buffer: ResourceId,
    capacity: u32,
    identifier_size: u32,
    max_payload: u32,
    records: Vec<ShaderRecord>,
}

impl ShaderTable {
    /// Allocate a table for up to `capacity` records with payloads of at most
    /// `max_payload` bytes.
    pub fn create(
        device: &dyn Device,
        label: impl Into<String>,
        capacity: u32,
        max_payload: u32,
    ) -> Result<Self, RenderError> {
        let label = label.into();
        let identifier_size = device.shader_identifier_size();
        let buffer = device
            .create_buffer(&BufferDesc {
                label: label.clone(),
                size: u64::from(capacity) * u64::from(identifier_size + max_payload),
                usage: BufferUsage::SHADER_BINDING_TABLE | BufferUsage::SHADER_DEVICE_ADDRESS,
                location: MemoryLocation::Upload,
            })
            .creating(format!("shader table '{label}'"))?;

        Ok(Self {
            label,
            buffer,
            capacity,
            identifier_size,
            max_payload,
            records: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> ResourceId {
        self.buffer
    }

    pub fn records(&self) -> &[ShaderRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add_record(&mut self, identifier: Vec<u8>, payload: &[u8]) -> Result<(), ShaderTableError> {
        if self.records.len() as u32 >= self.capacity {
            return Err(ShaderTableError::Full {
                label: self.label.clone(),
                capacity: self.capacity,
            });
        }
        if identifier.len() != self.identifier_size as usize {
            return Err(ShaderTableError::IdentifierSize {
                size: identifier.len(),
                expected: self.identifier_size,
            });
        }
        if payload.len() > self.max_payload as usize {
            return Err(ShaderTableError::PayloadTooLarge {
                label: self.label.clone(),
                size: payload.len(),
                max: self.max_payload,
            });
        }
        self.records.push(ShaderRecord {
            identifier,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    /// Identifier size plus the largest payload among the current records.
    pub fn stride(&self) -> u64 {
        let payload = self.records.iter().map(|r| r.payload.len()).max().unwrap_or(0);
        u64::from(self.identifier_size) + payload as u64
    }

    /// Serialized records, each padded to the stride.
    pub fn to_bytes(&self) -> Vec<u8> {
        let stride = self.stride() as usize;
        let mut bytes = vec![0u8; stride * self.records.len()];
        for (record, chunk) in self.records.iter().zip(bytes.chunks_exact_mut(stride)) {
            let (identifier, payload) = chunk.split_at_mut(record.identifier.len());
            identifier.copy_from_slice(&record.identifier);
            payload[..record.payload.len()].copy_from_slice(&record.payload);
        }
        bytes
    }

    /// Replace every record and upload them. On failure the previous records
    /// are kept, matching the bytes still in the buffer.
    pub fn rewrite(&mut self, device: &dyn Device, records: Vec<ShaderRecord>) -> Result<(), RenderError> {
        let previous = std::mem::take(&mut self.records);
        let result = records
            .into_iter()
            .try_for_each(|record| self.add_record(record.identifier, &record.payload))
            .map_err(RenderError::from)
            .and_then(|()| self.upload(device));
        if result.is_err() {
            self.records = previous;
        }
        result
    }

    /// Write the records into the table buffer.
    pub fn upload(&self, device: &dyn Device) -> Result<(), RenderError> {
        device.write_buffer(self.buffer, 0, &self.to_bytes())?;
        Ok(())
    }

    pub fn range(&self) -> TableRange {
        let stride = self.stride();
        TableRange {
            buffer: self.buffer,
            size: stride * self.records.len() as u64,
            stride,
        }
    }
}

/// Ray generation and hit group tables per frame slot plus the shared miss
/// table.
#[derive(Debug)]
pub struct ShaderTables {
    ray_gen_identifier: Vec<u8>,
    hit_group_identifier: Vec<u8>,
    ray_gen: Vec<ShaderTable>,
    hit_group: Vec<ShaderTable>,
    miss: ShaderTable,
}

impl ShaderTables {
    /// Create and populate every table. Per-slot tables start with default
    /// constants until the first [`rebuild_for_frame`](Self::rebuild_for_frame).
    pub fn create(
        device: &dyn Device,
        pipeline: PipelineId,
        frame_count: usize,
    ) -> Result<Self, RenderError> {
        let identifier = |export: &str| {
            device
                .shader_identifier(pipeline, export)
                .creating(format!("shader identifier of '{export}'"))
        };
        let payload_size = std::mem::size_of::<RayGenConstants>() as u32;

        let mut miss = ShaderTable::create(device, "miss shader table", 2, 0)?;
        miss.add_record(identifier(MISS_RADIANCE_EXPORT)?, &[])?;
        miss.add_record(identifier(MISS_SHADOW_EXPORT)?, &[])?;
        miss.upload(device)?;

        let mut tables = Self {
            ray_gen_identifier: identifier(RAY_GEN_EXPORT)?,
            hit_group_identifier: identifier(HIT_GROUP_RADIANCE)?,
            ray_gen: Vec::with_capacity(frame_count),
            hit_group: Vec::with_capacity(frame_count),
            miss,
        };
        for slot in 0..frame_count {
            tables.ray_gen.push(ShaderTable::create(
                device,
                format!("ray generation shader table {slot}"),
                1,
                payload_size,
            )?);
            tables.hit_group.push(ShaderTable::create(
                device,
                format!("hit group shader table {slot}"),
                1,
                payload_size,
            )?);
            tables.rebuild_for_frame(device, slot, &RayGenConstants::default())?;
        }
        debug!("Created shader tables for {} frame slots", frame_count);
        Ok(tables)
    }

    /// Repopulate the slot's ray generation and hit group tables.
    ///
    /// The radiance hit group record carries the same payload as the ray
    /// generation record.
    pub fn rebuild_for_frame(
        &mut self,
        device: &dyn Device,
        slot: usize,
        constants: &RayGenConstants,
    ) -> Result<(), RenderError> {
        let count = self.ray_gen.len();
        let payload = bytemuck::bytes_of(constants);
        let (ray_gen, hit_group) = match (self.ray_gen.get_mut(slot), self.hit_group.get_mut(slot)) {
            (Some(r), Some(h)) => (r, h),
            _ => return Err(RenderError::InvalidFrameSlot { slot, count }),
        };

        let record = |identifier: &[u8]| ShaderRecord {
            identifier: identifier.to_vec(),
            payload: payload.to_vec(),
        };
        ray_gen.rewrite(device, vec![record(&self.ray_gen_identifier)])?;
        hit_group.rewrite(device, vec![record(&self.hit_group_identifier)])
    }

    /// Table ranges for a dispatch in `slot`.
    pub fn dispatch_tables(&self, slot: usize) -> Result<DispatchTables, RenderError> {
        match (self.ray_gen.get(slot), self.hit_group.get(slot)) {
            (Some(ray_gen), Some(hit_group)) => Ok(DispatchTables {
                ray_gen: ray_gen.range(),
                hit_group: hit_group.range(),
                miss: self.miss.range(),
            }),
            _ => Err(RenderError::InvalidFrameSlot {
                slot,
                count: self.ray_gen.len(),
            }),
        }
    }

    pub fn ray_gen(&self, slot: usize) -> Option<&ShaderTable> {
        self.ray_gen.get(slot)
    }

    pub fn hit_group(&self, slot: usize) -> Option<&ShaderTable> {
        self.hit_group.get(slot)
    }

    pub fn miss(&self) -> &ShaderTable {
        &self.miss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::PipelineLayoutCache;
    use crate::gpu::HeadlessDevice;
    use crate::pipeline::PassPipelines;
    use glam::{Mat4, Vec3};
    use vulkano::format::Format;

    fn setup() -> (HeadlessDevice, PipelineId) {
        let device = HeadlessDevice::new();
        let mut cache = PipelineLayoutCache::new();
        let pipelines = PassPipelines::create(&device, &mut cache, Format::B8G8R8A8_UNORM).unwrap();
        (device, pipelines.ray_tracing)
    }

    #[test]
    fn test_stride_is_identifier_plus_largest_payload() {
        let device = HeadlessDevice::new();
        let mut table = ShaderTable::create(&device, "table", 3, 80).unwrap();
        assert_eq!(table.stride(), 32);
        table.add_record(vec![1; 32], &[]).unwrap();
        table.add_record(vec![2; 32], &[7; 80]).unwrap();
        assert_eq!(table.stride(), 112);

        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), 224);
        assert_eq!(&bytes[..32], &[1; 32]);
        assert!(bytes[32..112].iter().all(|&b| b == 0));
        assert_eq!(&bytes[144..224], &[7; 80]);
    }

    #[test]
    fn test_failed_rewrite_keeps_previous_records() {
        let device = HeadlessDevice::new();
        let mut table = ShaderTable::create(&device, "table", 1, 16).unwrap();
        let first = ShaderRecord {
            identifier: vec![1; 32],
            payload: vec![2; 16],
        };
        table.rewrite(&device, vec![first.clone()]).unwrap();

        let too_many = vec![first.clone(), first.clone()];
        assert!(matches!(
            table.rewrite(&device, too_many),
            Err(RenderError::ShaderTable(ShaderTableError::Full { .. }))
        ));
        assert_eq!(table.records(), &[first]);
        assert_eq!(device.buffer_contents(table.buffer()).unwrap()[..48], table.to_bytes()[..]);
    }

    #[test]
    fn test_capacity_and_payload_limits() {
        let device = HeadlessDevice::new();
        let mut table = ShaderTable::create(&device, "small", 1, 16).unwrap();
        assert!(matches!(
            table.add_record(vec![0; 32], &[0; 17]),
            Err(ShaderTableError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            table.add_record(vec![0; 8], &[]),
            Err(ShaderTableError::IdentifierSize { .. })
        ));
        table.add_record(vec![0; 32], &[0; 16]).unwrap();
        assert!(matches!(
            table.add_record(vec![0; 32], &[]),
            Err(ShaderTableError::Full { .. })
        ));

        table.rewrite(&device, Vec::new()).unwrap();
        assert!(table.is_empty());
        table.add_record(vec![0; 32], &[]).unwrap();
    }

    #[test]
    fn test_frame_tables_layout() {
        let (device, pipeline) = setup();
        let tables = ShaderTables::create(&device, pipeline, 3).unwrap();

        let dispatch = tables.dispatch_tables(1).unwrap();
        assert_eq!(dispatch.ray_gen.stride, 32 + 80);
        assert_eq!(dispatch.ray_gen.size, 112);
        assert_eq!(dispatch.hit_group.stride, 112);
        assert_eq!(dispatch.miss.stride, 32);
        assert_eq!(dispatch.miss.size, 64);
        assert_ne!(dispatch.ray_gen.buffer, tables.dispatch_tables(2).unwrap().ray_gen.buffer);
        assert!(matches!(
            tables.dispatch_tables(3),
            Err(RenderError::InvalidFrameSlot { slot: 3, count: 3 })
        ));
    }

    #[test]
    fn test_rebuild_writes_payload_into_slot_buffer() {
        let (device, pipeline) = setup();
        let mut tables = ShaderTables::create(&device, pipeline, 2).unwrap();
        let constants = RayGenConstants::new(Mat4::from_scale(Vec3::splat(2.0)), Vec3::new(0.0, 1.0, -5.0));
        tables.rebuild_for_frame(&device, 0, &constants).unwrap();

        let ray_gen = tables.ray_gen(0).unwrap();
        assert_eq!(ray_gen.len(), 1);
        let contents = device.buffer_contents(ray_gen.buffer()).unwrap();
        assert_eq!(&contents[32..112], bytemuck::bytes_of(&constants));

        let hit = tables.hit_group(0).unwrap();
        assert_eq!(hit.records()[0].payload, ray_gen.records()[0].payload);
        assert_ne!(hit.records()[0].identifier, ray_gen.records()[0].identifier);

        let untouched = device.buffer_contents(tables.ray_gen(1).unwrap().buffer()).unwrap();
        assert_eq!(&untouched[32..112], bytemuck::bytes_of(&RayGenConstants::default()));
    }
}
