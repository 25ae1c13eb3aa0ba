//! Declarative binding schemas, pipeline layouts and the descriptor table
//! cache.
//!
//! A [`BindingSchema`] names every slot of a pipeline layout symbolically.
//! Passes bind through a [`Binder`], which looks slots up by name and checks
//! that what is bound matches the schema. A mismatch is a bug in the pass, so
//! the binder panics instead of returning an error.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::debug;
use vulkano::shader::ShaderStages;

use crate::error::{GpuResultExt, RenderError};
use crate::gpu::{
    BindingKind, Command, CommandList, Descriptor, DescriptorClass, DescriptorTableDesc,
    DescriptorTableId, Device, LayoutEntry, PipelineLayoutDesc, PipelineLayoutId, ResourceId,
};

/// Symbolic name of a pipeline layout slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Tessellation factor for the depth-only hull shader
    TessFactor,
    /// Mesh index, factor and per-patch budget
    TessConstants,
    GraphicsConstants,
    EnvConstants,
    GlobalConstants,
    Materials,
    /// Ray generation payload delivered through the shader record
    RayGenConstants,
    OutputUav,
    OutputSrv,
    Environment,
    Sampler,
    TessDomainUavs,
    TessDomainSrvs,
    VertexColorUavs,
    VertexColorSrvs,
    IndexBuffers,
    VertexBuffers,
    Scene,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("layout '{layout}' declares {slot:?} twice")]
    DuplicateSlot { layout: String, slot: Slot },

    #[error("layout '{layout}' declares {slot:?} with a count of zero")]
    EmptySlot { layout: String, slot: Slot },

    #[error("layout '{layout}': {slot:?} overlaps registers of another slot")]
    RegisterOverlap { layout: String, slot: Slot },

    #[error("descriptor table '{0}' is empty")]
    EmptyTable(String),

    #[error("descriptor table '{0}' mixes descriptor classes")]
    MixedTable(String),
}

/// One declared slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDesc {
    pub slot: Slot,
    pub kind: BindingKind,
    pub count: u32,
    pub register: u32,
    pub space: u32,
    pub visibility: ShaderStages,
}

impl SlotDesc {
    /// Register class the slot draws from, constants and constant buffers
    /// sharing one.
    fn register_class(&self) -> u8 {
        match self.kind {
            BindingKind::Constants | BindingKind::ConstantBuffer => 0,
            BindingKind::AccelerationStructure | BindingKind::Table(DescriptorClass::Srv) => 1,
            BindingKind::Table(DescriptorClass::Uav) => 2,
            BindingKind::Table(DescriptorClass::Sampler) => 3,
        }
    }

    /// Registers the slot occupies. Constants take a single register.
    fn registers(&self) -> std::ops::Range<u32> {
        let width = match self.kind {
            BindingKind::Table(_) => self.count,
            _ => 1,
        };
        self.register..self.register + width
    }
}

/// Ordered slot list of one pipeline layout.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSchema {
    label: String,
    local: bool,
    slots: Vec<SlotDesc>,
}

impl BindingSchema {
    /// Layout bound on command lists.
    pub fn global(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            local: false,
            slots: Vec::new(),
        }
    }

    /// Layout whose arguments live in shader records.
    pub fn local(label: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::global(label)
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn slots(&self) -> &[SlotDesc] {
        &self.slots
    }

    pub fn constants(self, slot: Slot, count: u32, register: u32, visibility: ShaderStages) -> Self {
        self.entry(slot, BindingKind::Constants, count, register, 0, visibility)
    }

    pub fn constant_buffer(self, slot: Slot, register: u32, visibility: ShaderStages) -> Self {
        self.entry(slot, BindingKind::ConstantBuffer, 1, register, 0, visibility)
    }

    pub fn acceleration_structure(self, slot: Slot, register: u32, visibility: ShaderStages) -> Self {
        self.entry(slot, BindingKind::AccelerationStructure, 1, register, 0, visibility)
    }

    pub fn table(
        self,
        slot: Slot,
        class: DescriptorClass,
        count: u32,
        register: u32,
        space: u32,
        visibility: ShaderStages,
    ) -> Self {
        self.entry(slot, BindingKind::Table(class), count, register, space, visibility)
    }

    fn entry(
        mut self,
        slot: Slot,
        kind: BindingKind,
        count: u32,
        register: u32,
        space: u32,
        visibility: ShaderStages,
    ) -> Self {
        self.slots.push(SlotDesc {
            slot,
            kind,
            count,
            register,
            space,
            visibility,
        });
        self
    }

    /// Check the schema once, before any layout is created from it.
    pub fn validate(&self) -> Result<(), BindingError> {
        for (i, desc) in self.slots.iter().enumerate() {
            if desc.count == 0 {
                return Err(BindingError::EmptySlot {
                    layout: self.label.clone(),
                    slot: desc.slot,
                });
            }
            for other in &self.slots[..i] {
                if other.slot == desc.slot {
                    return Err(BindingError::DuplicateSlot {
                        layout: self.label.clone(),
                        slot: desc.slot,
                    });
                }
                let (a, b) = (desc.registers(), other.registers());
                if other.register_class() == desc.register_class()
                    && other.space == desc.space
                    && a.start < b.end
                    && b.start < a.end
                {
                    return Err(BindingError::RegisterOverlap {
                        layout: self.label.clone(),
                        slot: desc.slot,
                    });
                }
            }
        }
        Ok(())
    }

    fn index_of(&self, slot: Slot) -> Option<(u32, &SlotDesc)> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, d)| d.slot == slot)
            .map(|(i, d)| (i as u32, d))
    }

    fn to_desc(&self) -> PipelineLayoutDesc {
        PipelineLayoutDesc {
            label: self.label.clone(),
            entries: self
                .slots
                .iter()
                .map(|d| LayoutEntry {
                    kind: d.kind,
                    count: d.count,
                    register: d.register,
                    space: d.space,
                    visibility: d.visibility,
                })
                .collect(),
            local: self.local,
        }
    }
}

/// A created pipeline layout and the schema it was created from.
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    id: PipelineLayoutId,
    schema: Arc<BindingSchema>,
}

impl PipelineLayout {
    pub fn id(&self) -> PipelineLayoutId {
        self.id
    }

    pub fn schema(&self) -> &BindingSchema {
        &self.schema
    }

    /// Make this the current layout of `cmd` and return a binder for its slots.
    pub fn bind<'a>(&'a self, cmd: &'a mut CommandList) -> Binder<'a> {
        assert!(!self.schema.local, "local layout '{}' cannot be bound", self.schema.label);
        cmd.push(Command::SetPipelineLayout(self.id));
        Binder { layout: self, cmd }
    }
}

/// Creates each distinct layout once.
#[derive(Debug, Default)]
pub struct PipelineLayoutCache {
    layouts: Vec<PipelineLayout>,
}

impl PipelineLayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        device: &dyn Device,
        schema: BindingSchema,
    ) -> Result<PipelineLayout, RenderError> {
        if let Some(existing) = self.layouts.iter().find(|l| *l.schema == schema) {
            return Ok(existing.clone());
        }
        schema.validate()?;
        let id = device
            .create_pipeline_layout(&schema.to_desc())
            .creating(format!("pipeline layout '{}'", schema.label))?;
        debug!("Created pipeline layout '{}' with {} slots", schema.label, schema.slots.len());

        let layout = PipelineLayout {
            id,
            schema: Arc::new(schema),
        };
        self.layouts.push(layout.clone());
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Records bindings against the slots of one layout.
///
/// Dereferences to the underlying command list so draws and dispatches can be
/// recorded without releasing the binder.
pub struct Binder<'a> {
    layout: &'a PipelineLayout,
    cmd: &'a mut CommandList,
}

impl Binder<'_> {
    fn lookup(&self, slot: Slot, kind: BindingKind) -> (u32, SlotDesc) {
        let schema = &self.layout.schema;
        let (index, desc) = schema
            .index_of(slot)
            .unwrap_or_else(|| panic!("layout '{}' has no slot {:?}", schema.label, slot));
        assert_eq!(
            desc.kind, kind,
            "slot {:?} of '{}' is {:?}",
            slot, schema.label, desc.kind
        );
        (index, *desc)
    }

    pub fn constants(&mut self, slot: Slot, values: &[u32]) -> &mut Self {
        let (index, desc) = self.lookup(slot, BindingKind::Constants);
        assert_eq!(
            desc.count as usize,
            values.len(),
            "slot {:?} takes {} constants",
            slot,
            desc.count
        );
        self.cmd.push(Command::SetConstants {
            index,
            values: values.to_vec(),
        });
        self
    }

    pub fn constant_buffer(&mut self, slot: Slot, buffer: ResourceId) -> &mut Self {
        let (index, _) = self.lookup(slot, BindingKind::ConstantBuffer);
        self.cmd.push(Command::SetConstantBuffer {
            index,
            buffer,
            offset: 0,
        });
        self
    }

    pub fn acceleration_structure(&mut self, slot: Slot, structure: ResourceId) -> &mut Self {
        let (index, _) = self.lookup(slot, BindingKind::AccelerationStructure);
        self.cmd.push(Command::SetAccelerationStructure { index, structure });
        self
    }

    pub fn table(&mut self, slot: Slot, table: &BindingTable) -> &mut Self {
        let (index, desc) = self.lookup(slot, BindingKind::Table(table.class));
        assert_eq!(
            desc.count, table.count,
            "slot {:?} holds {} descriptors, table has {}",
            slot, desc.count, table.count
        );
        self.cmd.push(Command::SetTable {
            index,
            table: table.id,
        });
        self
    }
}

impl Deref for Binder<'_> {
    type Target = CommandList;

    fn deref(&self) -> &CommandList {
        self.cmd
    }
}

impl DerefMut for Binder<'_> {
    fn deref_mut(&mut self) -> &mut CommandList {
        self.cmd
    }
}

/// A created descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTable {
    id: DescriptorTableId,
    class: DescriptorClass,
    count: u32,
}

impl BindingTable {
    pub fn id(&self) -> DescriptorTableId {
        self.id
    }

    pub fn class(&self) -> DescriptorClass {
        self.class
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Descriptor tables keyed by their contents; identical views share a table.
#[derive(Debug, Default)]
pub struct BindingTableCache {
    tables: HashMap<Vec<Descriptor>, BindingTable>,
}

impl BindingTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        device: &dyn Device,
        label: &str,
        descriptors: Vec<Descriptor>,
    ) -> Result<BindingTable, RenderError> {
        if let Some(table) = self.tables.get(&descriptors) {
            return Ok(*table);
        }
        let class = descriptors
            .first()
            .map(Descriptor::class)
            .ok_or_else(|| BindingError::EmptyTable(label.to_string()))?;
        if descriptors.iter().any(|d| d.class() != class) {
            return Err(BindingError::MixedTable(label.to_string()).into());
        }

        let id = device
            .create_descriptor_table(&DescriptorTableDesc {
                label: label.to_string(),
                descriptors: descriptors.clone(),
            })
            .creating(format!("descriptor table '{label}'"))?;
        let table = BindingTable {
            id,
            class,
            count: descriptors.len() as u32,
        };
        self.tables.insert(descriptors, table);
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{
        BufferDesc, HeadlessDevice, MemoryLocation, Queue, QueueKind, SamplerPreset,
    };
    use vulkano::buffer::BufferUsage;

    fn schema() -> BindingSchema {
        BindingSchema::global("test")
            .constants(Slot::TessConstants, 3, 0, ShaderStages::all_graphics())
            .table(Slot::Sampler, DescriptorClass::Sampler, 1, 0, 0, ShaderStages::FRAGMENT)
    }

    #[test]
    fn test_schema_rejects_duplicates_zero_counts_and_overlaps() {
        let duplicate = schema().constants(Slot::TessConstants, 1, 1, ShaderStages::VERTEX);
        assert!(matches!(duplicate.validate(), Err(BindingError::DuplicateSlot { .. })));

        let empty = schema().table(Slot::OutputUav, DescriptorClass::Uav, 0, 0, 0, ShaderStages::FRAGMENT);
        assert!(matches!(empty.validate(), Err(BindingError::EmptySlot { .. })));

        let overlap = BindingSchema::global("overlap")
            .table(Slot::IndexBuffers, DescriptorClass::Srv, 2, 0, 0, ShaderStages::RAYGEN)
            .acceleration_structure(Slot::Scene, 1, ShaderStages::RAYGEN);
        assert!(matches!(overlap.validate(), Err(BindingError::RegisterOverlap { .. })));

        let spaced = BindingSchema::global("spaced")
            .table(Slot::IndexBuffers, DescriptorClass::Srv, 2, 0, 1, ShaderStages::RAYGEN)
            .table(Slot::VertexBuffers, DescriptorClass::Srv, 2, 0, 2, ShaderStages::RAYGEN)
            .acceleration_structure(Slot::Scene, 0, ShaderStages::RAYGEN);
        assert_eq!(spaced.validate(), Ok(()));
    }

    #[test]
    fn test_layout_cache_creates_each_schema_once() {
        let device = HeadlessDevice::new();
        let mut cache = PipelineLayoutCache::new();
        let a = cache.get_or_create(&device, schema()).unwrap();
        let b = cache.get_or_create(&device, schema()).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_table_cache_deduplicates_by_contents() {
        let device = HeadlessDevice::new();
        let mut cache = BindingTableCache::new();
        let sampler = vec![Descriptor::Sampler(SamplerPreset::AnisotropicWrap)];
        let a = cache.get_or_create(&device, "sampler", sampler.clone()).unwrap();
        let b = cache.get_or_create(&device, "sampler again", sampler).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.class(), DescriptorClass::Sampler);
        assert_eq!(cache.len(), 1);

        assert!(matches!(
            cache.get_or_create(&device, "empty", Vec::new()),
            Err(RenderError::Binding(BindingError::EmptyTable(_)))
        ));
    }

    #[test]
    fn test_binder_records_schema_indices() {
        let device = HeadlessDevice::new();
        let mut layouts = PipelineLayoutCache::new();
        let mut tables = BindingTableCache::new();
        let layout = layouts.get_or_create(&device, schema()).unwrap();
        let sampler = tables
            .get_or_create(&device, "sampler", vec![Descriptor::Sampler(SamplerPreset::AnisotropicWrap)])
            .unwrap();

        let mut cmd = CommandList::new("bind");
        layout
            .bind(&mut cmd)
            .table(Slot::Sampler, &sampler)
            .constants(Slot::TessConstants, &[0, 2, 7]);

        assert_eq!(cmd.commands()[0], Command::SetPipelineLayout(layout.id()));
        assert_eq!(
            cmd.commands()[1],
            Command::SetTable {
                index: 1,
                table: sampler.id()
            }
        );
        assert!(matches!(cmd.commands()[2], Command::SetConstants { index: 0, .. }));
        device.queue(QueueKind::Graphics).submit(cmd).unwrap();
    }

    #[test]
    #[should_panic(expected = "takes 3 constants")]
    fn test_binder_panics_on_count_mismatch() {
        let device = HeadlessDevice::new();
        let layout = PipelineLayoutCache::new().get_or_create(&device, schema()).unwrap();
        let mut cmd = CommandList::new("bind");
        layout.bind(&mut cmd).constants(Slot::TessConstants, &[1]);
    }

    #[test]
    #[should_panic(expected = "has no slot")]
    fn test_binder_panics_on_unknown_slot() {
        let device = HeadlessDevice::new();
        let layout = PipelineLayoutCache::new().get_or_create(&device, schema()).unwrap();
        let buffer = device
            .create_buffer(&BufferDesc {
                label: "cb".into(),
                size: 256,
                usage: BufferUsage::UNIFORM_BUFFER,
                location: MemoryLocation::Upload,
            })
            .unwrap();
        let mut cmd = CommandList::new("bind");
        layout.bind(&mut cmd).constant_buffer(Slot::GraphicsConstants, buffer);
    }
}
