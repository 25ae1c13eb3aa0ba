//! Granularity Render - hybrid tessellation and ray tracing frame renderer
//!
//! A frame runs six passes: depth prepass, environment prepass,
//! tessellation, ray trace, rasterize and tone map. The renderer records
//! against the [`gpu`] abstraction; [`gpu::HeadlessDevice`] validates the
//! recorded work without a GPU.

pub mod accel;
pub mod binding;
pub mod constants;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod gpu;
pub mod import;
pub mod mesh;
pub mod pipeline;
pub mod renderer;
pub mod shader_table;
pub mod tessellation;
pub mod vertex;

pub use accel::{InstanceDesc, SpatialIndexManager};
pub use binding::{
    Binder, BindingError, BindingSchema, BindingTable, BindingTableCache, PipelineLayout,
    PipelineLayoutCache, Slot,
};
pub use constants::{CbEnv, CbGlobal, CbGraphics, CbMaterial, CbTessellation, Material, RayGenConstants};
pub use error::RenderError;
pub use frame::{FrameSlot, FrameSync, FRAME_COUNT};
pub use geometry::{MeshBuffers, SceneGeometryStore};
pub use import::{EnvironmentMap, ImportError, SceneImporter};
pub use mesh::{MeshData, GROUND_GRID};
pub use pipeline::{PassLayouts, PassPipelines};
pub use renderer::{HybridRenderer, InitDesc, PASS_NAMES};
pub use shader_table::{ShaderRecord, ShaderTable, ShaderTableError, ShaderTables};
pub use tessellation::TessellationBudget;
pub use vertex::Vertex;
