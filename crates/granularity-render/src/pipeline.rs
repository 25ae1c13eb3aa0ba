//! Shaders, pipeline layouts and pipelines of the six passes.

use tracing::info;
use vulkano::format::Format;
use vulkano::shader::ShaderStages;

use crate::binding::{BindingSchema, PipelineLayout, PipelineLayoutCache, Slot};
use crate::constants::{CbTessellation, RayGenConstants};
use crate::error::{GpuResultExt, RenderError};
use crate::gpu::{
    DepthMode, DescriptorClass, Device, GraphicsPipelineDesc, HitGroupDesc,
    LocalLayoutAssociation, PipelineId, RayTracingPipelineDesc, ShaderDesc, ShaderId, Topology,
};
use crate::vertex::Vertex;

pub const DEPTH_FORMAT: Format = Format::D24_UNORM_S8_UINT;
pub const OUTPUT_FORMAT: Format = Format::B10G11R11_UFLOAT_PACK32;

pub const RAY_GEN_EXPORT: &str = "raygen_main";
pub const CLOSEST_HIT_RADIANCE_EXPORT: &str = "closest_hit_radiance";
pub const CLOSEST_HIT_SHADOW_EXPORT: &str = "closest_hit_shadow";
pub const MISS_RADIANCE_EXPORT: &str = "miss_radiance";
pub const MISS_SHADOW_EXPORT: &str = "miss_shadow";
pub const HIT_GROUP_RADIANCE: &str = "hit_group_radiance";
pub const HIT_GROUP_SHADOW: &str = "hit_group_shadow";

/// Radiance payload: rgb + hit distance
pub const MAX_PAYLOAD_SIZE: u32 = 16;
/// Barycentrics
pub const MAX_ATTRIBUTE_SIZE: u32 = 8;
/// Primary rays plus one bounce of shadow rays
pub const MAX_RECURSION_DEPTH: u32 = 2;

const RAY_STAGES: ShaderStages = ShaderStages::RAYGEN
    .union(ShaderStages::CLOSEST_HIT)
    .union(ShaderStages::MISS);
const TESS_STAGES: ShaderStages =
    ShaderStages::TESSELLATION_CONTROL.union(ShaderStages::TESSELLATION_EVALUATION);

/// Compiled shader files, by role.
pub mod shaders {
    pub const PASSTHROUGH_VERT: &str = "passthrough.vert.spv";
    pub const DEPTH_TESC: &str = "depth.tesc.spv";
    pub const DEPTH_TESE: &str = "depth.tese.spv";
    pub const FULLSCREEN_VERT: &str = "fullscreen.vert.spv";
    pub const ENVIRONMENT_FRAG: &str = "environment.frag.spv";
    pub const TESSELLATE_TESC: &str = "tessellate.tesc.spv";
    pub const TESSELLATE_TESE: &str = "tessellate.tese.spv";
    pub const RAY_TRACING_LIBRARY: &str = "hybrid.rlib.spv";
    pub const SHADE_TESE: &str = "shade.tese.spv";
    pub const SHADE_FRAG: &str = "shade.frag.spv";
    pub const TONE_MAP_FRAG: &str = "tone_map.frag.spv";
}

/// Pipeline layouts, one per pass plus the two local ray tracing layouts.
#[derive(Debug, Clone)]
pub struct PassLayouts {
    pub depth_prepass: PipelineLayout,
    pub environment: PipelineLayout,
    pub tessellation: PipelineLayout,
    pub ray_tracing: PipelineLayout,
    pub ray_gen_local: PipelineLayout,
    pub hit_local: PipelineLayout,
    pub rasterize: PipelineLayout,
    pub tone_map: PipelineLayout,
}

impl PassLayouts {
    pub fn create(device: &dyn Device, cache: &mut PipelineLayoutCache) -> Result<Self, RenderError> {
        let tess_words = CbTessellation::WORDS;
        let ray_gen_words = (std::mem::size_of::<RayGenConstants>() / 4) as u32;

        Ok(Self {
            depth_prepass: cache.get_or_create(
                device,
                BindingSchema::global("depth prepass")
                    .constants(Slot::TessFactor, 1, 0, ShaderStages::TESSELLATION_CONTROL)
                    .constant_buffer(Slot::GraphicsConstants, 1, ShaderStages::TESSELLATION_EVALUATION),
            )?,
            environment: cache.get_or_create(
                device,
                BindingSchema::global("environment prepass")
                    .constant_buffer(Slot::EnvConstants, 0, ShaderStages::FRAGMENT)
                    .table(Slot::OutputUav, DescriptorClass::Uav, 1, 0, 0, ShaderStages::FRAGMENT)
                    .table(Slot::Environment, DescriptorClass::Srv, 1, 0, 0, ShaderStages::FRAGMENT)
                    .table(Slot::Sampler, DescriptorClass::Sampler, 1, 0, 0, ShaderStages::FRAGMENT),
            )?,
            tessellation: cache.get_or_create(
                device,
                BindingSchema::global("tessellation")
                    .constants(Slot::TessConstants, tess_words, 0, TESS_STAGES)
                    .table(
                        Slot::TessDomainUavs,
                        DescriptorClass::Uav,
                        2,
                        0,
                        0,
                        ShaderStages::TESSELLATION_EVALUATION,
                    ),
            )?,
            ray_tracing: cache.get_or_create(
                device,
                BindingSchema::global("ray tracing")
                    .table(Slot::VertexColorUavs, DescriptorClass::Uav, 2, 0, 0, RAY_STAGES)
                    .acceleration_structure(Slot::Scene, 0, RAY_STAGES)
                    .table(Slot::Sampler, DescriptorClass::Sampler, 1, 0, 0, RAY_STAGES)
                    .table(Slot::IndexBuffers, DescriptorClass::Srv, 2, 0, 1, RAY_STAGES)
                    .table(Slot::VertexBuffers, DescriptorClass::Srv, 2, 0, 2, RAY_STAGES)
                    .constant_buffer(Slot::Materials, 0, RAY_STAGES)
                    .constant_buffer(Slot::GlobalConstants, 1, RAY_STAGES)
                    .constants(Slot::TessConstants, tess_words, 3, RAY_STAGES)
                    .table(Slot::TessDomainSrvs, DescriptorClass::Srv, 2, 2, 0, RAY_STAGES)
                    .table(Slot::Environment, DescriptorClass::Srv, 1, 1, 0, RAY_STAGES),
            )?,
            ray_gen_local: cache.get_or_create(
                device,
                BindingSchema::local("ray generation record")
                    .constants(Slot::RayGenConstants, ray_gen_words, 2, ShaderStages::RAYGEN),
            )?,
            hit_local: cache.get_or_create(
                device,
                BindingSchema::local("radiance hit record")
                    .constants(Slot::RayGenConstants, ray_gen_words, 2, ShaderStages::CLOSEST_HIT),
            )?,
            rasterize: cache.get_or_create(
                device,
                BindingSchema::global("rasterize")
                    .constants(Slot::TessConstants, tess_words, 0, TESS_STAGES)
                    .constant_buffer(Slot::GraphicsConstants, 1, ShaderStages::TESSELLATION_EVALUATION)
                    .table(
                        Slot::VertexColorSrvs,
                        DescriptorClass::Srv,
                        2,
                        0,
                        0,
                        ShaderStages::TESSELLATION_EVALUATION,
                    )
                    .table(Slot::OutputUav, DescriptorClass::Uav, 1, 0, 0, ShaderStages::FRAGMENT),
            )?,
            tone_map: cache.get_or_create(
                device,
                BindingSchema::global("tone map")
                    .table(Slot::OutputSrv, DescriptorClass::Srv, 1, 0, 0, ShaderStages::FRAGMENT),
            )?,
        })
    }
}

/// Every pipeline the frame uses.
#[derive(Debug, Clone)]
pub struct PassPipelines {
    pub layouts: PassLayouts,
    pub depth_prepass: PipelineId,
    pub environment: PipelineId,
    pub tessellation: PipelineId,
    pub ray_tracing: PipelineId,
    pub rasterize: PipelineId,
    pub tone_map: PipelineId,
}

impl PassPipelines {
    /// Load every shader and create the pipelines. `target_format` is the
    /// format of the presentable image the tone map pass writes.
    pub fn create(
        device: &dyn Device,
        cache: &mut PipelineLayoutCache,
        target_format: Format,
    ) -> Result<Self, RenderError> {
        let layouts = PassLayouts::create(device, cache)?;
        let load = |name: &str, stage: ShaderStages| -> Result<ShaderId, RenderError> {
            device
                .load_shader(&ShaderDesc {
                    name: name.to_string(),
                    stage,
                })
                .creating(format!("shader '{name}'"))
        };

        let passthrough = load(shaders::PASSTHROUGH_VERT, ShaderStages::VERTEX)?;
        let depth_tesc = load(shaders::DEPTH_TESC, ShaderStages::TESSELLATION_CONTROL)?;
        let depth_tese = load(shaders::DEPTH_TESE, ShaderStages::TESSELLATION_EVALUATION)?;
        let fullscreen = load(shaders::FULLSCREEN_VERT, ShaderStages::VERTEX)?;
        let environment_frag = load(shaders::ENVIRONMENT_FRAG, ShaderStages::FRAGMENT)?;
        let tessellate_tesc = load(shaders::TESSELLATE_TESC, ShaderStages::TESSELLATION_CONTROL)?;
        let tessellate_tese = load(shaders::TESSELLATE_TESE, ShaderStages::TESSELLATION_EVALUATION)?;
        let library = load(shaders::RAY_TRACING_LIBRARY, RAY_STAGES)?;
        let shade_tese = load(shaders::SHADE_TESE, ShaderStages::TESSELLATION_EVALUATION)?;
        let shade_frag = load(shaders::SHADE_FRAG, ShaderStages::FRAGMENT)?;
        let tone_map_frag = load(shaders::TONE_MAP_FRAG, ShaderStages::FRAGMENT)?;

        let graphics = |desc: GraphicsPipelineDesc| -> Result<PipelineId, RenderError> {
            device
                .create_graphics_pipeline(&desc)
                .creating(format!("pipeline '{}'", desc.label))
        };

        let depth_prepass = graphics(GraphicsPipelineDesc {
            label: "depth prepass".into(),
            layout: layouts.depth_prepass.id(),
            shaders: vec![passthrough, depth_tesc, depth_tese],
            vertex_input: Some(Vertex::per_vertex()),
            topology: Topology::PatchList3,
            depth: DepthMode::Write,
            depth_format: Some(DEPTH_FORMAT),
            color_formats: Vec::new(),
        })?;
        let environment = graphics(GraphicsPipelineDesc {
            label: "environment prepass".into(),
            layout: layouts.environment.id(),
            shaders: vec![fullscreen, environment_frag],
            vertex_input: None,
            topology: Topology::TriangleList,
            depth: DepthMode::Disabled,
            depth_format: None,
            color_formats: Vec::new(),
        })?;
        let tessellation = graphics(GraphicsPipelineDesc {
            label: "tessellation".into(),
            layout: layouts.tessellation.id(),
            shaders: vec![passthrough, tessellate_tesc, tessellate_tese],
            vertex_input: Some(Vertex::per_vertex()),
            topology: Topology::PatchList3,
            depth: DepthMode::Disabled,
            depth_format: None,
            color_formats: Vec::new(),
        })?;
        // Shading writes the output image through a storage view, so the
        // pass has no color attachment.
        let rasterize = graphics(GraphicsPipelineDesc {
            label: "rasterize".into(),
            layout: layouts.rasterize.id(),
            shaders: vec![passthrough, tessellate_tesc, shade_tese, shade_frag],
            vertex_input: Some(Vertex::per_vertex()),
            topology: Topology::PatchList3,
            depth: DepthMode::ReadEqual,
            depth_format: Some(DEPTH_FORMAT),
            color_formats: Vec::new(),
        })?;
        let tone_map = graphics(GraphicsPipelineDesc {
            label: "tone map".into(),
            layout: layouts.tone_map.id(),
            shaders: vec![fullscreen, tone_map_frag],
            vertex_input: None,
            topology: Topology::TriangleList,
            depth: DepthMode::Disabled,
            depth_format: None,
            color_formats: vec![target_format],
        })?;

        let ray_tracing = device
            .create_ray_tracing_pipeline(&RayTracingPipelineDesc {
                label: "ray tracing".into(),
                library,
                exports: [
                    RAY_GEN_EXPORT,
                    CLOSEST_HIT_RADIANCE_EXPORT,
                    CLOSEST_HIT_SHADOW_EXPORT,
                    MISS_RADIANCE_EXPORT,
                    MISS_SHADOW_EXPORT,
                ]
                .map(String::from)
                .to_vec(),
                hit_groups: vec![
                    HitGroupDesc {
                        name: HIT_GROUP_RADIANCE.into(),
                        closest_hit: CLOSEST_HIT_RADIANCE_EXPORT.into(),
                    },
                    HitGroupDesc {
                        name: HIT_GROUP_SHADOW.into(),
                        closest_hit: CLOSEST_HIT_SHADOW_EXPORT.into(),
                    },
                ],
                max_payload_size: MAX_PAYLOAD_SIZE,
                max_attribute_size: MAX_ATTRIBUTE_SIZE,
                max_recursion_depth: MAX_RECURSION_DEPTH,
                global_layout: layouts.ray_tracing.id(),
                local_layouts: vec![
                    LocalLayoutAssociation {
                        layout: layouts.ray_gen_local.id(),
                        exports: vec![RAY_GEN_EXPORT.into()],
                    },
                    LocalLayoutAssociation {
                        layout: layouts.hit_local.id(),
                        exports: vec![HIT_GROUP_RADIANCE.into()],
                    },
                ],
            })
            .creating("ray tracing pipeline")?;

        info!("Created 6 pipelines for target format {:?}", target_format);
        Ok(Self {
            layouts,
            depth_prepass,
            environment,
            tessellation,
            ray_tracing,
            rasterize,
            tone_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn test_all_layout_schemas_validate() {
        let device = HeadlessDevice::new();
        let mut cache = PipelineLayoutCache::new();
        let layouts = PassLayouts::create(&device, &mut cache).unwrap();
        assert_eq!(cache.len(), 8);
        assert!(layouts.ray_gen_local.schema().is_local());
        assert_eq!(layouts.ray_tracing.schema().slots().len(), 10);
    }

    #[test]
    fn test_pipelines_are_created() {
        let device = HeadlessDevice::new();
        let mut cache = PipelineLayoutCache::new();
        let pipelines = PassPipelines::create(&device, &mut cache, Format::B8G8R8A8_UNORM).unwrap();
        assert_ne!(pipelines.depth_prepass, pipelines.rasterize);
        assert_eq!(device.shader_identifier_size(), 32);
        assert!(device.shader_identifier(pipelines.ray_tracing, HIT_GROUP_SHADOW).is_ok());
    }

    #[test]
    fn test_missing_shader_is_a_load_failure() {
        let device = HeadlessDevice::new().with_missing_shader(shaders::SHADE_FRAG);
        let mut cache = PipelineLayoutCache::new();
        let err = PassPipelines::create(&device, &mut cache, Format::B8G8R8A8_UNORM).unwrap_err();
        assert!(matches!(err, RenderError::ShaderOrAssetLoad { ref what, .. } if what == shaders::SHADE_FRAG));
    }
}
