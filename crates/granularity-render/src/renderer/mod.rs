//! Hybrid frame renderer
//!
//! [`HybridRenderer`] owns every GPU object of the frame: scene geometry,
//! acceleration structures, pipelines, descriptor tables, shader tables and
//! the constant buffers of each frame slot. A renderer value only exists once
//! initialization succeeded completely; dropping it releases the session.

mod passes;

pub use passes::PASS_NAMES;

use std::path::PathBuf;
use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use granularity_core::{clamp_tess_factor, HaltonSequence, MeshRole, PerMesh, Transform};
use tracing::{debug, info};
use vulkano::buffer::BufferUsage;
use vulkano::format::Format;
use vulkano::image::ImageUsage;

use crate::accel::SpatialIndexManager;
use crate::binding::{BindingTable, BindingTableCache, PipelineLayoutCache};
use crate::constants::{CbEnv, CbGlobal, CbGraphics, CbMaterial, Material, RayGenConstants};
use crate::error::{GpuResultExt, RenderError};
use crate::frame::{FrameSlot, FRAME_COUNT};
use crate::geometry::SceneGeometryStore;
use crate::gpu::{
    BufferDesc, CommandList, Descriptor, Device, GeometryView, MemoryLocation, ResourceId,
    ResourceState, SamplerPreset, StateTracker, TextureDesc,
};
use crate::import::SceneImporter;
use crate::mesh::{MeshData, GROUND_GRID};
use crate::pipeline::{PassPipelines, DEPTH_FORMAT, OUTPUT_FORMAT};
use crate::shader_table::ShaderTables;
use crate::tessellation::TessellationBudget;

/// Model rotation speed about the Y axis (degrees per second)
const ROTATION_SPEED: f32 = 16.0;
const DEFAULT_TESS_FACTOR: u32 = 2;

/// Everything initialization needs from the caller.
#[derive(Debug, Clone)]
pub struct InitDesc {
    pub width: u32,
    pub height: u32,
    pub mesh_path: PathBuf,
    pub environment_path: PathBuf,
    /// Format of the presentable image the tone map pass writes
    pub output_format: Format,
    /// Model position (xyz) and uniform scale (w)
    pub pos_scale: Vec4,
    pub materials: PerMesh<Material>,
    pub tess_factor: u32,
}

impl InitDesc {
    pub fn new(
        width: u32,
        height: u32,
        mesh_path: impl Into<PathBuf>,
        environment_path: impl Into<PathBuf>,
        output_format: Format,
    ) -> Self {
        Self {
            width,
            height,
            mesh_path: mesh_path.into(),
            environment_path: environment_path.into(),
            output_format,
            pos_scale: Vec4::new(0.0, 0.0, 0.0, 1.0),
            materials: Material::defaults(),
            tess_factor: DEFAULT_TESS_FACTOR,
        }
    }
}

/// Images and buffers shared by the passes.
#[derive(Debug, Clone, Copy)]
struct SceneTargets {
    output: ResourceId,
    depth: ResourceId,
    environment: ResourceId,
    tess_domains: PerMesh<ResourceId>,
    vertex_colors: PerMesh<ResourceId>,
    materials: ResourceId,
}

/// Descriptor tables the passes bind.
#[derive(Debug, Clone, Copy)]
struct SceneTables {
    output_uav: BindingTable,
    output_srv: BindingTable,
    environment: BindingTable,
    sampler: BindingTable,
    tess_domain_uavs: BindingTable,
    tess_domain_srvs: BindingTable,
    vertex_color_uavs: BindingTable,
    vertex_color_srvs: BindingTable,
    index_buffers: BindingTable,
    vertex_buffers: BindingTable,
}

impl SceneTables {
    fn create(
        device: &dyn Device,
        cache: &mut BindingTableCache,
        targets: &SceneTargets,
        geometry: &SceneGeometryStore,
    ) -> Result<Self, RenderError> {
        let per_mesh = |ids: PerMesh<ResourceId>, view: fn(ResourceId) -> Descriptor| {
            ids.to_array().into_iter().map(view).collect::<Vec<_>>()
        };
        let views = geometry.views();

        Ok(Self {
            output_uav: cache.get_or_create(device, "output UAV", vec![Descriptor::Uav(targets.output)])?,
            output_srv: cache.get_or_create(device, "output SRV", vec![Descriptor::Srv(targets.output)])?,
            environment: cache.get_or_create(
                device,
                "environment SRV",
                vec![Descriptor::Srv(targets.environment)],
            )?,
            sampler: cache.get_or_create(
                device,
                "anisotropic wrap sampler",
                vec![Descriptor::Sampler(SamplerPreset::AnisotropicWrap)],
            )?,
            tess_domain_uavs: cache.get_or_create(
                device,
                "tessellation domain UAVs",
                per_mesh(targets.tess_domains, Descriptor::Uav),
            )?,
            tess_domain_srvs: cache.get_or_create(
                device,
                "tessellation domain SRVs",
                per_mesh(targets.tess_domains, Descriptor::Srv),
            )?,
            vertex_color_uavs: cache.get_or_create(
                device,
                "vertex color UAVs",
                per_mesh(targets.vertex_colors, Descriptor::Uav),
            )?,
            vertex_color_srvs: cache.get_or_create(
                device,
                "vertex color SRVs",
                per_mesh(targets.vertex_colors, Descriptor::Srv),
            )?,
            index_buffers: cache.get_or_create(
                device,
                "index buffer SRVs",
                per_mesh(views.map(|_, v| v.index_buffer), Descriptor::Srv),
            )?,
            vertex_buffers: cache.get_or_create(
                device,
                "vertex buffer SRVs",
                per_mesh(views.map(|_, v| v.vertex_buffer), Descriptor::Srv),
            )?,
        })
    }
}

pub struct HybridRenderer {
    device: Arc<dyn Device>,
    width: u32,
    height: u32,
    states: StateTracker,
    geometry: SceneGeometryStore,
    targets: SceneTargets,
    tables: SceneTables,
    layout_cache: PipelineLayoutCache,
    table_cache: BindingTableCache,
    pipelines: PassPipelines,
    accel: SpatialIndexManager,
    shader_tables: ShaderTables,
    slots: Vec<FrameSlot>,
    halton: HaltonSequence,
    budget: TessellationBudget,
    model: Transform,
    worlds: PerMesh<Mat4>,
}

impl HybridRenderer {
    /// Create every GPU object of the session.
    ///
    /// Uploads, the environment texture copy and the acceleration structure
    /// builds are recorded into `cmd`, which the caller submits and waits for
    /// before the first frame. The first failing step aborts initialization.
    pub fn init(
        device: Arc<dyn Device>,
        cmd: &mut CommandList,
        desc: &InitDesc,
        importer: &dyn SceneImporter,
    ) -> Result<Self, RenderError> {
        let dev = &*device;
        let mut states = StateTracker::new();

        let model_mesh = importer.import_mesh(&desc.mesh_path).map_err(|e| {
            RenderError::ShaderOrAssetLoad {
                what: desc.mesh_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let ground_mesh = MeshData::ground_cube(GROUND_GRID);
        let geometry = SceneGeometryStore::upload(
            dev,
            cmd,
            &mut states,
            PerMesh::new(&ground_mesh, &model_mesh),
        )?;

        let output = create_texture(
            dev,
            &mut states,
            "output image",
            desc.width,
            desc.height,
            OUTPUT_FORMAT,
            ImageUsage::STORAGE | ImageUsage::SAMPLED,
        )?;

        let budget = TessellationBudget::new(desc.tess_factor, geometry.index_counts())?;
        let maximum = TessellationBudget::maximum(geometry.index_counts())?;
        let tess_domains = PerMesh::try_from_fn(|role| {
            create_storage_buffer(
                dev,
                &mut states,
                format!("{} tessellation domains", role.name()),
                u64::from(maximum.max_tess_vertices(role)) * std::mem::size_of::<[f32; 2]>() as u64,
            )
        })?;
        let vertex_colors = PerMesh::try_from_fn(|role| {
            create_storage_buffer(
                dev,
                &mut states,
                format!("{} vertex colors", role.name()),
                u64::from(maximum.max_tess_vertices(role)) * std::mem::size_of::<[f32; 3]>() as u64,
            )
        })?;

        let materials = dev
            .create_buffer(&BufferDesc {
                label: "material constants".into(),
                size: std::mem::size_of::<CbMaterial>() as u64,
                usage: BufferUsage::UNIFORM_BUFFER,
                location: MemoryLocation::Upload,
            })
            .creating("material constants")?;
        dev.write_buffer(materials, 0, bytemuck::bytes_of(&CbMaterial::new(&desc.materials)))?;
        let slots = (0..FRAME_COUNT)
            .map(|slot| FrameSlot::create(dev, slot))
            .collect::<Result<Vec<_>, _>>()?;

        let environment = load_environment(dev, cmd, &mut states, desc, importer)?;
        let depth = create_texture(
            dev,
            &mut states,
            "depth buffer",
            desc.width,
            desc.height,
            DEPTH_FORMAT,
            ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED,
        )?;

        let mut layout_cache = PipelineLayoutCache::new();
        let pipelines = PassPipelines::create(dev, &mut layout_cache, desc.output_format)?;

        let targets = SceneTargets {
            output,
            depth,
            environment,
            tess_domains,
            vertex_colors,
            materials,
        };
        let mut table_cache = BindingTableCache::new();
        let tables = SceneTables::create(dev, &mut table_cache, &targets, &geometry)?;

        let model = Transform {
            position: desc.pos_scale.truncate(),
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(desc.pos_scale.w),
        };
        let worlds = PerMesh::new(ground_world(), model.matrix());
        let mut accel = SpatialIndexManager::prebuild(dev, geometry.views(), FRAME_COUNT)?;
        accel.build(dev, cmd, FRAME_COUNT - 1, &worlds)?;

        let shader_tables = ShaderTables::create(dev, pipelines.ray_tracing, FRAME_COUNT)?;

        info!(
            "Renderer initialized: {}x{}, model {} triangles, tessellation factor {}",
            desc.width,
            desc.height,
            geometry.mesh(MeshRole::Model).triangle_count(),
            budget.factor()
        );
        Ok(Self {
            device,
            width: desc.width,
            height: desc.height,
            states,
            geometry,
            targets,
            tables,
            layout_cache,
            table_cache,
            pipelines,
            accel,
            shader_tables,
            slots,
            halton: HaltonSequence::new(),
            budget,
            model,
            worlds,
        })
    }

    /// Advance the jitter sequence and animation, then write the slot's
    /// constants and shader tables. Records nothing.
    ///
    /// The slot's previous submission must have completed. If a write fails
    /// the jitter sequence, the animation and the budget are left unchanged.
    pub fn update_frame(
        &mut self,
        slot: usize,
        eye: Vec3,
        view_proj: Mat4,
        time_step: f32,
        tess_factor: u32,
    ) -> Result<(), RenderError> {
        let frame = *self.frame_slot(slot)?;
        let device = &*self.device;

        let mut halton = self.halton.clone();
        let jitter = halton.next();
        let proj_bias = Vec2::new(
            (jitter.x * 2.0 - 1.0) / self.width as f32,
            (jitter.y * 2.0 - 1.0) / self.height as f32,
        );

        let mut model = self.model;
        model.rotate(Quat::from_rotation_y((ROTATION_SPEED * time_step).to_radians()));
        let worlds = PerMesh::new(ground_world(), model.matrix());

        let budget = if clamp_tess_factor(tess_factor) != self.budget.factor() {
            Some(TessellationBudget::new(tess_factor, self.geometry.index_counts())?)
        } else {
            None
        };

        let proj_to_world = view_proj.inverse();
        self.shader_tables
            .rebuild_for_frame(device, slot, &RayGenConstants::new(proj_to_world, eye))?;
        let env = CbEnv::new(proj_to_world, eye, self.width, self.height);
        device.write_buffer(frame.cb_env, 0, bytemuck::bytes_of(&env))?;
        device.write_buffer(frame.cb_global, 0, bytemuck::bytes_of(&CbGlobal::new(&worlds)))?;
        for (role, world) in worlds.iter() {
            let graphics = CbGraphics::new(*world, view_proj, proj_bias);
            device.write_buffer(frame.cb_graphics[role], 0, bytemuck::bytes_of(&graphics))?;
        }

        self.halton = halton;
        self.model = model;
        self.worlds = worlds;
        if let Some(budget) = budget {
            self.budget = budget;
            debug!(
                "Tessellation factor {} gives {} vertices per patch",
                budget.factor(),
                budget.per_patch()
            );
        }
        Ok(())
    }

    /// Refit the top-level structure with the current transforms, using the
    /// slot's instance buffer.
    pub fn update_acceleration_structures(
        &mut self,
        cmd: &mut CommandList,
        slot: usize,
    ) -> Result<(), RenderError> {
        self.frame_slot(slot)?;
        self.accel.update(&*self.device, cmd, slot, &self.worlds)
    }

    /// Geometry of both meshes, for callers building their own structures.
    pub fn geometries(&self) -> PerMesh<GeometryView> {
        self.geometry.views()
    }

    pub fn budget(&self) -> &TessellationBudget {
        &self.budget
    }

    pub fn jitter(&self) -> &HaltonSequence {
        &self.halton
    }

    pub fn world_transforms(&self) -> PerMesh<Mat4> {
        self.worlds
    }

    pub fn acceleration_structures(&self) -> &SpatialIndexManager {
        &self.accel
    }

    pub fn shader_tables(&self) -> &ShaderTables {
        &self.shader_tables
    }

    /// Recorded state of a renderer-owned resource.
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.states.state(resource)
    }

    pub fn output_image(&self) -> ResourceId {
        self.targets.output
    }

    pub fn depth_buffer(&self) -> ResourceId {
        self.targets.depth
    }

    /// Distinct pipeline layouts and descriptor tables created.
    pub fn binding_counts(&self) -> (usize, usize) {
        (self.layout_cache.len(), self.table_cache.len())
    }

    fn frame_slot(&self, slot: usize) -> Result<&FrameSlot, RenderError> {
        self.slots.get(slot).ok_or(RenderError::InvalidFrameSlot {
            slot,
            count: self.slots.len(),
        })
    }
}

/// Ground cube flattened into a slab whose top face sits at y = 0.
fn ground_world() -> Mat4 {
    Transform::from_position_scale(Vec3::new(0.0, -0.5, 0.0), Vec3::new(10.0, 0.5, 10.0)).matrix()
}

fn create_texture(
    device: &dyn Device,
    states: &mut StateTracker,
    label: &str,
    width: u32,
    height: u32,
    format: Format,
    usage: ImageUsage,
) -> Result<ResourceId, RenderError> {
    let id = device
        .create_texture(&TextureDesc {
            label: label.to_string(),
            width,
            height,
            format,
            usage,
        })
        .creating(label)?;
    states.register(id, ResourceState::Uninitialized);
    Ok(id)
}

fn create_storage_buffer(
    device: &dyn Device,
    states: &mut StateTracker,
    label: String,
    size: u64,
) -> Result<ResourceId, RenderError> {
    let id = device
        .create_buffer(&BufferDesc {
            label: label.clone(),
            size,
            usage: BufferUsage::STORAGE_BUFFER,
            location: MemoryLocation::DeviceLocal,
        })
        .creating(label)?;
    states.register(id, ResourceState::Uninitialized);
    Ok(id)
}

/// Import the environment map and record its upload.
fn load_environment(
    device: &dyn Device,
    cmd: &mut CommandList,
    states: &mut StateTracker,
    desc: &InitDesc,
    importer: &dyn SceneImporter,
) -> Result<ResourceId, RenderError> {
    let map = importer
        .import_environment(&desc.environment_path)
        .map_err(|e| RenderError::ShaderOrAssetLoad {
            what: desc.environment_path.display().to_string(),
            reason: e.to_string(),
        })?;
    let texture = create_texture(
        device,
        states,
        "environment map",
        map.width,
        map.height,
        map.format,
        ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
    )?;

    cmd.begin_pass("environment upload");
    cmd.barriers(states.transition(texture, ResourceState::TransferDestination)?);
    cmd.upload_texture(texture, map.data);
    cmd.barriers(states.transition(texture, ResourceState::ShaderReadable)?);
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{
        Barrier, Command, GpuError, HeadlessDevice, Queue, QueueKind, SubmissionRecord,
    };
    use crate::import::{EnvironmentMap, ImportError};
    use crate::pipeline::shaders;
    use crate::vertex::Vertex;
    use crate::frame::FrameSync;
    use granularity_core::{max_vertices_per_patch, MAX_TESS_FACTOR};
    use std::path::Path;

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 48;

    struct StubImporter {
        triangles: u32,
    }

    impl SceneImporter for StubImporter {
        fn import_mesh(&self, path: &Path) -> Result<MeshData, ImportError> {
            if self.triangles == 0 {
                return Err(format!("{} not found", path.display()).into());
            }
            let vertices = (0..self.triangles * 3)
                .map(|i| {
                    let t = (i / 3) as f32;
                    let corner = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]][(i % 3) as usize];
                    Vertex::new([t + corner[0], corner[1], 0.0], [0.0, 0.0, -1.0])
                })
                .collect();
            Ok(MeshData::new(vertices, (0..self.triangles * 3).collect()))
        }

        fn import_environment(&self, _path: &Path) -> Result<EnvironmentMap, ImportError> {
            Ok(EnvironmentMap {
                width: 4,
                height: 2,
                format: Format::R8G8B8A8_UNORM,
                data: vec![128; 32],
            })
        }
    }

    fn desc(tess_factor: u32) -> InitDesc {
        let mut desc = InitDesc::new(WIDTH, HEIGHT, "model.obj", "sky.hdr", Format::B8G8R8A8_UNORM);
        desc.tess_factor = tess_factor;
        desc
    }

    fn try_init(device: &HeadlessDevice, importer: &StubImporter) -> Result<HybridRenderer, RenderError> {
        let mut cmd = CommandList::new("init");
        HybridRenderer::init(Arc::new(device.clone()), &mut cmd, &desc(4), importer)
    }

    fn init(device: &HeadlessDevice, tess_factor: u32) -> HybridRenderer {
        let mut cmd = CommandList::new("init");
        let renderer = HybridRenderer::init(
            Arc::new(device.clone()),
            &mut cmd,
            &desc(tess_factor),
            &StubImporter { triangles: 100 },
        )
        .unwrap();
        let queue = device.queue(QueueKind::Graphics);
        let fence = queue.submit(cmd).unwrap();
        queue.wait_for(fence).unwrap();
        renderer
    }

    fn camera() -> (Vec3, Mat4) {
        let eye = Vec3::new(0.0, 2.0, -6.0);
        let view = Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_lh(
            std::f32::consts::FRAC_PI_4,
            WIDTH as f32 / HEIGHT as f32,
            0.1,
            100.0,
        );
        (eye, proj * view)
    }

    /// Caller-owned presentable image and its state.
    struct BackBuffer {
        id: ResourceId,
        states: StateTracker,
    }

    impl BackBuffer {
        fn new(device: &HeadlessDevice) -> Self {
            let id = device
                .create_texture(&TextureDesc {
                    label: "back buffer".into(),
                    width: WIDTH,
                    height: HEIGHT,
                    format: Format::B8G8R8A8_UNORM,
                    usage: ImageUsage::COLOR_ATTACHMENT,
                })
                .unwrap();
            let mut states = StateTracker::new();
            states.register(id, ResourceState::Uninitialized);
            Self { id, states }
        }
    }

    fn record_frame(
        renderer: &mut HybridRenderer,
        back: &mut BackBuffer,
        slot: usize,
        tess_factor: u32,
    ) -> Result<CommandList, RenderError> {
        let (eye, view_proj) = camera();
        renderer.update_frame(slot, eye, view_proj, 1.0 / 60.0, tess_factor)?;

        let mut cmd = CommandList::new(format!("frame slot {slot}"));
        renderer.update_acceleration_structures(&mut cmd, slot)?;
        let external: Vec<Barrier> = back
            .states
            .transition(back.id, ResourceState::WriteTarget)?
            .into_iter()
            .collect();
        renderer.render(&mut cmd, slot, back.id, &external)?;
        cmd.barriers(back.states.transition(back.id, ResourceState::Present)?);
        Ok(cmd)
    }

    fn last_submission(device: &HeadlessDevice) -> SubmissionRecord {
        device.submissions().pop().unwrap()
    }

    #[test]
    fn test_end_to_end_frame_passes_validation() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 4);
        let mut back = BackBuffer::new(&device);

        let cmd = record_frame(&mut renderer, &mut back, 0, 4).unwrap();
        assert_eq!(cmd.pass_names(), PASS_NAMES.to_vec());
        device.queue(QueueKind::Graphics).submit(cmd).unwrap();

        let record = last_submission(&device);
        assert_eq!(record.passes, PASS_NAMES.map(String::from).to_vec());
        // depth 2, environment 1, tessellation 2, rasterize 2, tone map 1
        assert_eq!(record.draws, 8);
        let ground_triangles = 12 * (GROUND_GRID - 1) * (GROUND_GRID - 1);
        assert_eq!(record.dispatch_widths, vec![ground_triangles * 19, 100 * 19]);
        assert_eq!(record.builds, vec![(renderer.acceleration_structures().tlas(), true)]);

        assert_eq!(renderer.resource_state(renderer.output_image()), Some(ResourceState::ShaderReadable));
        assert_eq!(renderer.resource_state(renderer.depth_buffer()), Some(ResourceState::ShaderReadable));
        assert_eq!(device.resource_state(back.id), Some(ResourceState::Present));
        assert_eq!(renderer.binding_counts(), (8, 10));
    }

    #[test]
    fn test_init_builds_every_structure_once() {
        let device = HeadlessDevice::new();
        let renderer = init(&device, 4);
        let accel = renderer.acceleration_structures();

        let record = last_submission(&device);
        assert_eq!(
            record.builds,
            vec![
                (accel.blas(MeshRole::Ground), false),
                (accel.blas(MeshRole::Model), false),
                (accel.tlas(), false),
            ]
        );
        assert_eq!(accel.instance_count(), 2);
        let views = renderer.geometries();
        assert_eq!(views.model.index_count, 300);
        assert_eq!(views.ground.index_count, 36 * 63 * 63);
    }

    #[test]
    fn test_frames_cycle_through_slots_with_fence_waits() {
        let device = HeadlessDevice::new();
        let queue = device.queue(QueueKind::Graphics);
        let mut renderer = init(&device, 2);
        let mut back = BackBuffer::new(&device);
        let mut sync = FrameSync::new();

        for _ in 0..3 * FRAME_COUNT {
            let slot = sync.frame_index();
            let cmd = record_frame(&mut renderer, &mut back, slot, 2).unwrap();
            sync.submit(&queue, cmd).unwrap();
            sync.move_to_next_frame(&queue).unwrap();
        }
        sync.wait_for_gpu(&queue).unwrap();

        assert_eq!(renderer.jitter().index(), 3 * FRAME_COUNT as u32);
        let frames = device.submissions().len() - 1;
        assert_eq!(frames, 3 * FRAME_COUNT);
        assert_eq!(renderer.acceleration_structures().instance_count(), 2);
    }

    #[test]
    fn test_early_slot_reuse_is_detected() {
        let device = HeadlessDevice::new();
        let queue = device.queue(QueueKind::Graphics);
        let mut renderer = init(&device, 2);
        let mut back = BackBuffer::new(&device);

        let cmd = record_frame(&mut renderer, &mut back, 0, 2).unwrap();
        let fence = queue.submit(cmd).unwrap();

        // Slot 0 is still in flight: its shader tables and constants are
        // pending GPU reads.
        let records = renderer.shader_tables().ray_gen(0).unwrap().records().to_vec();
        let worlds = renderer.world_transforms();
        let (eye, view_proj) = camera();
        let moved_eye = eye + Vec3::X;
        let result = renderer.update_frame(0, moved_eye, view_proj, 0.016, 3);
        assert!(matches!(result, Err(RenderError::Gpu(GpuError::Hazard { .. }))));

        // Nothing of the rejected frame is kept.
        assert_eq!(renderer.jitter().index(), 1);
        assert_eq!(renderer.shader_tables().ray_gen(0).unwrap().records(), &records[..]);
        assert_eq!(renderer.world_transforms(), worlds);
        assert_eq!(renderer.budget().factor(), 2);

        queue.wait_for(fence).unwrap();
        renderer.update_frame(0, moved_eye, view_proj, 0.016, 3).unwrap();
        assert_eq!(renderer.jitter().index(), 2);
        assert_eq!(renderer.budget().factor(), 3);
        assert_ne!(renderer.shader_tables().ray_gen(0).unwrap().records(), &records[..]);
    }

    /// Copy of `cmd` with the first barrier batch of `pass` reduced to the
    /// barriers `keep` accepts.
    fn drop_barriers(cmd: &CommandList, pass: &str, keep: impl Fn(&Barrier) -> bool) -> CommandList {
        let mut edited = CommandList::new(cmd.label());
        let mut current = None;
        let mut done = false;
        for command in cmd.commands() {
            match command {
                Command::BeginPass(name) => {
                    current = Some(*name);
                    edited.push(command.clone());
                }
                Command::Barrier(batch) if !done && current == Some(pass) => {
                    done = true;
                    edited.barriers(batch.iter().copied().filter(|b| keep(b)));
                }
                other => edited.push(other.clone()),
            }
        }
        assert!(done, "pass '{pass}' recorded no barriers");
        edited
    }

    #[test]
    fn test_frame_missing_ray_trace_barriers_is_rejected() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 2);
        let mut back = BackBuffer::new(&device);
        let cmd = record_frame(&mut renderer, &mut back, 0, 2).unwrap();

        let broken = drop_barriers(&cmd, PASS_NAMES[3], |_| false);
        match device.queue(QueueKind::Graphics).submit(broken) {
            Err(GpuError::Validation { context, .. }) => assert!(context.contains("ray trace"), "{context}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_frame_missing_depth_barrier_is_rejected() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 2);
        let mut back = BackBuffer::new(&device);
        let cmd = record_frame(&mut renderer, &mut back, 0, 2).unwrap();

        let depth = renderer.depth_buffer();
        let broken = drop_barriers(&cmd, PASS_NAMES[4], |b| b.resource != depth);
        match device.queue(QueueKind::Graphics).submit(broken) {
            Err(GpuError::Validation { context, reason }) => {
                assert!(context.contains("rasterize"), "{context}");
                assert!(reason.contains("depth buffer"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }

        // The untouched list still passes.
        device.queue(QueueKind::Graphics).submit(cmd).unwrap();
    }

    #[test]
    fn test_factor_above_range_is_clamped() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 2);
        let (eye, view_proj) = camera();
        renderer.update_frame(0, eye, view_proj, 0.016, 20).unwrap();

        let budget = renderer.budget();
        assert_eq!(budget.factor(), MAX_TESS_FACTOR);
        assert_eq!(budget.per_patch(), max_vertices_per_patch(MAX_TESS_FACTOR));
        assert_eq!(budget.max_tess_vertices(MeshRole::Model), 100 * 223);
    }

    #[test]
    fn test_factor_change_updates_every_budget_before_the_next_render() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 2);
        let mut back = BackBuffer::new(&device);
        let counts = renderer.geometry.index_counts();
        for role in MeshRole::ALL {
            assert_eq!(renderer.budget().max_tess_vertices(role), counts[role] / 3 * 7);
        }

        let cmd = record_frame(&mut renderer, &mut back, 0, 3).unwrap();
        for role in MeshRole::ALL {
            assert_eq!(renderer.budget().max_tess_vertices(role), counts[role] / 3 * 13);
        }
        device.queue(QueueKind::Graphics).submit(cmd).unwrap();
        assert_eq!(
            last_submission(&device).dispatch_widths,
            vec![counts.ground / 3 * 13, counts.model / 3 * 13]
        );
    }

    #[test]
    fn test_update_frame_animates_the_model_only() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 2);
        let before = renderer.world_transforms();
        let (eye, view_proj) = camera();
        renderer.update_frame(1, eye, view_proj, 1.0, 2).unwrap();

        let after = renderer.world_transforms();
        assert_eq!(after.ground, before.ground);
        let expected = Mat4::from_rotation_y(16f32.to_radians());
        assert!(after.model.abs_diff_eq(expected, 1e-5));
        assert_eq!(renderer.jitter().index(), 1);
    }

    #[test]
    fn test_invalid_slot_is_rejected() {
        let device = HeadlessDevice::new();
        let mut renderer = init(&device, 2);
        let (eye, view_proj) = camera();
        assert!(matches!(
            renderer.update_frame(FRAME_COUNT, eye, view_proj, 0.0, 2),
            Err(RenderError::InvalidFrameSlot { slot: FRAME_COUNT, count: FRAME_COUNT })
        ));
        let mut cmd = CommandList::new("bad");
        assert!(renderer.render(&mut cmd, FRAME_COUNT, ResourceId(0), &[]).is_err());
        assert!(cmd.is_empty());
    }

    #[test]
    fn test_init_fails_fast() {
        let missing_shader = HeadlessDevice::new().with_missing_shader(shaders::TONE_MAP_FRAG);
        assert!(matches!(
            try_init(&missing_shader, &StubImporter { triangles: 100 }),
            Err(RenderError::ShaderOrAssetLoad { what, .. }) if what == shaders::TONE_MAP_FRAG
        ));

        let missing_mesh = HeadlessDevice::new();
        assert!(matches!(
            try_init(&missing_mesh, &StubImporter { triangles: 0 }),
            Err(RenderError::ShaderOrAssetLoad { what, .. }) if what == "model.obj"
        ));
        assert!(missing_mesh.find_resource("output image").is_none());

        let no_depth = HeadlessDevice::new().with_failing_allocation("depth buffer");
        assert!(matches!(
            try_init(&no_depth, &StubImporter { triangles: 100 }),
            Err(RenderError::ResourceCreation { what, .. }) if what == "depth buffer"
        ));
        assert!(no_depth.find_resource("top-level structure").is_none());
    }
}
