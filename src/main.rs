//! Granularity - hybrid tessellation and ray tracing renderer
//!
//! Probes the Vulkan installation for ray tracing support, then drives the
//! renderer through a fixed number of frames on the validating backend.

mod importer;
mod settings;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use granularity_core::FrameTimer;
use granularity_render::gpu::{
    Barrier, CommandList, Device as _, HeadlessDevice, Queue as _, QueueKind, ResourceId,
    ResourceState, StateTracker, TextureDesc,
};
use granularity_render::{FrameSync, HybridRenderer, InitDesc, PASS_NAMES};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vulkano::{
    device::physical::PhysicalDeviceType,
    format::Format,
    image::ImageUsage,
    instance::{Instance, InstanceCreateFlags, InstanceCreateInfo},
    VulkanLibrary,
};

use crate::importer::AssetImporter;
use crate::settings::RenderSettings;

const BACK_BUFFER_FORMAT: Format = Format::B8G8R8A8_UNORM;

/// What the installed Vulkan driver offers for hardware ray tracing
#[derive(Debug, Clone)]
struct RayTracingSupport {
    device_name: String,
    pipeline: bool,
    acceleration_structure: bool,
}

impl RayTracingSupport {
    fn is_complete(&self) -> bool {
        self.pipeline && self.acceleration_structure
    }
}

/// Pick the best physical device and report its ray tracing extensions.
fn probe_vulkan() -> Result<RayTracingSupport> {
    let library = VulkanLibrary::new().context("Failed to load Vulkan library")?;

    let instance = Instance::new(
        library,
        InstanceCreateInfo {
            flags: InstanceCreateFlags::ENUMERATE_PORTABILITY,
            ..Default::default()
        },
    )
    .context("Failed to create Vulkan instance")?;

    let physical_device = instance
        .enumerate_physical_devices()
        .context("Failed to enumerate physical devices")?
        .min_by_key(|p| match p.properties().device_type {
            PhysicalDeviceType::DiscreteGpu => 0,
            PhysicalDeviceType::IntegratedGpu => 1,
            PhysicalDeviceType::VirtualGpu => 2,
            PhysicalDeviceType::Cpu => 3,
            _ => 4,
        })
        .context("No Vulkan device found")?;

    let extensions = physical_device.supported_extensions();
    Ok(RayTracingSupport {
        device_name: physical_device.properties().device_name.clone(),
        pipeline: extensions.khr_ray_tracing_pipeline,
        acceleration_structure: extensions.khr_acceleration_structure,
    })
}

/// The presentable image the tone map pass writes, owned by the driver.
struct BackBuffer {
    id: ResourceId,
    states: StateTracker,
}

impl BackBuffer {
    fn create(device: &HeadlessDevice, width: u32, height: u32) -> Result<Self> {
        let id = device
            .create_texture(&TextureDesc {
                label: "back buffer".into(),
                width,
                height,
                format: BACK_BUFFER_FORMAT,
                usage: ImageUsage::COLOR_ATTACHMENT,
            })
            .context("Failed to create back buffer")?;
        let mut states = StateTracker::new();
        states.register(id, ResourceState::Uninitialized);
        Ok(Self { id, states })
    }
}

/// Fixed camera looking at the origin.
fn camera(settings: &RenderSettings) -> (Vec3, Mat4) {
    let video = &settings.video;
    let eye = Vec3::from_array(video.eye);
    let view = Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_lh(video.fov.to_radians(), video.aspect_ratio(), 0.1, 100.0);
    (eye, proj * view)
}

fn record_frame(
    renderer: &mut HybridRenderer,
    back: &mut BackBuffer,
    settings: &RenderSettings,
    slot: usize,
    time_step: f32,
) -> Result<CommandList> {
    let (eye, view_proj) = camera(settings);
    renderer.update_frame(slot, eye, view_proj, time_step, settings.scene.tess_factor())?;

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

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    info!("Starting Granularity renderer...");

    let settings = RenderSettings::load();
    if !RenderSettings::is_persisted() {
        if let Err(e) = settings.save() {
            warn!("Failed to write default settings: {:#}", e);
        }
    }

    match probe_vulkan() {
        Ok(support) if support.is_complete() => {
            info!("Using GPU: {}", support.device_name);
            info!("Hardware ray tracing supported");
        }
        Ok(support) => {
            warn!(
                "{} lacks ray tracing (pipeline: {}, acceleration structure: {})",
                support.device_name, support.pipeline, support.acceleration_structure
            );
        }
        Err(e) => warn!("Vulkan probe failed: {:#}", e),
    }
    info!("Recording on the validating headless backend");

    let device = HeadlessDevice::new();
    let queue = device.queue(QueueKind::Graphics);
    let (width, height) = settings.video.resolution();
    let mut back = BackBuffer::create(&device, width, height)?;

    let mut desc = InitDesc::new(
        width,
        height,
        settings.scene.mesh.clone(),
        settings.scene.environment.clone(),
        BACK_BUFFER_FORMAT,
    );
    desc.pos_scale = settings.scene.pos_scale();
    desc.tess_factor = settings.scene.tess_factor();

    let importer = AssetImporter::new(settings.scene.asset_dir.clone());
    let mut init_cmd = CommandList::new("initialization");
    let mut renderer = HybridRenderer::init(Arc::new(device.clone()), &mut init_cmd, &desc, &importer)
        .context("Failed to initialize renderer")?;
    let fence = queue
        .submit(init_cmd)
        .context("Failed to submit initialization")?;
    queue
        .wait_for(fence)
        .context("Failed waiting for initialization")?;
    info!(
        "Renderer initialized: {}x{}, tessellation factor {}",
        width,
        height,
        renderer.budget().factor()
    );

    let mut timer = FrameTimer::new(settings.run.timer_config());
    let mut sync = FrameSync::new();
    let mut last_frame = Instant::now();

    for _ in 0..settings.run.frames {
        let now = Instant::now();
        let raw_delta = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;
        if let Some(stats) = timer.tick(raw_delta) {
            info!("{:.1} fps ({:.2} ms)", stats.fps, stats.frame_time_ms);
        }

        let slot = sync.frame_index();
        let cmd = record_frame(&mut renderer, &mut back, &settings, slot, timer.delta_time)
            .with_context(|| format!("Failed to record frame {}", timer.frame_count))?;
        debug!("Frame {} on slot {}: {} commands", timer.frame_count, slot, cmd.len());

        sync.submit(&queue, cmd).context("Failed to submit frame")?;
        sync.move_to_next_frame(&queue)
            .context("Failed to advance frame slot")?;
    }

    sync.wait_for_gpu(&queue).context("Failed waiting for the GPU")?;

    let frames = device.submissions().len().saturating_sub(1);
    info!(
        "Rendered {} frames of {} passes each, {} animation seconds",
        frames,
        PASS_NAMES.len(),
        timer.total_time
    );
    if let Some(stats) = timer.last_stats() {
        info!("Last window: {:.1} fps ({:.2} ms)", stats.fps, stats.frame_time_ms);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_looks_at_origin() {
        let settings = RenderSettings::default();
        let (eye, view_proj) = camera(&settings);
        assert_eq!(eye, Vec3::new(0.0, 2.0, -6.0));

        let clip = view_proj * Vec3::ZERO.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..1.0).contains(&ndc.z));
    }

    #[test]
    fn test_back_buffer_ends_presentable() {
        let device = HeadlessDevice::new();
        let mut back = BackBuffer::create(&device, 64, 32).unwrap();
        let barrier = back.states.transition(back.id, ResourceState::WriteTarget).unwrap();
        assert!(barrier.is_some());
        back.states.transition(back.id, ResourceState::Present).unwrap();
        assert_eq!(back.states.state(back.id), Some(ResourceState::Present));
    }

    #[test]
    fn test_missing_assets_fail_initialization() {
        let device = HeadlessDevice::new();
        let desc = InitDesc::new(64, 32, "missing.obj", "missing.hdr", BACK_BUFFER_FORMAT);
        let importer = AssetImporter::new("/nonexistent");
        let mut cmd = CommandList::new("initialization");
        assert!(HybridRenderer::init(Arc::new(device), &mut cmd, &desc, &importer).is_err());
    }
}
