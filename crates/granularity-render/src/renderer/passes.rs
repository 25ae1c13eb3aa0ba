//! The six passes of a frame.
//!
//! Each pass first records the barriers its inputs need, computed from the
//! renderer's state tracker. Passes that consume the output of an earlier
//! pass require that producer state before transitioning, so recording them
//! out of order fails instead of producing a racy command list.

use granularity_core::MeshRole;

use super::HybridRenderer;
use crate::binding::Slot;
use crate::error::RenderError;
use crate::frame::FrameSlot;
use crate::gpu::{Barrier, CommandList, DepthAttachment, ResourceId, ResourceState};
use crate::vertex::Vertex;

/// Pass names in recording order.
pub const PASS_NAMES: [&str; 6] = [
    "depth prepass",
    "environment prepass",
    "tessellation",
    "ray trace",
    "rasterize",
    "tone map",
];

impl HybridRenderer {
    /// Record a full frame into `cmd`.
    ///
    /// `external_barriers` transition caller-owned resources, typically the
    /// presentable `output_target`, and are recorded just before the tone map
    /// pass writes to it.
    pub fn render(
        &mut self,
        cmd: &mut CommandList,
        slot: usize,
        output_target: ResourceId,
        external_barriers: &[Barrier],
    ) -> Result<(), RenderError> {
        let frame = *self.frame_slot(slot)?;
        if !self.accel.is_built() {
            return Err(RenderError::AccelerationStructure(
                "rendering before the scene was built".into(),
            ));
        }

        self.depth_prepass(cmd, &frame)?;
        self.environment_prepass(cmd, &frame)?;
        self.tessellation_pass(cmd)?;
        self.ray_trace_pass(cmd, &frame, slot)?;
        self.rasterize_pass(cmd, &frame)?;
        self.tone_map_pass(cmd, output_target, external_barriers)?;
        Ok(())
    }

    fn draw_mesh(&self, cmd: &mut CommandList, role: MeshRole) {
        let mesh = self.geometry.mesh(role);
        cmd.set_vertex_buffer(mesh.vertex_buffer, Vertex::STRIDE);
        cmd.set_index_buffer(mesh.index_buffer);
        cmd.draw_indexed(mesh.index_count);
    }

    fn depth_prepass(&mut self, cmd: &mut CommandList, frame: &FrameSlot) -> Result<(), RenderError> {
        let depth = self.targets.depth;
        cmd.begin_pass(PASS_NAMES[0]);
        cmd.barriers(self.states.transition(depth, ResourceState::WriteTarget)?);
        cmd.set_render_targets(
            None,
            Some(DepthAttachment {
                resource: depth,
                read_only: false,
            }),
        );
        cmd.clear_depth(depth, 1.0);
        cmd.set_viewport(self.width, self.height);
        cmd.set_pipeline(self.pipelines.depth_prepass);

        let mut binder = self.pipelines.layouts.depth_prepass.bind(cmd);
        binder.constants(Slot::TessFactor, &[self.budget.factor()]);
        for role in MeshRole::ALL {
            binder.constant_buffer(Slot::GraphicsConstants, frame.cb_graphics[role]);
            self.draw_mesh(&mut binder, role);
        }
        Ok(())
    }

    fn environment_prepass(&mut self, cmd: &mut CommandList, frame: &FrameSlot) -> Result<(), RenderError> {
        cmd.begin_pass(PASS_NAMES[1]);
        cmd.barriers(self.states.transition(self.targets.output, ResourceState::WriteTarget)?);
        cmd.set_render_targets(None, None);
        cmd.set_viewport(self.width, self.height);
        cmd.set_pipeline(self.pipelines.environment);

        self.pipelines
            .layouts
            .environment
            .bind(cmd)
            .constant_buffer(Slot::EnvConstants, frame.cb_env)
            .table(Slot::OutputUav, &self.tables.output_uav)
            .table(Slot::Environment, &self.tables.environment)
            .table(Slot::Sampler, &self.tables.sampler)
            .draw(3);
        Ok(())
    }

    fn tessellation_pass(&mut self, cmd: &mut CommandList) -> Result<(), RenderError> {
        cmd.begin_pass(PASS_NAMES[2]);
        cmd.barriers(
            self.states
                .transition_all(self.targets.tess_domains.to_array(), ResourceState::WriteTarget)?,
        );
        cmd.set_pipeline(self.pipelines.tessellation);

        let mut binder = self.pipelines.layouts.tessellation.bind(cmd);
        binder.table(Slot::TessDomainUavs, &self.tables.tess_domain_uavs);
        for role in MeshRole::ALL {
            binder.constants(Slot::TessConstants, &self.budget.constants(role).words());
            self.draw_mesh(&mut binder, role);
        }
        Ok(())
    }

    fn ray_trace_pass(
        &mut self,
        cmd: &mut CommandList,
        frame: &FrameSlot,
        slot: usize,
    ) -> Result<(), RenderError> {
        let domains = self.targets.tess_domains.to_array();
        for domain in domains {
            self.states.require(domain, ResourceState::WriteTarget)?;
        }
        cmd.begin_pass(PASS_NAMES[3]);
        let mut barriers = self.states.transition_all(domains, ResourceState::ShaderReadable)?;
        barriers.extend(
            self.states
                .transition_all(self.targets.vertex_colors.to_array(), ResourceState::WriteTarget)?,
        );
        cmd.barriers(barriers);
        cmd.set_pipeline(self.pipelines.ray_tracing);

        let dispatch = self.shader_tables.dispatch_tables(slot)?;
        let tables = &self.tables;
        let mut binder = self.pipelines.layouts.ray_tracing.bind(cmd);
        binder
            .table(Slot::VertexColorUavs, &tables.vertex_color_uavs)
            .acceleration_structure(Slot::Scene, self.accel.tlas())
            .table(Slot::Sampler, &tables.sampler)
            .table(Slot::IndexBuffers, &tables.index_buffers)
            .table(Slot::VertexBuffers, &tables.vertex_buffers)
            .constant_buffer(Slot::Materials, self.targets.materials)
            .constant_buffer(Slot::GlobalConstants, frame.cb_global)
            .table(Slot::TessDomainSrvs, &tables.tess_domain_srvs)
            .table(Slot::Environment, &tables.environment);
        for role in MeshRole::ALL {
            binder
                .constants(Slot::TessConstants, &self.budget.constants(role).words())
                .dispatch_rays(dispatch, self.budget.max_tess_vertices(role));
        }
        Ok(())
    }

    fn rasterize_pass(&mut self, cmd: &mut CommandList, frame: &FrameSlot) -> Result<(), RenderError> {
        let depth = self.targets.depth;
        let colors = self.targets.vertex_colors.to_array();
        self.states.require(depth, ResourceState::WriteTarget)?;
        for color in colors {
            self.states.require(color, ResourceState::WriteTarget)?;
        }
        cmd.begin_pass(PASS_NAMES[4]);
        let mut barriers = self.states.transition_all(colors, ResourceState::ShaderReadable)?;
        barriers.extend(self.states.transition(depth, ResourceState::ShaderReadable)?);
        cmd.barriers(barriers);
        cmd.set_render_targets(
            None,
            Some(DepthAttachment {
                resource: depth,
                read_only: true,
            }),
        );
        cmd.set_viewport(self.width, self.height);
        cmd.set_pipeline(self.pipelines.rasterize);

        let mut binder = self.pipelines.layouts.rasterize.bind(cmd);
        binder
            .table(Slot::VertexColorSrvs, &self.tables.vertex_color_srvs)
            .table(Slot::OutputUav, &self.tables.output_uav);
        for role in MeshRole::ALL {
            binder
                .constants(Slot::TessConstants, &self.budget.constants(role).words())
                .constant_buffer(Slot::GraphicsConstants, frame.cb_graphics[role]);
            self.draw_mesh(&mut binder, role);
        }
        Ok(())
    }

    fn tone_map_pass(
        &mut self,
        cmd: &mut CommandList,
        output_target: ResourceId,
        external_barriers: &[Barrier],
    ) -> Result<(), RenderError> {
        let output = self.targets.output;
        self.states.require(output, ResourceState::WriteTarget)?;
        cmd.begin_pass(PASS_NAMES[5]);
        cmd.barriers(external_barriers.iter().copied());
        cmd.barriers(self.states.transition(output, ResourceState::ShaderReadable)?);
        cmd.set_render_targets(Some(output_target), None);
        cmd.set_viewport(self.width, self.height);
        cmd.set_pipeline(self.pipelines.tone_map);

        self.pipelines
            .layouts
            .tone_map
            .bind(cmd)
            .table(Slot::OutputSrv, &self.tables.output_srv)
            .draw(3);
        Ok(())
    }
}
