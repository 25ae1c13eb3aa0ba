//! Vertex type shared by every mesh

use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

use vulkano::format::Format;
use vulkano::pipeline::graphics::vertex_input::{
    VertexBufferDescription, VertexInputRate, VertexMemberInfo,
};

/// Position and normal, tightly packed (24 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }

    /// Vulkano vertex buffer description
    pub fn per_vertex() -> VertexBufferDescription {
        let member = |offset: u32| VertexMemberInfo {
            offset,
            format: Format::R32G32B32_SFLOAT,
            num_elements: 1,
            stride: Self::STRIDE,
        };
        VertexBufferDescription {
            stride: Self::STRIDE,
            input_rate: VertexInputRate::Vertex,
            members: HashMap::from([
                ("position".to_string(), member(0)),
                ("normal".to_string(), member(12)),
            ]),
        }
    }
}
