//! Granularity Core - Core types and algorithms for the Granularity renderer
//!
//! This crate provides the foundational pieces shared by the renderer and the
//! frame driver:
//! - Mathematical primitives (re-exported from glam)
//! - Mesh role keys and per-mesh storage
//! - Frame timing
//! - The Halton(2,3) jitter sequence and the tessellation vertex budget

pub mod halton;
pub mod tessellation;
pub mod time;
pub mod types;

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
pub use halton::HaltonSequence;
pub use tessellation::{clamp_tess_factor, max_vertices_per_patch, MAX_TESS_FACTOR, MIN_TESS_FACTOR};
pub use time::{FrameStats, FrameTimer, TimerConfig};
pub use types::{affine_rows, MeshRole, PerMesh, Transform, MESH_COUNT};
