//! Granularity Assets - mesh and environment map import
//!
//! Loads Wavefront OBJ and glTF 2.0 models into flat position/normal/index
//! meshes and decodes environment maps, caching both by path.

mod error;
mod gltf_loader;
mod mesh;
mod obj_loader;
mod server;
mod texture;

pub use error::AssetError;
pub use gltf_loader::load_gltf;
pub use mesh::MeshAsset;
pub use obj_loader::{load_obj, parse_obj};
pub use server::{AssetServer, MeshFormat};
pub use texture::{load_texture, TextureAsset, TextureFormat};
