//! Resource management
//!
//! Meshes, materials and textures. Device resources are owned by the caches
//! here; everything else refers to them through handles.

mod material;
mod mesh;
mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;
