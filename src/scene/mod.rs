//! Scene-side inputs of the renderer
//!
//! Transforms and their parent hierarchy, cameras, and lights. The scene
//! graph itself lives outside the renderer; this module only holds what the
//! passes need from it each frame.

mod camera;
mod editor_camera;
mod hierarchy;
mod light;
mod transform;

pub use camera::*;
pub use editor_camera::*;
pub use hierarchy::*;
pub use light::*;
pub use transform::*;
