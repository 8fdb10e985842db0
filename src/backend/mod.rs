//! Backend abstraction layer
//!
//! Provides the capability interface every device implements, the CPU
//! reference device, and the optional wgpu device.

pub mod software;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use software::{SoftwareBackend, SoftwareLimits};
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;
