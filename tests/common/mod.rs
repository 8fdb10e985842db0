//! Shared setup for the renderer integration tests.
//!
//! Scenes are kept tiny so the software device renders them quickly in
//! debug builds.

#![allow(dead_code)]

use deferred_renderer::backend::{CullMode, GraphicsBackend, TextureHandle};
use deferred_renderer::resources::{Material, Mesh, MeshHandle};
use deferred_renderer::scene::{CameraData, LightData, Projection, ResolvedDirectionalLight};
use deferred_renderer::shading::TonemapCurve;
use deferred_renderer::{
    BackendType, PostProcessSettings, RenderGraphData, Renderer, RendererConfig, SoftwareBackend,
};
use glam::{Mat4, Vec3, Vec4};

/// Viewport edge used by the small scenes
pub const VIEWPORT: u32 = 64;

/// Direction the test sun travels along, hitting the cube's -Z face
pub const SUN_DIRECTION: Vec3 = Vec3::new(0.3, -0.5, 1.0);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Devices the parameterised tests run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Software,
    Wgpu,
}

impl Backend {
    pub fn is_available(self) -> bool {
        match self {
            Backend::Software => BackendType::Software.is_available(),
            Backend::Wgpu => BackendType::Wgpu.is_available(),
        }
    }
}

/// Post-processing that leaves lit values untouched: no bloom, no curve,
/// no FXAA, no vignette.
pub fn neutral_post_process() -> PostProcessSettings {
    PostProcessSettings::default()
        .with_tonemap(TonemapCurve::None)
        .with_bloom(false)
        .with_fxaa(false)
}

/// Small targets so frames stay cheap
pub fn test_config() -> RendererConfig {
    RendererConfig::default()
        .with_shadow_map_size(256)
        .with_bloom_levels(3)
        .with_post_process(neutral_post_process())
}

pub fn software_renderer() -> Renderer<SoftwareBackend> {
    init_logger();
    Renderer::new(SoftwareBackend::new(), test_config()).expect("software renderer")
}

#[cfg(feature = "wgpu-backend")]
pub fn wgpu_renderer() -> Option<Renderer<deferred_renderer::WgpuBackend>> {
    init_logger();
    let backend = match deferred_renderer::WgpuBackend::new() {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("wgpu device unavailable: {err}");
            return None;
        }
    };
    let config = test_config().with_backend(BackendType::Wgpu);
    Some(Renderer::new(backend, config).expect("wgpu renderer"))
}

// ============================================================================
// Scene Helpers
// ============================================================================

/// Camera at (0, 0, -5) looking at the origin
pub fn front_camera(width: u32, height: u32) -> CameraData {
    let projection = Projection::perspective(45.0, width as f32 / height as f32, 0.1, 100.0);
    CameraData::look_at(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, &projection)
}

/// One white directional light of intensity 1
pub fn sun_only() -> LightData {
    let mut lights = LightData::new();
    lights.push_directional(ResolvedDirectionalLight {
        direction: SUN_DIRECTION.normalize(),
        color: Vec3::ONE,
        intensity: 1.0,
    });
    lights
}

/// Render one frame of `meshes` (with entity ids) and return the output
pub fn render_frame<B: GraphicsBackend + 'static>(
    renderer: &mut Renderer<B>,
    graph: &mut RenderGraphData,
    lights: LightData,
    draws: &[(u32, Mat4, MeshHandle, Material)],
) -> TextureHandle {
    let camera = front_camera(graph.width(), graph.height());
    renderer.begin_frame(camera, lights).expect("begin_frame");
    for (id, transform, mesh, material) in draws {
        renderer.submit_with_id(*id, *transform, *mesh, material, CullMode::Back);
    }
    renderer.end_frame(graph).expect("end_frame")
}

/// Upload the unit cube
pub fn cube<B: GraphicsBackend + 'static>(renderer: &mut Renderer<B>) -> MeshHandle {
    renderer.upload_mesh(&Mesh::cube()).expect("cube upload")
}

/// Read one linear pixel of the output
pub fn pixel<B: GraphicsBackend + 'static>(
    renderer: &mut Renderer<B>,
    texture: TextureHandle,
    x: u32,
    y: u32,
) -> Vec4 {
    renderer
        .backend_mut()
        .read_pixel(texture, x, y)
        .expect("read_pixel")
}

pub fn assert_close(actual: f32, expected: f32, tolerance: f32, what: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{what}: expected {expected} +- {tolerance}, got {actual}"
    );
}
