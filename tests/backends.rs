//! The same frames on every available device.
//!
//! The wgpu cases need the `wgpu-backend` feature and an adapter; without
//! either they are skipped.

mod common;

use common::{cube, pixel, render_frame, sun_only, Backend, VIEWPORT};
use deferred_renderer::backend::{
    ColorAttachment, GraphicsBackend, LoadOp, RenderPassDescriptor, TextureDescriptor,
    TextureFormat, TextureUsage,
};
use deferred_renderer::resources::Material;
use deferred_renderer::{PassKind, Renderer};
use glam::{Mat4, Vec4Swizzles};
use rstest::rstest;

fn lit_cube_frame<B: GraphicsBackend + 'static>(mut renderer: Renderer<B>) {
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let output = render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[(7, Mat4::IDENTITY, mesh, Material::default())],
    );

    let center = pixel(&mut renderer, output, VIEWPORT / 2, VIEWPORT / 2);
    assert!(center.x > 0.2 && center.x < 0.4, "{}: {center:?}", renderer.backend().name());
    assert!(pixel(&mut renderer, output, 0, 0).xyz().length() < 1e-2);
    assert_eq!(renderer.pick(&graph, VIEWPORT / 2, VIEWPORT / 2).unwrap(), Some(7));
    assert!(renderer.statistics().executed(PassKind::Shadow));

    renderer.destroy_viewport(graph);
    renderer.destroy_mesh(mesh);
    let backend = renderer.shutdown();
    assert_eq!(backend.live_texture_count(), 0);
    assert_eq!(backend.live_geometry_count(), 0);
}

fn clear_and_read_back<B: GraphicsBackend>(backend: &mut B) {
    let target = backend
        .create_texture(&TextureDescriptor::render_target(
            "clear_target",
            4,
            4,
            TextureFormat::Rgba16Float,
        ))
        .unwrap();
    backend
        .begin_render_pass(&RenderPassDescriptor {
            label: Some("clear".into()),
            color_attachments: vec![ColorAttachment {
                texture: target,
                load_op: LoadOp::Clear([0.25, 0.5, 2.0, 1.0]),
            }],
            depth_attachment: None,
        })
        .unwrap();
    backend.end_render_pass().unwrap();

    let texels = backend.read_texture(target).unwrap();
    assert_eq!(texels.len(), 16);
    assert!(texels.iter().all(|t| (t.x - 0.25).abs() < 1e-3 && (t.z - 2.0).abs() < 1e-3));

    let upload = backend
        .create_texture(&TextureDescriptor {
            label: Some("upload".into()),
            width: 2,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
        })
        .unwrap();
    assert!(backend.write_texture(upload, &[255; 4]).is_err());
    backend
        .write_texture(upload, &[255, 0, 0, 255, 0, 255, 0, 255])
        .unwrap();
    let texels = backend.read_texture(upload).unwrap();
    assert_eq!(texels[0].xyz(), glam::Vec3::X);
    assert_eq!(texels[1].xyz(), glam::Vec3::Y);

    backend.destroy_texture(target);
    backend.destroy_texture(upload);
}

#[cfg(feature = "wgpu-backend")]
fn with_wgpu_renderer(test: impl FnOnce(Renderer<deferred_renderer::WgpuBackend>)) {
    if let Some(renderer) = common::wgpu_renderer() {
        test(renderer);
    }
}

#[cfg(not(feature = "wgpu-backend"))]
fn with_wgpu_renderer(_test: impl FnOnce(Renderer<deferred_renderer::SoftwareBackend>)) {}

#[cfg(feature = "wgpu-backend")]
fn with_wgpu_device(test: impl FnOnce(&mut deferred_renderer::WgpuBackend)) {
    match deferred_renderer::WgpuBackend::new() {
        Ok(mut device) => test(&mut device),
        Err(err) => eprintln!("wgpu device unavailable: {err}"),
    }
}

#[cfg(not(feature = "wgpu-backend"))]
fn with_wgpu_device(_test: impl FnOnce(&mut deferred_renderer::SoftwareBackend)) {}

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_lit_cube_on_every_backend(#[case] backend: Backend) {
    if !backend.is_available() {
        eprintln!("Backend {backend:?} not available, skipping");
        return;
    }
    match backend {
        Backend::Software => lit_cube_frame(common::software_renderer()),
        Backend::Wgpu => with_wgpu_renderer(lit_cube_frame),
    }
}

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_clear_and_readback(#[case] backend: Backend) {
    common::init_logger();
    if !backend.is_available() {
        eprintln!("Backend {backend:?} not available, skipping");
        return;
    }
    match backend {
        Backend::Software => clear_and_read_back(&mut deferred_renderer::SoftwareBackend::new()),
        Backend::Wgpu => with_wgpu_device(|device| clear_and_read_back(device)),
    }
}
