//! Viewport resize behavior.

mod common;

use common::{front_camera, software_renderer};
use deferred_renderer::backend::{GraphicsBackend, SoftwareBackend, SoftwareLimits};
use deferred_renderer::render_graph::{bloom_level_size, RenderGraphData, RenderGraphDesc};
use deferred_renderer::scene::LightData;
use deferred_renderer::RenderError;
use rstest::rstest;

fn desc() -> RenderGraphDesc {
    RenderGraphDesc {
        bloom_levels: 5,
        shadow_map_size: 64,
    }
}

/// Viewport-sized targets match the viewport; bloom levels follow the
/// halving rule and never reach zero.
fn assert_sizes(graph: &RenderGraphData, width: u32, height: u32) {
    let targets = graph.targets();
    for framebuffer in [&targets.gbuffer, &targets.lighting, &targets.post, &targets.composite] {
        assert_eq!(framebuffer.size(), (width, height), "{}", framebuffer.label());
    }
    assert_eq!(targets.prefilter.size(), bloom_level_size(width, height, 1));
    for (i, framebuffer) in targets.downsample.iter().enumerate() {
        let expected = bloom_level_size(width, height, i as u32 + 2);
        assert_eq!(framebuffer.size(), expected, "{}", framebuffer.label());
        assert_eq!(targets.blur_temp[i].size(), expected);
    }
    for (i, framebuffer) in targets.upsample.iter().enumerate() {
        assert_eq!(framebuffer.size(), bloom_level_size(width, height, i as u32 + 1));
    }
    for framebuffer in graph.framebuffers() {
        assert!(framebuffer.width() >= 1 && framebuffer.height() >= 1);
    }
}

#[test]
fn test_resize_round_trip_keeps_allocation_count() {
    common::init_logger();
    let mut backend = SoftwareBackend::new();
    let mut graph = RenderGraphData::new(&mut backend, 1280, 720, desc()).unwrap();
    let graph_textures = graph.texture_count();
    let live = backend.live_texture_count();
    assert_eq!(graph_textures, live);

    graph.resize(640, 360);
    assert!(graph.apply_pending_resize(&mut backend).unwrap());
    assert_sizes(&graph, 640, 360);
    assert_eq!(backend.live_texture_count(), live);

    graph.resize(1280, 720);
    assert!(graph.apply_pending_resize(&mut backend).unwrap());
    assert_sizes(&graph, 1280, 720);
    assert_eq!(graph.texture_count(), graph_textures);
    assert_eq!(backend.live_texture_count(), live);

    graph.destroy(&mut backend);
    assert_eq!(backend.live_texture_count(), 0);
}

#[rstest]
#[case::tiny(3, 2)]
#[case::odd(101, 57)]
#[case::tall(1, 900)]
#[case::hd(1920, 1080)]
fn test_bloom_chain_follows_halving_rule(#[case] width: u32, #[case] height: u32) {
    let mut backend = SoftwareBackend::new();
    let mut graph = RenderGraphData::new(&mut backend, 32, 32, desc()).unwrap();
    graph.resize(width, height);
    graph.apply_pending_resize(&mut backend).unwrap();
    assert_sizes(&graph, width, height);
    assert_eq!(graph.shadow_map().size(), (64, 64));
}

#[test]
fn test_resize_is_applied_by_the_next_frame() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(32, 32).unwrap();
    let live = renderer.backend().live_texture_count();

    graph.resize(16, 8);
    graph.resize(0, 10);
    assert_eq!(graph.size(), (32, 32));
    assert_eq!(graph.pending_resize(), Some((16, 8)));

    renderer.begin_frame(front_camera(16, 8), LightData::new()).unwrap();
    renderer.end_frame(&mut graph).unwrap();

    assert_eq!(graph.size(), (16, 8));
    assert_eq!(graph.pending_resize(), None);
    assert_sizes(&graph, 16, 8);
    assert_eq!(renderer.backend().live_texture_count(), live);
}

#[test]
fn test_failed_resize_keeps_targets_and_retries() {
    common::init_logger();
    let mut renderer = deferred_renderer::Renderer::new(
        SoftwareBackend::with_limits(SoftwareLimits {
            max_texture_dimension: 64,
            ..Default::default()
        }),
        common::test_config().with_shadow_map_size(32),
    )
    .unwrap();
    let mut graph = renderer.create_viewport(32, 32).unwrap();
    let output = graph.output();
    let live = renderer.backend().live_texture_count();

    graph.resize(128, 128);
    renderer.begin_frame(front_camera(32, 32), LightData::new()).unwrap();
    let err = renderer.end_frame(&mut graph).unwrap_err();
    assert!(matches!(
        err,
        RenderError::ResizeFailed {
            width: 128,
            height: 128,
            ..
        }
    ));
    assert_eq!(graph.size(), (32, 32));
    assert_eq!(graph.output(), output);
    assert_eq!(graph.pending_resize(), Some((128, 128)));
    assert_eq!(renderer.backend().live_texture_count(), live);

    // Once the device allows it the retry succeeds
    renderer.backend_mut().set_limits(SoftwareLimits::default());
    renderer.begin_frame(front_camera(32, 32), LightData::new()).unwrap();
    renderer.end_frame(&mut graph).unwrap();
    assert_eq!(graph.size(), (128, 128));
}
