//! Whole-frame scenarios on the software device.

mod common;

use std::f32::consts::PI;

use common::{
    assert_close, cube, pixel, render_frame, software_renderer, sun_only, SUN_DIRECTION, VIEWPORT,
};
use deferred_renderer::backend::{CullMode, GraphicsBackend};
use deferred_renderer::resources::Material;
use deferred_renderer::scene::{Environment, LightData, ResolvedDirectionalLight, MAX_NUM_DIR_LIGHTS};
use deferred_renderer::shading::{brdf, TonemapCurve};
use deferred_renderer::PassKind;
use glam::{Mat4, Vec3, Vec4Swizzles};
use rstest::rstest;

/// Radiance the lit -Z face of the cube sends back to the front camera
fn expected_front_face() -> f32 {
    let surface = brdf::Surface {
        position: Vec3::new(0.0, 0.0, -0.5),
        normal: Vec3::NEG_Z,
        albedo: Vec3::ONE,
        metallic: 0.0,
        roughness: 0.5,
        ao: 1.0,
    };
    let view_dir = Vec3::NEG_Z;
    let light_dir = -SUN_DIRECTION.normalize();
    let direct = brdf::evaluate(&surface, view_dir, light_dir, Vec3::ONE);
    let ambient = Environment::default().ambient_color * Environment::default().ambient_intensity;
    (direct + ambient).x
}

#[test]
fn test_lit_cube_matches_lambert_term() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let output = render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[(1, Mat4::IDENTITY, mesh, Material::default())],
    );

    let center = pixel(&mut renderer, output, VIEWPORT / 2, VIEWPORT / 2);
    let expected = expected_front_face();
    assert!(center.x > 0.1, "center pixel is black: {center:?}");
    assert_close(center.x, expected, 0.03, "red");
    assert_close(center.y, expected, 0.03, "green");
    assert_close(center.z, expected, 0.03, "blue");

    // Diffuse dominates for a dielectric: close to N.L / pi plus a little
    // specular and ambient.
    let n_dot_l = Vec3::NEG_Z.dot(-SUN_DIRECTION.normalize());
    let lambert = n_dot_l / PI;
    assert!(center.x > lambert * 0.9 && center.x < lambert * 1.3);

    // Nothing covers the corner
    let corner = pixel(&mut renderer, output, 0, 0);
    assert!(corner.xyz().length() < 1e-3, "background should be the clear color");

    // Bloom is off: the pass never ran and its chain holds no energy
    let stats = renderer.statistics();
    assert!(!stats.executed(PassKind::Bloom));
    let bloom = renderer.backend_mut().read_texture(graph.bloom_output()).unwrap();
    assert!(bloom.iter().all(|texel| texel.xyz() == Vec3::ZERO));
}

#[test]
fn test_lit_face_is_evenly_lit_across_its_interior() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let output = render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[(1, Mat4::IDENTITY, mesh, Material::default())],
    );

    // The face spans about 17 pixels; stay clear of its silhouette
    let center = VIEWPORT / 2;
    let expected = expected_front_face();
    let mut row = Vec::new();
    for x in center - 6..=center + 6 {
        let value = pixel(&mut renderer, output, x, center).x;
        assert_close(value, expected, 0.03, "lit face");
        row.push(value);
    }
    let (min, max) = row
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    assert!(max - min < 0.01, "lit face is not uniform: {row:?}");
}

#[test]
fn test_statistics_for_a_lit_frame() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[
            (1, Mat4::IDENTITY, mesh, Material::default()),
            (2, Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0)), mesh, Material::default()),
        ],
    );

    let stats = renderer.statistics();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.index_count, 72);
    assert_eq!(stats.shadow_draw_calls, 2);
    assert_eq!(stats.dropped_draws, 0);
    assert_eq!(
        stats.executed_passes,
        vec![PassKind::Shadow, PassKind::Geometry, PassKind::Lighting, PassKind::Composite]
    );
}

#[test]
fn test_picking_reports_the_entity_under_the_cursor() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[(42, Mat4::IDENTITY, mesh, Material::default())],
    );

    assert_eq!(renderer.pick(&graph, VIEWPORT / 2, VIEWPORT / 2).unwrap(), Some(42));
    assert_eq!(renderer.pick(&graph, 0, 0).unwrap(), None);
}

#[test]
fn test_emissive_cube_glows_without_lights() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);
    let material = Material::new("glow")
        .with_albedo(glam::Vec4::new(0.0, 0.0, 0.0, 1.0))
        .with_emissive(Vec3::new(1.0, 0.0, 0.0), 0.5);

    let output = render_frame(
        &mut renderer,
        &mut graph,
        LightData::new(),
        &[(1, Mat4::IDENTITY, mesh, material)],
    );

    let center = pixel(&mut renderer, output, VIEWPORT / 2, VIEWPORT / 2);
    assert_close(center.x, 0.5, 0.02, "emissive red");
    assert!(center.y < 0.01 && center.z < 0.01);
    assert!(!renderer.statistics().executed(PassKind::Shadow));
}

#[rstest]
#[case::none(TonemapCurve::None)]
#[case::aces(TonemapCurve::Aces)]
#[case::filmic(TonemapCurve::Filmic)]
#[case::uncharted(TonemapCurve::Uncharted)]
fn test_every_tonemap_keeps_black_black(#[case] curve: TonemapCurve) {
    let mut renderer = software_renderer();
    renderer.set_tonemap(curve);
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let output = render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[(1, Mat4::IDENTITY, mesh, Material::default())],
    );

    assert!(pixel(&mut renderer, output, 0, 0).xyz().length() < 1e-3);
    assert!(pixel(&mut renderer, output, VIEWPORT / 2, VIEWPORT / 2).x > 0.05);
}

#[rstest]
#[case::bright(1e4)]
#[case::beyond_half_float(1e6)]
#[case::extreme(1e9)]
fn test_overbright_light_tonemaps_to_white(#[case] intensity: f32) {
    let mut renderer = software_renderer();
    renderer.set_tonemap(TonemapCurve::Aces);
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let mut lights = LightData::new();
    lights.push_directional(ResolvedDirectionalLight {
        direction: SUN_DIRECTION.normalize(),
        color: Vec3::ONE,
        intensity,
    });
    let output = render_frame(
        &mut renderer,
        &mut graph,
        lights,
        &[(1, Mat4::IDENTITY, mesh, Material::default())],
    );

    let center = pixel(&mut renderer, output, VIEWPORT / 2, VIEWPORT / 2);
    assert!(center.xyz().min_element() > 0.9, "intensity {intensity}: {center:?}");

    let hdr = renderer
        .backend_mut()
        .read_pixel(graph.targets().lighting.color[0], VIEWPORT / 2, VIEWPORT / 2)
        .unwrap();
    assert!(hdr.is_finite());
    assert!(hdr.x <= deferred_renderer::shading::HDR_MAX);
}

#[test]
fn test_bloom_and_fxaa_run_when_enabled() {
    let mut renderer = software_renderer();
    renderer.set_bloom_enabled(true);
    renderer.set_bloom_strength(0.5);
    renderer.set_bloom_threshold(0.1, 0.05);
    renderer.set_fxaa_enabled(true);
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);
    let material = Material::default().with_emissive(Vec3::ONE, 4.0);

    render_frame(
        &mut renderer,
        &mut graph,
        sun_only(),
        &[(1, Mat4::IDENTITY, mesh, material)],
    );

    assert_eq!(
        renderer.statistics().executed_passes,
        vec![
            PassKind::Shadow,
            PassKind::Geometry,
            PassKind::Lighting,
            PassKind::Bloom,
            PassKind::Composite,
            PassKind::Fxaa,
        ]
    );
    let bloom = renderer.backend_mut().read_texture(graph.bloom_output()).unwrap();
    assert!(bloom.iter().any(|texel| texel.x > 0.0));
}

#[test]
fn test_excess_directional_lights_are_dropped() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let mut lights = LightData::new();
    for _ in 0..MAX_NUM_DIR_LIGHTS + 3 {
        lights.push_directional(ResolvedDirectionalLight {
            direction: SUN_DIRECTION.normalize(),
            color: Vec3::ONE,
            intensity: 0.1,
        });
    }
    assert_eq!(lights.directional.len(), MAX_NUM_DIR_LIGHTS);

    render_frame(
        &mut renderer,
        &mut graph,
        lights,
        &[(1, Mat4::IDENTITY, mesh, Material::default())],
    );
    assert_eq!(renderer.statistics().dropped_lights, 3);
}

#[test]
fn test_directional_lights_written_directly_past_the_cap_are_dropped() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(VIEWPORT, VIEWPORT).unwrap();
    let mesh = cube(&mut renderer);

    let mut lights = LightData::new();
    lights.directional = vec![
        ResolvedDirectionalLight {
            direction: SUN_DIRECTION.normalize(),
            color: Vec3::ONE,
            intensity: 0.1,
        };
        MAX_NUM_DIR_LIGHTS + 3
    ];

    render_frame(
        &mut renderer,
        &mut graph,
        lights,
        &[(1, Mat4::IDENTITY, mesh, Material::default())],
    );
    assert_eq!(renderer.statistics().dropped_lights, 3);
}

#[test]
fn test_batch_overflow_drops_extra_draws() {
    common::init_logger();
    let config = common::test_config().with_max_draw_commands(2);
    let mut renderer =
        deferred_renderer::Renderer::new(deferred_renderer::SoftwareBackend::new(), config).unwrap();
    let mut graph = renderer.create_viewport(16, 16).unwrap();
    let mesh = cube(&mut renderer);

    renderer
        .begin_frame(common::front_camera(16, 16), LightData::new())
        .unwrap();
    let material = Material::default();
    let accepted: Vec<bool> = (0..3)
        .map(|i| {
            let transform = Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0));
            renderer.submit(transform, mesh, &material, CullMode::Back)
        })
        .collect();
    renderer.end_frame(&mut graph).unwrap();

    assert_eq!(accepted, vec![true, true, false]);
    assert_eq!(renderer.statistics().draw_calls, 2);
    assert_eq!(renderer.statistics().dropped_draws, 1);
}

#[test]
fn test_reserve_preallocates_up_to_the_batch_limit() {
    common::init_logger();
    let config = common::test_config().with_max_draw_commands(8);
    let mut renderer =
        deferred_renderer::Renderer::new(deferred_renderer::SoftwareBackend::new(), config).unwrap();
    let mut graph = renderer.create_viewport(16, 16).unwrap();
    let mesh = cube(&mut renderer);

    renderer
        .begin_frame(common::front_camera(16, 16), LightData::new())
        .unwrap();
    renderer.reserve(6);
    let allocated = renderer.batch().allocated();
    assert!(allocated >= 6);

    let material = Material::default();
    for i in 0..6 {
        let transform = Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0));
        assert!(renderer.submit(transform, mesh, &material, CullMode::Back));
    }
    assert_eq!(renderer.batch().allocated(), allocated);
    assert_eq!(renderer.batch().len(), 6);

    // Reserving past the limit does not raise it
    renderer.reserve(100);
    let accepted = (0..4)
        .filter(|_| renderer.submit(Mat4::IDENTITY, mesh, &material, CullMode::Back))
        .count();
    assert_eq!(accepted, 2);
    renderer.end_frame(&mut graph).unwrap();
    assert_eq!(renderer.statistics().dropped_draws, 2);
}

#[test]
fn test_destroyed_mesh_is_skipped() {
    let mut renderer = software_renderer();
    let mut graph = renderer.create_viewport(16, 16).unwrap();
    let mesh = cube(&mut renderer);

    renderer
        .begin_frame(common::front_camera(16, 16), sun_only())
        .unwrap();
    renderer.submit(Mat4::IDENTITY, mesh, &Material::default(), CullMode::Back);
    assert!(renderer.destroy_mesh(mesh));
    renderer.end_frame(&mut graph).unwrap();

    let stats = renderer.statistics();
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(stats.skipped_draws, 1);
    assert_eq!(renderer.backend().live_geometry_count(), 0);
}
