//! Directional shadow map pass
//!
//! Renders every batched mesh from the sun's point of view into the shadow
//! map. The light projection is an orthographic box fitted around the
//! bounding sphere of all draws.

use glam::{Mat4, Vec3};

use super::{FrameContext, FramePhase, RenderPass};
use crate::backend::{BackendError, BlendState, DepthState, GraphicsBackend, PipelineHandle};
use crate::error::RenderResult;
use crate::math::Aabb;
use crate::render_graph::RenderGraphData;
use crate::uniforms::{slot, CameraUniform, ObjectUniform};

/// Light-space view and projection for a directional light that travels
/// along `direction` and must cover `bounds`.
///
/// Returns `None` for a zero direction or empty bounds.
pub fn fit_light_projection(direction: Vec3, bounds: &Aabb) -> Option<(Mat4, Mat4, Vec3)> {
    let direction = direction.normalize_or_zero();
    if direction == Vec3::ZERO || bounds.is_empty() {
        return None;
    }
    let (center, radius) = bounds.bounding_sphere();
    let radius = radius.max(1e-3);
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let eye = center - direction * radius * 2.0;

    let view = Mat4::look_at_rh(eye, center, up);
    let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, radius * 0.5, radius * 3.5);
    Some((view, projection, eye))
}

pub struct ShadowPass {
    pipeline: PipelineHandle,
}

impl ShadowPass {
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self { pipeline }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for ShadowPass {
    fn name(&self) -> &'static str {
        "Shadow Pass"
    }

    fn phase(&self) -> FramePhase {
        FramePhase::Shadow
    }

    fn execute(
        &mut self,
        backend: &mut B,
        graph: &RenderGraphData,
        frame: &mut FrameContext<'_>,
    ) -> RenderResult<bool> {
        let Some(sun) = frame.lights.sun() else {
            return Ok(false);
        };

        let bounds = frame
            .batch
            .commands()
            .iter()
            .filter_map(|command| {
                frame
                    .meshes
                    .get(command.mesh)
                    .map(|mesh| mesh.bounds.transformed(&command.transform))
            })
            .fold(Aabb::EMPTY, |acc, b| acc.union(&b));
        let Some((view, projection, eye)) = fit_light_projection(sun.direction, &bounds) else {
            return Ok(false);
        };

        let view_projection = projection * view;
        let camera = CameraUniform {
            view,
            projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            position: eye.extend(1.0),
        };

        let shadow_map = graph.shadow_map();
        backend.begin_render_pass(&shadow_map.render_pass(None, Some(1.0)))?;
        backend.set_viewport(shadow_map.viewport());
        backend.set_pipeline(self.pipeline);
        backend.set_depth_state(DepthState::READ_WRITE);
        backend.set_blend_state(None::<BlendState>);
        backend.set_uniforms(slot::CAMERA, bytemuck::bytes_of(&camera));

        for command in frame.batch.commands() {
            let Some(mesh) = frame.meshes.get(command.mesh) else {
                continue;
            };
            backend.set_cull_mode(command.cull_mode);
            let object = ObjectUniform::new(command.transform, command.entity_id);
            backend.set_uniforms(slot::OBJECT, bytemuck::bytes_of(&object));
            match backend.draw_indexed(mesh.geometry) {
                Ok(_) => frame.stats.shadow_draw_calls += 1,
                Err(BackendError::InvalidHandle(what)) => {
                    log::trace!("Shadow pass skipped a draw with a stale {what} handle");
                }
                Err(err) => {
                    let _ = backend.end_render_pass();
                    return Err(err.into());
                }
            }
        }

        backend.end_render_pass()?;
        frame.shadow_view_projection = Some(view_projection);
        Ok(true)
    }
}

/// Depth-only shadow caster program
pub const SHADOW_SHADER: &str = r#"
// Shadow depth shader

struct Camera {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    inverse_view_projection: mat4x4<f32>,
    position: vec4<f32>,
}

struct Object {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    entity_id: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> object: Object;

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    return camera.view_projection * object.model * vec4<f32>(input.position, 1.0);
}

@fragment
fn fs_main() {
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fitted_projection_contains_bounds() {
        let bounds = Aabb::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(4.0, 1.0, 2.0));
        let direction = Vec3::new(0.3, -1.0, 0.2);
        let (view, projection, _) = fit_light_projection(direction, &bounds).unwrap();
        let view_projection = projection * view;
        for corner in bounds.corners() {
            let ndc = view_projection.project_point3(corner);
            assert!(ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4, "{ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z), "{ndc:?}");
        }
    }

    #[test]
    fn test_straight_down_light_has_a_valid_basis() {
        let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let (view, _, eye) = fit_light_projection(Vec3::NEG_Y, &bounds).unwrap();
        assert!(view.is_finite());
        assert!(eye.y > 1.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(fit_light_projection(Vec3::ZERO, &bounds).is_none());
        assert!(fit_light_projection(Vec3::X, &Aabb::EMPTY).is_none());
    }
}
