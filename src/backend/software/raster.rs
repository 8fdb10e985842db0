//! Triangle setup and scan conversion.

use glam::{Vec2, Vec3, Vec4};

use crate::backend::types::{CullMode, Viewport};

/// Per-vertex attributes interpolated across a triangle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Varyings {
    pub world_position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Varyings {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            world_position: self.world_position.lerp(other.world_position, t),
            normal: self.normal.lerp(other.normal, t),
            uv: self.uv.lerp(other.uv, t),
            tangent: self.tangent.lerp(other.tangent, t),
        }
    }

    fn weighted(v: [&Self; 3], w: [f32; 3]) -> Self {
        Self {
            world_position: v[0].world_position * w[0]
                + v[1].world_position * w[1]
                + v[2].world_position * w[2],
            normal: v[0].normal * w[0] + v[1].normal * w[1] + v[2].normal * w[2],
            uv: v[0].uv * w[0] + v[1].uv * w[1] + v[2].uv * w[2],
            tangent: v[0].tangent * w[0] + v[1].tangent * w[1] + v[2].tangent * w[2],
        }
    }
}

/// Output of the vertex stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClipVertex {
    pub clip: Vec4,
    pub varyings: Varyings,
}

/// A fragment produced by [`rasterize_triangle`].
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub x: u32,
    pub y: u32,
    pub depth: f32,
    pub front_facing: bool,
    pub varyings: Varyings,
}

/// Clip a triangle against the near plane (`z >= 0` in clip space).
///
/// Returns the surviving convex polygon, possibly empty.
pub fn clip_near(triangle: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut output = Vec::with_capacity(4);
    for i in 0..3 {
        let current = triangle[i];
        let next = triangle[(i + 1) % 3];
        let current_inside = current.clip.z >= 0.0;
        let next_inside = next.clip.z >= 0.0;
        if current_inside {
            output.push(current);
        }
        if current_inside != next_inside {
            let t = current.clip.z / (current.clip.z - next.clip.z);
            output.push(ClipVertex {
                clip: current.clip.lerp(next.clip, t),
                varyings: current.varyings.lerp(&next.varyings, t),
            });
        }
    }
    output
}

struct ScreenVertex {
    position: Vec2,
    depth: f32,
    inv_w: f32,
}

fn to_screen(vertex: &ClipVertex, viewport: &Viewport) -> Option<ScreenVertex> {
    let w = vertex.clip.w;
    if w.abs() < 1e-8 {
        return None;
    }
    let ndc = vertex.clip.truncate() / w;
    Some(ScreenVertex {
        position: Vec2::new(
            viewport.x + (ndc.x * 0.5 + 0.5) * viewport.width,
            viewport.y + (0.5 - ndc.y * 0.5) * viewport.height,
        ),
        depth: ndc.z,
        inv_w: 1.0 / w,
    })
}

#[inline]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

/// Scan-convert one triangle, calling `shade` for every covered pixel center
/// inside both the viewport and the `bounds` of the target.
///
/// Triangles wound counter-clockwise in NDC are front facing. Depth is
/// interpolated linearly in screen space, varyings perspective-correctly.
/// Fragments whose depth leaves `[0, 1]` are discarded.
pub fn rasterize_triangle(
    vertices: [&ClipVertex; 3],
    viewport: &Viewport,
    bounds: (u32, u32),
    cull_mode: CullMode,
    mut shade: impl FnMut(Fragment),
) {
    let (Some(s0), Some(s1), Some(s2)) = (
        to_screen(vertices[0], viewport),
        to_screen(vertices[1], viewport),
        to_screen(vertices[2], viewport),
    ) else {
        return;
    };

    let area = edge(s0.position, s1.position, s2.position);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    // Screen space has y pointing down, which flips NDC winding.
    let front_facing = area < 0.0;
    match cull_mode {
        CullMode::Back if !front_facing => return,
        CullMode::Front if front_facing => return,
        _ => {}
    }

    let min = s0.position.min(s1.position).min(s2.position);
    let max = s0.position.max(s1.position).max(s2.position);
    let x_start = min.x.floor().max(viewport.x.max(0.0)) as i64;
    let y_start = min.y.floor().max(viewport.y.max(0.0)) as i64;
    let x_end = (max.x.ceil() as i64)
        .min((viewport.x + viewport.width).ceil() as i64)
        .min(bounds.0 as i64);
    let y_end = (max.y.ceil() as i64)
        .min((viewport.y + viewport.height).ceil() as i64)
        .min(bounds.1 as i64);

    for y in y_start.max(0)..y_end {
        for x in x_start.max(0)..x_end {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let b0 = edge(s1.position, s2.position, p) / area;
            let b1 = edge(s2.position, s0.position, p) / area;
            let b2 = edge(s0.position, s1.position, p) / area;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }

            let depth = b0 * s0.depth + b1 * s1.depth + b2 * s2.depth;
            if !(0.0..=1.0).contains(&depth) {
                continue;
            }

            let p0 = b0 * s0.inv_w;
            let p1 = b1 * s1.inv_w;
            let p2 = b2 * s2.inv_w;
            let sum = p0 + p1 + p2;
            if sum.abs() < 1e-12 {
                continue;
            }
            let weights = [p0 / sum, p1 / sum, p2 / sum];

            shade(Fragment {
                x: x as u32,
                y: y as u32,
                depth,
                front_facing,
                varyings: Varyings::weighted(
                    [&vertices[0].varyings, &vertices[1].varyings, &vertices[2].varyings],
                    weights,
                ),
            });
        }
    }
}
