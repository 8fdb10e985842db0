//! Metallic-roughness Cook-Torrance reflectance.

use std::f32::consts::PI;

use glam::{Vec3, Vec4Swizzles};

use crate::uniforms::LightsUniform;

/// Roughness is clamped from below so the GGX lobe never degenerates.
pub const MIN_ROUGHNESS: f32 = 0.045;

/// Smallest attenuation denominator accepted for point lights.
pub const MIN_ATTENUATION_DENOMINATOR: f32 = 1e-4;

/// Surface attributes decoded from the G-buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
}

/// GGX / Trowbridge-Reitz normal distribution.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * d * d).max(1e-7)
}

/// Schlick-GGX geometry term for a single direction (direct lighting k).
pub fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    n_dot_x / (n_dot_x * (1.0 - k) + k)
}

pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// `1 / (constant + linear * d + quadratic * d^2)`, with the denominator
/// bounded away from zero.
pub fn point_attenuation(constant: f32, linear: f32, quadratic: f32, distance: f32) -> f32 {
    let denominator = constant + linear * distance + quadratic * distance * distance;
    1.0 / denominator.max(MIN_ATTENUATION_DENOMINATOR)
}

/// Outgoing radiance towards `view_dir` for one light arriving from
/// `light_dir` with the given incoming `radiance`.
pub fn evaluate(surface: &Surface, view_dir: Vec3, light_dir: Vec3, radiance: Vec3) -> Vec3 {
    let n = surface.normal;
    let n_dot_l = n.dot(light_dir).max(0.0);
    if n_dot_l <= 0.0 {
        return Vec3::ZERO;
    }
    let n_dot_v = n.dot(view_dir).max(1e-4);
    let half = (view_dir + light_dir).normalize_or_zero();
    let n_dot_h = n.dot(half).max(0.0);
    let h_dot_v = half.dot(view_dir).max(0.0);

    let roughness = surface.roughness.clamp(MIN_ROUGHNESS, 1.0);
    let f0 = Vec3::splat(0.04).lerp(surface.albedo, surface.metallic);

    let d = distribution_ggx(n_dot_h, roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let f = fresnel_schlick(h_dot_v, f0);

    let specular = d * g * f / (4.0 * n_dot_v * n_dot_l).max(1e-4);
    let kd = (Vec3::ONE - f) * (1.0 - surface.metallic);
    let diffuse = kd * surface.albedo / PI;

    (diffuse + specular) * radiance * n_dot_l
}

/// Sum of every light in `lights` plus ambient.
///
/// `shadow` receives the world position and N·L of the shadow-casting
/// directional light (index 0) and returns its visibility in `[0, 1]`.
/// `irradiance` scales the ambient term when an irradiance map is bound.
pub fn shade(
    surface: &Surface,
    camera_position: Vec3,
    lights: &LightsUniform,
    shadow: impl Fn(Vec3, f32) -> f32,
    irradiance: Option<Vec3>,
) -> Vec3 {
    let view_dir = (camera_position - surface.position).normalize_or_zero();
    let mut color = Vec3::ZERO;

    for (index, light) in lights.directional[..lights.directional_count()]
        .iter()
        .enumerate()
    {
        let light_dir = (-light.direction.xyz()).normalize_or_zero();
        let radiance = light.color.xyz() * light.color.w;
        let mut contribution = evaluate(surface, view_dir, light_dir, radiance);
        if index == 0 && lights.shadow_enabled() && contribution != Vec3::ZERO {
            let n_dot_l = surface.normal.dot(light_dir).max(0.0);
            contribution *= shadow(surface.position, n_dot_l);
        }
        color += contribution;
    }

    for light in &lights.points[..lights.point_count()] {
        let to_light = light.position.xyz() - surface.position;
        let distance = to_light.length();
        let light_dir = to_light.normalize_or_zero();
        let attenuation = point_attenuation(
            light.attenuation.x,
            light.attenuation.y,
            light.attenuation.z,
            distance,
        );
        let radiance = light.color.xyz() * light.color.w * attenuation;
        color += evaluate(surface, view_dir, light_dir, radiance);
    }

    let ambient_light = lights.ambient.xyz() * lights.ambient.w * irradiance.unwrap_or(Vec3::ONE);
    color += ambient_light * surface.albedo * surface.ao;

    color
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use glam::Vec4;

    fn white_surface() -> Surface {
        Surface {
            position: Vec3::ZERO,
            normal: Vec3::Z,
            albedo: Vec3::ONE,
            metallic: 0.0,
            roughness: 0.5,
            ao: 1.0,
        }
    }

    #[test]
    fn test_back_facing_light_contributes_nothing() {
        let c = evaluate(&white_surface(), Vec3::Z, -Vec3::Z, Vec3::ONE);
        assert_eq!(c, Vec3::ZERO);
    }

    #[test]
    fn test_diffuse_scales_with_n_dot_l() {
        let surface = Surface {
            roughness: 1.0,
            ..white_surface()
        };
        // Grazing view keeps the specular lobe away from both samples.
        let view = Vec3::new(-0.9, 0.0, 0.1).normalize();
        let head_on = evaluate(&surface, view, Vec3::Z, Vec3::ONE);
        let tilted_dir = Vec3::new(0.0, 0.866_025_4, 0.5);
        let tilted = evaluate(&surface, view, tilted_dir, Vec3::ONE);
        assert!(tilted.x < head_on.x);
        assert!(tilted.x > 0.0);
    }

    #[test]
    fn test_attenuation_guards_zero_denominator() {
        let a = point_attenuation(0.0, 0.0, 0.0, 0.0);
        assert!(a.is_finite());
        assert!((point_attenuation(1.0, 0.0, 0.0, 10.0) - 1.0).abs() < 1e-6);
        assert!((point_attenuation(1.0, 0.5, 0.25, 2.0) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_shade_applies_shadow_to_first_directional_only() {
        let mut lights = LightsUniform::zeroed();
        lights.directional[0].direction = Vec4::new(0.0, 0.0, -1.0, 0.0);
        lights.directional[0].color = Vec4::new(1.0, 1.0, 1.0, 1.0);
        lights.directional[1] = lights.directional[0];
        lights.counts = [2, 0, 1, 0];

        let surface = white_surface();
        let lit = shade(&surface, Vec3::Z * 5.0, &lights, |_, _| 1.0, None);
        let shadowed = shade(&surface, Vec3::Z * 5.0, &lights, |_, _| 0.0, None);
        assert!((shadowed * 2.0 - lit).length() < 1e-5);
    }

    #[test]
    fn test_ambient_uses_irradiance() {
        let mut lights = LightsUniform::zeroed();
        lights.ambient = Vec4::new(1.0, 1.0, 1.0, 0.5);
        let surface = white_surface();
        let plain = shade(&surface, Vec3::Z, &lights, |_, _| 1.0, None);
        let tinted = shade(&surface, Vec3::Z, &lights, |_, _| 1.0, Some(Vec3::new(2.0, 0.0, 0.0)));
        assert!((plain - Vec3::splat(0.5)).length() < 1e-6);
        assert!((tinted - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
    }
}
