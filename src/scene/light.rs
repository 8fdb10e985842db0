//! Light types and per-frame light collection

use glam::{Mat4, Vec3, Vec4Swizzles};

use super::{NodeId, TransformHierarchy};
use crate::backend::TextureHandle;

/// Maximum number of point lights evaluated per frame
pub const MAX_NUM_LIGHTS: usize = 16;
/// Maximum number of directional lights evaluated per frame
pub const MAX_NUM_DIR_LIGHTS: usize = 4;

/// Directional light component (like the sun)
///
/// The direction comes from the owning node: it shines along the node's
/// world -Z axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        let mut light = Self {
            color,
            intensity: 0.0,
        };
        light.set_intensity(intensity);
        light
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Negative and NaN intensities are stored as zero.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = clamp_intensity(intensity);
    }
}

/// Point light component
/// Position comes from the owning node's world translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    intensity: f32,
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

impl PointLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        let mut light = Self {
            color,
            ..Default::default()
        };
        light.set_intensity(intensity);
        light
    }

    pub fn with_attenuation(mut self, constant: f32, linear: f32, quadratic: f32) -> Self {
        self.constant = constant;
        self.linear = linear;
        self.quadratic = quadratic;
        self
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Negative and NaN intensities are stored as zero.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = clamp_intensity(intensity);
    }
}

fn clamp_intensity(intensity: f32) -> f32 {
    if intensity.is_nan() {
        0.0
    } else {
        intensity.max(0.0)
    }
}

/// Light component attached to a scene node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneLight {
    Directional(DirectionalLight),
    Point(PointLight),
}

/// A directional light resolved to world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedDirectionalLight {
    /// Unit vector the light travels along
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

/// A point light resolved to world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

/// Ambient lighting and the optional irradiance map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub ambient_color: Vec3,
    pub ambient_intensity: f32,
    /// Equirectangular irradiance texture indexed by surface normal
    pub irradiance: Option<TextureHandle>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            ambient_color: Vec3::splat(0.03),
            ambient_intensity: 1.0,
            irradiance: None,
        }
    }
}

/// Lights for one frame, already capped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightData {
    pub directional: Vec<ResolvedDirectionalLight>,
    pub points: Vec<ResolvedPointLight>,
    /// Overrides the renderer's environment when set
    pub environment: Option<Environment>,
    pub dropped_directional: usize,
    pub dropped_points: usize,
}

impl LightData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directional light, dropping it when the cap is reached.
    pub fn push_directional(&mut self, light: ResolvedDirectionalLight) -> bool {
        if self.directional.len() >= MAX_NUM_DIR_LIGHTS {
            self.dropped_directional += 1;
            return false;
        }
        self.directional.push(light);
        true
    }

    /// Add a point light, dropping it when the cap is reached.
    pub fn push_point(&mut self, light: ResolvedPointLight) -> bool {
        if self.points.len() >= MAX_NUM_LIGHTS {
            self.dropped_points += 1;
            return false;
        }
        self.points.push(light);
        true
    }

    /// Lights stored past the caps by writing the vectors directly. The
    /// lighting pass ignores them.
    pub fn overflow(&self) -> usize {
        self.directional.len().saturating_sub(MAX_NUM_DIR_LIGHTS)
            + self.points.len().saturating_sub(MAX_NUM_LIGHTS)
    }

    /// Every light that will not reach the shader.
    pub fn dropped(&self) -> usize {
        self.dropped_directional + self.dropped_points + self.overflow()
    }

    /// The light that casts shadows: the first directional light.
    pub fn sun(&self) -> Option<&ResolvedDirectionalLight> {
        self.directional.first()
    }
}

/// Gathers scene lights into a capped [`LightData`]
#[derive(Debug, Default)]
pub struct LightCollector {
    environment: Option<Environment>,
}

impl LightCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_environment(&mut self, environment: Option<Environment>) {
        self.environment = environment;
    }

    /// Collect lights given their world matrices. The first lights seen are
    /// kept; the rest are dropped with one warning per light type.
    pub fn collect<'a>(&self, lights: impl IntoIterator<Item = (Mat4, &'a SceneLight)>) -> LightData {
        let mut data = LightData {
            environment: self.environment,
            ..Default::default()
        };

        for (world, light) in lights {
            match light {
                SceneLight::Directional(light) => {
                    let direction = world.transform_vector3(-Vec3::Z).normalize_or_zero();
                    if direction == Vec3::ZERO {
                        log::warn!("Directional light with a degenerate transform skipped");
                        continue;
                    }
                    data.push_directional(ResolvedDirectionalLight {
                        direction,
                        color: light.color,
                        intensity: light.intensity(),
                    });
                }
                SceneLight::Point(light) => {
                    data.push_point(ResolvedPointLight {
                        position: world.w_axis.xyz(),
                        color: light.color,
                        intensity: light.intensity(),
                        constant: light.constant,
                        linear: light.linear,
                        quadratic: light.quadratic,
                    });
                }
            }
        }

        if data.dropped_directional > 0 {
            log::warn!(
                "{} directional lights exceed the limit of {MAX_NUM_DIR_LIGHTS} and were dropped",
                data.dropped_directional
            );
        }
        if data.dropped_points > 0 {
            log::warn!(
                "{} point lights exceed the limit of {MAX_NUM_LIGHTS} and were dropped",
                data.dropped_points
            );
        }
        data
    }

    /// Collect lights attached to hierarchy nodes, resolving world transforms
    /// through the parent chain. Unknown nodes are skipped with a warning.
    pub fn collect_from_hierarchy<'a>(
        &self,
        hierarchy: &mut TransformHierarchy,
        lights: impl IntoIterator<Item = (NodeId, &'a SceneLight)>,
    ) -> LightData {
        let mut resolved = Vec::new();
        for (node, light) in lights {
            match hierarchy.world_matrix(node) {
                Ok(world) => resolved.push((world, light)),
                Err(err) => log::warn!("Light on node {node:?} skipped: {err}"),
            }
        }
        self.collect(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Transform;
    use glam::Quat;

    #[test]
    fn test_intensity_is_clamped_at_the_editing_boundary() {
        let mut light = PointLight::new(Vec3::ONE, -3.0);
        assert_eq!(light.intensity(), 0.0);
        light.set_intensity(f32::NAN);
        assert_eq!(light.intensity(), 0.0);
        light.set_intensity(2.5);
        assert_eq!(light.intensity(), 2.5);
        assert_eq!(DirectionalLight::new(Vec3::ONE, -1.0).intensity(), 0.0);
    }

    #[test]
    fn test_directional_overflow_is_truncated_first_seen_first_kept() {
        let lights: Vec<SceneLight> = (0..MAX_NUM_DIR_LIGHTS + 3)
            .map(|i| SceneLight::Directional(DirectionalLight::new(Vec3::ONE, i as f32)))
            .collect();
        let data = LightCollector::new().collect(lights.iter().map(|l| (Mat4::IDENTITY, l)));
        assert_eq!(data.directional.len(), MAX_NUM_DIR_LIGHTS);
        assert_eq!(data.dropped_directional, 3);
        assert_eq!(data.directional[0].intensity, 0.0);
        assert_eq!(data.directional[MAX_NUM_DIR_LIGHTS - 1].intensity, 3.0);
    }

    #[test]
    fn test_point_overflow_is_truncated() {
        let light = SceneLight::Point(PointLight::default());
        let data = LightCollector::new().collect((0..40).map(|_| (Mat4::IDENTITY, &light)));
        assert_eq!(data.points.len(), MAX_NUM_LIGHTS);
        assert_eq!(data.dropped_points, 40 - MAX_NUM_LIGHTS);
        assert_eq!(data.dropped(), 40 - MAX_NUM_LIGHTS);
    }

    #[test]
    fn test_lights_written_past_the_caps_count_as_dropped() {
        let mut data = LightData::new();
        data.directional = vec![
            ResolvedDirectionalLight {
                direction: Vec3::NEG_Y,
                color: Vec3::ONE,
                intensity: 1.0,
            };
            MAX_NUM_DIR_LIGHTS + 3
        ];
        let point = ResolvedPointLight {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        };
        data.points = vec![point; MAX_NUM_LIGHTS];
        assert_eq!(data.overflow(), 3);
        assert_eq!(data.dropped(), 3);

        assert!(!data.push_point(point));
        assert_eq!(data.overflow(), 3);
        assert_eq!(data.dropped(), 4);
    }

    #[test]
    fn test_hierarchy_resolves_direction_and_position() {
        let mut hierarchy = TransformHierarchy::new();
        let parent = hierarchy
            .insert(Transform::from_position(Vec3::new(0.0, 5.0, 0.0)), None)
            .unwrap();
        let sun_node = hierarchy
            .insert(
                Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2)),
                Some(parent),
            )
            .unwrap();
        let lamp_node = hierarchy
            .insert(Transform::from_position(Vec3::X), Some(parent))
            .unwrap();

        let sun = SceneLight::Directional(DirectionalLight::default());
        let lamp = SceneLight::Point(PointLight::default());
        let data = LightCollector::new()
            .collect_from_hierarchy(&mut hierarchy, [(sun_node, &sun), (lamp_node, &lamp)]);

        assert!((data.directional[0].direction - Vec3::NEG_Y).length() < 1e-5);
        assert!((data.points[0].position - Vec3::new(1.0, 5.0, 0.0)).length() < 1e-6);
    }
}
