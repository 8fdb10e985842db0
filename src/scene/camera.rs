//! Camera system

use glam::{Mat4, Vec3, Vec4Swizzles};

use crate::uniforms::CameraUniform;

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Projection::Orthographic {
            left: -half_w,
            right: half_w,
            bottom: -half_h,
            top: half_h,
            near,
            far,
        }
    }

    /// Right-handed projection with a `[0, 1]` depth range
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => *far,
        }
    }

    /// Update the aspect ratio from a viewport size. Zero height is ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if height == 0 {
            return;
        }
        let new_aspect = width as f32 / height as f32;
        match self {
            Projection::Perspective { aspect, .. } => *aspect = new_aspect,
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                ..
            } => {
                let half_h = (*top - *bottom) * 0.5;
                let center = (*left + *right) * 0.5;
                *left = center - half_h * new_aspect;
                *right = center + half_h * new_aspect;
            }
        }
    }
}

/// Per-frame camera snapshot consumed by every pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl Default for CameraData {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, &Projection::default())
    }
}

impl CameraData {
    pub fn new(view: Mat4, projection: Mat4, position: Vec3) -> Self {
        Self {
            view,
            projection,
            position,
        }
    }

    pub fn look_at(position: Vec3, target: Vec3, projection: &Projection) -> Self {
        Self {
            view: Mat4::look_at_rh(position, target, Vec3::Y),
            projection: projection.matrix(),
            position,
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn inverse_view_projection(&self) -> Mat4 {
        self.view_projection().inverse()
    }

    /// World-space frustum corners: near plane first, then far, each
    /// counter-clockwise from bottom-left.
    pub fn frustum_corners(&self) -> [Vec3; 8] {
        let inverse = self.inverse_view_projection();
        let ndc = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
        ];
        ndc.map(|p| inverse.project_point3(p))
    }

    /// The 12 frustum edges as line segments for overlay drawing.
    pub fn frustum_lines(&self) -> [(Vec3, Vec3); 12] {
        let c = self.frustum_corners();
        [
            (c[0], c[1]),
            (c[1], c[2]),
            (c[2], c[3]),
            (c[3], c[0]),
            (c[4], c[5]),
            (c[5], c[6]),
            (c[6], c[7]),
            (c[7], c[4]),
            (c[0], c[4]),
            (c[1], c[5]),
            (c[2], c[6]),
            (c[3], c[7]),
        ]
    }

    pub fn to_uniform(&self) -> CameraUniform {
        let view_projection = self.view_projection();
        CameraUniform {
            view: self.view,
            projection: self.projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            position: self.position.extend(1.0),
        }
    }
}

/// Anything that can produce the frame's camera
pub trait CameraDataProvider {
    fn camera_data(&self) -> CameraData;
}

impl CameraDataProvider for CameraData {
    fn camera_data(&self) -> CameraData {
        *self
    }
}

/// Camera attached to a scene node
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SceneCamera {
    pub projection: Projection,
    /// The first primary camera found drives the viewport
    pub primary: bool,
}

impl SceneCamera {
    pub fn new(projection: Projection, primary: bool) -> Self {
        Self {
            projection,
            primary,
        }
    }

    /// Camera data for a node with the given world matrix.
    pub fn camera_data(&self, world: &Mat4) -> CameraData {
        CameraData {
            view: world.inverse(),
            projection: self.projection.matrix(),
            position: world.w_axis.xyz(),
        }
    }
}

/// Camera data of the first primary camera in `cameras`.
pub fn camera_data_from_scene<'a>(
    cameras: impl IntoIterator<Item = (Mat4, &'a SceneCamera)>,
) -> Option<CameraData> {
    cameras
        .into_iter()
        .find(|(_, camera)| camera.primary)
        .map(|(world, camera)| camera.camera_data(&world))
}
