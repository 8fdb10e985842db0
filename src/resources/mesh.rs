//! Mesh data, primitive generation and the GPU mesh table

use crate::backend::{BackendError, BackendResult, GeometryHandle, GraphicsBackend, Vertex};
use crate::math::Aabb;
use glam::{Vec2, Vec3, Vec4};
use slotmap::SlotMap;

/// A mesh with vertex and index data. Triangles wind counter-clockwise
/// when seen from outside.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Object-space bounds of all vertices
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| v.position))
    }

    /// Check that the index list forms whole triangles over existing vertices.
    pub fn validate(&self) -> Result<(), String> {
        if self.indices.is_empty() {
            return Err(format!("mesh '{}' has no indices", self.name));
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!(
                "mesh '{}' has {} indices, not a multiple of 3",
                self.name,
                self.indices.len()
            ));
        }
        if let Some(index) = self.indices.iter().find(|i| **i as usize >= self.vertices.len()) {
            return Err(format!(
                "mesh '{}' index {index} out of range for {} vertices",
                self.name,
                self.vertices.len()
            ));
        }
        Ok(())
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        // (normal, u axis, v axis) per face; v runs down the texture
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::NEG_Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::NEG_Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::NEG_Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::NEG_Y),
            (Vec3::Y, Vec3::X, Vec3::Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
        ];
        let corners = [
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ];

        for (face, (normal, u_axis, v_axis)) in faces.into_iter().enumerate() {
            for uv in corners {
                let position = normal * 0.5 + u_axis * (uv.x - 0.5) + v_axis * (uv.y - 0.5);
                mesh.vertices.push(Vertex {
                    position,
                    normal,
                    uv,
                    tangent: u_axis.extend(1.0),
                });
            }
            let base = face as u32 * 4;
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut mesh = Mesh::new("sphere");

        let segment_angle = std::f32::consts::TAU / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());

                mesh.vertices.push(Vertex {
                    position: normal * 0.5,
                    normal: normal.normalize_or_zero(),
                    uv: Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32),
                    tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
                });
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Create a plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.max(1);
        let mut mesh = Mesh::new("plane");

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                mesh.vertices.push(Vertex {
                    position: Vec3::new(
                        -half_width + x as f32 * step_x,
                        0.0,
                        -half_depth + z as f32 * step_z,
                    ),
                    normal: Vec3::Y,
                    uv: Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }
}

slotmap::new_key_type! {
    /// Handle to a mesh uploaded through a [`MeshCache`]
    pub struct MeshHandle;
}

/// A mesh resident on the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuMesh {
    pub geometry: GeometryHandle,
    pub index_count: u32,
    /// Object-space bounds, used to fit the shadow projection
    pub bounds: Aabb,
}

/// Owner of every uploaded mesh. Draw commands refer to meshes by handle
/// only, so a removed mesh leaves a stale handle instead of a dangling buffer.
#[derive(Debug, Default)]
pub struct MeshCache {
    meshes: SlotMap<MeshHandle, GpuMesh>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload<B: GraphicsBackend>(&mut self, backend: &mut B, mesh: &Mesh) -> BackendResult<MeshHandle> {
        mesh.validate().map_err(BackendError::BufferCreationFailed)?;
        let geometry = backend.upload_geometry(&mesh.vertices, &mesh.indices)?;
        let handle = self.meshes.insert(GpuMesh {
            geometry,
            index_count: mesh.indices.len() as u32,
            bounds: mesh.bounds(),
        });
        log::debug!(
            "Uploaded mesh '{}' ({} triangles) as {:?}",
            mesh.name,
            mesh.triangle_count(),
            handle
        );
        Ok(handle)
    }

    pub fn get(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(handle)
    }

    /// Remove a mesh and free its device buffers. Returns false for unknown handles.
    pub fn remove<B: GraphicsBackend>(&mut self, backend: &mut B, handle: MeshHandle) -> bool {
        match self.meshes.remove(handle) {
            Some(mesh) => {
                backend.destroy_geometry(mesh.geometry);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Free every mesh
    pub fn clear<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (_, mesh) in self.meshes.drain() {
            backend.destroy_geometry(mesh.geometry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    fn assert_outward_winding(mesh: &Mesh) {
        for triangle in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| mesh.vertices[triangle[i] as usize]);
            let face_normal = (b.position - a.position).cross(c.position - a.position);
            if face_normal.length_squared() < 1e-12 {
                continue;
            }
            assert!(
                face_normal.dot(a.normal + b.normal + c.normal) > 0.0,
                "{} triangle {triangle:?} winds clockwise",
                mesh.name
            );
        }
    }

    #[test]
    fn test_primitives_wind_counter_clockwise() {
        assert_outward_winding(&Mesh::cube());
        assert_outward_winding(&Mesh::sphere(16, 8));
        assert_outward_winding(&Mesh::plane(2.0, 2.0, 3));
    }

    #[test]
    fn test_cube_layout() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.bounds(), Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)));
        for vertex in &cube.vertices {
            assert!(vertex.tangent.truncate().dot(vertex.normal).abs() < 1e-6);
        }
        assert!(cube.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_indices() {
        let mut mesh = Mesh::cube();
        mesh.indices.push(0);
        assert!(mesh.validate().is_err());
        mesh.indices.extend_from_slice(&[0, 999]);
        assert!(mesh.validate().is_err());
        assert!(Mesh::new("empty").validate().is_err());
    }

    #[test]
    fn test_cache_upload_and_remove() {
        let mut backend = SoftwareBackend::new();
        let mut cache = MeshCache::new();
        let handle = cache.upload(&mut backend, &Mesh::cube()).unwrap();
        assert_eq!(cache.get(handle).unwrap().index_count, 36);
        assert_eq!(backend.live_geometry_count(), 1);

        assert!(cache.remove(&mut backend, handle));
        assert!(!cache.remove(&mut backend, handle));
        assert!(cache.get(handle).is_none());
        assert_eq!(backend.live_geometry_count(), 0);
    }
}
