//! Triangle mesh with face-varying attributes.
//!
//! Positions are shared between faces, while normals and UVs are stored per
//! triangle corner so that hard edges and UV seams survive merging.

use rayon::prelude::*;
use tessera_math::{Aabb, Vec2, Vec3};

use crate::error::{MeshError, MeshResult};

/// A triangle mesh.
///
/// `normals`, `uvs` and `material_ids` are indexed by face and always have
/// `triangle_count()` entries once the mesh passes `validate()`.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    /// Vertex positions
    pub positions: Vec<Vec3>,

    /// Vertex indices, three per face
    pub triangles: Vec<[u32; 3]>,

    /// Per-corner normals
    pub normals: Vec<[Vec3; 3]>,

    /// Per-corner texture coordinates
    pub uvs: Vec<[Vec2; 3]>,

    /// Material of each face, if the source file assigned one
    pub material_ids: Vec<Option<u32>>,

    /// Bounds of `positions`
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a mesh from positions and faces.
    ///
    /// Normals are synthesized as flat face normals, UVs are zero and no
    /// materials are assigned.
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        let normals = flat_normals(&positions, &triangles);
        let face_count = triangles.len();
        let bounds = compute_bounds(&positions);
        Self {
            positions,
            triangles,
            normals,
            uvs: vec![[Vec2::ZERO; 3]; face_count],
            material_ids: vec![None; face_count],
            bounds,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Vertex indices of face `face`.
    pub fn triangle(&self, face: usize) -> Option<[u32; 3]> {
        self.triangles.get(face).copied()
    }

    /// Corner positions of face `face`.
    ///
    /// Returns `None` if the face does not exist or references a missing vertex.
    pub fn triangle_vertices(&self, face: usize) -> Option<[Vec3; 3]> {
        let [a, b, c] = self.triangle(face)?;
        Some([
            *self.positions.get(a as usize)?,
            *self.positions.get(b as usize)?,
            *self.positions.get(c as usize)?,
        ])
    }

    pub fn face_normals(&self, face: usize) -> Option<[Vec3; 3]> {
        self.normals.get(face).copied()
    }

    pub fn face_uvs(&self, face: usize) -> Option<[Vec2; 3]> {
        self.uvs.get(face).copied()
    }

    pub fn material_id(&self, face: usize) -> Option<u32> {
        self.material_ids.get(face).copied().flatten()
    }

    /// Check that every index is in range and every face attribute is complete.
    pub fn validate(&self) -> MeshResult<()> {
        let faces = self.triangle_count();
        for (name, len) in [
            ("normals", self.normals.len()),
            ("uvs", self.uvs.len()),
            ("material_ids", self.material_ids.len()),
        ] {
            if len != faces {
                return Err(MeshError::AttributeMismatch { name, len, faces });
            }
        }

        let vertex_count = self.vertex_count();
        for (face, tri) in self.triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(MeshError::IndexOutOfRange {
                    face,
                    index,
                    vertex_count,
                });
            }
        }

        Ok(())
    }

    /// Append `other`, shifting its indices past this mesh's vertices.
    pub fn append(&mut self, other: Mesh) {
        let offset = self.positions.len() as u32;
        self.positions.extend(other.positions);
        self.triangles.extend(
            other
                .triangles
                .into_iter()
                .map(|[a, b, c]| [a + offset, b + offset, c + offset]),
        );
        self.normals.extend(other.normals);
        self.uvs.extend(other.uvs);
        self.material_ids.extend(other.material_ids);
        self.bounds = Aabb::surrounding(&self.bounds, &other.bounds);
    }

    /// Positions as `[x, y, z, x, y, z, ...]`.
    pub fn flat_positions(&self) -> &[f32] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Indices as `[a, b, c, a, b, c, ...]`.
    pub fn flat_indices(&self) -> &[u32] {
        bytemuck::cast_slice(&self.triangles)
    }
}

/// Unit normal of a triangle, or zero if it is degenerate.
///
/// Uses `(v2 - v0) x (v1 - v0)`, which points away from a clockwise face.
pub fn flat_normal(v: &[Vec3; 3]) -> Vec3 {
    (v[2] - v[0]).cross(v[1] - v[0]).normalize_or_zero()
}

/// Flat normals replicated to all three corners of every face.
///
/// Faces with out-of-range indices get zero normals; `Mesh::validate`
/// reports them.
pub fn flat_normals(positions: &[Vec3], triangles: &[[u32; 3]]) -> Vec<[Vec3; 3]> {
    triangles
        .par_iter()
        .map(|tri| {
            let corners = tri.map(|i| positions.get(i as usize).copied());
            match corners {
                [Some(a), Some(b), Some(c)] => [flat_normal(&[a, b, c]); 3],
                _ => [Vec3::ZERO; 3],
            }
        })
        .collect()
}

pub(crate) fn compute_bounds(positions: &[Vec3]) -> Aabb {
    positions
        .iter()
        .fold(Aabb::EMPTY, |acc, p| acc.include_point(*p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_quad() -> Mesh {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        Mesh::new(positions, vec![[0, 1, 2], [1, 3, 2]])
    }

    #[test]
    fn test_mesh_creation() {
        let mesh = unit_quad();

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.uvs, vec![[Vec2::ZERO; 3]; 2]);
        assert_eq!(mesh.material_ids, vec![None, None]);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_flat_normals_replicated_per_corner() {
        let mesh = unit_quad();

        // (v2 - v0) x (v1 - v0) = Y x X = -Z
        for corners in &mesh.normals {
            for n in corners {
                assert!((*n - Vec3::NEG_Z).length() < 1e-6);
            }
        }
    }

    #[test]
    fn test_degenerate_face_gets_zero_normal() {
        let normal = flat_normal(&[Vec3::ZERO, Vec3::X, Vec3::X * 2.0]);
        assert_eq!(normal, Vec3::ZERO);
    }

    #[test]
    fn test_bounds_computation() {
        let mesh = Mesh::new(
            vec![
                Vec3::new(-1.0, -2.0, -3.0),
                Vec3::new(4.0, 5.0, 6.0),
                Vec3::new(0.0, 0.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );

        assert_eq!(mesh.bounds.min(), Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(mesh.bounds.max(), Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_accessors_are_bounds_checked() {
        let mesh = unit_quad();

        assert_eq!(mesh.triangle(1), Some([1, 3, 2]));
        assert_eq!(mesh.triangle(2), None);
        assert_eq!(
            mesh.triangle_vertices(0),
            Some([Vec3::ZERO, Vec3::X, Vec3::Y])
        );
        assert!(mesh.face_normals(5).is_none());
        assert!(mesh.face_uvs(5).is_none());
        assert_eq!(mesh.material_id(0), None);
    }

    #[test]
    fn test_validate_reports_out_of_range_index() {
        let mut mesh = unit_quad();
        mesh.triangles[1] = [1, 9, 2];

        match mesh.validate() {
            Err(MeshError::IndexOutOfRange {
                face,
                index,
                vertex_count,
            }) => {
                assert_eq!(face, 1);
                assert_eq!(index, 9);
                assert_eq!(vertex_count, 4);
            }
            other => panic!("expected IndexOutOfRange, got {:?}", other),
        }
        assert!(mesh.triangle_vertices(1).is_none());
    }

    #[test]
    fn test_validate_reports_missing_attributes() {
        let mut mesh = unit_quad();
        mesh.uvs.pop();

        assert!(matches!(
            mesh.validate(),
            Err(MeshError::AttributeMismatch { name: "uvs", len: 1, faces: 2 })
        ));
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut mesh = unit_quad();
        let other = Mesh::new(
            vec![Vec3::Z, Vec3::Z + Vec3::X, Vec3::Z + Vec3::Y],
            vec![[0, 1, 2]],
        );
        mesh.append(other);

        assert_eq!(mesh.vertex_count(), 7);
        assert_eq!(mesh.triangle(2), Some([4, 5, 6]));
        assert_eq!(mesh.normals.len(), 3);
        assert_eq!(mesh.bounds.max().z, 1.0);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_flat_views_share_memory_layout() {
        let mesh = unit_quad();

        assert_eq!(mesh.flat_positions().len(), 12);
        assert_eq!(&mesh.flat_positions()[3..6], &[1.0, 0.0, 0.0]);
        assert_eq!(mesh.flat_indices(), &[0, 1, 2, 1, 3, 2]);
    }
}
