//! Ray-triangle intersection.
//!
//! Uses the Möller-Trumbore algorithm.

use tessera_math::{Interval, Ray, Vec3};

/// Closest intersection between a ray and a mesh face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Index of the face in the mesh
    pub face: u32,
    /// Ray parameter of the hit point
    pub t: f32,
    /// Barycentric weight of the second corner
    pub u: f32,
    /// Barycentric weight of the third corner
    pub v: f32,
}

/// Intersect `ray` with triangle `v` inside `ray_t`.
///
/// Returns `(t, u, v)` on a hit. Both faces are hit.
pub fn intersect_triangle(ray: &Ray, v: &[Vec3; 3], ray_t: Interval) -> Option<(f32, f32, f32)> {
    let edge1 = v[1] - v[0];
    let edge2 = v[2] - v[0];

    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);

    // Parallel to the triangle plane
    if a.abs() < 1e-8 {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - v[0];
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let w = f * ray.direction.dot(q);
    if w < 0.0 || u + w > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if !ray_t.contains(t) {
        return None;
    }

    Some((t, u, w))
}
