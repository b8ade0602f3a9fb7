//! Triangle primitive and the Möller-Trumbore intersection kernel
//!
//! Triangles carry the index of their position in the source mesh so
//! hits can be mapped back to the original geometry after the build
//! reorders them.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{Aabb, Ray, TRIANGLE_EPSILON};

/// Triangle with a back-reference into its source mesh
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Triangle {
    /// First vertex
    pub a: Vec3,
    /// Second vertex
    pub b: Vec3,
    /// Third vertex
    pub c: Vec3,
    /// Position of this triangle in the source mesh
    pub index: u32,
}

/// Barycentric hit on a triangle
#[derive(Debug, Clone, Copy)]
pub struct TriangleHit {
    /// Distance along the ray
    pub distance: f32,
    /// Barycentric weight of vertex `b`
    pub u: f32,
    /// Barycentric weight of vertex `c`
    pub v: f32,
    /// Barycentric weight of vertex `a` (`1 - u - v`)
    pub w: f32,
}

impl Triangle {
    /// Create a triangle from vertices and its source-mesh index
    #[inline]
    pub fn new(a: Vec3, b: Vec3, c: Vec3, index: u32) -> Self {
        Triangle { a, b, c, index }
    }

    /// Centroid (mean of the three vertices)
    #[inline]
    pub fn centroid(&self) -> Vec3 {
        (self.a + self.b + self.c) / 3.0
    }

    /// Componentwise min/max bounds of the vertices
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: self.a.min(self.b).min(self.c),
            max: self.a.max(self.b).max(self.c),
        }
    }

    /// Geometric normal (zero for degenerate triangles)
    #[inline]
    pub fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }

    /// Möller-Trumbore ray-triangle intersection.
    ///
    /// With `cull_backface` set, triangles facing away from the ray
    /// (determinant below epsilon) are discarded; otherwise only
    /// near-parallel rays are rejected. Hits behind the origin
    /// (`t <= epsilon`) never count.
    pub fn intersect_ray(&self, ray: &Ray, cull_backface: bool) -> Option<TriangleHit> {
        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;

        let h = ray.direction.cross(edge2);
        let det = edge1.dot(h);

        if cull_backface {
            if det < TRIANGLE_EPSILON {
                return None;
            }
        } else if det.abs() < TRIANGLE_EPSILON {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = ray.origin - self.a;
        let u = s.dot(h) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        if t <= TRIANGLE_EPSILON {
            return None;
        }

        Some(TriangleHit {
            distance: t,
            u,
            v,
            w: 1.0 - u - v,
        })
    }
}
