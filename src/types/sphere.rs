//! Bounding sphere utility primitive
//!
//! Spheres are not hierarchy nodes; they exist as a query/culling
//! convenience alongside the AABB. Construction from a point cloud uses
//! Ritter's algorithm.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::Aabb;

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius, non-negative
    pub radius: f32,
}

impl BoundingSphere {
    /// Create a new bounding sphere. A negative radius is clamped to zero.
    #[inline]
    pub fn new(center: Vec3, radius: f32) -> Self {
        BoundingSphere {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Test if a point is inside the sphere
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }

    /// Symmetric sphere-sphere overlap test
    #[inline]
    pub fn intersects_sphere(&self, other: &BoundingSphere) -> bool {
        let r = self.radius + other.radius;
        (other.center - self.center).length_squared() <= r * r
    }

    /// Sphere-AABB overlap via the closest point on the box
    #[inline]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.distance_squared_to_point(self.center) <= self.radius * self.radius
    }

    /// Tight-fitting sphere around a point set (Ritter's algorithm).
    ///
    /// O(n): pick extremes along an initial axis, seed the sphere from
    /// the two most distant points found, then grow to cover stragglers.
    /// An empty set yields a zero sphere at the origin.
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return BoundingSphere {
                center: Vec3::ZERO,
                radius: 0.0,
            };
        }

        // Point farthest from the first point
        let start = points[0];
        let mut p1 = start;
        let mut max_dist = 0.0f32;
        for &p in points {
            let d = (p - start).length_squared();
            if d > max_dist {
                max_dist = d;
                p1 = p;
            }
        }

        // Point farthest from that one
        let mut p2 = p1;
        max_dist = 0.0;
        for &p in points {
            let d = (p - p1).length_squared();
            if d > max_dist {
                max_dist = d;
                p2 = p;
            }
        }

        // Initial sphere from the two extremes
        let mut center = (p1 + p2) * 0.5;
        let mut radius = (p1 - p2).length() * 0.5;

        // Grow to include all points
        for &p in points {
            let dist = (p - center).length();
            if dist > radius {
                let new_radius = (radius + dist) * 0.5;
                let delta = dist - radius;
                center += (p - center).normalize() * (delta * 0.5);
                radius = new_radius;
            }
        }

        BoundingSphere { center, radius }
    }
}
