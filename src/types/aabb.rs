//! Axis-aligned bounding box
//!
//! The workhorse primitive of the library. Both hierarchies store an
//! `Aabb` per node; all pruning decisions reduce to the kernels here.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// The empty (inverted) AABB. Unioning anything into it yields that
    /// thing; every intersection test against it misses.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new AABB from min/max corners
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb { min, max }
    }

    /// Create from center and half-extents
    #[inline]
    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Aabb {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Tightest box around a set of points (empty box for an empty set)
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut aabb = Aabb::EMPTY;
        for &p in points {
            aabb.expand_point(p);
        }
        aabb
    }

    /// A non-empty box has `min.k <= max.k` on every axis
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Get center point
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (edge lengths)
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Get half-extents
    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Volume; zero for invalid or flat boxes
    #[inline]
    pub fn volume(&self) -> f32 {
        let d = self.size().max(Vec3::ZERO);
        d.x * d.y * d.z
    }

    /// Surface area (for SAH); zero for invalid boxes
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let d = self.size().max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Longest axis (0=X, 1=Y, 2=Z)
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    /// Expand to include a point
    #[inline]
    pub fn expand_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Expand to include another AABB
    #[inline]
    pub fn expand_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grow uniformly by `margin` on every side
    #[inline]
    pub fn expand(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Union with another AABB
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Check if a point is inside (boundary inclusive)
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Check if this box fully contains another
    #[inline]
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Separating-axis overlap test (boundary-touching boxes overlap)
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    /// Closest point on (or in) the box to `point`.
    ///
    /// Per-axis clamp; an invalid box returns garbage, so callers prune
    /// invalid boxes first (the distance kernels below do).
    #[inline]
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        Vec3::new(
            point.x.max(self.min.x).min(self.max.x),
            point.y.max(self.min.y).min(self.max.y),
            point.z.max(self.min.z).min(self.max.z),
        )
    }

    /// Squared distance from a point to the box (zero inside).
    /// Invalid boxes are infinitely far away.
    #[inline]
    pub fn distance_squared_to_point(&self, point: Vec3) -> f32 {
        if !self.is_valid() {
            return f32::INFINITY;
        }
        (point - self.closest_point(point)).length_squared()
    }

    /// Distance from a point to the box (zero inside)
    #[inline]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        if !self.is_valid() {
            return f32::INFINITY;
        }
        (point - self.closest_point(point)).length()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::EMPTY
    }
}
