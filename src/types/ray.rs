//! Ray with precomputed guarded reciprocal direction
//!
//! The slab test against an AABB runs on every traversal step, so the
//! reciprocal direction is computed once at construction. Components of
//! near-zero magnitude get a signed infinite reciprocal, which makes the
//! slab arithmetic handle axis-parallel rays and zero-thickness slabs
//! without branches.
//!
//! Author: Moroya Sakamoto

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use super::{Aabb, BoundingSphere, RECIP_EPSILON};

/// Ray for spatial queries. Direction is unit length by construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ray {
    /// Ray origin point
    pub origin: Vec3,
    /// Ray direction (normalized)
    pub direction: Vec3,
    /// Componentwise reciprocal of the direction, with near-zero
    /// components replaced by a signed infinity
    pub inv_direction: Vec3,
}

#[inline]
fn guarded_recip(component: f32) -> f32 {
    if component.abs() < RECIP_EPSILON {
        f32::INFINITY.copysign(component)
    } else {
        1.0 / component
    }
}

impl Ray {
    /// Create a new ray. The direction is re-normalized; a zero-length
    /// direction is canonicalized to `+Z`.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        let len = direction.length();
        let direction = if len > RECIP_EPSILON {
            direction / len
        } else {
            Vec3::Z
        };
        Ray {
            origin,
            direction,
            inv_direction: Vec3::new(
                guarded_recip(direction.x),
                guarded_recip(direction.y),
                guarded_recip(direction.z),
            ),
        }
    }

    /// Get point along the ray at distance `t`
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Transform the ray by a matrix: origin as a point, direction as a
    /// direction (no translation), then re-normalize.
    ///
    /// Used to carry a world-space ray into a mesh's local space via the
    /// inverse world matrix; the returned `t` values from local-space
    /// queries stay in the transformed parameter space.
    pub fn transform(&self, matrix: &Mat4) -> Ray {
        Ray::new(
            matrix.transform_point3(self.origin),
            matrix.transform_vector3(self.direction),
        )
    }

    /// Slab-method intersection against an AABB.
    ///
    /// Returns the distance to the entry point, or the exit distance
    /// when the origin is inside the box. An empty or invalid box always
    /// misses.
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<f32> {
        if !aabb.is_valid() {
            return None;
        }

        let mut t_min = f32::NEG_INFINITY;
        let mut t_max = f32::INFINITY;

        for k in 0..3 {
            let t1 = (aabb.min[k] - self.origin[k]) * self.inv_direction[k];
            let t2 = (aabb.max[k] - self.origin[k]) * self.inv_direction[k];
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
        }

        if t_max < t_min.max(0.0) {
            return None;
        }
        if t_min >= 0.0 {
            Some(t_min)
        } else {
            Some(t_max)
        }
    }

    /// Ray-sphere intersection.
    ///
    /// Same convention as the AABB test: distance to the entry point, or
    /// the exit distance when the origin is inside the sphere.
    pub fn intersect_sphere(&self, sphere: &BoundingSphere) -> Option<f32> {
        let to_center = sphere.center - self.origin;
        let projection = to_center.dot(self.direction);
        let perp_sq = to_center.length_squared() - projection * projection;
        let r_sq = sphere.radius * sphere.radius;
        if perp_sq > r_sq {
            return None;
        }
        let half_chord = (r_sq - perp_sq).sqrt();
        let entry = projection - half_chord;
        let exit = projection + half_chord;
        if exit < 0.0 {
            return None;
        }
        if entry >= 0.0 {
            Some(entry)
        } else {
            Some(exit)
        }
    }
}
