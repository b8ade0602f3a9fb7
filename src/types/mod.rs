//! Core geometric types for ALICE-BVH
//!
//! Defines the primitives every query in the library is built from:
//! axis-aligned bounding boxes, rays with guarded reciprocal directions,
//! bounding spheres and triangles, plus the build-strategy enum shared by
//! the dynamic tree and the mesh BVH.
//!
//! Author: Moroya Sakamoto

use serde::{Deserialize, Serialize};

mod aabb;
mod ray;
mod sphere;
mod triangle;

pub use aabb::Aabb;
pub use ray::Ray;
pub use sphere::BoundingSphere;
pub use triangle::{Triangle, TriangleHit};

/// Epsilon for ray-triangle intersection (Möller-Trumbore determinant
/// and behind-origin rejection).
pub const TRIANGLE_EPSILON: f32 = 1e-8;

/// Epsilon below which a ray direction component is treated as zero and
/// its reciprocal replaced by a signed infinity. Also used for
/// coincident-plane comparisons on AABBs.
pub const RECIP_EPSILON: f32 = 1e-10;

/// Partitioning strategy used by the batch builder and the mesh BVH.
///
/// The cost model behind `Sah` (traversal and intersection constants,
/// bin count) is fixed policy, not configuration; only the strategy
/// itself is selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildStrategy {
    /// Surface Area Heuristic: binned sweep over all three axes,
    /// minimizing expected traversal cost.
    #[default]
    Sah = 0,
    /// Object median: sort by centroid on the longest axis, split at the
    /// median index.
    Median = 1,
    /// Spatial median: split at the midpoint of the longest axis.
    Equal = 2,
}
