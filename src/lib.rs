//! # ALICE-BVH
//!
//! **A.L.I.C.E. - Adaptive Lightweight Intersection & Culling Engine**
//!
//! A spatial acceleration library built around bounding volume
//! hierarchies: a dynamic object-level tree for moving scenes and a
//! static triangle-level tree for precise mesh raycasts.
//!
//! ## Features
//!
//! - **Kernels**: AABB, ray (slab test), bounding sphere, triangle
//!   (Möller-Trumbore)
//! - **Dynamic BVH**: incremental insert/update/remove, refit, rebuild
//! - **Queries**: raycast (all hits / first hit), range search,
//!   nearest neighbor, bounds overlap
//! - **Batch builder**: SAH, spatial-median and object-median strategies
//! - **Mesh BVH**: triangle soups with exact first-hit and all-hits casts
//! - **Scene facade**: collider registration, dirty tracking, scheduled
//!   refit/rebuild
//!
//! ## Example
//!
//! ```rust
//! use alice_bvh::prelude::*;
//!
//! let mut tree: Bvh<&str> = Bvh::default();
//! tree.insert(
//!     Aabb::new(Vec3::new(-2.0, -1.0, -1.0), Vec3::new(-1.0, 1.0, 1.0)),
//!     "left cube",
//! );
//! tree.insert(
//!     Aabb::new(Vec3::new(1.0, -1.0, -1.0), Vec3::new(2.0, 1.0, 1.0)),
//!     "right cube",
//! );
//!
//! let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
//! let hit = tree.raycast_first(&ray, 100.0).unwrap().unwrap();
//! assert_eq!(hit.payload, "left cube");
//! ```
//!
//! ## Author
//!
//! Moroya Sakamoto

#![warn(missing_docs)]

pub mod bvh;
pub mod manager;
pub mod mesh;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::bvh::{
        Bvh, BvhStats, NearestHit, QueryError, RayHit, ValidationError, ValidationReport,
    };
    pub use crate::manager::{
        Collider, ColliderRef, ManagerError, ManagerOptions, SpatialManager,
    };
    pub use crate::mesh::{MeshBvh, MeshBvhConfig, MeshBvhStats, MeshHit};
    pub use crate::types::{
        Aabb, BoundingSphere, BuildStrategy, Ray, Triangle, TriangleHit,
    };
    pub use glam::{Mat4, Vec3};
}

// Re-exports for convenience
pub use bvh::{Bvh, QueryError};
pub use mesh::MeshBvh;
pub use types::{Aabb, BuildStrategy, Ray};
