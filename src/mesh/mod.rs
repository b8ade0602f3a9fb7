//! Triangle-mesh acceleration structures
//!
//! A static BVH over triangle soups for precise ray casting. Geometry
//! comes in as flat vertex positions with optional indices, or as a
//! prebuilt triangle list.
//!
//! Author: Moroya Sakamoto

mod bvh;

pub use bvh::{MeshBvh, MeshBvhConfig, MeshBvhStats, MeshHit};
