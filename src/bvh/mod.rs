//! Dynamic object-level bounding volume hierarchy
//!
//! The tree lives in a slot arena with `u32` indices; parent links are
//! plain indices, so refits and removals are pure index walks. Payloads
//! are opaque handles the caller remains responsible for.
//!
//! - [`Bvh`]: insert/update/remove/clear plus raycast, range,
//!   nearest-neighbor and bounds-overlap queries
//! - batch bulk construction under SAH, spatial-median, or
//!   object-median partitioning
//! - [`BvhStats`] / [`ValidationReport`]: shape snapshots and a full
//!   structural audit
//!
//! Author: Moroya Sakamoto

mod builder;
mod diagnostics;
mod node;
mod tree;

pub use diagnostics::{BvhStats, ValidationError, ValidationReport};
pub use tree::{
    Bvh, NearestHit, QueryError, RayHit, DEFAULT_MAX_DEPTH, DEFAULT_MAX_LEAF_SIZE,
};
