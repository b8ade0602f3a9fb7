//! Dynamic object-level BVH
//!
//! A binary tree of axis-aligned bounds over opaque payloads, supporting
//! incremental insert/update/remove, bulk rebuild, refit, and four query
//! primitives: raycast, range search, nearest neighbor, and bounds
//! overlap.
//!
//! Every traversal is iterative with an explicit stack; insertion walks
//! are capped at twice the depth limit and degrade to a forced placement
//! with a warning instead of running away.
//!
//! Author: Moroya Sakamoto

use std::collections::HashMap;

use glam::Vec3;
use rayon::prelude::*;
use thiserror::Error;

use super::builder;
use super::node::{LeafData, NodeArena, NodeKind};
use crate::types::{Aabb, BuildStrategy, Ray};

/// Default maximum number of objects gathered into one leaf region
pub const DEFAULT_MAX_LEAF_SIZE: u32 = 8;

/// Default maximum tree depth
pub const DEFAULT_MAX_DEPTH: u32 = 32;

/// Invalid query parameters, distinct from a "not found" result
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum QueryError {
    /// Range queries require a non-negative radius
    #[error("radius must be non-negative, got {0}")]
    NegativeRadius(f32),

    /// Ray and nearest queries require a non-negative distance cap
    #[error("max distance must be non-negative, got {0}")]
    NegativeMaxDistance(f32),
}

/// A ray hit against an object's bounds
#[derive(Debug, Clone)]
pub struct RayHit<P> {
    /// The object's payload
    pub payload: P,
    /// Distance along the ray to the hit
    pub distance: f32,
    /// Hit point (`origin + distance * direction`)
    pub point: Vec3,
    /// Approximate outward face normal of the AABB at the hit point
    pub normal: Vec3,
}

/// Result of a nearest-neighbor query
#[derive(Debug, Clone)]
pub struct NearestHit<P> {
    /// The nearest object's payload
    pub payload: P,
    /// Closest-point distance from the query point to its bounds
    pub distance: f32,
}

/// Dynamic bounding volume hierarchy over opaque payloads.
///
/// Payloads are borrowed views of the caller's world: the tree stores a
/// clone of the handle and never owns the object behind it. An object's
/// lifetime in the tree is delimited by `insert`/`remove`.
#[derive(Debug, Clone)]
pub struct Bvh<P: Clone> {
    pub(crate) arena: NodeArena<P>,
    pub(crate) root: Option<u32>,
    pub(crate) max_leaf_size: u32,
    pub(crate) max_depth: u32,
    pub(crate) enable_sah: bool,
    pub(crate) count: u32,
    pub(crate) object_map: HashMap<u64, u32>,
    pub(crate) next_id: u64,
}

impl<P: Clone> Default for Bvh<P> {
    fn default() -> Self {
        Bvh::new(DEFAULT_MAX_LEAF_SIZE, DEFAULT_MAX_DEPTH, true)
    }
}

/// Volume of the union of two boxes, evaluated in scalar arithmetic
/// without forming a temporary box.
#[inline]
fn union_volume(a: &Aabb, b: &Aabb) -> f32 {
    let dx = (a.max.x.max(b.max.x) - a.min.x.min(b.min.x)).max(0.0);
    let dy = (a.max.y.max(b.max.y) - a.min.y.min(b.min.y)).max(0.0);
    let dz = (a.max.z.max(b.max.z) - a.min.z.min(b.min.z)).max(0.0);
    dx * dy * dz
}

/// Outward face normal of a box at a hit point: the axis with the
/// largest magnitude of `hit - center` picks the face, its sign the
/// direction. Approximate for non-cubic boxes; adequate for AABB
/// proxies.
#[inline]
fn aabb_face_normal(hit: Vec3, bounds: &Aabb) -> Vec3 {
    let v = hit - bounds.center();
    let (ax, ay, az) = (v.x.abs(), v.y.abs(), v.z.abs());
    if ax >= ay && ax >= az {
        Vec3::new(v.x.signum(), 0.0, 0.0)
    } else if ay >= az {
        Vec3::new(0.0, v.y.signum(), 0.0)
    } else {
        Vec3::new(0.0, 0.0, v.z.signum())
    }
}

/// Conservative entry distance of a ray into a box: zero when the origin
/// is inside, the slab entry otherwise. Used for traversal ordering and
/// pruning, where the inside case must not report the exit distance.
#[inline]
fn entry_distance(ray: &Ray, bounds: &Aabb) -> Option<f32> {
    if bounds.is_valid() && bounds.contains(ray.origin) {
        return Some(0.0);
    }
    ray.intersect_aabb(bounds)
}

impl<P: Clone> Bvh<P> {
    /// Create an empty tree.
    ///
    /// `max_leaf_size` and `max_depth` are clamped to at least 1. The
    /// `enable_sah` flag is advisory; the authoritative strategy control
    /// is the argument to [`Bvh::build`] and [`Bvh::rebuild`].
    pub fn new(max_leaf_size: u32, max_depth: u32, enable_sah: bool) -> Self {
        Bvh {
            arena: NodeArena::new(),
            root: None,
            max_leaf_size: max_leaf_size.max(1),
            max_depth: max_depth.max(1),
            enable_sah,
            count: 0,
            object_map: HashMap::new(),
            next_id: 0,
        }
    }

    /// Bulk-construct a tree from a batch of `(bounds, payload)` pairs
    /// using the given partitioning strategy.
    pub fn build(
        objects: impl IntoIterator<Item = (Aabb, P)>,
        strategy: BuildStrategy,
        max_leaf_size: u32,
        max_depth: u32,
    ) -> Self {
        let mut tree = Bvh::new(max_leaf_size, max_depth, strategy == BuildStrategy::Sah);
        let items: Vec<(u64, Aabb, P)> = objects
            .into_iter()
            .map(|(bounds, payload)| {
                let id = tree.next_id;
                tree.next_id += 1;
                (id, bounds, payload)
            })
            .collect();
        builder::build_into(&mut tree, items, strategy);
        tree
    }

    /// Number of objects currently stored
    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    /// True when no objects are stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Configured leaf-size limit
    #[inline]
    pub fn max_leaf_size(&self) -> u32 {
        self.max_leaf_size
    }

    /// Configured depth limit
    #[inline]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Bounds of the whole tree, if non-empty
    pub fn bounds(&self) -> Option<Aabb> {
        self.root
            .and_then(|r| self.arena.get(r))
            .map(|n| n.bounds)
            .filter(|b| b.is_valid())
    }

    // =====================================================================
    // Mutation
    // =====================================================================

    /// Insert an object, returning its fresh id.
    ///
    /// Never fails; degenerate or inverted bounds are accepted and
    /// tracked as given (validating them is the caller's business).
    pub fn insert(&mut self, bounds: Aabb, payload: P) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.insert_with_id(id, bounds, payload);
        id
    }

    /// Insert under a caller-chosen id. Used by the batch builder and by
    /// `rebuild` to preserve ids across reconstruction.
    pub(crate) fn insert_with_id(&mut self, id: u64, bounds: Aabb, payload: P) {
        let Some(root) = self.root else {
            let leaf = self
                .arena
                .alloc_leaf(bounds, Some(LeafData { id, payload }), 0);
            self.root = Some(leaf);
            self.object_map.insert(id, leaf);
            self.count += 1;
            return;
        };

        let cap = (self.max_depth as usize) * 2;
        let mut current = root;
        let mut payload = Some(payload);

        for _ in 0..cap {
            let Some(node) = self.arena.get(current) else {
                break;
            };
            match &node.kind {
                NodeKind::Leaf(None) => {
                    if let Some(payload) = payload.take() {
                        self.overwrite_empty_leaf(current, id, bounds, payload);
                    }
                    return;
                }
                NodeKind::Leaf(Some(_)) => {
                    if let Some(payload) = payload.take() {
                        self.split_leaf(current, id, bounds, payload);
                    }
                    return;
                }
                NodeKind::Internal { left, right } => {
                    let left = *left;
                    let Some(right) = *right else {
                        if let Some(payload) = payload.take() {
                            self.attach_right_leaf(current, id, bounds, payload);
                        }
                        return;
                    };
                    // Descend into the child whose bounds grow least
                    let lg = self
                        .arena
                        .get(left)
                        .map_or(f32::INFINITY, |n| union_volume(&n.bounds, &bounds) - n.bounds.volume());
                    let rg = self
                        .arena
                        .get(right)
                        .map_or(f32::INFINITY, |n| union_volume(&n.bounds, &bounds) - n.bounds.volume());
                    current = if lg <= rg { left } else { right };
                }
            }
        }

        // Descent cap exceeded; force a placement at the nearest leaf
        if let Some(payload) = payload.take() {
            log::warn!(
                "insert descent exceeded {} steps; forcing leaf placement",
                cap
            );
            self.force_place(current, id, bounds, payload);
        }
    }

    /// Overwrite an empty leaf in place
    fn overwrite_empty_leaf(&mut self, leaf: u32, id: u64, bounds: Aabb, payload: P) {
        if let Some(node) = self.arena.get_mut(leaf) {
            node.bounds = bounds;
            node.kind = NodeKind::Leaf(Some(LeafData { id, payload }));
        }
        self.object_map.insert(id, leaf);
        self.count += 1;
        self.arena.refit_upwards(leaf, self.max_depth as usize);
    }

    /// Split a populated leaf into an internal node over the old and new
    /// entries, ordered along the longest axis of their union.
    fn split_leaf(&mut self, leaf: u32, id: u64, bounds: Aabb, payload: P) {
        let (old_data, old_bounds, depth) = {
            let Some(node) = self.arena.get_mut(leaf) else {
                return;
            };
            let NodeKind::Leaf(slot) = &mut node.kind else {
                return;
            };
            let Some(data) = slot.take() else {
                // Raced into an empty leaf after all
                node.bounds = bounds;
                node.kind = NodeKind::Leaf(Some(LeafData { id, payload }));
                self.object_map.insert(id, leaf);
                self.count += 1;
                self.arena.refit_upwards(leaf, self.max_depth as usize);
                return;
            };
            (data, node.bounds, node.depth)
        };

        let union = old_bounds.union(&bounds);
        let axis = union.longest_axis();
        let old_mid = (old_bounds.min[axis] + old_bounds.max[axis]) * 0.5;
        let new_mid = (bounds.min[axis] + bounds.max[axis]) * 0.5;

        let old_id = old_data.id;
        let child_depth = depth + 1;
        let old_leaf = self
            .arena
            .alloc_leaf(old_bounds, Some(old_data), child_depth);
        let new_leaf = self
            .arena
            .alloc_leaf(bounds, Some(LeafData { id, payload }), child_depth);

        // Smaller midpoint goes left; ties keep the old entry left
        let (l, r) = if new_mid < old_mid {
            (new_leaf, old_leaf)
        } else {
            (old_leaf, new_leaf)
        };

        if let Some(node) = self.arena.get_mut(leaf) {
            node.kind = NodeKind::Internal {
                left: l,
                right: Some(r),
            };
            node.bounds = union;
        }
        if let Some(n) = self.arena.get_mut(l) {
            n.parent = Some(leaf);
        }
        if let Some(n) = self.arena.get_mut(r) {
            n.parent = Some(leaf);
        }

        self.object_map.insert(old_id, old_leaf);
        self.object_map.insert(id, new_leaf);
        self.count += 1;
        self.arena.refit_upwards(leaf, self.max_depth as usize);
    }

    /// Complete a transiently right-less internal node with a new leaf
    fn attach_right_leaf(&mut self, internal: u32, id: u64, bounds: Aabb, payload: P) {
        let Some(depth) = self.arena.get(internal).map(|n| n.depth) else {
            return;
        };
        let leaf = self
            .arena
            .alloc_leaf(bounds, Some(LeafData { id, payload }), depth + 1);
        if let Some(n) = self.arena.get_mut(leaf) {
            n.parent = Some(internal);
        }
        if let Some(node) = self.arena.get_mut(internal) {
            if let NodeKind::Internal { right, .. } = &mut node.kind {
                *right = Some(leaf);
            }
        }
        self.object_map.insert(id, leaf);
        self.count += 1;
        self.arena.refit_upwards(internal, self.max_depth as usize);
    }

    /// Last-resort placement after a capped descent: walk left to the
    /// nearest leaf (bounded by the arena size) and split there.
    fn force_place(&mut self, from: u32, id: u64, bounds: Aabb, payload: P) {
        let mut current = from;
        for _ in 0..self.arena.len() + 1 {
            match self.arena.get(current).map(|n| &n.kind) {
                Some(NodeKind::Leaf(_)) => {
                    self.split_leaf(current, id, bounds, payload);
                    return;
                }
                Some(NodeKind::Internal { left, .. }) => current = *left,
                None => break,
            }
        }
        // The arena is corrupt; record the object at a fresh root so it
        // is at least tracked.
        let leaf = self
            .arena
            .alloc_leaf(bounds, Some(LeafData { id, payload }), 0);
        self.root = Some(leaf);
        self.object_map.insert(id, leaf);
        self.count += 1;
    }

    /// Replace an object's bounds in place and refit upwards.
    ///
    /// Returns `false` for an unknown id. No rebalancing happens here; a
    /// caller tracking tree quality triggers [`Bvh::rebuild`] itself.
    pub fn update(&mut self, id: u64, bounds: Aabb) -> bool {
        let Some(&index) = self.object_map.get(&id) else {
            return false;
        };
        let parent = match self.arena.get_mut(index) {
            Some(node) if matches!(node.kind, NodeKind::Leaf(Some(_))) => {
                node.bounds = bounds;
                node.parent
            }
            _ => return false,
        };
        if let Some(parent) = parent {
            self.arena.refit_upwards(parent, self.max_depth as usize);
        }
        true
    }

    /// Remove an object. Returns `false` for an unknown id.
    ///
    /// The sibling of the removed leaf is spliced into the parent's
    /// position; with no sibling, the parent degrades to an empty leaf.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(index) = self.object_map.remove(&id) else {
            return false;
        };
        let Some(parent) = self.arena.get(index).and_then(|n| n.parent) else {
            // Removing the root leaf empties the tree
            self.arena.free(index);
            self.root = None;
            self.count = self.count.saturating_sub(1);
            return true;
        };

        let (left, right) = match self.arena.get(parent).map(|n| &n.kind) {
            Some(NodeKind::Internal { left, right }) => (*left, *right),
            _ => {
                // Corrupt parent link; drop the leaf and move on
                self.arena.free(index);
                self.count = self.count.saturating_sub(1);
                return true;
            }
        };
        let sibling = if left == index { right } else { Some(left) };

        match sibling {
            Some(sibling) => {
                let grandparent = self.arena.get(parent).and_then(|n| n.parent);
                let parent_depth = self.arena.get(parent).map_or(0, |n| n.depth);

                if let Some(n) = self.arena.get_mut(sibling) {
                    n.parent = grandparent;
                }
                match grandparent {
                    None => self.root = Some(sibling),
                    Some(g) => {
                        if let Some(NodeKind::Internal { left, right }) =
                            self.arena.get_mut(g).map(|n| &mut n.kind)
                        {
                            if *left == parent {
                                *left = sibling;
                            } else if *right == Some(parent) {
                                *right = Some(sibling);
                            }
                        }
                    }
                }
                self.arena.renumber_depths(sibling, parent_depth);
                self.arena.free(parent);
                self.arena.free(index);
                let refit_from = grandparent.unwrap_or(sibling);
                self.arena.refit_upwards(refit_from, self.max_depth as usize);
            }
            None => {
                // No sibling: the parent becomes an empty leaf
                if let Some(node) = self.arena.get_mut(parent) {
                    node.kind = NodeKind::Leaf(None);
                    node.bounds = Aabb::EMPTY;
                }
                self.arena.free(index);
                self.arena.refit_upwards(parent, self.max_depth as usize);
            }
        }

        self.count = self.count.saturating_sub(1);
        true
    }

    /// Remove every object and release all nodes. The id allocator keeps
    /// advancing monotonically.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
        self.object_map.clear();
        self.count = 0;
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Cast a ray and collect every object bounds hit within
    /// `max_distance`, sorted ascending by distance.
    ///
    /// A ray starting inside an object's bounds reports the exit
    /// distance for that object. Ordering of equidistant hits is
    /// unspecified.
    pub fn raycast(&self, ray: &Ray, max_distance: f32) -> Result<Vec<RayHit<P>>, QueryError> {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        let mut hits = Vec::new();
        let Some(root) = self.root else {
            return Ok(hits);
        };

        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            match &node.kind {
                NodeKind::Leaf(Some(data)) => {
                    if let Some(t) = ray.intersect_aabb(&node.bounds) {
                        if t <= max_distance {
                            let point = ray.at(t);
                            hits.push(RayHit {
                                payload: data.payload.clone(),
                                distance: t,
                                point,
                                normal: aabb_face_normal(point, &node.bounds),
                            });
                        }
                    }
                }
                NodeKind::Leaf(None) => {}
                NodeKind::Internal { left, right } => {
                    match entry_distance(ray, &node.bounds) {
                        Some(entry) if entry <= max_distance => {
                            if let Some(r) = right {
                                stack.push(*r);
                            }
                            stack.push(*left);
                        }
                        _ => {}
                    }
                }
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    /// Cast a ray and return the closest hit, if any.
    ///
    /// Ordered traversal: the closer child is visited first, and a
    /// subtree is pruned once its entry distance exceeds the best hit.
    pub fn raycast_first(
        &self,
        ray: &Ray,
        max_distance: f32,
    ) -> Result<Option<RayHit<P>>, QueryError> {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        let Some(root) = self.root else {
            return Ok(None);
        };
        let Some(root_entry) = self.arena.get(root).and_then(|n| entry_distance(ray, &n.bounds))
        else {
            return Ok(None);
        };

        let mut best: Option<RayHit<P>> = None;
        let mut stack = vec![(root, root_entry)];

        while let Some((index, entry)) = stack.pop() {
            if entry > max_distance {
                continue;
            }
            if let Some(b) = &best {
                if entry >= b.distance {
                    continue;
                }
            }
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            match &node.kind {
                NodeKind::Leaf(Some(data)) => {
                    if let Some(t) = ray.intersect_aabb(&node.bounds) {
                        let closer = best.as_ref().map_or(true, |b| t < b.distance);
                        if t <= max_distance && closer {
                            let point = ray.at(t);
                            best = Some(RayHit {
                                payload: data.payload.clone(),
                                distance: t,
                                point,
                                normal: aabb_face_normal(point, &node.bounds),
                            });
                        }
                    }
                }
                NodeKind::Leaf(None) => {}
                NodeKind::Internal { left, right } => {
                    let mut children: [Option<(u32, f32)>; 2] = [None, None];
                    if let Some(n) = self.arena.get(*left) {
                        children[0] = entry_distance(ray, &n.bounds).map(|e| (*left, e));
                    }
                    if let Some(r) = right {
                        if let Some(n) = self.arena.get(*r) {
                            children[1] = entry_distance(ray, &n.bounds).map(|e| (*r, e));
                        }
                    }
                    // Push the farther child first so the closer pops next
                    match (children[0], children[1]) {
                        (Some(a), Some(b)) => {
                            let (near, far) = if a.1 <= b.1 { (a, b) } else { (b, a) };
                            stack.push(far);
                            stack.push(near);
                        }
                        (Some(a), None) | (None, Some(a)) => stack.push(a),
                        (None, None) => {}
                    }
                }
            }
        }

        Ok(best)
    }

    /// Collect payloads whose bounds lie within `radius` of `center`,
    /// modeled as overlap with the box `[center - r, center + r]`.
    pub fn query_range(&self, center: Vec3, radius: f32) -> Result<Vec<P>, QueryError> {
        if !(radius >= 0.0) {
            return Err(QueryError::NegativeRadius(radius));
        }
        let query = Aabb::from_center_extents(center, Vec3::splat(radius));
        Ok(self.intersect_bounds(&query))
    }

    /// Range query with a tighter spherical test at the leaves: only
    /// payloads whose bounds are truly within `radius` of `center` by
    /// closest-point distance. A strict subset of [`Bvh::query_range`].
    pub fn query_range_sphere(&self, center: Vec3, radius: f32) -> Result<Vec<P>, QueryError> {
        if !(radius >= 0.0) {
            return Err(QueryError::NegativeRadius(radius));
        }
        let query = Aabb::from_center_extents(center, Vec3::splat(radius));
        let radius_sq = radius * radius;
        let mut out = Vec::new();
        let Some(root) = self.root else {
            return Ok(out);
        };
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            if !node.bounds.is_valid() || !node.bounds.intersects(&query) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(Some(data)) => {
                    if node.bounds.distance_squared_to_point(center) <= radius_sq {
                        out.push(data.payload.clone());
                    }
                }
                NodeKind::Leaf(None) => {}
                NodeKind::Internal { left, right } => {
                    if let Some(r) = right {
                        stack.push(*r);
                    }
                    stack.push(*left);
                }
            }
        }
        Ok(out)
    }

    /// Find the payload whose bounds are closest to `point`, optionally
    /// within `max_distance`. Distance is measured to the closest point
    /// on the object's bounds (zero when inside).
    pub fn find_nearest(
        &self,
        point: Vec3,
        max_distance: Option<f32>,
    ) -> Result<Option<NearestHit<P>>, QueryError> {
        if let Some(cap) = max_distance {
            if !(cap >= 0.0) {
                return Err(QueryError::NegativeMaxDistance(cap));
            }
        }
        let cap = max_distance.unwrap_or(f32::INFINITY);
        let Some(root) = self.root else {
            return Ok(None);
        };

        let mut best: Option<(f32, u32)> = None;
        let root_dist = self
            .arena
            .get(root)
            .map_or(f32::INFINITY, |n| n.bounds.distance_to_point(point));
        let mut stack = vec![(root, root_dist)];

        while let Some((index, lower)) = stack.pop() {
            if lower > cap {
                continue;
            }
            if let Some((best_dist, _)) = best {
                if lower >= best_dist {
                    continue;
                }
            }
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            match &node.kind {
                NodeKind::Leaf(Some(_)) => {
                    let d = node.bounds.distance_to_point(point);
                    let closer = best.map_or(true, |(bd, _)| d < bd);
                    if d <= cap && closer {
                        best = Some((d, index));
                    }
                }
                NodeKind::Leaf(None) => {}
                NodeKind::Internal { left, right } => {
                    let mut children: [Option<(u32, f32)>; 2] = [None, None];
                    if let Some(n) = self.arena.get(*left) {
                        children[0] = Some((*left, n.bounds.distance_to_point(point)));
                    }
                    if let Some(r) = right {
                        if let Some(n) = self.arena.get(*r) {
                            children[1] = Some((*r, n.bounds.distance_to_point(point)));
                        }
                    }
                    // Farther child first; the closer one pops next
                    match (children[0], children[1]) {
                        (Some(a), Some(b)) => {
                            let (near, far) = if a.1 <= b.1 { (a, b) } else { (b, a) };
                            stack.push(far);
                            stack.push(near);
                        }
                        (Some(a), None) | (None, Some(a)) => stack.push(a),
                        (None, None) => {}
                    }
                }
            }
        }

        Ok(best.and_then(|(distance, index)| {
            self.arena.get(index).and_then(|node| match &node.kind {
                NodeKind::Leaf(Some(data)) => Some(NearestHit {
                    payload: data.payload.clone(),
                    distance,
                }),
                _ => None,
            })
        }))
    }

    /// First-hit cast for a batch of rays, in parallel over a quiescent
    /// tree
    pub fn raycast_batch(
        &self,
        rays: &[Ray],
        max_distance: f32,
    ) -> Result<Vec<Option<RayHit<P>>>, QueryError>
    where
        P: Sync + Send,
    {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        rays.par_iter()
            .map(|ray| self.raycast_first(ray, max_distance))
            .collect()
    }

    /// Collect payloads whose bounds overlap the query box
    pub fn intersect_bounds(&self, query: &Aabb) -> Vec<P> {
        let mut out = Vec::new();
        let Some(root) = self.root else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            if !node.bounds.is_valid() || !node.bounds.intersects(query) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(Some(data)) => out.push(data.payload.clone()),
                NodeKind::Leaf(None) => {}
                NodeKind::Internal { left, right } => {
                    if let Some(r) = right {
                        stack.push(*r);
                    }
                    stack.push(*left);
                }
            }
        }
        out
    }

    // =====================================================================
    // Maintenance
    // =====================================================================

    /// Recompute every internal node's bounds from its children without
    /// changing topology. Single pass in order of descending depth.
    pub fn refit(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let mut order = self.arena.collect_subtree(root);
        order.sort_by_key(|&i| std::cmp::Reverse(self.arena.get(i).map_or(0, |n| n.depth)));
        for index in order {
            self.arena.recompute_bounds_from_children(index);
        }
    }

    /// Tear the tree down to its leaf set and reconstruct it with the
    /// batch builder under `strategy`. Object ids survive; `next_id`
    /// keeps advancing. No-op on an empty tree.
    pub fn rebuild(&mut self, strategy: BuildStrategy) {
        let Some(root) = self.root else {
            return;
        };
        let order = self.arena.collect_subtree(root);
        let mut items: Vec<(u64, Aabb, P)> = Vec::with_capacity(self.count as usize);
        for index in order {
            if let Some(node) = self.arena.get_mut(index) {
                let bounds = node.bounds;
                if let NodeKind::Leaf(slot) = &mut node.kind {
                    if let Some(data) = slot.take() {
                        items.push((data.id, bounds, data.payload));
                    }
                }
            }
        }

        self.arena.clear();
        self.root = None;
        self.object_map.clear();
        self.count = 0;

        builder::build_into(self, items, strategy);
    }
}
