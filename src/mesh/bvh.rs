//! BVH for triangle meshes
//!
//! Static after construction: build once from a triangle soup, then cast
//! rays with exact Möller-Trumbore hits. Construction is top-down over a
//! reordered triangle permutation, realized with an explicit work stack;
//! the partitioning strategies and their fallback chain mirror the
//! object-level batch builder.
//!
//! A brute-force linear caster is retained as the correctness oracle for
//! tests and diagnostics.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bvh::QueryError;
use crate::types::{Aabb, BuildStrategy, Ray, Triangle, RECIP_EPSILON};

/// SAH bin count shared with the object-level builder. Fixed policy.
const SAH_BINS: usize = 32;
const COST_TRAVERSAL: f32 = 1.0;
const COST_INTERSECT: f32 = 1.25;

/// Construction parameters for a mesh BVH
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshBvhConfig {
    /// Maximum triangles gathered into one leaf
    pub max_leaf_triangles: u32,
    /// Maximum tree depth
    pub max_depth: u32,
    /// Partitioning strategy
    pub strategy: BuildStrategy,
}

impl Default for MeshBvhConfig {
    fn default() -> Self {
        MeshBvhConfig {
            max_leaf_triangles: 10,
            max_depth: 40,
            strategy: BuildStrategy::Sah,
        }
    }
}

impl MeshBvhConfig {
    /// Cheapest build, adequate query speed. Good for throwaway meshes.
    pub fn fast() -> Self {
        MeshBvhConfig {
            max_leaf_triangles: 16,
            max_depth: 40,
            strategy: BuildStrategy::Median,
        }
    }

    /// Slowest build, best query speed
    pub fn high_quality() -> Self {
        MeshBvhConfig {
            max_leaf_triangles: 4,
            max_depth: 48,
            strategy: BuildStrategy::Sah,
        }
    }
}

/// A precise ray-triangle hit
#[derive(Debug, Clone, Copy)]
pub struct MeshHit {
    /// Index of the triangle in the source mesh
    pub triangle_index: u32,
    /// Distance along the ray
    pub distance: f32,
    /// Hit point (`origin + distance * direction`)
    pub point: Vec3,
    /// Barycentric weight of the second vertex
    pub u: f32,
    /// Barycentric weight of the third vertex
    pub v: f32,
    /// Barycentric weight of the first vertex
    pub w: f32,
}

/// Snapshot of a mesh BVH's shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshBvhStats {
    /// Total nodes
    pub node_count: u32,
    /// Leaf nodes
    pub leaf_count: u32,
    /// Deepest node
    pub max_depth: u32,
    /// Triangles indexed by the tree
    pub triangle_count: u32,
    /// Rough memory footprint in bytes
    pub memory_bytes: usize,
}

#[derive(Debug, Clone)]
enum MeshNodeKind {
    Leaf { start: u32, count: u32 },
    Internal { left: u32, right: u32 },
}

#[derive(Debug, Clone)]
struct MeshNode {
    bounds: Aabb,
    kind: MeshNodeKind,
}

/// Static triangle-level BVH with an optional opaque payload identifying
/// the source mesh.
///
/// World/local conversion is the caller's concern: transform a
/// world-space ray by the mesh's inverse world matrix
/// ([`Ray::transform`]), query in local space, and map hit points back.
#[derive(Debug, Clone)]
pub struct MeshBvh<P: Clone = ()> {
    triangles: Vec<Triangle>,
    /// Build-time permutation; leaves address ranges of this
    order: Vec<u32>,
    nodes: Vec<MeshNode>,
    root: Option<u32>,
    config: MeshBvhConfig,
    payload: Option<P>,
}

impl<P: Clone> MeshBvh<P> {
    /// Build from flat vertex positions (`3 * V` floats) and optional
    /// triangle indices (`3 * T` entries). Without indices, every three
    /// consecutive positions form a triangle; trailing partial chunks
    /// are dropped. Indices out of range drop their triangle.
    pub fn build_from_geometry(
        positions: &[f32],
        indices: Option<&[u32]>,
        payload: Option<P>,
        config: &MeshBvhConfig,
    ) -> Self {
        let vertex = |i: usize| -> Option<Vec3> {
            let base = i * 3;
            if base + 2 < positions.len() {
                Some(Vec3::new(
                    positions[base],
                    positions[base + 1],
                    positions[base + 2],
                ))
            } else {
                None
            }
        };

        let triangles: Vec<Triangle> = match indices {
            Some(indices) => indices
                .chunks_exact(3)
                .enumerate()
                .filter_map(|(t, chunk)| {
                    let a = vertex(chunk[0] as usize)?;
                    let b = vertex(chunk[1] as usize)?;
                    let c = vertex(chunk[2] as usize)?;
                    Some(Triangle::new(a, b, c, t as u32))
                })
                .collect(),
            None => {
                let count = positions.len() / 9;
                (0..count)
                    .filter_map(|t| {
                        let a = vertex(t * 3)?;
                        let b = vertex(t * 3 + 1)?;
                        let c = vertex(t * 3 + 2)?;
                        Some(Triangle::new(a, b, c, t as u32))
                    })
                    .collect()
            }
        };

        Self::build_from_triangles(triangles, payload, config)
    }

    /// Build from a prepared triangle list
    pub fn build_from_triangles(
        triangles: Vec<Triangle>,
        payload: Option<P>,
        config: &MeshBvhConfig,
    ) -> Self {
        let mut bvh = MeshBvh {
            triangles,
            order: Vec::new(),
            nodes: Vec::new(),
            root: None,
            config: MeshBvhConfig {
                max_leaf_triangles: config.max_leaf_triangles.max(1),
                max_depth: config.max_depth.max(1),
                strategy: config.strategy,
            },
            payload,
        };
        bvh.build();
        bvh
    }

    /// The opaque payload supplied at build time
    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    /// Number of triangles indexed
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Bounds of the whole mesh, if non-empty
    pub fn bounds(&self) -> Option<Aabb> {
        self.root
            .and_then(|r| self.nodes.get(r as usize))
            .map(|n| n.bounds)
    }

    // =====================================================================
    // Construction
    // =====================================================================

    fn build(&mut self) {
        let n = self.triangles.len();
        if n == 0 {
            return;
        }

        let tri_bounds: Vec<Aabb> = self.triangles.iter().map(|t| t.bounds()).collect();
        let tri_centroids: Vec<Vec3> = self.triangles.iter().map(|t| t.centroid()).collect();
        self.order = (0..n as u32).collect();

        self.nodes.push(MeshNode {
            bounds: Aabb::EMPTY,
            kind: MeshNodeKind::Leaf {
                start: 0,
                count: n as u32,
            },
        });
        self.root = Some(0);

        let cap = n * 2 + 1000;
        let mut iterations = 0usize;
        // (node, start, count, depth)
        let mut stack: Vec<(u32, usize, usize, u32)> = vec![(0, 0, n, 0)];

        while let Some((node, start, count, depth)) = stack.pop() {
            iterations += 1;

            let mut bounds = Aabb::EMPTY;
            for &t in &self.order[start..start + count] {
                bounds.expand_aabb(&tri_bounds[t as usize]);
            }

            let force_leaf = iterations > cap;
            if force_leaf {
                log::warn!(
                    "mesh build exceeded iteration cap of {}; emitting oversized leaf",
                    cap
                );
            }

            let at_limit = count <= self.config.max_leaf_triangles as usize
                || depth >= self.config.max_depth;
            if force_leaf || at_limit {
                self.nodes[node as usize] = MeshNode {
                    bounds,
                    kind: MeshNodeKind::Leaf {
                        start: start as u32,
                        count: count as u32,
                    },
                };
                continue;
            }

            let split = self.split_range(&tri_bounds, &tri_centroids, &bounds, start, count);
            let Some(mid) = split else {
                self.nodes[node as usize] = MeshNode {
                    bounds,
                    kind: MeshNodeKind::Leaf {
                        start: start as u32,
                        count: count as u32,
                    },
                };
                continue;
            };

            let left = self.nodes.len() as u32;
            self.nodes.push(MeshNode {
                bounds: Aabb::EMPTY,
                kind: MeshNodeKind::Leaf { start: 0, count: 0 },
            });
            let right = self.nodes.len() as u32;
            self.nodes.push(MeshNode {
                bounds: Aabb::EMPTY,
                kind: MeshNodeKind::Leaf { start: 0, count: 0 },
            });
            self.nodes[node as usize] = MeshNode {
                bounds,
                kind: MeshNodeKind::Internal { left, right },
            };

            // Right first so the left range pops next
            stack.push((right, start + mid, count - mid, depth + 1));
            stack.push((left, start, mid, depth + 1));
        }
    }

    /// Partition `order[start..start+count]` under the configured
    /// strategy. Returns the left-side length, or `None` to emit the
    /// range as a leaf.
    fn split_range(
        &mut self,
        tri_bounds: &[Aabb],
        tri_centroids: &[Vec3],
        bounds: &Aabb,
        start: usize,
        count: usize,
    ) -> Option<usize> {
        match self.config.strategy {
            BuildStrategy::Sah => {
                self.split_range_sah(tri_bounds, tri_centroids, bounds, start, count)
            }
            BuildStrategy::Median => {
                Some(self.split_range_median(tri_centroids, bounds, start, count))
            }
            BuildStrategy::Equal => {
                self.split_range_spatial(tri_centroids, bounds, start, count)
            }
        }
    }

    fn split_range_sah(
        &mut self,
        tri_bounds: &[Aabb],
        tri_centroids: &[Vec3],
        bounds: &Aabb,
        start: usize,
        count: usize,
    ) -> Option<usize> {
        let sa_parent = bounds.surface_area();
        if sa_parent <= RECIP_EPSILON {
            return Some(self.split_range_median(tri_centroids, bounds, start, count));
        }

        let mut best: Option<(usize, f32, f32)> = None; // (axis, position, cost)
        for axis in 0..3 {
            let a_min = bounds.min[axis];
            let extent = bounds.max[axis] - a_min;
            if extent <= RECIP_EPSILON {
                continue;
            }
            let scale = SAH_BINS as f32 / extent;

            let mut bin_count = [0usize; SAH_BINS];
            let mut bin_bounds = [Aabb::EMPTY; SAH_BINS];
            for &t in &self.order[start..start + count] {
                let c = tri_centroids[t as usize][axis];
                let bin = (((c - a_min) * scale) as usize).min(SAH_BINS - 1);
                bin_count[bin] += 1;
                bin_bounds[bin].expand_aabb(&tri_bounds[t as usize]);
            }

            let mut left_area = [0.0f32; SAH_BINS];
            let mut left_count = [0usize; SAH_BINS];
            let mut running = Aabb::EMPTY;
            let mut total = 0usize;
            for i in 0..SAH_BINS {
                total += bin_count[i];
                running.expand_aabb(&bin_bounds[i]);
                left_count[i] = total;
                left_area[i] = running.surface_area();
            }
            let mut right_area = [0.0f32; SAH_BINS];
            let mut right_count = [0usize; SAH_BINS];
            running = Aabb::EMPTY;
            total = 0;
            for i in (0..SAH_BINS).rev() {
                total += bin_count[i];
                running.expand_aabb(&bin_bounds[i]);
                right_count[i] = total;
                right_area[i] = running.surface_area();
            }

            for i in 0..SAH_BINS - 1 {
                let n_left = left_count[i];
                let n_right = right_count[i + 1];
                if n_left == 0 || n_right == 0 {
                    continue;
                }
                let cost = COST_TRAVERSAL
                    + (left_area[i] / sa_parent) * n_left as f32 * COST_INTERSECT
                    + (right_area[i + 1] / sa_parent) * n_right as f32 * COST_INTERSECT;
                if best.map_or(true, |(_, _, c)| cost < c) {
                    let position = a_min + (i + 1) as f32 * extent / SAH_BINS as f32;
                    best = Some((axis, position, cost));
                }
            }
        }

        let Some((axis, position, cost)) = best else {
            return Some(self.split_range_median(tri_centroids, bounds, start, count));
        };

        let leaf_cost = count as f32 * COST_INTERSECT;
        if cost >= leaf_cost && count <= 2 * self.config.max_leaf_triangles as usize {
            return None;
        }

        let mid = partition_range(&mut self.order[start..start + count], |t| {
            tri_centroids[t as usize][axis] < position
        });
        if mid == 0 || mid == count {
            return Some(self.split_range_median(tri_centroids, bounds, start, count));
        }
        Some(mid)
    }

    fn split_range_spatial(
        &mut self,
        tri_centroids: &[Vec3],
        bounds: &Aabb,
        start: usize,
        count: usize,
    ) -> Option<usize> {
        let axis = bounds.longest_axis();
        let midpoint = (bounds.min[axis] + bounds.max[axis]) * 0.5;
        let mid = partition_range(&mut self.order[start..start + count], |t| {
            tri_centroids[t as usize][axis] < midpoint
        });
        if mid == 0 || mid == count {
            return Some(self.split_range_median(tri_centroids, bounds, start, count));
        }
        Some(mid)
    }

    fn split_range_median(
        &mut self,
        tri_centroids: &[Vec3],
        bounds: &Aabb,
        start: usize,
        count: usize,
    ) -> usize {
        let axis = bounds.longest_axis();
        self.order[start..start + count].sort_by(|&a, &b| {
            tri_centroids[a as usize][axis]
                .partial_cmp(&tri_centroids[b as usize][axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        count / 2
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Cast a ray and collect every triangle hit within `max_distance`,
    /// sorted ascending by distance.
    pub fn raycast(
        &self,
        ray: &Ray,
        max_distance: f32,
        cull_backface: bool,
    ) -> Result<Vec<MeshHit>, QueryError> {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        let mut hits = Vec::new();
        let Some(root) = self.root else {
            return Ok(hits);
        };

        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let Some(node) = self.nodes.get(index as usize) else {
                continue;
            };
            if ray.intersect_aabb(&node.bounds).is_none() {
                continue;
            }
            match &node.kind {
                MeshNodeKind::Leaf { start, count } => {
                    self.collect_leaf_hits(
                        ray,
                        max_distance,
                        cull_backface,
                        *start,
                        *count,
                        &mut hits,
                    );
                }
                MeshNodeKind::Internal { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    /// Cast a ray and return the closest hit, if any.
    ///
    /// Ordered traversal: children are visited near-to-far and a subtree
    /// is pruned once its entry distance exceeds the best hit.
    pub fn raycast_first(
        &self,
        ray: &Ray,
        max_distance: f32,
        cull_backface: bool,
    ) -> Result<Option<MeshHit>, QueryError> {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        Ok(self.first_hit(ray, max_distance, cull_backface))
    }

    /// Linear scan over every triangle; the reference implementation the
    /// tree is tested against.
    pub fn raycast_brute_force(
        &self,
        ray: &Ray,
        max_distance: f32,
        cull_backface: bool,
    ) -> Result<Option<MeshHit>, QueryError> {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        let mut best: Option<MeshHit> = None;
        for triangle in &self.triangles {
            if let Some(hit) = triangle.intersect_ray(ray, cull_backface) {
                if hit.distance <= max_distance
                    && best.as_ref().map_or(true, |b| hit.distance < b.distance)
                {
                    best = Some(MeshHit {
                        triangle_index: triangle.index,
                        distance: hit.distance,
                        point: ray.at(hit.distance),
                        u: hit.u,
                        v: hit.v,
                        w: hit.w,
                    });
                }
            }
        }
        Ok(best)
    }

    /// First-hit cast for a batch of rays, in parallel
    pub fn raycast_batch(
        &self,
        rays: &[Ray],
        max_distance: f32,
        cull_backface: bool,
    ) -> Result<Vec<Option<MeshHit>>, QueryError>
    where
        P: Sync,
    {
        if !(max_distance >= 0.0) {
            return Err(QueryError::NegativeMaxDistance(max_distance));
        }
        Ok(rays
            .par_iter()
            .map(|ray| self.first_hit(ray, max_distance, cull_backface))
            .collect())
    }

    fn collect_leaf_hits(
        &self,
        ray: &Ray,
        max_distance: f32,
        cull_backface: bool,
        start: u32,
        count: u32,
        hits: &mut Vec<MeshHit>,
    ) {
        for &t in &self.order[start as usize..(start + count) as usize] {
            let triangle = &self.triangles[t as usize];
            if let Some(hit) = triangle.intersect_ray(ray, cull_backface) {
                if hit.distance <= max_distance {
                    hits.push(MeshHit {
                        triangle_index: triangle.index,
                        distance: hit.distance,
                        point: ray.at(hit.distance),
                        u: hit.u,
                        v: hit.v,
                        w: hit.w,
                    });
                }
            }
        }
    }

    fn first_hit(&self, ray: &Ray, max_distance: f32, cull_backface: bool) -> Option<MeshHit> {
        let root = self.root?;
        let root_entry = ray_entry(ray, &self.nodes.get(root as usize)?.bounds)?;

        let mut best: Option<MeshHit> = None;
        let mut stack = vec![(root, root_entry)];

        while let Some((index, entry)) = stack.pop() {
            if entry > max_distance {
                continue;
            }
            if let Some(b) = &best {
                if entry > b.distance {
                    continue;
                }
            }
            let Some(node) = self.nodes.get(index as usize) else {
                continue;
            };
            match &node.kind {
                MeshNodeKind::Leaf { start, count } => {
                    for &t in &self.order[*start as usize..(*start + *count) as usize] {
                        let triangle = &self.triangles[t as usize];
                        if let Some(hit) = triangle.intersect_ray(ray, cull_backface) {
                            if hit.distance <= max_distance
                                && best.as_ref().map_or(true, |b| hit.distance < b.distance)
                            {
                                best = Some(MeshHit {
                                    triangle_index: triangle.index,
                                    distance: hit.distance,
                                    point: ray.at(hit.distance),
                                    u: hit.u,
                                    v: hit.v,
                                    w: hit.w,
                                });
                            }
                        }
                    }
                }
                MeshNodeKind::Internal { left, right } => {
                    let le = self
                        .nodes
                        .get(*left as usize)
                        .and_then(|n| ray_entry(ray, &n.bounds));
                    let re = self
                        .nodes
                        .get(*right as usize)
                        .and_then(|n| ray_entry(ray, &n.bounds));
                    match (le, re) {
                        (Some(a), Some(b)) => {
                            // Farther child first; the closer one pops next
                            if a <= b {
                                stack.push((*right, b));
                                stack.push((*left, a));
                            } else {
                                stack.push((*left, a));
                                stack.push((*right, b));
                            }
                        }
                        (Some(a), None) => stack.push((*left, a)),
                        (None, Some(b)) => stack.push((*right, b)),
                        (None, None) => {}
                    }
                }
            }
        }

        best
    }

    /// Snapshot node counts and footprint
    pub fn stats(&self) -> MeshBvhStats {
        let mut leaf_count = 0u32;
        let mut max_depth = 0u32;
        if let Some(root) = self.root {
            let mut stack = vec![(root, 0u32)];
            while let Some((index, depth)) = stack.pop() {
                let Some(node) = self.nodes.get(index as usize) else {
                    continue;
                };
                max_depth = max_depth.max(depth);
                match &node.kind {
                    MeshNodeKind::Leaf { .. } => leaf_count += 1,
                    MeshNodeKind::Internal { left, right } => {
                        stack.push((*left, depth + 1));
                        stack.push((*right, depth + 1));
                    }
                }
            }
        }
        MeshBvhStats {
            node_count: self.nodes.len() as u32,
            leaf_count,
            max_depth,
            triangle_count: self.triangles.len() as u32,
            memory_bytes: self.nodes.len() * std::mem::size_of::<MeshNode>()
                + self.triangles.len() * std::mem::size_of::<Triangle>()
                + self.order.len() * std::mem::size_of::<u32>(),
        }
    }
}

/// Entry distance for traversal ordering and pruning: zero when the
/// origin is inside (the slab test would report the exit there, which
/// must not prune closer triangles).
#[inline]
fn ray_entry(ray: &Ray, bounds: &Aabb) -> Option<f32> {
    if bounds.is_valid() && bounds.contains(ray.origin) {
        return Some(0.0);
    }
    ray.intersect_aabb(bounds)
}

/// Stable two-way partition of an index range by a predicate. Returns
/// the number of elements satisfying it (the left-side length).
fn partition_range(range: &mut [u32], pred: impl Fn(u32) -> bool) -> usize {
    let mut left = Vec::with_capacity(range.len());
    let mut right = Vec::with_capacity(range.len());
    for &t in range.iter() {
        if pred(t) {
            left.push(t);
        } else {
            right.push(t);
        }
    }
    let mid = left.len();
    for (slot, value) in range.iter_mut().zip(left.into_iter().chain(right)) {
        *slot = value;
    }
    mid
}
