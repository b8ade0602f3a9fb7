//! Batch tree construction
//!
//! Top-down partitioning driven by an explicit work stack of object
//! subsets. Small subsets are handed to the tree's incremental insert,
//! which shapes the remaining structure; larger ones are split by the
//! selected strategy.
//!
//! The fallback chain is load-bearing: SAH falls back to object-median
//! on a degenerate partition, and object-median falls back to direct
//! leaf emission. Dropping the middle level breaks on axis-aligned
//! point clouds where every centroid coincides.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;

use super::tree::Bvh;
use crate::types::{Aabb, BuildStrategy, RECIP_EPSILON};

/// Number of SAH candidate bins per axis. Fixed policy, not configuration.
const SAH_BINS: usize = 32;

/// SAH cost of traversing an internal node
const COST_TRAVERSAL: f32 = 1.0;

/// SAH cost of intersecting one leaf object
const COST_INTERSECT: f32 = 1.25;

struct BuildItem<P> {
    id: u64,
    bounds: Aabb,
    centroid: Vec3,
    payload: P,
}

/// Outcome of a partitioning attempt
enum Split<P> {
    /// Partitioned into two non-empty halves
    Partitioned(Vec<BuildItem<P>>, Vec<BuildItem<P>>),
    /// The subset should be emitted as leaves directly
    EmitLeaves(Vec<BuildItem<P>>),
}

/// Build `items` into `tree` under `strategy`.
///
/// The tree is expected to be structurally empty; ids are caller-chosen
/// so that `rebuild` preserves them across reconstruction.
pub(crate) fn build_into<P: Clone>(
    tree: &mut Bvh<P>,
    items: Vec<(u64, Aabb, P)>,
    strategy: BuildStrategy,
) {
    if items.is_empty() {
        return;
    }

    let cap = items.len() * 2 + 1000;
    let max_leaf = tree.max_leaf_size() as usize;

    let items: Vec<BuildItem<P>> = items
        .into_iter()
        .map(|(id, bounds, payload)| BuildItem {
            id,
            bounds,
            centroid: bounds.center(),
            payload,
        })
        .collect();

    let mut stack = vec![items];
    let mut iterations = 0usize;

    while let Some(subset) = stack.pop() {
        iterations += 1;
        if iterations > cap {
            log::warn!(
                "builder exceeded iteration cap of {}; force-inserting remaining objects",
                cap
            );
            insert_all(tree, subset);
            for rest in stack.drain(..) {
                insert_all(tree, rest);
            }
            return;
        }

        if subset.len() <= max_leaf {
            insert_all(tree, subset);
            continue;
        }

        let outcome = match strategy {
            BuildStrategy::Sah => split_sah(subset, max_leaf),
            BuildStrategy::Median => split_object_median(subset),
            BuildStrategy::Equal => split_spatial_median(subset),
        };

        match outcome {
            Split::Partitioned(left, right) => {
                // Right first so the left subset pops next
                stack.push(right);
                stack.push(left);
            }
            Split::EmitLeaves(subset) => insert_all(tree, subset),
        }
    }
}

fn insert_all<P: Clone>(tree: &mut Bvh<P>, items: Vec<BuildItem<P>>) {
    for item in items {
        tree.insert_with_id(item.id, item.bounds, item.payload);
    }
}

fn union_bounds<P>(items: &[BuildItem<P>]) -> Aabb {
    let mut aabb = Aabb::EMPTY;
    for item in items {
        aabb.expand_aabb(&item.bounds);
    }
    aabb
}

/// Binned surface-area-heuristic split over all three axes
fn split_sah<P>(items: Vec<BuildItem<P>>, max_leaf: usize) -> Split<P> {
    let parent = union_bounds(&items);
    let sa_parent = parent.surface_area();
    if sa_parent <= RECIP_EPSILON {
        // Zero-area union: all bounds coincide in a plane or point
        return split_object_median(items);
    }

    let mut best: Option<(usize, f32, f32)> = None; // (axis, position, cost)

    for axis in 0..3 {
        let a_min = parent.min[axis];
        let extent = parent.max[axis] - a_min;
        if extent <= RECIP_EPSILON {
            continue;
        }
        let scale = SAH_BINS as f32 / extent;

        let mut bin_count = [0usize; SAH_BINS];
        let mut bin_bounds = [Aabb::EMPTY; SAH_BINS];
        for item in &items {
            let bin = (((item.centroid[axis] - a_min) * scale) as usize).min(SAH_BINS - 1);
            bin_count[bin] += 1;
            bin_bounds[bin].expand_aabb(&item.bounds);
        }

        // Cumulative sweeps from both ends
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
        // Every axis degenerate
        return split_object_median(items);
    };

    let leaf_cost = items.len() as f32 * COST_INTERSECT;
    if cost >= leaf_cost && items.len() <= 2 * max_leaf {
        return Split::EmitLeaves(items);
    }

    let mut left = Vec::new();
    let mut right = Vec::new();
    for item in items {
        if item.centroid[axis] < position {
            left.push(item);
        } else {
            right.push(item);
        }
    }
    if left.is_empty() || right.is_empty() {
        let mut items = left;
        items.extend(right);
        return split_object_median(items);
    }
    Split::Partitioned(left, right)
}

/// Spatial-median split at the midpoint of the longest axis
fn split_spatial_median<P>(items: Vec<BuildItem<P>>) -> Split<P> {
    let parent = union_bounds(&items);
    let axis = parent.longest_axis();
    let midpoint = (parent.min[axis] + parent.max[axis]) * 0.5;

    let mut left = Vec::new();
    let mut right = Vec::new();
    for item in items {
        if item.centroid[axis] < midpoint {
            left.push(item);
        } else {
            right.push(item);
        }
    }
    if left.is_empty() || right.is_empty() {
        let mut items = left;
        items.extend(right);
        return split_object_median(items);
    }
    Split::Partitioned(left, right)
}

/// Object-median split: sort by centroid on the longest axis, cut at
/// the median index. Cannot degenerate for subsets of two or more.
fn split_object_median<P>(mut items: Vec<BuildItem<P>>) -> Split<P> {
    if items.len() < 2 {
        return Split::EmitLeaves(items);
    }
    let parent = union_bounds(&items);
    let axis = parent.longest_axis();
    items.sort_by(|a, b| {
        a.centroid[axis]
            .partial_cmp(&b.centroid[axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mid = items.len() / 2;
    let right = items.split_off(mid);
    Split::Partitioned(items, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ray;

    fn cube(center: Vec3) -> Aabb {
        Aabb::from_center_extents(center, Vec3::splat(0.5))
    }

    fn grid_objects(n: u32) -> Vec<(Aabb, u32)> {
        let mut out = Vec::new();
        let mut i = 0;
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    out.push((cube(Vec3::new(x as f32, y as f32, z as f32) * 3.0), i));
                    i += 1;
                }
            }
        }
        out
    }

    #[test]
    fn test_build_empty_is_empty() {
        let tree: Bvh<u32> = Bvh::build(Vec::new(), BuildStrategy::Sah, 8, 32);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_sah_build_valid_over_grid() {
        let tree = Bvh::build(grid_objects(5), BuildStrategy::Sah, 8, 32);
        assert_eq!(tree.len(), 125);
        let report = tree.validate();
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn test_all_strategies_agree_with_brute_force() {
        let objects = grid_objects(4);
        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
        for strategy in [
            BuildStrategy::Sah,
            BuildStrategy::Median,
            BuildStrategy::Equal,
        ] {
            let tree = Bvh::build(objects.clone(), strategy, 8, 32);
            let first = tree.raycast_first(&ray, f32::INFINITY).unwrap().unwrap();
            // The nearest cube on the -X ray through the origin row is id 0
            assert_eq!(first.payload, 0, "strategy {:?}", strategy);
        }
    }

    #[test]
    fn test_coincident_centroids_fall_back() {
        // Every centroid identical on every axis: SAH and spatial median
        // both degenerate; the chain must still terminate as leaves.
        let objects: Vec<(Aabb, u32)> = (0..40)
            .map(|i| (cube(Vec3::splat(1.0)), i))
            .collect();
        for strategy in [
            BuildStrategy::Sah,
            BuildStrategy::Median,
            BuildStrategy::Equal,
        ] {
            let tree = Bvh::build(objects.clone(), strategy, 8, 32);
            assert_eq!(tree.len(), 40, "strategy {:?}", strategy);
            let report = tree.validate();
            assert!(report.ok, "{:?}: {:?}", strategy, report.errors);
        }
    }

    #[test]
    fn test_flat_planar_scene() {
        // Zero-thickness boxes in a plane: union has zero volume but a
        // real surface area; the build must stay well-formed.
        let objects: Vec<(Aabb, u32)> = (0..30)
            .map(|i| {
                let x = i as f32 * 2.0;
                (
                    Aabb::new(Vec3::new(x, 0.0, -1.0), Vec3::new(x + 1.0, 0.0, 1.0)),
                    i as u32,
                )
            })
            .collect();
        let tree = Bvh::build(objects, BuildStrategy::Sah, 4, 32);
        assert_eq!(tree.len(), 30);
        let report = tree.validate();
        assert!(report.ok, "{:?}", report.errors);
    }
}
