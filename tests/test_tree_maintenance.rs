//! Structural maintenance of the dynamic BVH: rebuild equivalence,
//! removal invariants, refit, and round-trip laws
//!
//! Author: Moroya Sakamoto

mod common;

use alice_bvh::prelude::*;
use common::*;

#[test]
fn test_rebuild_equivalence_under_seeded_rays() {
    // Scenario: 1000 random boxes, 1000 seeded rays; every first-hit
    // must survive a rebuild unchanged
    let mut r = rng(0xA11CE);
    let mut tree: Bvh<u32> = Bvh::default();
    for i in 0..1000u32 {
        tree.insert(random_aabb(&mut r, 30.0, 2.0), i);
    }

    let rays: Vec<Ray> = (0..1000).map(|_| random_inward_ray(&mut r, 80.0)).collect();
    let before: Vec<Option<(u32, f32)>> = rays
        .iter()
        .map(|ray| {
            tree.raycast_first(ray, 500.0)
                .unwrap()
                .map(|h| (h.payload, h.distance))
        })
        .collect();

    tree.rebuild(BuildStrategy::Sah);
    assert!(tree.validate().ok);

    for (ray, expected) in rays.iter().zip(&before) {
        let after = tree
            .raycast_first(ray, 500.0)
            .unwrap()
            .map(|h| (h.payload, h.distance));
        match (expected, after) {
            (Some((_, t0)), Some((_, t1))) => {
                assert!((t0 - t1).abs() < 1e-6, "{} vs {}", t0, t1);
            }
            (None, None) => {}
            other => panic!("rebuild changed a ray result: {:?}", other),
        }
    }
}

#[test]
fn test_remove_all_in_reverse_order() {
    // Scenario: 500 random boxes removed in reverse insertion order;
    // the tree validates after every removal and the count steps down
    let mut r = rng(0xBEEF);
    let mut tree: Bvh<u32> = Bvh::default();
    let mut ids = Vec::new();
    for i in 0..500u32 {
        ids.push(tree.insert(random_aabb(&mut r, 25.0, 2.0), i));
    }

    for (step, id) in ids.iter().rev().enumerate() {
        let before = tree.len();
        assert!(tree.remove(*id), "id {} vanished early", id);
        assert_eq!(tree.len(), before - 1);
        let report = tree.validate();
        assert!(report.ok, "step {}: {:?}", step, report.errors);
    }
    assert!(tree.is_empty());
    assert_eq!(tree.stats().node_count, 0);
}

#[test]
fn test_insert_remove_round_trip_restores_count_and_stats() {
    let mut r = rng(0xCAFE);
    let mut tree: Bvh<u32> = Bvh::default();
    for i in 0..100u32 {
        tree.insert(random_aabb(&mut r, 15.0, 1.5), i);
    }
    let count_before = tree.len();
    let stats_before = tree.stats();

    let extra = tree.insert(random_aabb(&mut r, 15.0, 1.5), 999);
    assert_eq!(tree.len(), count_before + 1);
    assert!(tree.remove(extra));

    assert_eq!(tree.len(), count_before);
    let stats_after = tree.stats();
    assert_eq!(stats_after.object_count, stats_before.object_count);
    assert_eq!(stats_after.leaf_count, stats_before.leaf_count);
    assert!(tree.validate().ok);
}

#[test]
fn test_rebuild_is_idempotent() {
    let mut r = rng(0xD00D);
    let mut tree: Bvh<u32> = Bvh::default();
    for i in 0..200u32 {
        tree.insert(random_aabb(&mut r, 20.0, 2.0), i);
    }

    for strategy in [
        BuildStrategy::Sah,
        BuildStrategy::Median,
        BuildStrategy::Equal,
    ] {
        tree.rebuild(strategy);
        let first = tree.stats();
        let mut first_payloads = tree.intersect_bounds(&Aabb::new(
            Vec3::splat(-100.0),
            Vec3::splat(100.0),
        ));
        first_payloads.sort_unstable();

        tree.rebuild(strategy);
        let second = tree.stats();
        let mut second_payloads = tree.intersect_bounds(&Aabb::new(
            Vec3::splat(-100.0),
            Vec3::splat(100.0),
        ));
        second_payloads.sort_unstable();

        assert_eq!(first.object_count, second.object_count, "{:?}", strategy);
        assert_eq!(first.leaf_count, second.leaf_count, "{:?}", strategy);
        assert_eq!(first.node_count, second.node_count, "{:?}", strategy);
        assert_eq!(first_payloads, second_payloads, "{:?}", strategy);
        assert!(tree.validate().ok);
    }
}

#[test]
fn test_update_moves_object_and_queries_follow() {
    let mut tree: Bvh<u32> = Bvh::default();
    let mut r = rng(0xF00D);
    let mut ids = Vec::new();
    for i in 0..64u32 {
        ids.push(tree.insert(random_aabb(&mut r, 10.0, 1.0), i));
    }

    // Teleport a quarter of the objects to a far cluster
    let far = Vec3::new(500.0, 0.0, 0.0);
    for &id in ids.iter().step_by(4) {
        assert!(tree.update(id, Aabb::from_center_extents(far, Vec3::splat(0.5))));
    }
    tree.refit();
    assert!(tree.validate().ok);

    let found = tree.query_range(far, 1.0).unwrap();
    assert_eq!(found.len(), 16);

    // The tree bounds must have grown to cover the cluster
    let bounds = tree.bounds().unwrap();
    assert!(bounds.max.x >= 500.0);
}

#[test]
fn test_validate_after_interleaved_churn() {
    let mut r = rng(0x1234);
    let mut tree: Bvh<u32> = Bvh::default();
    let mut live: Vec<u64> = Vec::new();

    for round in 0..20 {
        for i in 0..25u32 {
            live.push(tree.insert(random_aabb(&mut r, 20.0, 2.0), round * 100 + i));
        }
        // Remove every third live object
        let mut removed = Vec::new();
        for (k, &id) in live.iter().enumerate() {
            if k % 3 == 0 {
                assert!(tree.remove(id));
                removed.push(id);
            }
        }
        live.retain(|id| !removed.contains(id));

        if round % 5 == 4 {
            tree.rebuild(BuildStrategy::Sah);
        }
        let report = tree.validate();
        assert!(report.ok, "round {}: {:?}", round, report.errors);
        assert_eq!(tree.len() as usize, live.len());
    }
}

#[test]
fn test_clear_resets_but_ids_stay_monotonic() {
    let mut tree: Bvh<u32> = Bvh::default();
    let a = tree.insert(Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE), 0);
    tree.clear();
    assert!(tree.is_empty());
    assert!(tree.validate().ok);

    let b = tree.insert(Aabb::from_center_extents(Vec3::ONE, Vec3::ONE), 1);
    assert!(b > a, "id allocation keeps advancing across clear");
}

#[test]
fn test_deep_degenerate_stack_stays_bounded() {
    // Coincident objects defeat every split heuristic; the tree must
    // stay within its depth discipline and remain fully queryable
    let mut tree: Bvh<u32> = Bvh::new(1, 16, true);
    let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(0.5));
    for i in 0..200u32 {
        tree.insert(bounds, i);
    }
    assert_eq!(tree.len(), 200);

    let found = tree.query_range(Vec3::ZERO, 1.0).unwrap();
    assert_eq!(found.len(), 200);

    let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X);
    let hits = tree.raycast(&ray, 100.0).unwrap();
    assert_eq!(hits.len(), 200);
}

#[test]
fn test_stats_balance_factor_bounds() {
    let mut r = rng(0x7777);
    let tree = Bvh::build(
        (0..256u32).map(|i| (random_aabb(&mut r, 30.0, 2.0), i)),
        BuildStrategy::Sah,
        8,
        32,
    );
    let stats = tree.stats();
    assert!(stats.balance_factor > 0.0 && stats.balance_factor <= 1.0);
    assert_eq!(stats.object_count, 256);
    assert!(stats.leaf_count >= 1);
    assert!(stats.node_count >= stats.leaf_count);
    assert!(stats.memory_bytes > 0);
}
