//! Demo: dynamic scene queries against a BVH
//!
//! Builds a small scene of boxes, casts rays, runs range and nearest
//! queries, then rebuilds and shows tree statistics.
//!
//! Run with: cargo run --example scene_queries
//!
//! Author: Moroya Sakamoto

use alice_bvh::prelude::*;

fn main() {
    // A ring of crates around the origin plus one in the middle
    let mut tree: Bvh<String> = Bvh::default();
    for i in 0..12u32 {
        let angle = i as f32 * std::f32::consts::TAU / 12.0;
        let center = Vec3::new(angle.cos() * 8.0, 0.0, angle.sin() * 8.0);
        tree.insert(
            Aabb::from_center_extents(center, Vec3::splat(0.6)),
            format!("crate-{}", i),
        );
    }
    tree.insert(
        Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(1.0)),
        "pedestal".to_string(),
    );

    // A ray across the scene hits the near ring crate, the pedestal,
    // then the far ring crate
    let ray = Ray::new(Vec3::new(-20.0, 0.0, 0.0), Vec3::X);
    println!("raycast along +X:");
    match tree.raycast(&ray, 100.0) {
        Ok(hits) => {
            for hit in hits {
                println!("  {:>10} at t = {:.2}", hit.payload, hit.distance);
            }
        }
        Err(e) => println!("  query error: {}", e),
    }

    // Everything within 2.5 units of the origin
    match tree.query_range(Vec3::ZERO, 2.5) {
        Ok(found) => println!("near the origin: {:?}", found),
        Err(e) => println!("query error: {}", e),
    }

    // Nearest object to an off-center probe
    if let Ok(Some(nearest)) = tree.find_nearest(Vec3::new(6.0, 0.0, 1.0), None) {
        println!(
            "nearest to (6, 0, 1): {} ({:.2} away)",
            nearest.payload, nearest.distance
        );
    }

    // Rebuild under SAH and inspect the shape
    tree.rebuild(BuildStrategy::Sah);
    let stats = tree.stats();
    println!(
        "after rebuild: {} nodes, {} leaves, depth {}, balance {:.2}",
        stats.node_count, stats.leaf_count, stats.max_depth, stats.balance_factor
    );

    let report = tree.validate();
    println!("validate: ok = {}", report.ok);
}
