//! Shared helpers for integration tests
//!
//! Seeded scene generators and brute-force oracles the tree results are
//! checked against.
//!
//! Author: Moroya Sakamoto

use alice_bvh::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic RNG for reproducible scenes
pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A random AABB with center in `[-range, range]^3` and extents in
/// `(0, max_extent]` per axis
pub fn random_aabb(rng: &mut StdRng, range: f32, max_extent: f32) -> Aabb {
    let center = Vec3::new(
        rng.gen_range(-range..range),
        rng.gen_range(-range..range),
        rng.gen_range(-range..range),
    );
    let extents = Vec3::new(
        rng.gen_range(0.01..max_extent),
        rng.gen_range(0.01..max_extent),
        rng.gen_range(0.01..max_extent),
    );
    Aabb::from_center_extents(center, extents)
}

/// A random ray from a point on a sphere of `radius`, aimed at a jittered
/// point near the origin
pub fn random_inward_ray(rng: &mut StdRng, radius: f32) -> Ray {
    let origin = random_unit_vector(rng) * radius;
    let target = Vec3::new(
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
    );
    Ray::new(origin, target - origin)
}

pub fn random_unit_vector(rng: &mut StdRng) -> Vec3 {
    // Rejection sampling keeps the distribution uniform
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let len = v.length();
        if len > 1e-3 && len <= 1.0 {
            return v / len;
        }
    }
}

/// Unit cubes at integer centers `(0,0,0)..(n-1,n-1,n-1)`, payload is the
/// linear grid index
pub fn grid_scene(n: u32) -> Vec<(Aabb, u32)> {
    let mut out = Vec::new();
    for x in 0..n {
        for y in 0..n {
            for z in 0..n {
                let center = Vec3::new(x as f32, y as f32, z as f32);
                let index = x * n * n + y * n + z;
                out.push((Aabb::from_center_extents(center, Vec3::splat(0.5)), index));
            }
        }
    }
    out
}

/// A UV-sphere triangle soup as flat positions (no indices)
pub fn tessellated_sphere(radius: f32, segments: u32, rings: u32) -> Vec<f32> {
    let point = |ring: u32, segment: u32| -> Vec3 {
        let theta = std::f32::consts::PI * ring as f32 / rings as f32;
        let phi = 2.0 * std::f32::consts::PI * segment as f32 / segments as f32;
        Vec3::new(
            radius * theta.sin() * phi.cos(),
            radius * theta.cos(),
            radius * theta.sin() * phi.sin(),
        )
    };

    let mut positions = Vec::new();
    let mut push = |v: Vec3| positions.extend_from_slice(&[v.x, v.y, v.z]);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = point(ring, segment);
            let b = point(ring + 1, segment);
            let c = point(ring + 1, segment + 1);
            let d = point(ring, segment + 1);
            // Wound counter-clockwise seen from outside
            push(a);
            push(c);
            push(b);
            push(a);
            push(d);
            push(c);
        }
    }
    positions
}

/// Brute-force first hit over `(bounds, payload)` pairs, mirroring the
/// tree's slab-test convention
pub fn brute_force_raycast_first(
    objects: &[(Aabb, u32)],
    ray: &Ray,
    max_distance: f32,
) -> Option<(u32, f32)> {
    let mut best: Option<(u32, f32)> = None;
    for (bounds, payload) in objects {
        if let Some(t) = ray.intersect_aabb(bounds) {
            if t <= max_distance && best.map_or(true, |(_, bt)| t < bt) {
                best = Some((*payload, t));
            }
        }
    }
    best
}

/// Brute-force range query: payloads whose bounds overlap the box
/// `[center - r, center + r]`
pub fn brute_force_range(objects: &[(Aabb, u32)], center: Vec3, radius: f32) -> Vec<u32> {
    let query = Aabb::from_center_extents(center, Vec3::splat(radius));
    objects
        .iter()
        .filter(|(bounds, _)| bounds.intersects(&query))
        .map(|(_, payload)| *payload)
        .collect()
}

/// Brute-force nearest payload by closest-point distance to bounds
pub fn brute_force_nearest(objects: &[(Aabb, u32)], point: Vec3) -> Option<(u32, f32)> {
    let mut best: Option<(u32, f32)> = None;
    for (bounds, payload) in objects {
        let d = bounds.distance_to_point(point);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((*payload, d));
        }
    }
    best
}
