//! Benchmarks for BVH construction and queries
//!
//! Author: Moroya Sakamoto

use alice_bvh::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_scene(count: usize, seed: u64) -> Vec<(Aabb, u32)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let center = Vec3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            );
            let extents = Vec3::new(
                rng.gen_range(0.1..2.0),
                rng.gen_range(0.1..2.0),
                rng.gen_range(0.1..2.0),
            );
            (Aabb::from_center_extents(center, extents), i as u32)
        })
        .collect()
}

fn random_rays(count: usize, seed: u64) -> Vec<Ray> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let origin = Vec3::new(
                rng.gen_range(-80.0..80.0),
                rng.gen_range(-80.0..80.0),
                rng.gen_range(-80.0..80.0),
            );
            let target = Vec3::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
            );
            Ray::new(origin, target - origin)
        })
        .collect()
}

fn sphere_soup(segments: u32, rings: u32) -> Vec<f32> {
    let point = |ring: u32, segment: u32| -> Vec3 {
        let theta = std::f32::consts::PI * ring as f32 / rings as f32;
        let phi = 2.0 * std::f32::consts::PI * segment as f32 / segments as f32;
        Vec3::new(
            theta.sin() * phi.cos(),
            theta.cos(),
            theta.sin() * phi.sin(),
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

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    let scene = random_scene(10_000, 1);

    for strategy in [
        BuildStrategy::Sah,
        BuildStrategy::Median,
        BuildStrategy::Equal,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", strategy)),
            &strategy,
            |b, &strategy| {
                b.iter(|| Bvh::build(black_box(scene.clone()), strategy, 8, 32));
            },
        );
    }
    group.finish();
}

fn bench_raycast_first(c: &mut Criterion) {
    let mut group = c.benchmark_group("raycast_first");
    let scene = random_scene(10_000, 2);
    let tree = Bvh::build(scene, BuildStrategy::Sah, 8, 32);
    let rays = random_rays(256, 3);

    group.bench_function("tree_10k", |b| {
        b.iter(|| {
            for ray in &rays {
                let _ = black_box(tree.raycast_first(black_box(ray), 500.0));
            }
        })
    });
    group.finish();
}

fn bench_find_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_nearest");
    let scene = random_scene(10_000, 4);
    let tree = Bvh::build(scene, BuildStrategy::Sah, 8, 32);
    let mut rng = StdRng::seed_from_u64(5);
    let points: Vec<Vec3> = (0..256)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-60.0..60.0),
                rng.gen_range(-60.0..60.0),
                rng.gen_range(-60.0..60.0),
            )
        })
        .collect();

    group.bench_function("tree_10k", |b| {
        b.iter(|| {
            for &point in &points {
                let _ = black_box(tree.find_nearest(black_box(point), None));
            }
        })
    });
    group.finish();
}

fn bench_mesh_raycast(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh_raycast");
    let positions = sphere_soup(128, 128);
    let mesh: MeshBvh =
        MeshBvh::build_from_geometry(&positions, None, None, &MeshBvhConfig::default());
    let rays = random_rays(64, 6);

    group.bench_function("tree", |b| {
        b.iter(|| {
            for ray in &rays {
                let _ = black_box(mesh.raycast_first(black_box(ray), 500.0, false));
            }
        })
    });
    group.bench_function("brute_force", |b| {
        b.iter(|| {
            for ray in &rays {
                let _ = black_box(mesh.raycast_brute_force(black_box(ray), 500.0, false));
            }
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_raycast_first,
    bench_find_nearest,
    bench_mesh_raycast
);
criterion_main!(benches);
