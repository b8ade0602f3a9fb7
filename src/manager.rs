//! Scene integration facade
//!
//! Couples the dynamic BVH to an external scene-graph tick loop.
//! Producers register colliders (anything exposing world bounds and an
//! enabled flag), notify the manager when a collider may have moved, and
//! drive a per-frame `tick` that batches maintenance: a small dirty set
//! is refit in place, a large one triggers a full rebuild.
//!
//! One manager may be active process-wide at a time, with an explicit
//! `initialize`/`teardown` lifecycle; producers that cannot thread the
//! handle through their scene graph fetch it from the active slot.
//!
//! Author: Moroya Sakamoto

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bvh::{Bvh, NearestHit, QueryError, RayHit};
use crate::types::{Aabb, BuildStrategy, Ray};

/// Fraction of dirty colliders beyond which a tick rebuilds the tree
/// instead of refitting. Fixed policy.
const REBUILD_DIRTY_RATIO: f32 = 0.3;

/// A registerable object: a producer of world-space bounds and an
/// enabled flag. Query results silently drop disabled colliders.
pub trait Collider: Send + Sync {
    /// Current world-space bounds
    fn world_bounds(&self) -> Aabb;

    /// Whether this collider participates in query results
    fn is_enabled(&self) -> bool;
}

/// Shared collider handle stored by the manager
pub type ColliderRef = Arc<dyn Collider>;

impl std::fmt::Debug for dyn Collider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Collider")
            .field("world_bounds", &self.world_bounds())
            .field("is_enabled", &self.is_enabled())
            .finish()
    }
}

/// Manager lifecycle and lookup errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ManagerError {
    /// `initialize` while another manager holds the active slot
    #[error("a spatial manager is already active")]
    AlreadyActive,

    /// `teardown` with no active manager
    #[error("no spatial manager is active")]
    NotActive,

    /// An id that was never registered, or has been unregistered
    #[error("collider id {0} is not registered")]
    UnknownCollider(u64),
}

/// Configuration accepted at manager initialization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManagerOptions {
    /// Leaf-size limit handed to the tree
    pub max_leaf_size: u32,
    /// Depth limit handed to the tree
    pub max_depth: u32,
    /// Strategy for the initial build and for `rebuild`
    pub build_strategy: BuildStrategy,
    /// Whether `tick` performs maintenance at all
    pub auto_update: bool,
    /// Ticks between maintenance passes (1 = every tick)
    pub update_interval: u32,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            max_leaf_size: 8,
            max_depth: 32,
            build_strategy: BuildStrategy::Sah,
            auto_update: true,
            update_interval: 1,
        }
    }
}

/// Facade over a [`Bvh`] of collider handles with dirty tracking and
/// scheduled maintenance.
#[derive(Debug)]
pub struct SpatialManager {
    bvh: Bvh<ColliderRef>,
    colliders: HashMap<u64, ColliderRef>,
    dirty: HashSet<u64>,
    options: ManagerOptions,
    frame: u64,
}

/// Process-wide active manager slot
static ACTIVE_MANAGER: Mutex<Option<Arc<Mutex<SpatialManager>>>> = Mutex::new(None);

fn active_slot() -> MutexGuard<'static, Option<Arc<Mutex<SpatialManager>>>> {
    match ACTIVE_MANAGER.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SpatialManager {
    /// Create a standalone manager without touching the active slot
    pub fn new(options: ManagerOptions) -> Self {
        SpatialManager {
            bvh: Bvh::new(
                options.max_leaf_size,
                options.max_depth,
                options.build_strategy == BuildStrategy::Sah,
            ),
            colliders: HashMap::new(),
            dirty: HashSet::new(),
            options: ManagerOptions {
                update_interval: options.update_interval.max(1),
                ..options
            },
            frame: 0,
        }
    }

    /// Create a manager and claim the process-wide active slot.
    ///
    /// Fails with [`ManagerError::AlreadyActive`] while another manager
    /// is live; call [`SpatialManager::teardown`] first.
    pub fn initialize(options: ManagerOptions) -> Result<Arc<Mutex<SpatialManager>>, ManagerError> {
        let mut slot = active_slot();
        if slot.is_some() {
            return Err(ManagerError::AlreadyActive);
        }
        let manager = Arc::new(Mutex::new(SpatialManager::new(options)));
        *slot = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// The currently active manager, if any
    pub fn active() -> Option<Arc<Mutex<SpatialManager>>> {
        active_slot().as_ref().map(Arc::clone)
    }

    /// Release the active slot.
    ///
    /// Fails with [`ManagerError::NotActive`] when nothing is active.
    pub fn teardown() -> Result<(), ManagerError> {
        let mut slot = active_slot();
        if slot.take().is_none() {
            return Err(ManagerError::NotActive);
        }
        Ok(())
    }

    /// The options this manager was initialized with
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Number of registered colliders
    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    // =====================================================================
    // Registration and dirty tracking
    // =====================================================================

    /// Insert a collider into the tree, returning its assigned object id
    pub fn register(&mut self, collider: ColliderRef) -> u64 {
        let id = self.bvh.insert(collider.world_bounds(), Arc::clone(&collider));
        self.colliders.insert(id, collider);
        id
    }

    /// Remove a collider. Returns `false` for an unknown id.
    pub fn unregister(&mut self, id: u64) -> bool {
        if self.colliders.remove(&id).is_none() {
            return false;
        }
        self.dirty.remove(&id);
        self.bvh.remove(id)
    }

    /// Look up the registered handle behind an object id.
    ///
    /// An unreachable id is malformed input, not a "nothing there"
    /// result, so it surfaces as [`ManagerError::UnknownCollider`].
    pub fn collider(&self, id: u64) -> Result<ColliderRef, ManagerError> {
        self.colliders
            .get(&id)
            .map(Arc::clone)
            .ok_or(ManagerError::UnknownCollider(id))
    }

    /// Re-derive the object id assigned to a collider at registration,
    /// by handle identity. `None` when the handle was never registered
    /// here (or has been unregistered since).
    pub fn object_id_of(&self, collider: &ColliderRef) -> Option<u64> {
        self.colliders
            .iter()
            .find(|(_, registered)| Arc::ptr_eq(registered, collider))
            .map(|(&id, _)| id)
    }

    /// Note that a collider's world bounds may have changed. The actual
    /// tree maintenance happens on the next scheduled tick. Returns
    /// `false` for an unknown id.
    pub fn mark_dirty(&mut self, id: u64) -> bool {
        if !self.colliders.contains_key(&id) {
            return false;
        }
        self.dirty.insert(id);
        true
    }

    /// Per-frame maintenance hook, driven by the scene producer.
    ///
    /// Runs every `update_interval` ticks while `auto_update` is set:
    /// with more than 30% of colliders dirty the tree is rebuilt,
    /// otherwise each dirty collider is updated in place and the tree
    /// refit.
    pub fn tick(&mut self) {
        if !self.options.auto_update {
            return;
        }
        self.frame = self.frame.wrapping_add(1);
        if self.frame % self.options.update_interval as u64 != 0 {
            return;
        }
        if self.dirty.is_empty() {
            return;
        }

        let total = self.colliders.len();
        let ratio = self.dirty.len() as f32 / total.max(1) as f32;
        if ratio > REBUILD_DIRTY_RATIO {
            self.rebuild();
        } else {
            let dirty: Vec<u64> = self.dirty.drain().collect();
            for id in dirty {
                if let Some(collider) = self.colliders.get(&id) {
                    self.bvh.update(id, collider.world_bounds());
                }
            }
            self.bvh.refit();
        }
    }

    /// Refresh every collider's bounds and rebuild the tree under the
    /// configured strategy
    pub fn rebuild(&mut self) {
        for (&id, collider) in &self.colliders {
            self.bvh.update(id, collider.world_bounds());
        }
        self.bvh.rebuild(self.options.build_strategy);
        self.dirty.clear();
    }

    /// Direct read access to the underlying tree
    pub fn bvh(&self) -> &Bvh<ColliderRef> {
        &self.bvh
    }

    // =====================================================================
    // Queries (filtered by `is_enabled`)
    // =====================================================================

    /// All enabled colliders hit by the ray, sorted ascending by distance
    pub fn raycast(
        &self,
        ray: &Ray,
        max_distance: f32,
    ) -> Result<Vec<RayHit<ColliderRef>>, QueryError> {
        let hits = self.bvh.raycast(ray, max_distance)?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.payload.is_enabled())
            .collect())
    }

    /// The closest enabled collider hit by the ray
    pub fn raycast_first(
        &self,
        ray: &Ray,
        max_distance: f32,
    ) -> Result<Option<RayHit<ColliderRef>>, QueryError> {
        // The globally closest hit may be disabled, so take the ordered
        // hit list and keep the first enabled one.
        let hits = self.bvh.raycast(ray, max_distance)?;
        Ok(hits.into_iter().find(|hit| hit.payload.is_enabled()))
    }

    /// Enabled colliders whose bounds lie within `radius` of `center`
    pub fn query_range(&self, center: Vec3, radius: f32) -> Result<Vec<ColliderRef>, QueryError> {
        let found = self.bvh.query_range(center, radius)?;
        Ok(found.into_iter().filter(|c| c.is_enabled()).collect())
    }

    /// Enabled colliders whose bounds overlap the query box
    pub fn intersect_bounds(&self, bounds: &Aabb) -> Vec<ColliderRef> {
        self.bvh
            .intersect_bounds(bounds)
            .into_iter()
            .filter(|c| c.is_enabled())
            .collect()
    }

    /// The nearest enabled collider to `point`, optionally within
    /// `max_distance`
    pub fn find_nearest(
        &self,
        point: Vec3,
        max_distance: Option<f32>,
    ) -> Result<Option<NearestHit<ColliderRef>>, QueryError> {
        if let Some(cap) = max_distance {
            if !(cap >= 0.0) {
                return Err(QueryError::NegativeMaxDistance(cap));
            }
        }
        // Nearest-with-filter cannot prune on the global best, so rank
        // candidates by bounds distance directly.
        let mut best: Option<NearestHit<ColliderRef>> = None;
        let cap = max_distance.unwrap_or(f32::INFINITY);
        for collider in self.colliders.values() {
            if !collider.is_enabled() {
                continue;
            }
            let d = collider.world_bounds().distance_to_point(point);
            if d <= cap && best.as_ref().map_or(true, |b| d < b.distance) {
                best = Some(NearestHit {
                    payload: Arc::clone(collider),
                    distance: d,
                });
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestCollider {
        bounds: Mutex<Aabb>,
        enabled: AtomicBool,
    }

    impl TestCollider {
        fn new(center: Vec3) -> Arc<Self> {
            Arc::new(TestCollider {
                bounds: Mutex::new(Aabb::from_center_extents(center, Vec3::splat(0.5))),
                enabled: AtomicBool::new(true),
            })
        }

        fn move_to(&self, center: Vec3) {
            if let Ok(mut b) = self.bounds.lock() {
                *b = Aabb::from_center_extents(center, Vec3::splat(0.5));
            }
        }

        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    impl Collider for TestCollider {
        fn world_bounds(&self) -> Aabb {
            self.bounds
                .lock()
                .map(|b| *b)
                .unwrap_or(Aabb::EMPTY)
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn test_register_and_query() {
        let mut manager = SpatialManager::new(ManagerOptions::default());
        let a = TestCollider::new(Vec3::ZERO);
        let b = TestCollider::new(Vec3::new(10.0, 0.0, 0.0));
        manager.register(a.clone());
        manager.register(b.clone());
        assert_eq!(manager.collider_count(), 2);

        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X);
        let hits = manager.raycast(&ray, 100.0).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn test_disabled_filtered_from_results() {
        let mut manager = SpatialManager::new(ManagerOptions::default());
        let near = TestCollider::new(Vec3::ZERO);
        let far = TestCollider::new(Vec3::new(5.0, 0.0, 0.0));
        manager.register(near.clone());
        manager.register(far.clone());

        near.set_enabled(false);
        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X);
        let first = manager.raycast_first(&ray, 100.0).unwrap().unwrap();
        assert!((first.distance - 9.5).abs() < 1e-4, "skips the disabled near hit");

        assert!(manager.query_range(Vec3::ZERO, 1.0).unwrap().is_empty());
        let nearest = manager.find_nearest(Vec3::ZERO, None).unwrap().unwrap();
        assert!((nearest.distance - 4.5).abs() < 1e-4);
    }

    #[test]
    fn test_mark_dirty_and_tick_refits() {
        let mut manager = SpatialManager::new(ManagerOptions::default());
        let mut ids = Vec::new();
        let colliders: Vec<_> = (0..10)
            .map(|i| TestCollider::new(Vec3::new(i as f32 * 3.0, 0.0, 0.0)))
            .collect();
        for c in &colliders {
            ids.push(manager.register(c.clone()));
        }

        // Move one collider (10% dirty: refit path)
        colliders[0].move_to(Vec3::new(0.0, 50.0, 0.0));
        assert!(manager.mark_dirty(ids[0]));
        manager.tick();

        let found = manager
            .query_range(Vec3::new(0.0, 50.0, 0.0), 1.0)
            .unwrap();
        assert_eq!(found.len(), 1);
        let report = manager.bvh().validate();
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn test_tick_rebuilds_when_mostly_dirty() {
        let mut manager = SpatialManager::new(ManagerOptions::default());
        let colliders: Vec<_> = (0..10)
            .map(|i| TestCollider::new(Vec3::new(i as f32 * 3.0, 0.0, 0.0)))
            .collect();
        let ids: Vec<u64> = colliders.iter().map(|c| manager.register(c.clone())).collect();

        // Move over 30% of colliders: rebuild path
        for (c, id) in colliders.iter().zip(&ids).take(5) {
            c.move_to(Vec3::new(0.0, 0.0, 40.0));
            manager.mark_dirty(*id);
        }
        manager.tick();

        let found = manager
            .query_range(Vec3::new(0.0, 0.0, 40.0), 1.0)
            .unwrap();
        assert_eq!(found.len(), 5);
        let report = manager.bvh().validate();
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn test_update_interval_defers_maintenance() {
        let mut manager = SpatialManager::new(ManagerOptions {
            update_interval: 3,
            ..Default::default()
        });
        let c = TestCollider::new(Vec3::ZERO);
        let id = manager.register(c.clone());

        c.move_to(Vec3::new(20.0, 0.0, 0.0));
        manager.mark_dirty(id);

        // Frames 1 and 2: nothing happens
        manager.tick();
        manager.tick();
        assert!(manager
            .query_range(Vec3::new(20.0, 0.0, 0.0), 1.0)
            .unwrap()
            .is_empty());

        // Frame 3: maintenance runs
        manager.tick();
        assert_eq!(
            manager
                .query_range(Vec3::new(20.0, 0.0, 0.0), 1.0)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_collider_lookup_by_id_and_handle() {
        let mut manager = SpatialManager::new(ManagerOptions::default());
        let ball = TestCollider::new(Vec3::ZERO);
        let handle: ColliderRef = ball.clone();
        let id = manager.register(handle.clone());

        assert_eq!(manager.object_id_of(&handle), Some(id));
        let found = manager.collider(id).unwrap();
        assert!(Arc::ptr_eq(&found, &handle));

        assert_eq!(
            manager.collider(id + 1).unwrap_err(),
            ManagerError::UnknownCollider(id + 1)
        );

        // A registered-elsewhere handle is unknown here
        let stranger: ColliderRef = TestCollider::new(Vec3::ONE);
        assert_eq!(manager.object_id_of(&stranger), None);

        manager.unregister(id);
        assert_eq!(manager.object_id_of(&handle), None);
        assert_eq!(
            manager.collider(id).unwrap_err(),
            ManagerError::UnknownCollider(id)
        );
    }

    #[test]
    fn test_unregister() {
        let mut manager = SpatialManager::new(ManagerOptions::default());
        let c = TestCollider::new(Vec3::ZERO);
        let id = manager.register(c.clone());
        assert!(manager.unregister(id));
        assert!(!manager.unregister(id));
        assert_eq!(manager.collider_count(), 0);
        assert!(manager.query_range(Vec3::ZERO, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_active_slot_lifecycle() {
        // Serialized by the slot itself being process-wide: run the
        // whole lifecycle inside one test.
        let _ = SpatialManager::teardown();

        let manager = SpatialManager::initialize(ManagerOptions::default()).unwrap();
        assert!(SpatialManager::active().is_some());
        assert_eq!(
            SpatialManager::initialize(ManagerOptions::default()).unwrap_err(),
            ManagerError::AlreadyActive
        );

        drop(manager);
        SpatialManager::teardown().unwrap();
        assert!(SpatialManager::active().is_none());
        assert_eq!(
            SpatialManager::teardown().unwrap_err(),
            ManagerError::NotActive
        );
    }
}
