//! The fusion registry: which objects and cameras one side tracks, and the
//! per-tick solve/fuse/emit cycle over them.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::fuse::fuse_candidates;
use super::FusionStats;
use crate::cameras::{CameraId, CameraObservation};
use crate::geometry::{PoseSolver, SE3};
use crate::objects::{FusedObjectRecord, ObjectArena, ObjectIdentity, ObjectKey, ObjectKind};

/// Fusion engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidates covering fewer pixels than this are ignored.
    pub min_surface: f64,
    /// Objects not updated for more ticks than this are left out of the output.
    pub freshness_window: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_surface: 100.0,
            freshness_window: 5,
        }
    }
}

/// Last known pose of a camera as seen by this registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraEntry {
    pub pose: Option<SE3>,
    pub last_update: Option<u64>,
}

/// Ordered set of tracked objects (as arena keys) plus camera bookkeeping.
///
/// Insertion order defines output order and numerals. Mutation goes through
/// short-lived locks so hot-plug callbacks can register and unregister while
/// a tick is running.
pub struct Registry {
    name: String,
    config: EngineConfig,
    objects: Mutex<Vec<ObjectKey>>,
    cameras: Mutex<BTreeMap<CameraId, CameraEntry>>,
}

impl Registry {
    pub fn new(name: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            objects: Mutex::new(Vec::new()),
            cameras: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append `key`. Registering a key twice has no effect.
    pub fn register(&self, key: ObjectKey) -> bool {
        let mut objects = self.objects.lock();
        if objects.contains(&key) {
            return false;
        }
        objects.push(key);
        true
    }

    /// Remove `key`. Removing a key that is not registered is a no-op.
    pub fn unregister(&self, key: ObjectKey) -> bool {
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|k| *k != key);
        before != objects.len()
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.objects.lock().contains(&key)
    }

    /// Snapshot of the registered keys in order.
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.lock().clone()
    }

    pub fn register_camera(&self, id: CameraId) {
        self.cameras.lock().entry(id).or_insert(CameraEntry {
            pose: None,
            last_update: None,
        });
    }

    pub fn unregister_camera(&self, id: CameraId) -> bool {
        self.cameras.lock().remove(&id).is_some()
    }

    /// Record a camera pose for this tick. Unknown cameras are ignored.
    pub fn set_camera_pose(&self, id: CameraId, pose: SE3, tick: u64) {
        if let Some(entry) = self.cameras.lock().get_mut(&id) {
            entry.pose = Some(pose);
            entry.last_update = Some(tick);
        }
    }

    pub fn has_camera(&self, id: CameraId) -> bool {
        self.cameras.lock().contains_key(&id)
    }

    pub fn camera_pose(&self, id: CameraId) -> Option<SE3> {
        self.cameras.lock().get(&id).and_then(|e| e.pose)
    }

    /// World positions of every localized camera.
    pub fn camera_positions(&self) -> Vec<nalgebra::Vector3<f64>> {
        self.cameras
            .lock()
            .values()
            .filter_map(|e| e.pose.map(|p| p.translation))
            .collect()
    }

    /// Solve every registered non-anchor object against every observation and
    /// store the fused result.
    ///
    /// Objects without a surviving candidate keep their previous pose and
    /// tick, so they age out through the freshness check.
    pub fn solve_locations_per_object(
        &self,
        arena: &mut ObjectArena,
        observations: &[CameraObservation],
        tick: u64,
        solver: &dyn PoseSolver,
    ) -> FusionStats {
        let mut stats = FusionStats::default();
        for key in self.keys() {
            let Some(object) = arena.get(key) else {
                trace!("{}: stale key {:?}", self.name, key);
                continue;
            };
            if object.is_anchor() {
                continue;
            }
            let candidates: Vec<_> = observations
                .iter()
                .flat_map(|obs| object.solve_pose(obs, solver))
                .collect();
            stats.candidates += candidates.len();
            if candidates.is_empty() {
                continue;
            }

            let (fused, rejected) = fuse_candidates(&candidates, self.config.min_surface);
            stats.rejected += rejected;
            if fused.is_empty() {
                continue;
            }
            if let Some(object) = arena.get_mut(key) {
                for slot in &fused {
                    object.apply_fused(slot.slot, slot.pose, slot.surface, tick);
                }
                stats.objects_updated += 1;
            }
        }
        debug!(
            "{}: tick {} updated {} objects ({} candidates, {} rejected)",
            self.name, tick, stats.objects_updated, stats.candidates, stats.rejected
        );
        stats
    }

    /// Output records for every fresh object, in registry order, followed by
    /// every camera localized within the freshness window.
    pub fn object_data_vector(&self, arena: &ObjectArena, tick: u64) -> Vec<FusedObjectRecord> {
        self.object_data_vector_where(arena, tick, |_| true)
    }

    /// Like [`object_data_vector`](Self::object_data_vector) but only for
    /// keys accepted by `keep`.
    pub fn object_data_vector_where(
        &self,
        arena: &ObjectArena,
        tick: u64,
        keep: impl Fn(ObjectKey) -> bool,
    ) -> Vec<FusedObjectRecord> {
        let window = self.config.freshness_window;
        let mut numerals: HashMap<ObjectKind, u32> = HashMap::new();
        let mut records = Vec::new();

        for key in self.keys() {
            if !keep(key) {
                continue;
            }
            let Some(object) = arena.get(key) else { continue };
            if !object.is_fresh(tick, window) {
                continue;
            }
            let next = numerals.entry(object.kind()).or_insert(0);
            let emitted = object.to_output_records(*next, tick, window);
            *next += emitted.len() as u32;
            records.extend(emitted);
        }

        let cameras = self.cameras.lock();
        let mut numeral = 0;
        for (id, entry) in cameras.iter() {
            let (Some(pose), Some(updated)) = (entry.pose, entry.last_update) else {
                continue;
            };
            if updated > tick || tick - updated > window {
                continue;
            }
            records.push(FusedObjectRecord::new(
                ObjectIdentity::new(ObjectKind::Camera, numeral, id.to_string()),
                pose,
                updated,
            ));
            numeral += 1;
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LmPoseSolver;
    use crate::markers::{Marker, MarkerId};
    use crate::objects::test_support::{detect, intrinsics, observation, overhead_camera};
    use crate::objects::{AnchorObject, RigidBody, SingleMarkerBody};
    use nalgebra::{UnitQuaternion, Vector3};

    fn tracker(arena: &mut ObjectArena, id: u32, name: &str) -> ObjectKey {
        arena
            .insert(SingleMarkerBody::new(name, ObjectKind::Robot, Marker::centered(MarkerId(id), 0.07)))
            .unwrap()
    }

    fn seen(arena: &ObjectArena, key: ObjectKey, world_from_object: &SE3, camera_id: u32) -> CameraObservation {
        let camera = overhead_camera(1.5);
        let crate::objects::TrackableObject::Single(body) = arena.get(key).unwrap() else {
            panic!("expected single-marker body");
        };
        let det = detect(&body.marker, world_from_object, &camera, &intrinsics()).unwrap();
        observation(camera_id, Some(camera), vec![det])
    }

    #[test]
    fn test_register_is_idempotent_and_unregister_absent_is_noop() {
        let mut arena = ObjectArena::new();
        let key = tracker(&mut arena, 1, "r1");
        let registry = Registry::new("blue", EngineConfig::default());

        assert!(registry.register(key));
        assert!(!registry.register(key));
        assert_eq!(registry.keys().len(), 1);
        assert!(registry.unregister(key));
        assert!(!registry.unregister(key));
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_stale_object_is_omitted_but_stays_registered() {
        let mut arena = ObjectArena::new();
        let key = tracker(&mut arena, 1, "r1");
        let registry = Registry::new("blue", EngineConfig::default());
        registry.register(key);
        let pose = SE3::from_translation(Vector3::new(0.1, 0.1, 0.0));
        let obs = seen(&arena, key, &pose, 0);

        let stats = registry.solve_locations_per_object(&mut arena, &[obs], 10, &LmPoseSolver::default());
        assert_eq!(stats.objects_updated, 1);
        assert_eq!(registry.object_data_vector(&arena, 10).len(), 1);
        assert_eq!(registry.object_data_vector(&arena, 15).len(), 1);

        // No observations for a while: pose left alone, object ages out.
        registry.solve_locations_per_object(&mut arena, &[], 16, &LmPoseSolver::default());
        assert!(registry.object_data_vector(&arena, 16).is_empty());
        assert!(registry.contains(key));
    }

    #[test]
    fn test_unregistered_object_never_reported_again() {
        let mut arena = ObjectArena::new();
        let key = tracker(&mut arena, 1, "r1");
        let registry = Registry::new("blue", EngineConfig::default());
        registry.register(key);
        let obs = seen(&arena, key, &SE3::identity(), 0);
        registry.solve_locations_per_object(&mut arena, &[obs.clone()], 1, &LmPoseSolver::default());
        assert_eq!(registry.object_data_vector(&arena, 1).len(), 1);

        registry.unregister(key);
        registry.solve_locations_per_object(&mut arena, &[obs], 2, &LmPoseSolver::default());

        assert!(registry
            .object_data_vector(&arena, 2)
            .iter()
            .all(|r| r.identity.name != "r1"));
    }

    #[test]
    fn test_two_cameras_equal_surface_fuse_to_midpoint() {
        // Same image in both cameras; only the stamped camera poses differ
        // by a small yaw, so the world candidates differ by that yaw.
        let mut arena = ObjectArena::new();
        let key = tracker(&mut arena, 1, "r1");
        let registry = Registry::new("blue", EngineConfig::default());
        registry.register(key);

        let obs_a = seen(&arena, key, &SE3::identity(), 0);
        let mut obs_b = obs_a.clone();
        obs_b.camera = CameraId(1);
        let skew = SE3::from_parts(UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.02), Vector3::zeros());
        obs_b.camera_pose = obs_a.camera_pose.map(|p| skew * p);

        let solver = LmPoseSolver::default();
        let cand_a = arena.get(key).unwrap().solve_pose(&obs_a, &solver)[0].world;
        let cand_b = arena.get(key).unwrap().solve_pose(&obs_b, &solver)[0].world;
        registry.solve_locations_per_object(&mut arena, &[obs_a, obs_b], 3, &solver);

        let records = registry.object_data_vector(&arena, 3);
        let fused = records[0].transform.rotation;
        let midpoint = cand_a.rotation.slerp(&cand_b.rotation, 0.5);
        assert!(fused.angle_to(&midpoint) < 1e-6);
    }

    #[test]
    fn test_numerals_follow_registry_order_per_kind() {
        let mut arena = ObjectArena::new();
        let a = tracker(&mut arena, 1, "a");
        let b = tracker(&mut arena, 2, "b");
        let cube = arena
            .insert(RigidBody::cube(
                "cube",
                [MarkerId(10), MarkerId(11), MarkerId(12), MarkerId(13)],
                0.06,
                (0.1, 0.1),
            ))
            .unwrap();
        let board = arena
            .insert(AnchorObject::new("board", SE3::identity(), vec![Marker::centered(MarkerId(42), 0.1)]))
            .unwrap();
        let registry = Registry::new("blue", EngineConfig::default());
        for key in [board, b, cube, a] {
            registry.register(key);
        }
        for key in [a, b] {
            arena.get_mut(key).unwrap().apply_fused(0, SE3::identity(), 500.0, 4);
        }
        registry.register_camera(CameraId(7));
        registry.set_camera_pose(CameraId(7), overhead_camera(2.0), 4);

        let records = registry.object_data_vector(&arena, 4);
        let ids: Vec<_> = records
            .iter()
            .map(|r| (r.identity.kind, r.identity.numeral, r.identity.name.as_str()))
            .collect();

        assert_eq!(
            ids,
            vec![
                (ObjectKind::Board, 0, "board"),
                (ObjectKind::Robot, 0, "b"),
                (ObjectKind::Robot, 1, "a"),
                (ObjectKind::Camera, 0, "cam7"),
            ]
        );
    }

    #[test]
    fn test_unregistered_camera_drops_out_of_bookkeeping() {
        let registry = Registry::new("blue", EngineConfig::default());
        registry.register_camera(CameraId(1));
        registry.set_camera_pose(CameraId(1), overhead_camera(2.0), 1);
        assert_eq!(registry.camera_positions().len(), 1);

        assert!(registry.unregister_camera(CameraId(1)));
        assert!(!registry.has_camera(CameraId(1)));
        assert!(registry.camera_positions().is_empty());
        assert!(registry.object_data_vector(&ObjectArena::new(), 1).is_empty());
    }

    #[test]
    fn test_camera_record_carries_localization_tick_and_ages_out() {
        let registry = Registry::new("blue", EngineConfig::default());
        registry.register_camera(CameraId(2));
        registry.set_camera_pose(CameraId(2), overhead_camera(2.0), 3);
        let arena = ObjectArena::new();

        let records = registry.object_data_vector(&arena, 8);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tick, 3);

        assert!(registry.object_data_vector(&arena, 9).is_empty());
        assert!(registry.camera_pose(CameraId(2)).is_some());
    }
}
