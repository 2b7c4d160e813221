//! Fusion system: owns the shared state and drives one tick at a time.
//!
//! A live tick runs camera lifecycle changes, the parallel camera stage,
//! side resolution, fusion and post-processing. Recorded observations take
//! the same path through [`FusionSystem::process_observations`], minus the
//! camera stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, trace};

use super::messages::TickOutput;
use super::shared_state::SharedState;
use crate::cameras::{CameraManager, CameraObservation, CameraStage};
use crate::fusion::{Side, SideResolver};
use crate::geometry::{PoseSolver, SE3};
use crate::io::FusionConfig;
use crate::objects::{ArenaError, FusedObjectRecord, ObjectIdentity, ObjectKey, ObjectKind, TrackableObject};
use crate::postprocess::{Deflicker, PostProcess};

/// Which registries an object is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Common,
    Blue,
    Yellow,
}

pub struct FusionSystem {
    shared: Arc<SharedState>,
    solver: Arc<dyn PoseSolver>,
    side_resolver: SideResolver,
    side: Side,
    post: Vec<Box<dyn PostProcess>>,
    subscribers: Vec<Sender<TickOutput>>,
    tick: u64,
    cameras: Option<(CameraManager, CameraStage)>,
}

impl FusionSystem {
    /// An empty system: no objects, no cameras.
    pub fn new(config: &FusionConfig, solver: Arc<dyn PoseSolver>) -> Self {
        Self {
            shared: SharedState::new(&config.engine),
            solver,
            side_resolver: SideResolver::new(config.side.clone()),
            side: Side::Unknown,
            post: vec![Box::new(Deflicker::new(config.deflicker.clone()))],
            subscribers: Vec::new(),
            tick: 0,
            cameras: None,
        }
    }

    /// A system tracking the scene described by `config`.
    pub fn from_config(config: &FusionConfig, solver: Arc<dyn PoseSolver>) -> Result<Self> {
        let system = Self::new(config, solver);
        let scopes = [
            (Scope::Common, &config.scene.common),
            (Scope::Blue, &config.scene.blue),
            (Scope::Yellow, &config.scene.yellow),
        ];
        for (scope, specs) in scopes {
            for spec in specs {
                let object = spec.build();
                let name = object.name().to_string();
                system
                    .add_object(scope, object)
                    .with_context(|| format!("adding {name} to {scope:?}"))?;
            }
        }
        info!(
            "tracking {} objects ({} blue, {} yellow)",
            system.shared.arena.read().len(),
            system.shared.sides.blue.keys().len(),
            system.shared.sides.yellow.keys().len()
        );
        Ok(system)
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn add_object(&self, scope: Scope, object: impl Into<TrackableObject>) -> Result<ObjectKey, ArenaError> {
        let key = self.shared.arena.write().insert(object)?;
        let sides = &self.shared.sides;
        match scope {
            Scope::Common => {
                sides.blue.register(key);
                sides.yellow.register(key);
            }
            Scope::Blue => {
                sides.blue.register(key);
            }
            Scope::Yellow => {
                sides.yellow.register(key);
            }
        }
        Ok(key)
    }

    /// Unregister `key` everywhere and drop the object, releasing its markers.
    pub fn remove_object(&self, key: ObjectKey) -> Option<TrackableObject> {
        for registry in self.shared.sides.both() {
            registry.unregister(key);
        }
        self.shared.arena.write().remove(key)
    }

    pub fn add_post_process(&mut self, stage: Box<dyn PostProcess>) {
        self.post.push(stage);
    }

    pub fn attach_cameras(&mut self, manager: CameraManager, stage: CameraStage) {
        self.cameras = Some((manager, stage));
    }

    /// Receive every future [`TickOutput`]. A subscriber whose channel is
    /// full misses ticks instead of stalling the loop.
    pub fn subscribe(&mut self, capacity: usize) -> Receiver<TickOutput> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.push(tx);
        rx
    }

    /// One live tick over the attached cameras. Without cameras this fuses
    /// an empty observation set.
    pub fn tick(&mut self) -> TickOutput {
        self.tick += 1;
        let tick = self.tick;

        let observations = match self.cameras.as_mut() {
            Some((manager, stage)) => {
                let changes = manager.tick();
                for registry in self.shared.sides.both() {
                    for id in &changes.detached {
                        registry.unregister_camera(*id);
                    }
                    for id in &changes.attached {
                        registry.register_camera(*id);
                    }
                }

                let arena = self.shared.arena.read();
                let registry = self.shared.sides.for_side(self.side);
                let solver = self.solver.as_ref();
                let outputs = stage.run(manager.cameras_mut(), tick, |obs| {
                    registry.solve_camera_location(&arena, obs, solver)
                });
                drop(arena);
                outputs.into_iter().flatten().collect()
            }
            None => Vec::new(),
        };
        self.fuse_and_emit(tick, observations)
    }

    /// Fuse one batch of externally produced observations, e.g. a recorded
    /// tick. Cameras are localized sequentially; an observation that no
    /// anchor localizes keeps its own pose, or else the camera's last one.
    /// Only solved or supplied poses refresh the camera's last-update tick.
    pub fn process_observations(&mut self, tick: u64, mut observations: Vec<CameraObservation>) -> TickOutput {
        self.tick = tick;
        let sides = &self.shared.sides;
        {
            let arena = self.shared.arena.read();
            let registry = sides.for_side(self.side);
            for obs in &mut observations {
                for r in sides.both() {
                    r.register_camera(obs.camera);
                }
                let supplied = obs.camera_pose.is_some();
                if registry.solve_camera_location(&arena, obs, self.solver.as_ref()) || supplied {
                    obs.localized = true;
                } else {
                    obs.camera_pose = registry.camera_pose(obs.camera);
                }
            }
        }
        self.fuse_and_emit(tick, observations)
    }

    /// Tick until [`SharedState::request_shutdown`] is called. Returns
    /// immediately when no cameras are attached.
    pub fn run(&mut self) {
        if self.cameras.is_none() {
            return;
        }
        while !self.shared.is_shutdown_requested() {
            self.tick();
        }
        info!("fusion loop stopped after {} ticks", self.tick);
    }

    fn fuse_and_emit(&mut self, tick: u64, observations: Vec<CameraObservation>) -> TickOutput {
        for obs in observations.iter().filter(|o| o.localized) {
            if let Some(pose) = obs.camera_pose {
                for registry in self.shared.sides.both() {
                    registry.set_camera_pose(obs.camera, pose, tick);
                }
            }
        }
        self.update_side(&observations);

        let sides = &self.shared.sides;
        let registry = sides.for_side(self.side);
        let mut arena = self.shared.arena.write();
        let stats = registry.solve_locations_per_object(&mut arena, &observations, tick, self.solver.as_ref());
        let mut records = match self.side {
            Side::Unknown => registry.object_data_vector_where(&arena, tick, |k| sides.yellow.contains(k)),
            Side::Blue | Side::Yellow => registry.object_data_vector(&arena, tick),
        };
        drop(arena);

        records.extend(class_records(&observations, tick));
        let now = Instant::now();
        for stage in &mut self.post {
            trace!("tick {}: running {}", tick, stage.name());
            stage.process(&mut records, now);
        }
        records.insert(
            0,
            FusedObjectRecord::new(
                ObjectIdentity::new(ObjectKind::Team, 0, self.side.to_string()),
                SE3::identity(),
                tick,
            ),
        );

        let output = TickOutput {
            tick,
            side: self.side,
            records,
            stats,
        };
        self.publish(&output);
        output
    }

    fn update_side(&mut self, observations: &[CameraObservation]) {
        let positions: Vec<_> = observations
            .iter()
            .filter_map(|o| o.camera_pose.map(|p| p.translation))
            .collect();
        let side = self.side_resolver.resolve(&positions);
        if side != self.side {
            info!("side changed: {} -> {}", self.side, side);
            self.side = side;
        }
    }

    fn publish(&mut self, output: &TickOutput) {
        self.subscribers.retain(|tx| match tx.try_send(output.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("subscriber full, dropping tick {}", output.tick);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Class detections from every camera as records, numbered per kind.
fn class_records(observations: &[CameraObservation], tick: u64) -> Vec<FusedObjectRecord> {
    let mut numerals: HashMap<ObjectKind, u32> = HashMap::new();
    observations
        .iter()
        .flat_map(|o| &o.class_detections)
        .map(|d| {
            let numeral = numerals.entry(d.kind).or_insert(0);
            let identity = ObjectIdentity::new(d.kind, *numeral, d.kind.to_string());
            *numeral += 1;
            FusedObjectRecord::new(identity, SE3::from_translation(d.position), tick).with_confidence(d.confidence)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::manager::test_support::FakeCamera;
    use crate::cameras::{CameraId, CameraManagerConfig, ClassDetection, Frame, MarkerDetector};
    use crate::geometry::LmPoseSolver;
    use crate::io::SceneConfig;
    use crate::markers::{Marker, MarkerDetection, MarkerId};
    use crate::objects::test_support::{detect, intrinsics, observation, overhead_camera};
    use crate::objects::{AnchorObject, SingleMarkerBody};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::sync::atomic::Ordering;

    fn empty_system() -> FusionSystem {
        let config = FusionConfig {
            scene: SceneConfig::default(),
            ..Default::default()
        };
        FusionSystem::new(&config, Arc::new(LmPoseSolver::default()))
    }

    fn tracker(id: u32, name: &str) -> SingleMarkerBody {
        SingleMarkerBody::new(name, ObjectKind::Robot, Marker::centered(MarkerId(id), 0.07))
    }

    fn at(x: f64, y: f64) -> SE3 {
        SE3::from_translation(Vector3::new(x, y, 0.0))
    }

    /// Camera 1.5 m above `(x, y)` looking down, seeing each `(id, pose)`.
    fn camera_over(x: f64, y: f64, seen: &[(u32, SE3)]) -> CameraObservation {
        let base = overhead_camera(1.5);
        let camera = SE3::from_parts(base.rotation, Vector3::new(x, y, 1.5));
        let markers = seen
            .iter()
            .filter_map(|(id, pose)| detect(&Marker::centered(MarkerId(*id), 0.07), pose, &camera, &intrinsics()))
            .collect();
        observation(0, Some(camera), markers)
    }

    fn names(output: &TickOutput) -> Vec<&str> {
        output
            .objects()
            .iter()
            .filter(|r| r.kind() != ObjectKind::Camera)
            .map(|r| r.identity.name.as_str())
            .collect()
    }

    #[test]
    fn test_competition_scene_builds() {
        let system = FusionSystem::from_config(&FusionConfig::default(), Arc::new(LmPoseSolver::default())).unwrap();

        assert_eq!(system.shared().arena.read().len(), 16);
        assert_eq!(system.shared().sides.blue.keys().len(), 14);
        assert_eq!(system.shared().sides.yellow.keys().len(), 14);
    }

    #[test]
    fn test_unknown_side_emits_only_common_objects() {
        let mut system = empty_system();
        system.add_object(Scope::Common, tracker(1, "common")).unwrap();
        system.add_object(Scope::Blue, tracker(2, "blue only")).unwrap();

        let obs = camera_over(0.05, -0.03, &[(1, at(0.0, 0.0)), (2, at(0.2, 0.0))]);
        let out = system.process_observations(1, vec![obs]);

        assert_eq!(out.side, Side::Unknown);
        assert_eq!(out.records[0].kind(), ObjectKind::Team);
        assert_eq!(out.records[0].identity.name, "Unknown");
        assert_eq!(names(&out), vec!["common"]);
        assert!(out.objects().iter().any(|r| r.kind() == ObjectKind::Camera));
    }

    #[test]
    fn test_blue_side_uses_blue_registry() {
        let mut system = empty_system();
        system.add_object(Scope::Common, tracker(1, "common")).unwrap();
        system.add_object(Scope::Blue, tracker(2, "blue only")).unwrap();
        system.add_object(Scope::Yellow, tracker(3, "yellow only")).unwrap();

        let seen = [(1, at(0.0, 1.0)), (2, at(0.2, 1.1)), (3, at(-0.2, 1.1))];
        let out = system.process_observations(1, vec![camera_over(0.0, 1.1, &seen)]);

        assert_eq!(out.side, Side::Blue);
        assert_eq!(out.records[0].identity.name, "Blue");
        assert_eq!(names(&out), vec!["common", "blue only"]);
        let blue = &out.objects()[1];
        assert_relative_eq!(blue.transform.translation, Vector3::new(0.2, 1.1, 0.0), epsilon = 1e-3);
    }

    #[test]
    fn test_removed_object_is_never_reported() {
        let mut system = empty_system();
        let key = system.add_object(Scope::Common, tracker(1, "gone")).unwrap();

        assert!(system.remove_object(key).is_some());
        assert!(!system.shared().sides.blue.contains(key));
        assert!(!system.shared().sides.yellow.contains(key));
        assert!(system.remove_object(key).is_none());
        system.add_object(Scope::Blue, tracker(1, "marker reused")).unwrap();

        let out = system.process_observations(1, vec![camera_over(0.05, -0.03, &[(1, at(0.0, 0.0))])]);
        assert!(!names(&out).contains(&"gone"));
    }

    #[test]
    fn test_camera_localized_from_anchor() {
        let mut system = empty_system();
        let board = AnchorObject::new("board", SE3::identity(), vec![Marker::centered(MarkerId(20), 0.1)]);
        let anchor_marker = board.markers[0].clone();
        system.add_object(Scope::Common, board).unwrap();

        let world = overhead_camera(1.2);
        let det = detect(&anchor_marker, &SE3::identity(), &world, &intrinsics()).unwrap();
        let out = system.process_observations(1, vec![observation(3, None, vec![det])]);

        let camera = out
            .objects()
            .iter()
            .find(|r| r.kind() == ObjectKind::Camera)
            .expect("camera record");
        assert_eq!(camera.identity.name, CameraId(3).to_string());
        assert_relative_eq!(camera.transform.translation, world.translation, epsilon = 1e-4);
        let yellow = system.shared().sides.yellow.camera_pose(CameraId(3)).map(|p| p.translation);
        assert_eq!(yellow, Some(camera.transform.translation));
    }

    #[test]
    fn test_carried_over_camera_pose_keeps_its_tick_and_ages_out() {
        let mut system = empty_system();
        let board = AnchorObject::new("board", SE3::identity(), vec![Marker::centered(MarkerId(20), 0.1)]);
        let anchor_marker = board.markers[0].clone();
        system.add_object(Scope::Common, board).unwrap();
        let det = detect(&anchor_marker, &SE3::identity(), &overhead_camera(1.2), &intrinsics()).unwrap();
        system.process_observations(1, vec![observation(3, None, vec![det])]);

        let out = system.process_observations(3, vec![observation(3, None, vec![])]);
        let camera = out
            .objects()
            .iter()
            .find(|r| r.kind() == ObjectKind::Camera)
            .expect("camera record");
        assert_eq!(camera.tick, 1);

        let out = system.process_observations(50, vec![observation(3, None, vec![])]);
        assert!(out.objects().iter().all(|r| r.kind() != ObjectKind::Camera));
        assert!(system.shared().sides.blue.camera_pose(CameraId(3)).is_some());
    }

    #[test]
    fn test_class_detections_pass_through_deflicker() {
        let mut system = empty_system();
        let mut obs = observation(0, None, vec![]);
        obs.class_detections = vec![
            ClassDetection {
                kind: ObjectKind::Pot,
                position: Vector3::new(0.5, 0.5, 0.0),
                confidence: 0.8,
            },
            ClassDetection {
                kind: ObjectKind::Pot,
                position: Vector3::new(-0.5, 0.5, 0.0),
                confidence: 0.6,
            },
        ];

        let out = system.process_observations(1, vec![obs]);
        let pots: Vec<_> = out.objects().iter().filter(|r| r.kind() == ObjectKind::Pot).collect();

        assert_eq!(pots.len(), 2);
        assert_eq!(pots[0].identity.numeral, 0);
        assert_eq!(pots[1].identity.numeral, 1);
    }

    #[test]
    fn test_full_subscriber_drops_ticks() {
        let mut system = empty_system();
        let rx = system.subscribe(1);
        let dropped = system.subscribe(1);
        drop(dropped);

        system.process_observations(1, vec![]);
        system.process_observations(2, vec![]);

        assert_eq!(rx.try_recv().map(|o| o.tick), Ok(1));
        assert!(rx.try_recv().is_err());
        assert_eq!(system.subscribers.len(), 1);
    }

    struct NoMarkers;

    impl MarkerDetector for NoMarkers {
        fn detect(&self, _frame: &Frame) -> Vec<MarkerDetection> {
            Vec::new()
        }
    }

    #[test]
    fn test_live_tick_registers_attached_cameras() {
        let mut system = empty_system();
        let manager = CameraManager::new(CameraManagerConfig::default());
        let id = manager.add_camera(Box::new(FakeCamera::new("/dev/video0"))).unwrap();
        let stage = CameraStage::new(1, 10, Arc::new(NoMarkers), None).unwrap();
        system.attach_cameras(manager, stage);

        let out = system.tick();

        assert_eq!(out.tick, 1);
        assert_eq!(out.side, Side::Unknown);
        assert_eq!(system.shared().sides.blue.camera_pose(id), None);
        assert!(system.shared().sides.blue.unregister_camera(id));
    }

    #[test]
    fn test_detached_camera_leaves_every_registry() {
        let mut system = empty_system();
        let manager = CameraManager::new(CameraManagerConfig::default());
        let camera = FakeCamera::new("/dev/video0");
        let failing = Arc::clone(&camera.failing);
        let id = manager.add_camera(Box::new(camera)).unwrap();
        let stage = CameraStage::new(1, 10, Arc::new(NoMarkers), None).unwrap();
        system.attach_cameras(manager, stage);
        failing.store(true, Ordering::SeqCst);

        system.tick();
        for registry in system.shared().sides.both() {
            registry.set_camera_pose(id, overhead_camera(1.5), 1);
        }
        let out = system.tick();
        assert!(out.objects().iter().any(|r| r.kind() == ObjectKind::Camera));

        let out = system.tick();

        assert!(!system.shared().sides.blue.has_camera(id));
        assert!(!system.shared().sides.yellow.has_camera(id));
        assert!(out.objects().iter().all(|r| r.kind() != ObjectKind::Camera));
    }
}
