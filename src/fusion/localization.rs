//! Camera self-localization from anchor objects.

use tracing::trace;

use super::registry::Registry;
use crate::cameras::CameraObservation;
use crate::geometry::PoseSolver;
use crate::objects::ObjectArena;

impl Registry {
    /// Stamp `observation.camera_pose` from the first registered anchor whose
    /// markers are visible. Returns false, leaving the previous pose in place,
    /// when no anchor could be solved.
    pub fn solve_camera_location(
        &self,
        arena: &ObjectArena,
        observation: &mut CameraObservation,
        solver: &dyn PoseSolver,
    ) -> bool {
        for key in self.keys() {
            let Some(anchor) = arena.get(key).and_then(|o| o.as_anchor()) else {
                continue;
            };
            if let Some(world_from_camera) = anchor.locate_camera(observation, solver) {
                trace!("{}: {} localized from {}", self.name(), observation.camera, anchor.state.name);
                observation.camera_pose = Some(world_from_camera);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::EngineConfig;
    use crate::geometry::{CameraIntrinsics, LmPoseSolver, PoseSolution, SolveError, SolveMode, SE3};
    use crate::markers::{Marker, MarkerId};
    use crate::objects::test_support::{detect, intrinsics, observation, overhead_camera};
    use crate::objects::{AnchorObject, ObjectKind, SingleMarkerBody};
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Vector3};

    struct ScriptedSolver(SE3);

    impl PoseSolver for ScriptedSolver {
        fn solve(
            &self,
            _object_points: &[Vector3<f64>],
            _image_points: &[Point2<f64>],
            _intrinsics: &CameraIntrinsics,
            _mode: SolveMode,
        ) -> Result<PoseSolution, SolveError> {
            Ok(PoseSolution {
                camera_from_object: self.0,
                reprojection_error: 0.0,
            })
        }
    }

    fn scene() -> (ObjectArena, Registry) {
        let mut arena = ObjectArena::new();
        let registry = Registry::new("blue", EngineConfig::default());
        let robot = arena
            .insert(SingleMarkerBody::new("r", ObjectKind::Robot, Marker::centered(MarkerId(1), 0.07)))
            .unwrap();
        let board = arena
            .insert(AnchorObject::new("board", SE3::identity(), vec![Marker::centered(MarkerId(42), 0.1)]))
            .unwrap();
        registry.register(robot);
        registry.register(board);
        (arena, registry)
    }

    #[test]
    fn test_anchor_at_origin_gives_inverse_marker_pose() {
        let (arena, registry) = scene();
        let board = Marker::centered(MarkerId(42), 0.1);
        let camera = overhead_camera(1.5);
        let det = detect(&board, &SE3::identity(), &camera, &intrinsics()).unwrap();
        let mut obs = observation(0, None, vec![det]);
        let camera_from_marker = SE3::from_rotation_vector(Vector3::new(3.0, 0.1, 0.0), Vector3::new(0.0, 0.1, 1.4));

        assert!(registry.solve_camera_location(&arena, &mut obs, &ScriptedSolver(camera_from_marker)));

        let located = obs.camera_pose.unwrap();
        assert_relative_eq!(located.to_matrix(), camera_from_marker.inverse().to_matrix(), epsilon = 1e-9);
    }

    #[test]
    fn test_no_anchor_visible_keeps_previous_pose() {
        let (arena, registry) = scene();
        let robot = Marker::centered(MarkerId(1), 0.07);
        let camera = overhead_camera(1.5);
        let previous = overhead_camera(1.4);
        let det = detect(&robot, &SE3::identity(), &camera, &intrinsics()).unwrap();
        let mut obs = observation(0, Some(previous), vec![det]);

        assert!(!registry.solve_camera_location(&arena, &mut obs, &LmPoseSolver::default()));
        assert_eq!(obs.camera_pose, Some(previous));
    }

    #[test]
    fn test_localizes_synthetic_camera() {
        let (arena, registry) = scene();
        let board = Marker::centered(MarkerId(42), 0.1);
        let camera = overhead_camera(1.3);
        let det = detect(&board, &SE3::identity(), &camera, &intrinsics()).unwrap();
        let mut obs = observation(0, None, vec![det]);

        assert!(registry.solve_camera_location(&arena, &mut obs, &LmPoseSolver::default()));
        assert_relative_eq!(obs.camera_pose.unwrap().translation, camera.translation, epsilon = 1e-4);
    }
}
