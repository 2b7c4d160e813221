//! Rigid bodies carrying several markers around a common origin.

use nalgebra::Vector3;
use tracing::trace;

use super::{Correspondences, ObjectKind, ObjectState, PoseCandidate};
use crate::cameras::CameraObservation;
use crate::geometry::se3::rotation_from_zy;
use crate::geometry::{PoseSolver, SolveMode, SE3};
use crate::markers::{Marker, MarkerId};

/// Several markers at known offsets, solved jointly.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub state: ObjectState,
    pub markers: Vec<Marker>,
}

impl RigidBody {
    pub fn new(name: impl Into<String>, kind: ObjectKind, markers: Vec<Marker>) -> Self {
        Self {
            state: ObjectState::new(name, kind),
            markers,
        }
    }

    /// Four-sided tracker cube: markers on the +X, +Y, -X, -Y faces (in that
    /// order), each with its Z axis pointing out of the face and its Y axis up.
    /// `size` is the cube's footprint along X and Y.
    pub fn cube(name: impl Into<String>, ids: [MarkerId; 4], marker_size: f64, size: (f64, f64)) -> Self {
        let (sx, sy) = (size.0 / 2.0, size.1 / 2.0);
        let faces = [
            Vector3::new(sx, 0.0, 0.0),
            Vector3::new(0.0, sy, 0.0),
            Vector3::new(-sx, 0.0, 0.0),
            Vector3::new(0.0, -sy, 0.0),
        ];
        let markers = ids
            .iter()
            .zip(faces)
            .map(|(id, face)| {
                let offset = SE3::from_rt(rotation_from_zy(&face, &Vector3::z()), face);
                Marker::new(*id, marker_size, offset)
            })
            .collect();
        Self::new(name, ObjectKind::Robot, markers)
    }

    /// Joint solve over every visible marker's corners. Sub-solves are never
    /// averaged: with one or two markers at grazing angles only the flattened
    /// problem is well conditioned.
    pub fn solve_pose(&self, observation: &CameraObservation, solver: &dyn PoseSolver) -> Option<PoseCandidate> {
        let camera_pose = observation.camera_pose?;
        let corr = Correspondences::gather(&self.markers, observation);
        if corr.is_empty() {
            return None;
        }
        match solver.solve(
            &corr.object_points,
            &corr.image_points,
            &observation.intrinsics,
            SolveMode::General,
        ) {
            Ok(solution) => Some(PoseCandidate {
                slot: 0,
                world: camera_pose * solution.camera_from_object,
                surface: corr.surface,
                reprojection_error: solution.reprojection_error,
            }),
            Err(e) => {
                trace!("{}: solve failed for {}: {}", self.state.name, observation.camera, e);
                None
            }
        }
    }
}
