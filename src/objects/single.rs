//! Objects tracked through exactly one marker.

use tracing::trace;

use super::{ObjectKind, ObjectState, PoseCandidate};
use crate::cameras::CameraObservation;
use crate::geometry::{PoseSolver, SolveMode};
use crate::markers::Marker;

#[derive(Debug, Clone)]
pub struct SingleMarkerBody {
    pub state: ObjectState,
    pub marker: Marker,
}

impl SingleMarkerBody {
    pub fn new(name: impl Into<String>, kind: ObjectKind, marker: Marker) -> Self {
        Self {
            state: ObjectState::new(name, kind),
            marker,
        }
    }

    /// Robot top tracker; only one per name may be registered.
    pub fn top_tracker(name: impl Into<String>, marker: Marker) -> Self {
        let mut body = Self::new(name, ObjectKind::TopTracker, marker);
        body.state.unique = true;
        body
    }

    pub fn solve_pose(&self, observation: &CameraObservation, solver: &dyn PoseSolver) -> Option<PoseCandidate> {
        let camera_pose = observation.camera_pose?;
        let detection = observation.first_detection(self.marker.id)?;
        let solution = solver
            .solve(
                &self.marker.local_corners(),
                &detection.corners,
                &observation.intrinsics,
                SolveMode::SquareMarker,
            )
            .map_err(|e| trace!("{}: solve failed for {}: {}", self.state.name, observation.camera, e))
            .ok()?;
        let world_from_marker = camera_pose * solution.camera_from_object;
        Some(PoseCandidate {
            slot: 0,
            world: world_from_marker * self.marker.offset.inverse(),
            surface: detection.area(),
            reprojection_error: solution.reprojection_error,
        })
    }
}
