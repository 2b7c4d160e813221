//! Fixed objects with a known world pose, used to localize cameras.

use tracing::trace;

use super::{Correspondences, ObjectKind, ObjectState, PoseCandidate};
use crate::cameras::CameraObservation;
use crate::geometry::{PoseSolver, SolveMode, SE3};
use crate::markers::Marker;

/// An object whose world pose is given, never estimated.
#[derive(Debug, Clone)]
pub struct AnchorObject {
    pub state: ObjectState,
    pub markers: Vec<Marker>,
    /// Operators may move an adjustable anchor through [`set_location`].
    ///
    /// [`set_location`]: AnchorObject::set_location
    pub adjustable: bool,
}

impl AnchorObject {
    pub fn new(name: impl Into<String>, world: SE3, markers: Vec<Marker>) -> Self {
        let mut state = ObjectState::new(name, ObjectKind::Board);
        state.world = world;
        state.unique = true;
        Self {
            state,
            markers,
            adjustable: false,
        }
    }

    pub fn adjustable(mut self, adjustable: bool) -> Self {
        self.adjustable = adjustable;
        self
    }

    pub fn with_kind(mut self, kind: ObjectKind) -> Self {
        self.state.kind = kind;
        self
    }

    pub fn world(&self) -> &SE3 {
        &self.state.world
    }

    /// Move the anchor. Returns false (and leaves the pose alone) when the
    /// anchor is not adjustable.
    pub fn set_location(&mut self, world: SE3) -> bool {
        if !self.adjustable {
            return false;
        }
        self.state.world = world;
        true
    }

    /// The fixed pose, scored by the visible marker area, whenever any marker
    /// of this anchor is in view.
    pub fn solve_pose(&self, observation: &CameraObservation) -> Option<PoseCandidate> {
        let corr = Correspondences::gather(&self.markers, observation);
        if corr.is_empty() {
            return None;
        }
        Some(PoseCandidate {
            slot: 0,
            world: self.state.world,
            surface: corr.surface,
            reprojection_error: 0.0,
        })
    }

    /// World ← camera from the anchor markers visible in `observation`.
    pub fn locate_camera(&self, observation: &CameraObservation, solver: &dyn PoseSolver) -> Option<SE3> {
        let corr = Correspondences::gather(&self.markers, observation);
        if corr.is_empty() {
            return None;
        }
        // A lone marker is solved in its own frame so the square-marker
        // specialisation applies, then lifted back to the anchor frame.
        let (object_points, marker_from_anchor, mode) = if corr.visible_markers == 1 {
            let marker = self
                .markers
                .iter()
                .find(|m| observation.first_detection(m.id).is_some())?;
            (marker.local_corners().to_vec(), marker.offset.inverse(), SolveMode::SquareMarker)
        } else {
            (corr.object_points, SE3::identity(), SolveMode::General)
        };

        match solver.solve(&object_points, &corr.image_points, &observation.intrinsics, mode) {
            Ok(solution) => {
                let camera_from_anchor = solution.camera_from_object * marker_from_anchor;
                Some(self.state.world * camera_from_anchor.inverse())
            }
            Err(e) => {
                trace!("{}: anchor solve failed for {}: {}", self.state.name, observation.camera, e);
                None
            }
        }
    }
}
