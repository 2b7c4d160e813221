//! Trackable objects and their pose-solving strategies.
//!
//! The variant set is closed: fixed anchors, rigid multi-marker bodies,
//! single-marker bodies and independent marker arrays. All of them live in an
//! [`ObjectArena`] and are referred to by [`ObjectKey`] handles everywhere
//! else.

pub mod anchor;
pub mod arena;
pub mod array;
pub mod record;
pub mod rigid;
pub mod single;

use nalgebra::{Point2, Vector3};

use crate::cameras::CameraObservation;
use crate::geometry::{PoseSolver, SE3};
use crate::markers::{Marker, MarkerId};

pub use anchor::AnchorObject;
pub use arena::{ArenaError, ObjectArena, ObjectKey};
pub use array::{ArraySlot, MarkerArray};
pub use record::{FusedObjectRecord, ObjectIdentity, ObjectKind};
pub use rigid::RigidBody;
pub use single::SingleMarkerBody;

/// One camera's opinion about one object (or one array slot).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseCandidate {
    /// Slot index; always 0 for single-pose objects.
    pub slot: usize,
    /// World ← object.
    pub world: SE3,
    /// Pixel area covered by the markers that produced this candidate.
    pub surface: f64,
    pub reprojection_error: f64,
}

/// Bookkeeping shared by every single-pose variant.
#[derive(Debug, Clone)]
pub struct ObjectState {
    pub name: String,
    pub kind: ObjectKind,
    /// Only one live instance with this name may be registered.
    pub unique: bool,
    pub world: SE3,
    pub surface: f64,
    pub last_update: Option<u64>,
}

impl ObjectState {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unique: false,
            world: SE3::identity(),
            surface: 0.0,
            last_update: None,
        }
    }

    pub fn record_update(&mut self, pose: SE3, surface: f64, tick: u64) {
        self.world = pose;
        self.surface = surface;
        self.last_update = Some(tick);
    }

    /// Updated within the last `window` ticks.
    pub fn is_fresh(&self, tick: u64, window: u64) -> bool {
        self.last_update
            .is_some_and(|t| t <= tick && tick - t <= window)
    }
}

/// Flattened 3D↔2D correspondences of the visible subset of a marker set.
#[derive(Debug, Default, Clone)]
pub struct Correspondences {
    pub object_points: Vec<Vector3<f64>>,
    pub image_points: Vec<Point2<f64>>,
    pub surface: f64,
    pub visible_markers: usize,
}

impl Correspondences {
    /// Corners of every marker in `markers` visible in `observation`, in the
    /// object frame. A marker ID seen twice in one image only contributes its
    /// first detection.
    pub fn gather(markers: &[Marker], observation: &CameraObservation) -> Self {
        let mut out = Self::default();
        for marker in markers {
            let Some(detection) = observation.first_detection(marker.id) else {
                continue;
            };
            out.object_points.extend(marker.object_corners());
            out.image_points.extend(detection.corners);
            out.surface += detection.area();
            out.visible_markers += 1;
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.visible_markers == 0
    }
}

/// Closed set of trackable object variants.
#[derive(Debug, Clone)]
pub enum TrackableObject {
    Anchor(AnchorObject),
    Rigid(RigidBody),
    Single(SingleMarkerBody),
    Array(MarkerArray),
}

impl TrackableObject {
    pub fn name(&self) -> &str {
        match self {
            TrackableObject::Anchor(o) => &o.state.name,
            TrackableObject::Rigid(o) => &o.state.name,
            TrackableObject::Single(o) => &o.state.name,
            TrackableObject::Array(o) => &o.name,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            TrackableObject::Anchor(o) => o.state.kind,
            TrackableObject::Rigid(o) => o.state.kind,
            TrackableObject::Single(o) => o.state.kind,
            TrackableObject::Array(o) => o.kind,
        }
    }

    pub fn is_unique(&self) -> bool {
        match self {
            TrackableObject::Anchor(o) => o.state.unique,
            TrackableObject::Rigid(o) => o.state.unique,
            TrackableObject::Single(o) => o.state.unique,
            TrackableObject::Array(_) => true,
        }
    }

    pub fn is_anchor(&self) -> bool {
        matches!(self, TrackableObject::Anchor(_))
    }

    pub fn as_anchor(&self) -> Option<&AnchorObject> {
        match self {
            TrackableObject::Anchor(a) => Some(a),
            _ => None,
        }
    }

    /// IDs this object claims in the marker catalog (deduplicated).
    pub fn marker_ids(&self) -> Vec<MarkerId> {
        let mut ids: Vec<MarkerId> = match self {
            TrackableObject::Anchor(o) => o.markers.iter().map(|m| m.id).collect(),
            TrackableObject::Rigid(o) => o.markers.iter().map(|m| m.id).collect(),
            TrackableObject::Single(o) => vec![o.marker.id],
            TrackableObject::Array(o) => vec![o.marker_id],
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Candidate poses this object can derive from one camera's observation.
    /// An empty result means "nothing usable from this camera".
    pub fn solve_pose(&self, observation: &CameraObservation, solver: &dyn PoseSolver) -> Vec<PoseCandidate> {
        match self {
            TrackableObject::Anchor(o) => o.solve_pose(observation).into_iter().collect(),
            TrackableObject::Rigid(o) => o.solve_pose(observation, solver).into_iter().collect(),
            TrackableObject::Single(o) => o.solve_pose(observation, solver).into_iter().collect(),
            TrackableObject::Array(o) => o.solve_pose(observation, solver),
        }
    }

    /// Store a fused pose. Anchors ignore engine updates.
    pub fn apply_fused(&mut self, slot: usize, pose: SE3, surface: f64, tick: u64) {
        match self {
            TrackableObject::Anchor(_) => {}
            TrackableObject::Rigid(o) => o.state.record_update(pose, surface, tick),
            TrackableObject::Single(o) => o.state.record_update(pose, surface, tick),
            TrackableObject::Array(o) => o.apply_fused(slot, pose, surface, tick),
        }
    }

    pub fn is_fresh(&self, tick: u64, window: u64) -> bool {
        match self {
            TrackableObject::Anchor(_) => true,
            TrackableObject::Rigid(o) => o.state.is_fresh(tick, window),
            TrackableObject::Single(o) => o.state.is_fresh(tick, window),
            TrackableObject::Array(o) => o.slots.iter().any(|s| s.is_fresh(tick, window)),
        }
    }

    /// Output records for this object. Arrays emit one record per fresh slot,
    /// numbered upwards from `base_numeral`.
    pub fn to_output_records(&self, base_numeral: u32, tick: u64, window: u64) -> Vec<FusedObjectRecord> {
        let single = |state: &ObjectState, stamp: u64| {
            vec![FusedObjectRecord::new(
                ObjectIdentity::new(state.kind, base_numeral, state.name.clone()),
                state.world,
                stamp,
            )]
        };
        match self {
            TrackableObject::Anchor(o) => single(&o.state, tick),
            TrackableObject::Rigid(o) => single(&o.state, o.state.last_update.unwrap_or(tick)),
            TrackableObject::Single(o) => single(&o.state, o.state.last_update.unwrap_or(tick)),
            TrackableObject::Array(o) => o.to_output_records(base_numeral, tick, window),
        }
    }
}

impl From<AnchorObject> for TrackableObject {
    fn from(value: AnchorObject) -> Self {
        TrackableObject::Anchor(value)
    }
}

impl From<RigidBody> for TrackableObject {
    fn from(value: RigidBody) -> Self {
        TrackableObject::Rigid(value)
    }
}

impl From<SingleMarkerBody> for TrackableObject {
    fn from(value: SingleMarkerBody) -> Self {
        TrackableObject::Single(value)
    }
}

impl From<MarkerArray> for TrackableObject {
    fn from(value: MarkerArray) -> Self {
        TrackableObject::Array(value)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::CameraId;
    use crate::geometry::CameraIntrinsics;
    use crate::markers::MarkerDetection;

    #[test]
    fn test_freshness_window() {
        let mut state = ObjectState::new("cube", ObjectKind::Robot);
        assert!(!state.is_fresh(0, 5));

        state.record_update(SE3::identity(), 10.0, 10);
        assert!(state.is_fresh(10, 5));
        assert!(state.is_fresh(15, 5));
        assert!(!state.is_fresh(16, 5));
    }

    #[test]
    fn test_gather_uses_first_detection_and_sums_area() {
        let markers = vec![Marker::centered(MarkerId(1), 0.1), Marker::centered(MarkerId(2), 0.1)];
        let square = |o: f64| {
            [
                Point2::new(o, o),
                Point2::new(o + 10.0, o),
                Point2::new(o + 10.0, o + 10.0),
                Point2::new(o, o + 10.0),
            ]
        };
        let obs = CameraObservation::new(CameraId(0), CameraIntrinsics::new(1.0, 1.0, 0.0, 0.0)).with_markers(vec![
            MarkerDetection::new(MarkerId(1), square(0.0)),
            MarkerDetection::new(MarkerId(1), square(50.0)),
            MarkerDetection::new(MarkerId(9), square(100.0)),
        ]);

        let corr = Correspondences::gather(&markers, &obs);

        assert_eq!(corr.visible_markers, 1);
        assert_eq!(corr.object_points.len(), 4);
        assert_eq!(corr.image_points[0], Point2::new(0.0, 0.0));
        assert!((corr.surface - 100.0).abs() < 1e-9);
    }
}
