//! Per-camera, per-tick observation handed from the camera stage to fusion.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::{CameraIntrinsics, SE3};
use crate::markers::{MarkerDetection, MarkerId};
use crate::objects::ObjectKind;

/// Stable identifier of a camera for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

/// A non-marker detection from the external classifier, already placed in
/// the world frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDetection {
    pub kind: ObjectKind,
    pub position: Vector3<f64>,
    pub confidence: f32,
}

/// Everything one camera saw during one tick.
#[derive(Debug, Clone)]
pub struct CameraObservation {
    pub camera: CameraId,
    pub intrinsics: CameraIntrinsics,
    /// World ← camera. `None` until the camera has been localized once.
    pub camera_pose: Option<SE3>,
    /// `camera_pose` was solved (or supplied) this tick rather than carried
    /// over from an earlier one.
    pub localized: bool,
    pub markers: Vec<MarkerDetection>,
    pub class_detections: Vec<ClassDetection>,
}

impl CameraObservation {
    pub fn new(camera: CameraId, intrinsics: CameraIntrinsics) -> Self {
        Self {
            camera,
            intrinsics,
            camera_pose: None,
            localized: false,
            markers: Vec::new(),
            class_detections: Vec::new(),
        }
    }

    pub fn with_pose(mut self, pose: SE3) -> Self {
        self.camera_pose = Some(pose);
        self
    }

    pub fn with_markers(mut self, markers: Vec<MarkerDetection>) -> Self {
        self.markers = markers;
        self
    }

    /// All detections of `id` in this image (shared-ID arrays can have many).
    pub fn detections_of(&self, id: MarkerId) -> impl Iterator<Item = &MarkerDetection> {
        self.markers.iter().filter(move |d| d.id == id)
    }

    pub fn first_detection(&self, id: MarkerId) -> Option<&MarkerDetection> {
        self.markers.iter().find(|d| d.id == id)
    }

    pub fn is_localized(&self) -> bool {
        self.camera_pose.is_some()
    }
}
