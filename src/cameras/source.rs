//! Seams to the hardware side: frame sources, discovery and detectors.
//!
//! Capture, undistortion and marker corner detection live outside this crate
//! and are reached only through these traits.

use thiserror::Error;

use super::observation::ClassDetection;
use crate::geometry::{CameraIntrinsics, SE3};
use crate::markers::MarkerDetection;

/// An image as delivered by a [`CameraSource`]. The pixel layout is whatever
/// the paired detectors expect.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("grab failed: {0}")]
    Grab(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },
}

/// One physical camera.
pub trait CameraSource: Send {
    fn name(&self) -> &str;

    /// Device path used to avoid opening the same camera twice.
    fn device_path(&self) -> &str;

    /// Intrinsics of the (already undistorted) frames returned by `read`.
    fn intrinsics(&self) -> CameraIntrinsics;

    /// Latch a frame. Called for every camera before any `read` so that all
    /// cameras sample the same instant as closely as possible.
    fn grab(&mut self) -> Result<(), CameraError>;

    fn read(&mut self) -> Result<Frame, CameraError>;
}

/// Camera discovery, polled from the scan thread.
pub trait CameraScanner: Send {
    /// Device paths currently present.
    fn scan(&mut self) -> Vec<String>;

    fn open(&mut self, path: &str) -> Result<Box<dyn CameraSource>, CameraError>;
}

pub trait MarkerDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Vec<MarkerDetection>;
}

/// Classifier producing world-placed, non-marker detections.
pub trait ClassDetector: Send + Sync {
    fn detect(&self, frame: &Frame, intrinsics: &CameraIntrinsics, camera_pose: Option<&SE3>) -> Vec<ClassDetection>;
}
