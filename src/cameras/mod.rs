//! Camera side of the tick: lifecycle management, the parallel
//! read/detect/localize stage and the observations it produces.

pub mod manager;
pub mod observation;
pub mod pipeline;
pub mod source;

pub use manager::{CameraChanges, CameraHandle, CameraManager, CameraManagerConfig};
pub use observation::{CameraId, CameraObservation, ClassDetection};
pub use pipeline::CameraStage;
pub use source::{CameraError, CameraScanner, CameraSource, ClassDetector, Frame, MarkerDetector};
