//! Geometry utilities: SE3 transforms, camera projection, PnP solving and
//! weighted pose averaging.

pub mod averaging;
pub mod camera;
#[cfg(feature = "opencv")]
pub mod opencv_pnp;
pub mod planar;
pub mod pnp;
pub mod se3;

pub use averaging::weighted_pose_mean;
pub use camera::{CameraIntrinsics, Distortion};
pub use planar::{polygon_area, polygon_perimeter};
#[cfg(feature = "opencv")]
pub use opencv_pnp::OpenCvPoseSolver;
pub use pnp::{LmPoseSolver, PoseSolution, PoseSolver, SolveError, SolveMode};
pub use se3::SE3;
