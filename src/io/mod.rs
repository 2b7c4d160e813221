//! Configuration files and recorded detections.

pub mod config;
pub mod recording;

pub use config::{ConfigError, FusionConfig, ObjectSpec, SceneConfig};
pub use recording::{RecordedTick, Recording};
