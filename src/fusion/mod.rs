//! Multi-camera fusion: per-side registries, weighted candidate fusion,
//! camera localization and side resolution.

pub mod fuse;
mod localization;
pub mod registry;
pub mod side;

pub use fuse::{fuse_candidates, FusedSlot};
pub use registry::{CameraEntry, EngineConfig, Registry};
pub use side::{Side, SideConfig, SideResolver};

/// Counters for one `solve_locations_per_object` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub candidates: usize,
    pub rejected: usize,
    pub objects_updated: usize,
}
