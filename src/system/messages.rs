//! Per-tick output handed to callers and subscribers.

use crate::fusion::{FusionStats, Side};
use crate::objects::FusedObjectRecord;

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub tick: u64,
    pub side: Side,
    /// Team record first, then objects in registry order, cameras, and the
    /// stabilised class detections.
    pub records: Vec<FusedObjectRecord>,
    pub stats: FusionStats,
}

impl TickOutput {
    /// Records of the tracked scene, without the leading team record.
    pub fn objects(&self) -> &[FusedObjectRecord] {
        self.records.get(1..).unwrap_or(&[])
    }
}
