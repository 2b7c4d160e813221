//! Post-processing stages run on the fused record list of every tick.

pub mod deflicker;

use std::time::Instant;

use crate::objects::FusedObjectRecord;

pub use deflicker::{Deflicker, DeflickerConfig, DeflickerEntry};

/// A stage that may rewrite the per-tick output in place.
pub trait PostProcess: Send {
    fn name(&self) -> &str;

    fn process(&mut self, records: &mut Vec<FusedObjectRecord>, now: Instant);
}
