//! State shared between the fusion loop and hot-plug callbacks.
//!
//! The object arena sits behind an `RwLock`: camera workers read it while
//! localizing, fusion takes it for writing once per tick. Each side's
//! registry does its own locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::fusion::{EngineConfig, Registry, Side};
use crate::objects::ObjectArena;

/// One registry per side of the field, fed by the same cameras.
pub struct Sides {
    pub blue: Registry,
    pub yellow: Registry,
}

impl Sides {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            blue: Registry::new("blue", config.clone()),
            yellow: Registry::new("yellow", config.clone()),
        }
    }

    /// Authoritative registry for `side`. An unresolved side reads from blue.
    pub fn for_side(&self, side: Side) -> &Registry {
        match side {
            Side::Yellow => &self.yellow,
            Side::Blue | Side::Unknown => &self.blue,
        }
    }

    pub fn both(&self) -> [&Registry; 2] {
        [&self.blue, &self.yellow]
    }
}

pub struct SharedState {
    pub arena: RwLock<ObjectArena>,
    pub sides: Sides,
    /// Ask [`FusionSystem::run`](super::FusionSystem::run) to return.
    pub shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new(config: &EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            arena: RwLock::new(ObjectArena::new()),
            sides: Sides::new(config),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
