//! Camera lifecycle: background discovery, error accounting and detachment.
//!
//! The scan thread only ever appends to a pending list. [`CameraManager::tick`]
//! is the single point where the active camera list changes: failing cameras
//! are detached first, then pending cameras are merged in.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::observation::CameraId;
use super::source::{CameraScanner, CameraSource};
use crate::geometry::SE3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraManagerConfig {
    /// Cameras whose error counter reaches this value are detached.
    pub error_threshold: u32,
    /// Added to the counter on every failed grab/read.
    pub error_penalty: u32,
    /// Size of the per-tick camera worker pool.
    pub worker_threads: usize,
    pub scan_interval_ms: u64,
}

impl Default for CameraManagerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 20,
            error_penalty: 10,
            worker_threads: 4,
            scan_interval_ms: 1000,
        }
    }
}

/// An active camera plus its sticky pose and health.
pub struct CameraHandle {
    id: CameraId,
    source: Box<dyn CameraSource>,
    errors: u32,
    location: Option<SE3>,
    location_tick: Option<u64>,
}

impl CameraHandle {
    pub fn new(id: CameraId, source: Box<dyn CameraSource>) -> Self {
        Self {
            id,
            source,
            errors: 0,
            location: None,
            location_tick: None,
        }
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn source_mut(&mut self) -> &mut dyn CameraSource {
        self.source.as_mut()
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn register_error(&mut self, penalty: u32) {
        self.errors = self.errors.saturating_add(penalty);
    }

    pub fn register_success(&mut self) {
        self.errors = self.errors.saturating_sub(1);
    }

    /// Last known world ← camera pose.
    pub fn location(&self) -> Option<SE3> {
        self.location
    }

    pub fn location_tick(&self) -> Option<u64> {
        self.location_tick
    }

    pub fn set_location(&mut self, pose: SE3, tick: u64) {
        self.location = Some(pose);
        self.location_tick = Some(tick);
    }
}

/// Changes to the active camera list applied by one [`CameraManager::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CameraChanges {
    pub attached: Vec<CameraId>,
    pub detached: Vec<CameraId>,
}

impl CameraChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }
}

/// State shared with the scan thread.
#[derive(Default)]
struct Pending {
    cameras: Mutex<Vec<CameraHandle>>,
    used_paths: Mutex<HashSet<String>>,
    next_id: AtomicU32,
}

impl Pending {
    fn enqueue(&self, source: Box<dyn CameraSource>) -> Option<CameraId> {
        if !self.used_paths.lock().insert(source.device_path().to_string()) {
            return None;
        }
        let id = CameraId(self.next_id.fetch_add(1, Ordering::SeqCst));
        info!("camera {} found: {} ({})", id, source.name(), source.device_path());
        self.cameras.lock().push(CameraHandle::new(id, source));
        Some(id)
    }
}

pub struct CameraManager {
    config: CameraManagerConfig,
    cameras: Vec<CameraHandle>,
    pending: Arc<Pending>,
    scan_stop: Option<Sender<()>>,
    scan_thread: Option<JoinHandle<()>>,
}

impl CameraManager {
    pub fn new(config: CameraManagerConfig) -> Self {
        Self {
            config,
            cameras: Vec::new(),
            pending: Arc::new(Pending::default()),
            scan_stop: None,
            scan_thread: None,
        }
    }

    pub fn config(&self) -> &CameraManagerConfig {
        &self.config
    }

    /// Queue a camera directly. It becomes active at the next `tick`.
    /// Returns `None` if a camera with the same device path is already known.
    pub fn add_camera(&self, source: Box<dyn CameraSource>) -> Option<CameraId> {
        self.pending.enqueue(source)
    }

    /// Start polling `scanner` on a background thread. Calling this twice
    /// has no effect.
    pub fn start_scan_thread(&mut self, mut scanner: Box<dyn CameraScanner>) {
        if self.scan_thread.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let pending = Arc::clone(&self.pending);
        let interval = Duration::from_millis(self.config.scan_interval_ms);

        let handle = thread::Builder::new()
            .name("camera-scan".into())
            .spawn(move || loop {
                for path in scanner.scan() {
                    if pending.used_paths.lock().contains(&path) {
                        continue;
                    }
                    match scanner.open(&path) {
                        Ok(source) => {
                            pending.enqueue(source);
                        }
                        Err(e) => debug!("camera scan: {}", e),
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        match handle {
            Ok(handle) => {
                self.scan_stop = Some(stop_tx);
                self.scan_thread = Some(handle);
            }
            Err(e) => warn!("failed to spawn camera scan thread: {}", e),
        }
    }

    pub fn stop_scan_thread(&mut self) {
        if let Some(stop) = self.scan_stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.scan_thread.take() {
            let _ = handle.join();
        }
    }

    /// Detach failing cameras, then merge newly discovered ones.
    pub fn tick(&mut self) -> CameraChanges {
        let mut changes = CameraChanges::default();
        let threshold = self.config.error_threshold;

        let pending = &self.pending;
        self.cameras.retain(|cam| {
            if cam.errors < threshold {
                return true;
            }
            warn!("detaching camera {} ({}) after {} errors", cam.id, cam.name(), cam.errors);
            pending.used_paths.lock().remove(cam.source.device_path());
            changes.detached.push(cam.id);
            false
        });

        let new_cameras = std::mem::take(&mut *self.pending.cameras.lock());
        for cam in new_cameras {
            changes.attached.push(cam.id);
            self.cameras.push(cam);
        }
        changes
    }

    pub fn cameras(&self) -> &[CameraHandle] {
        &self.cameras
    }

    pub fn cameras_mut(&mut self) -> &mut [CameraHandle] {
        &mut self.cameras
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop_scan_thread();
    }
}
