//! Per-tick camera stage: grab everything, then read, detect and localize
//! each camera on a fixed-size worker pool.
//!
//! Every task owns one camera and writes one output slot; the stage returns
//! only once all tasks have joined.

use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use super::manager::CameraHandle;
use super::observation::CameraObservation;
use super::source::{ClassDetector, MarkerDetector};

pub struct CameraStage {
    pool: ThreadPool,
    marker_detector: Arc<dyn MarkerDetector>,
    class_detector: Option<Arc<dyn ClassDetector>>,
    error_penalty: u32,
}

impl CameraStage {
    pub fn new(
        worker_threads: usize,
        error_penalty: u32,
        marker_detector: Arc<dyn MarkerDetector>,
        class_detector: Option<Arc<dyn ClassDetector>>,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("camera-worker-{i}"))
            .build()
            .context("building camera worker pool")?;
        Ok(Self {
            pool,
            marker_detector,
            class_detector,
            error_penalty,
        })
    }

    /// Run the stage over `cameras`. Slot `i` of the result belongs to
    /// `cameras[i]`; it is `None` when that camera failed this tick.
    ///
    /// `localize` may stamp the observation's camera pose and returns whether
    /// it did. Localized cameras remember the pose; the others get their last
    /// known pose copied into the observation.
    pub fn run<F>(&self, cameras: &mut [CameraHandle], tick: u64, localize: F) -> Vec<Option<CameraObservation>>
    where
        F: Fn(&mut CameraObservation) -> bool + Sync,
    {
        let penalty = self.error_penalty;
        for cam in cameras.iter_mut() {
            if let Err(e) = cam.source_mut().grab() {
                debug!("{}: {}", cam.id(), e);
                cam.register_error(penalty);
            }
        }

        let marker_detector = self.marker_detector.as_ref();
        let class_detector = self.class_detector.as_deref();
        self.pool.install(|| {
            cameras
                .par_iter_mut()
                .map(|cam| {
                    let frame = match cam.source_mut().read() {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("{}: {}", cam.id(), e);
                            cam.register_error(penalty);
                            return None;
                        }
                    };
                    cam.register_success();

                    let intrinsics = cam.source_mut().intrinsics();
                    let mut obs = CameraObservation::new(cam.id(), intrinsics)
                        .with_markers(marker_detector.detect(&frame));
                    if localize(&mut obs) {
                        obs.localized = true;
                        if let Some(pose) = obs.camera_pose {
                            cam.set_location(pose, tick);
                        }
                    } else {
                        obs.camera_pose = cam.location();
                    }
                    if let Some(classifier) = class_detector {
                        obs.class_detections = classifier.detect(&frame, &obs.intrinsics, obs.camera_pose.as_ref());
                    }
                    trace!("{}: {} markers", cam.id(), obs.markers.len());
                    Some(obs)
                })
                .collect()
        })
    }
}
