//! Independent multi-instance arrays: many physical copies of one marker ID,
//! each sitting at a known world position.
//!
//! Detections are attributed to slots by projecting every slot into the image
//! and taking the nearest one, with a tolerance equal to the detected quad's
//! perimeter so the gate scales with apparent size. Only the yaw of a slot is
//! estimated; positions are fixed.

use nalgebra::{Point2, Vector3};
use tracing::trace;

use super::{FusedObjectRecord, ObjectIdentity, ObjectKind, PoseCandidate};
use crate::cameras::CameraObservation;
use crate::geometry::se3::rotation_from_zx;
use crate::geometry::{PoseSolver, SolveMode, SE3};
use crate::markers::{Marker, MarkerDetection, MarkerId};

pub const SOLAR_PANEL_MARKER: MarkerId = MarkerId(47);
pub const SOLAR_PANEL_MARKER_SIZE: f64 = 0.0375;

#[derive(Debug, Clone, PartialEq)]
pub struct ArraySlot {
    pub position: Vector3<f64>,
    pub yaw: f64,
    pub surface: f64,
    pub last_update: Option<u64>,
}

impl ArraySlot {
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            yaw: 0.0,
            surface: 0.0,
            last_update: None,
        }
    }

    /// Z up, X along the slot's yaw.
    pub fn pose(&self) -> SE3 {
        slot_pose(&self.position, self.yaw)
    }

    pub fn is_fresh(&self, tick: u64, window: u64) -> bool {
        self.last_update
            .is_some_and(|t| t <= tick && tick - t <= window)
    }
}

fn slot_pose(position: &Vector3<f64>, yaw: f64) -> SE3 {
    let heading = Vector3::new(yaw.cos(), yaw.sin(), 0.0);
    SE3::from_rt(rotation_from_zx(&Vector3::z(), &heading), *position)
}

#[derive(Debug, Clone)]
pub struct MarkerArray {
    pub name: String,
    /// Per-slot record names are `"{slot_label} {index}"`.
    pub slot_label: String,
    pub kind: ObjectKind,
    pub marker_id: MarkerId,
    pub marker_size: f64,
    pub slots: Vec<ArraySlot>,
}

impl MarkerArray {
    pub fn new(
        name: impl Into<String>,
        kind: ObjectKind,
        marker_id: MarkerId,
        marker_size: f64,
        positions: impl IntoIterator<Item = Vector3<f64>>,
    ) -> Self {
        let name = name.into();
        Self {
            slot_label: name.clone(),
            name,
            kind,
            marker_id,
            marker_size,
            slots: positions.into_iter().map(ArraySlot::new).collect(),
        }
    }

    /// The row of nine solar panels: three groups 1 m apart, three panels
    /// 0.225 m apart in each group.
    pub fn solar_panels() -> Self {
        const ROW_Y: f64 = -1.037;
        const PANEL_Z: f64 = 0.104;
        let positions = (-1..=1).flat_map(|i| {
            (-1..=1).map(move |j| Vector3::new(f64::from(i) * 1.0 + f64::from(j) * 0.225, ROW_Y, PANEL_Z))
        });
        let mut panels = Self::new(
            "Solar Panels",
            ObjectKind::SolarPanel,
            SOLAR_PANEL_MARKER,
            SOLAR_PANEL_MARKER_SIZE,
            positions,
        );
        panels.slot_label = "Solar Panel".to_string();
        panels
    }

    fn marker(&self) -> Marker {
        Marker::centered(self.marker_id, self.marker_size)
    }

    /// Slot a detection belongs to, given every slot's projection (`None` for
    /// slots behind the camera). Returns `None` when the nearest slot is
    /// farther than the quad's perimeter or when two slots are equally near.
    pub fn match_slot(detection: &MarkerDetection, projected: &[Option<Point2<f64>>]) -> Option<usize> {
        let aim = detection.centroid();
        let mut best: Option<(usize, f64)> = None;
        let mut runner_up = f64::INFINITY;
        for (i, p) in projected.iter().enumerate() {
            let Some(p) = p else { continue };
            let d = (p - aim).norm();
            match best {
                Some((_, bd)) if d >= bd => runner_up = runner_up.min(d),
                _ => {
                    if let Some((_, bd)) = best {
                        runner_up = runner_up.min(bd);
                    }
                    best = Some((i, d));
                }
            }
        }
        let (slot, distance) = best?;
        if distance > detection.perimeter() || distance == runner_up {
            return None;
        }
        Some(slot)
    }

    pub fn solve_pose(&self, observation: &CameraObservation, solver: &dyn PoseSolver) -> Vec<PoseCandidate> {
        let Some(camera_pose) = observation.camera_pose else {
            return Vec::new();
        };
        let projected: Vec<Option<Point2<f64>>> = self
            .slots
            .iter()
            .map(|s| observation.intrinsics.project_world(&camera_pose, &s.position))
            .collect();
        let corners = self.marker().local_corners();

        let mut candidates = Vec::new();
        for detection in observation.detections_of(self.marker_id) {
            let Some(slot) = Self::match_slot(detection, &projected) else {
                trace!("{}: unmatched detection in {}", self.name, observation.camera);
                continue;
            };
            let solution = match solver.solve(
                &corners,
                &detection.corners,
                &observation.intrinsics,
                SolveMode::SquareMarker,
            ) {
                Ok(s) => s,
                Err(e) => {
                    trace!("{}: slot {} solve failed: {}", self.name, slot, e);
                    continue;
                }
            };
            let yaw = (camera_pose * solution.camera_from_object).yaw();
            candidates.push(PoseCandidate {
                slot,
                world: slot_pose(&self.slots[slot].position, yaw),
                surface: detection.area(),
                reprojection_error: solution.reprojection_error,
            });
        }
        candidates
    }

    /// Keep the slot position, take only the fused yaw.
    pub fn apply_fused(&mut self, slot: usize, pose: SE3, surface: f64, tick: u64) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.yaw = pose.yaw();
            s.surface = surface;
            s.last_update = Some(tick);
        }
    }

    pub fn to_output_records(&self, base_numeral: u32, tick: u64, window: u64) -> Vec<FusedObjectRecord> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_fresh(tick, window))
            .zip(base_numeral..)
            .map(|((i, s), numeral)| {
                FusedObjectRecord::new(
                    ObjectIdentity::new(self.kind, numeral, format!("{} {i}", self.slot_label)),
                    s.pose(),
                    s.last_update.unwrap_or(tick),
                )
            })
            .collect()
    }
}
