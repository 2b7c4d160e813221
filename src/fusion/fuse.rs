//! Cross-camera candidate selection and weighted fusion.

use std::collections::BTreeMap;

use crate::geometry::{weighted_pose_mean, SE3};
use crate::objects::PoseCandidate;

/// Fused pose for one slot of one object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedSlot {
    pub slot: usize,
    pub pose: SE3,
    /// Total surface of the candidates that contributed.
    pub surface: f64,
    pub contributors: usize,
}

/// Group candidates by slot, drop the ones below `min_surface` (a zero surface
/// never passes), and average the rest weighted by surface.
///
/// Returns the fused slots plus the number of rejected candidates.
pub fn fuse_candidates(candidates: &[PoseCandidate], min_surface: f64) -> (Vec<FusedSlot>, usize) {
    let mut by_slot: BTreeMap<usize, Vec<(SE3, f64)>> = BTreeMap::new();
    let mut rejected = 0;
    for c in candidates {
        if !c.surface.is_finite() || c.surface <= 0.0 || c.surface < min_surface {
            rejected += 1;
            continue;
        }
        by_slot.entry(c.slot).or_default().push((c.world, c.surface));
    }

    let fused = by_slot
        .into_iter()
        .filter_map(|(slot, poses)| {
            let pose = weighted_pose_mean(&poses)?;
            Some(FusedSlot {
                slot,
                pose,
                surface: poses.iter().map(|(_, w)| w).sum(),
                contributors: poses.len(),
            })
        })
        .collect();
    (fused, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn candidate(slot: usize, world: SE3, surface: f64) -> PoseCandidate {
        PoseCandidate {
            slot,
            world,
            surface,
            reprojection_error: 0.1,
        }
    }

    #[test]
    fn test_zero_and_small_surfaces_never_selected() {
        let pose = SE3::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let (fused, rejected) = fuse_candidates(&[candidate(0, pose, 0.0), candidate(0, pose, 20.0)], 0.0);
        assert_eq!(rejected, 1);
        assert_eq!(fused[0].contributors, 1);

        let (fused, rejected) = fuse_candidates(&[candidate(0, pose, 20.0)], 50.0);
        assert!(fused.is_empty());
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_duplicate_observation_is_idempotent() {
        let pose = SE3::from_rotation_vector(Vector3::new(0.1, 0.2, -0.7), Vector3::new(0.4, -0.6, 0.2));
        let (fused, _) = fuse_candidates(&[candidate(0, pose, 300.0), candidate(0, pose, 300.0)], 100.0);

        assert_eq!(fused.len(), 1);
        assert_relative_eq!(fused[0].pose.translation, pose.translation, epsilon = 1e-12);
        assert!(fused[0].pose.angle_to(&pose) < 1e-6);
    }

    #[test]
    fn test_equal_surfaces_give_spherical_midpoint() {
        let a = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4);
        let b = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);
        let t = Vector3::new(0.2, 0.3, 0.0);
        let (fused, _) = fuse_candidates(
            &[
                candidate(0, SE3::from_parts(a, t), 400.0),
                candidate(0, SE3::from_parts(b, t), 400.0),
            ],
            100.0,
        );

        let midpoint = a.slerp(&b, 0.5);
        assert!(fused[0].pose.rotation.angle_to(&midpoint) < 1e-6);
        assert_relative_eq!(fused[0].surface, 800.0);
    }

    #[test]
    fn test_slots_are_fused_independently() {
        let p0 = SE3::from_translation(Vector3::new(0.0, 0.0, 0.0));
        let p1 = SE3::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let (fused, _) = fuse_candidates(
            &[candidate(3, p1, 200.0), candidate(0, p0, 200.0), candidate(3, p1, 100.0)],
            100.0,
        );

        assert_eq!(fused.iter().map(|f| f.slot).collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(fused[1].contributors, 2);
    }
}
