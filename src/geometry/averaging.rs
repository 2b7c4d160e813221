//! Weighted pose averaging for multi-camera fusion.
//!
//! Translation is a weighted mean. Rotation is the weighted quaternion mean of
//! Markley et al. ("Averaging Quaternions", 2007): the principal eigenvector of
//! `M = Σ wᵢ qᵢ qᵢᵀ`. It is independent of input order and of quaternion sign,
//! and for two equal weights it is exactly the slerp midpoint.

use nalgebra::{Matrix4, Quaternion, SymmetricEigen, UnitQuaternion, Vector3, Vector4};

use super::SE3;

/// Weighted mean of unit quaternions. `None` if the total weight is not
/// positive.
pub fn weighted_rotation_mean(rotations: &[(UnitQuaternion<f64>, f64)]) -> Option<UnitQuaternion<f64>> {
    let total: f64 = rotations.iter().map(|(_, w)| *w).sum();
    if rotations.is_empty() || total <= 0.0 {
        return None;
    }
    if rotations.len() == 1 {
        return Some(rotations[0].0);
    }

    let mut m = Matrix4::<f64>::zeros();
    for (q, w) in rotations {
        let v: Vector4<f64> = q.quaternion().coords;
        m += (v * v.transpose()) * (*w / total);
    }

    let eig = SymmetricEigen::new(m);
    let (max_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let v = eig.eigenvectors.column(max_idx).into_owned();

    // `coords` is stored as (i, j, k, w).
    let mut mean = UnitQuaternion::from_quaternion(Quaternion::from(v));
    // Keep the hemisphere of the heaviest input for a stable sign.
    let (anchor, _) = rotations
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if mean.quaternion().coords.dot(&anchor.quaternion().coords) < 0.0 {
        mean = UnitQuaternion::from_quaternion(-mean.into_inner());
    }
    Some(mean)
}

/// Weighted mean of translations.
pub fn weighted_translation_mean(translations: &[(Vector3<f64>, f64)]) -> Option<Vector3<f64>> {
    let total: f64 = translations.iter().map(|(_, w)| *w).sum();
    if translations.is_empty() || total <= 0.0 {
        return None;
    }
    Some(
        translations
            .iter()
            .fold(Vector3::zeros(), |acc, (t, w)| acc + t * *w)
            / total,
    )
}

/// Score-weighted average of candidate poses.
pub fn weighted_pose_mean(poses: &[(SE3, f64)]) -> Option<SE3> {
    let rotations: Vec<_> = poses.iter().map(|(p, w)| (p.rotation, *w)).collect();
    let translations: Vec<_> = poses.iter().map(|(p, w)| (p.translation, *w)).collect();
    Some(SE3::from_parts(
        weighted_rotation_mean(&rotations)?,
        weighted_translation_mean(&translations)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_duplicate_pose_is_idempotent() {
        let pose = SE3::from_rotation_vector(Vector3::new(0.2, -0.5, 1.1), Vector3::new(0.3, -1.0, 0.1));
        let fused = weighted_pose_mean(&[(pose, 120.0), (pose, 120.0)]).unwrap();

        assert_relative_eq!(fused.translation, pose.translation, epsilon = 1e-12);
        assert_relative_eq!(fused.angle_to(&pose), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_equal_weights_give_slerp_midpoint() {
        let a = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.30);
        let b = UnitQuaternion::from_euler_angles(0.05, 0.0, 0.42);
        let mean = weighted_rotation_mean(&[(a, 1.0), (b, 1.0)]).unwrap();

        assert_relative_eq!(mean.angle_to(&a.slerp(&b, 0.5)), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mean_ignores_quaternion_sign_and_order() {
        let a = UnitQuaternion::from_euler_angles(0.1, 0.0, 0.0);
        let b = UnitQuaternion::from_euler_angles(0.0, 0.2, 0.0);
        let c = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3);
        let b_flipped = UnitQuaternion::new_unchecked(-b.into_inner());

        let m1 = weighted_rotation_mean(&[(a, 1.0), (b, 2.0), (c, 3.0)]).unwrap();
        let m2 = weighted_rotation_mean(&[(c, 3.0), (b_flipped, 2.0), (a, 1.0)]).unwrap();

        assert_relative_eq!(m1.angle_to(&m2), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dominant_weight_wins() {
        let a = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.0);
        let b = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5);
        let mean = weighted_rotation_mean(&[(a, 1.0), (b, 1.0e6)]).unwrap();

        assert!(mean.angle_to(&b) < 1e-3);
    }

    #[test]
    fn test_zero_total_weight_is_none() {
        assert!(weighted_translation_mean(&[(Vector3::x(), 0.0)]).is_none());
        assert!(weighted_pose_mean(&[]).is_none());
    }
}
