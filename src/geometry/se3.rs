//! SE3: 6-DOF rigid transformation (rotation + translation).
//!
//! Naming follows `T_target_source`: `world_from_camera` maps a point expressed
//! in the camera frame into the world frame (`p_w = T_wc * p_c`).

use std::ops::Mul;

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid body transformation: `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from rotation matrix and translation.
    ///
    /// The matrix is re-orthonormalized, so slightly non-orthogonal input
    /// (e.g. from a homography decomposition) is accepted.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(nearest_rotation(&rotation));
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Construct from a unit quaternion and translation.
    pub fn from_parts(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Construct from an axis-angle rotation vector and translation.
    pub fn from_rotation_vector(rvec: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_scaled_axis(rvec),
            translation,
        }
    }

    /// Construct from homogeneous 4x4 matrix `[R | t; 0 | 1]`.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let rot = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Self::from_rt(rot, translation)
    }

    /// Convert to homogeneous 4x4 matrix.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Rotation as a 3x3 matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Axis-angle rotation vector (Rodrigues).
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Inverse transformation.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transformations: `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Transform a point.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Rotation about the world Z axis, in radians (-π, π].
    pub fn yaw(&self) -> f64 {
        let r = self.rotation_matrix();
        r[(1, 0)].atan2(r[(0, 0)])
    }

    /// Angular distance to another pose's rotation, in radians.
    pub fn angle_to(&self, other: &SE3) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a SE3> for &'a SE3 {
    type Output = SE3;

    fn mul(self, rhs: &'a SE3) -> SE3 {
        self.compose(rhs)
    }
}

/// Closest proper rotation to `m` in the Frobenius sense (`U Vᵀ` of the SVD,
/// with the last singular direction flipped when needed to keep det = +1).
pub fn nearest_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }
    r
}

/// Rotation whose Z axis points along `z` and whose Y axis is as close as
/// possible to `y`. Columns are `[y × z, z × (y × z), z]`.
pub fn rotation_from_zy(z: &Vector3<f64>, y: &Vector3<f64>) -> Matrix3<f64> {
    let z = z.normalize();
    let x = y.cross(&z).normalize();
    let y = z.cross(&x);
    Matrix3::from_columns(&[x, y, z])
}

/// Rotation whose Z axis points along `z` and whose X axis is as close as
/// possible to `x`.
pub fn rotation_from_zx(z: &Vector3<f64>, x: &Vector3<f64>) -> Matrix3<f64> {
    let z = z.normalize();
    let y = z.cross(x).normalize();
    let x = y.cross(&z);
    Matrix3::from_columns(&[x, y, z])
}
