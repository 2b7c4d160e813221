//! Pose-from-correspondences solving.
//!
//! The solver is consumed through the [`PoseSolver`] trait. [`LmPoseSolver`]
//! is the built-in pure-Rust implementation: a planar homography seed from the
//! best marker quad, refined with Levenberg–Marquardt over every
//! correspondence.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DVector, Dyn, OMatrix, Owned, Point2, Vector3, Vector6, U6};
use thiserror::Error;
use tracing::trace;

use super::camera::CameraIntrinsics;
use super::planar::{planar_pose, polygon_area};
use super::SE3;

/// Residual assigned to a point that ends up behind the camera.
const BEHIND_CAMERA_PENALTY: f64 = 1.0e3;

/// Which solving strategy the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMode {
    /// Arbitrary point set, supplied as coplanar groups of four (marker quads).
    General,
    /// Exactly one square marker, corners in detector order.
    SquareMarker,
}

/// Successful pose solve.
#[derive(Debug, Clone, Copy)]
pub struct PoseSolution {
    /// Pose of the object in the camera frame (T_co).
    pub camera_from_object: SE3,
    /// RMS reprojection error in pixels.
    pub reprojection_error: f64,
}

/// Why a solve produced no pose. Always non-fatal for the caller.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("need at least {required} correspondences, got {got}")]
    NotEnoughPoints { required: usize, got: usize },

    #[error("{object} object points but {image} image points")]
    CountMismatch { object: usize, image: usize },

    #[error("degenerate correspondence set: {0}")]
    Degenerate(&'static str),

    #[error("refinement diverged")]
    Diverged,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Perspective pose solver: object points (object frame) + pixels → `T_co`.
pub trait PoseSolver: Send + Sync {
    fn solve(
        &self,
        object_points: &[Vector3<f64>],
        image_points: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
        mode: SolveMode,
    ) -> Result<PoseSolution, SolveError>;
}

/// Check shared preconditions of every solver.
pub fn validate_correspondences(
    object_points: &[Vector3<f64>],
    image_points: &[Point2<f64>],
    mode: SolveMode,
) -> Result<(), SolveError> {
    if object_points.len() != image_points.len() {
        return Err(SolveError::CountMismatch {
            object: object_points.len(),
            image: image_points.len(),
        });
    }
    if object_points.len() < 4 {
        return Err(SolveError::NotEnoughPoints {
            required: 4,
            got: object_points.len(),
        });
    }
    if mode == SolveMode::SquareMarker && object_points.len() != 4 {
        return Err(SolveError::Degenerate("square-marker solve expects exactly four corners"));
    }
    Ok(())
}

/// RMS reprojection error of `camera_from_object` over the correspondences.
pub fn reprojection_rms(
    camera_from_object: &SE3,
    object_points: &[Vector3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
) -> f64 {
    if object_points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = object_points
        .iter()
        .zip(image_points)
        .map(|(p, uv)| match intrinsics.project(&camera_from_object.transform_point(p)) {
            Some(px) => (px - uv).norm_squared(),
            None => BEHIND_CAMERA_PENALTY * BEHIND_CAMERA_PENALTY,
        })
        .sum();
    (sum_sq / object_points.len() as f64).sqrt()
}

/// Configuration for [`LmPoseSolver`].
#[derive(Debug, Clone)]
pub struct LmSolverConfig {
    /// Maximum residual evaluations, as a multiple of (params + 1).
    pub patience: usize,
    /// Relative step for forward-difference Jacobians.
    pub jacobian_step: f64,
}

impl Default for LmSolverConfig {
    fn default() -> Self {
        Self {
            patience: 50,
            jacobian_step: 1e-7,
        }
    }
}

/// Pure-Rust solver: homography seed + Levenberg–Marquardt refinement.
#[derive(Debug, Clone, Default)]
pub struct LmPoseSolver {
    config: LmSolverConfig,
}

impl LmPoseSolver {
    pub fn new(config: LmSolverConfig) -> Self {
        Self { config }
    }

    /// Seed from the coplanar quad with the largest image footprint.
    fn seed(
        object_points: &[Vector3<f64>],
        image_points: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
    ) -> Option<SE3> {
        let mut quads: Vec<(f64, usize)> = image_points
            .chunks_exact(4)
            .enumerate()
            .map(|(i, quad)| (polygon_area(quad), i))
            .collect();
        quads.sort_by(|a, b| b.0.total_cmp(&a.0));

        quads.into_iter().find_map(|(_, i)| {
            let range = i * 4..i * 4 + 4;
            planar_pose(&object_points[range.clone()], &image_points[range], intrinsics)
        })
    }
}

impl PoseSolver for LmPoseSolver {
    fn solve(
        &self,
        object_points: &[Vector3<f64>],
        image_points: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
        mode: SolveMode,
    ) -> Result<PoseSolution, SolveError> {
        validate_correspondences(object_points, image_points, mode)?;

        let seed = Self::seed(object_points, image_points, intrinsics)
            .ok_or(SolveError::Degenerate("no coplanar marker quad to seed from"))?;

        let problem = ReprojectionProblem {
            object_points,
            image_points,
            intrinsics,
            params: pose_to_params(&seed),
            jacobian_step: self.config.jacobian_step,
        };
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(self.config.patience)
            .minimize(problem);

        if !report.objective_function.is_finite() {
            return Err(SolveError::Diverged);
        }
        trace!(
            "LM pose refinement: {:?} after {} evaluations",
            report.termination,
            report.number_of_evaluations
        );

        let camera_from_object = params_to_pose(&problem.params);
        if camera_from_object.translation.z <= 0.0 {
            return Err(SolveError::Degenerate("object behind camera"));
        }
        Ok(PoseSolution {
            camera_from_object,
            reprojection_error: reprojection_rms(
                &camera_from_object,
                object_points,
                image_points,
                intrinsics,
            ),
        })
    }
}

/// Parameter layout: `[rotation vector (3), translation (3)]` of T_co.
fn pose_to_params(pose: &SE3) -> Vector6<f64> {
    let r = pose.rotation_vector();
    let t = pose.translation;
    Vector6::new(r.x, r.y, r.z, t.x, t.y, t.z)
}

fn params_to_pose(params: &Vector6<f64>) -> SE3 {
    SE3::from_rotation_vector(
        params.fixed_rows::<3>(0).into_owned(),
        params.fixed_rows::<3>(3).into_owned(),
    )
}

struct ReprojectionProblem<'a> {
    object_points: &'a [Vector3<f64>],
    image_points: &'a [Point2<f64>],
    intrinsics: &'a CameraIntrinsics,
    params: Vector6<f64>,
    jacobian_step: f64,
}

impl ReprojectionProblem<'_> {
    fn residuals_at(&self, params: &Vector6<f64>) -> DVector<f64> {
        let pose = params_to_pose(params);
        let mut r = DVector::zeros(self.object_points.len() * 2);
        for (i, (p, uv)) in self.object_points.iter().zip(self.image_points).enumerate() {
            match self.intrinsics.project(&pose.transform_point(p)) {
                Some(px) => {
                    r[2 * i] = px.x - uv.x;
                    r[2 * i + 1] = px.y - uv.y;
                }
                None => {
                    r[2 * i] = BEHIND_CAMERA_PENALTY;
                    r[2 * i + 1] = BEHIND_CAMERA_PENALTY;
                }
            }
        }
        r
    }
}

impl LeastSquaresProblem<f64, Dyn, U6> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, params: &Vector6<f64>) {
        self.params = *params;
    }

    fn params(&self) -> Vector6<f64> {
        self.params
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U6>> {
        let base = self.residuals_at(&self.params);
        let mut jac = OMatrix::<f64, Dyn, U6>::zeros(base.len());
        for k in 0..6 {
            let step = self.jacobian_step * self.params[k].abs().max(1.0);
            let mut shifted = self.params;
            shifted[k] += step;
            let column = (self.residuals_at(&shifted) - &base) / step;
            jac.set_column(k, &column);
        }
        Some(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::se3::rotation_from_zy;
    use approx::assert_relative_eq;

    fn quad(center: Vector3<f64>, rotation: nalgebra::Matrix3<f64>, side: f64) -> Vec<Vector3<f64>> {
        let h = side / 2.0;
        [(-h, h), (h, h), (h, -h), (-h, -h)]
            .iter()
            .map(|(x, y)| center + rotation * Vector3::new(*x, *y, 0.0))
            .collect()
    }

    fn project_all(cam: &CameraIntrinsics, pose: &SE3, pts: &[Vector3<f64>]) -> Vec<Point2<f64>> {
        pts.iter()
            .map(|p| cam.project(&pose.transform_point(p)).unwrap())
            .collect()
    }

    #[test]
    fn test_square_marker_solve_is_exact_on_clean_data() {
        let cam = CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0);
        let truth = SE3::from_rotation_vector(Vector3::new(2.8, 0.1, -0.2), Vector3::new(0.1, 0.05, 1.2));
        let object = quad(Vector3::zeros(), nalgebra::Matrix3::identity(), 0.07);
        let image = project_all(&cam, &truth, &object);

        let sol = LmPoseSolver::default()
            .solve(&object, &image, &cam, SolveMode::SquareMarker)
            .unwrap();

        assert_relative_eq!(sol.camera_from_object.translation, truth.translation, epsilon = 1e-6);
        assert_relative_eq!(sol.camera_from_object.angle_to(&truth), 0.0, epsilon = 1e-6);
        assert!(sol.reprojection_error < 1e-4);
    }

    #[test]
    fn test_joint_solve_over_two_cube_faces() {
        let cam = CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0);
        let half = 0.05;
        let face_x = rotation_from_zy(&Vector3::x(), &Vector3::z());
        let face_y = rotation_from_zy(&Vector3::y(), &Vector3::z());
        let mut object = quad(Vector3::new(half, 0.0, 0.0), face_x, 0.06);
        object.extend(quad(Vector3::new(0.0, half, 0.0), face_y, 0.06));

        // Camera looking at the +X/+Y corner of the cube from 1 m.
        let eye = Vector3::new(0.7, 0.7, 0.3);
        let forward = (-eye).normalize();
        let cam_rot = rotation_from_zy(&forward, &Vector3::new(0.0, 0.0, -1.0));
        let world_from_camera = SE3::from_rt(cam_rot, eye);
        let truth = world_from_camera.inverse();
        let image = project_all(&cam, &truth, &object);

        let sol = LmPoseSolver::default()
            .solve(&object, &image, &cam, SolveMode::General)
            .unwrap();

        assert_relative_eq!(sol.camera_from_object.translation, truth.translation, epsilon = 1e-5);
        assert_relative_eq!(sol.camera_from_object.angle_to(&truth), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_too_few_points_is_an_error() {
        let cam = CameraIntrinsics::new(900.0, 900.0, 640.0, 360.0);
        let object = vec![Vector3::zeros(); 3];
        let image = vec![Point2::origin(); 3];

        let err = LmPoseSolver::default()
            .solve(&object, &image, &cam, SolveMode::General)
            .unwrap_err();
        assert!(matches!(err, SolveError::NotEnoughPoints { got: 3, .. }));
    }
}
