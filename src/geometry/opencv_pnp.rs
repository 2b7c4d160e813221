//! PnP solving through OpenCV's `solvePnP`.
//!
//! Enabled with the `opencv` feature. Square markers use `SOLVEPNP_IPPE_SQUARE`
//! followed by `solvePnPRefineLM`; general point sets use `SOLVEPNP_SQPNP`.

use nalgebra::{Matrix3, Point2, Vector3};
use opencv::calib3d;
use opencv::core::{Mat, Point2d, Point3d};
use opencv::prelude::*;

use super::camera::CameraIntrinsics;
use super::pnp::{reprojection_rms, validate_correspondences, PoseSolution, PoseSolver, SolveError, SolveMode};
use super::SE3;

/// OpenCV-backed [`PoseSolver`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvPoseSolver;

impl PoseSolver for OpenCvPoseSolver {
    fn solve(
        &self,
        object_points: &[Vector3<f64>],
        image_points: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
        mode: SolveMode,
    ) -> Result<PoseSolution, SolveError> {
        validate_correspondences(object_points, image_points, mode)?;
        let camera_from_object =
            solve_with_opencv(object_points, image_points, intrinsics, mode).map_err(|e| SolveError::Backend(e.to_string()))?;
        Ok(PoseSolution {
            camera_from_object,
            reprojection_error: reprojection_rms(&camera_from_object, object_points, image_points, intrinsics),
        })
    }
}

fn solve_with_opencv(
    object_points: &[Vector3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    mode: SolveMode,
) -> opencv::Result<SE3> {
    let pts3d: Vec<Point3d> = object_points
        .iter()
        .map(|p| Point3d::new(p.x, p.y, p.z))
        .collect();
    let pts2d: Vec<Point2d> = image_points.iter().map(|p| Point2d::new(p.x, p.y)).collect();
    let obj_points = Mat::from_slice(&pts3d)?.try_clone()?;
    let img_points = Mat::from_slice(&pts2d)?.try_clone()?;

    let camera_matrix = Mat::from_slice_2d(&[
        [intrinsics.fx, 0.0, intrinsics.cx],
        [0.0, intrinsics.fy, intrinsics.cy],
        [0.0, 0.0, 1.0],
    ])?;
    let dist_coeffs = Mat::from_slice(&intrinsics.distortion.coefficients())?.try_clone()?;

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let flags = match mode {
        SolveMode::SquareMarker => calib3d::SOLVEPNP_IPPE_SQUARE,
        SolveMode::General => calib3d::SOLVEPNP_SQPNP,
    };
    calib3d::solve_pnp(
        &obj_points,
        &img_points,
        &camera_matrix,
        &dist_coeffs,
        &mut rvec,
        &mut tvec,
        false,
        flags,
    )?;
    if mode == SolveMode::SquareMarker {
        calib3d::solve_pnp_refine_lm_def(
            &obj_points,
            &img_points,
            &camera_matrix,
            &dist_coeffs,
            &mut rvec,
            &mut tvec,
        )?;
    }

    let mut rot_mat = Mat::default();
    calib3d::rodrigues(&rvec, &mut rot_mat, &mut opencv::core::no_array())?;
    let mut arr = [0.0f64; 9];
    for (i, v) in arr.iter_mut().enumerate() {
        *v = *rot_mat.at::<f64>(i as i32)?;
    }
    let translation = Vector3::new(
        *tvec.at::<f64>(0)?,
        *tvec.at::<f64>(1)?,
        *tvec.at::<f64>(2)?,
    );

    // OpenCV returns T_co directly (object to camera).
    Ok(SE3::from_rt(Matrix3::from_row_slice(&arr), translation))
}
