//! Pinhole camera intrinsics with Brown–Conrady distortion.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

use super::SE3;

/// Radial (`k1`, `k2`, `k3`) and tangential (`p1`, `p2`) distortion, in the
/// usual OpenCV coefficient order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// No distortion (frames already undistorted upstream).
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from an OpenCV-style coefficient slice; missing entries are zero.
    pub fn from_coefficients(coeffs: &[f64]) -> Self {
        let at = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        }
    }

    pub fn coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.coefficients().iter().all(|c| *c == 0.0)
    }

    /// Apply distortion to normalized image coordinates.
    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_zero() {
            return (x, y);
        }
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (xd, yd)
    }
}

/// Camera intrinsic parameters (focal lengths and principal point in pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: Distortion::none(),
        }
    }

    /// Build from a 3x3 calibration matrix `K`.
    pub fn from_k(k: &Matrix3<f64>, distortion: Distortion) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            distortion,
        }
    }

    /// The 3x3 calibration matrix `K`.
    #[rustfmt::skip]
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0,     self.cx,
            0.0,     self.fy, self.cy,
            0.0,     0.0,     1.0,
        )
    }

    /// Project a point expressed in the camera frame. Returns `None` for points
    /// at or behind the image plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 1e-9 {
            return None;
        }
        let (xd, yd) = self.distortion.apply(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        Some(Point2::new(self.fx * xd + self.cx, self.fy * yd + self.cy))
    }

    /// Project a world point seen by a camera located at `world_from_camera`.
    pub fn project_world(
        &self,
        world_from_camera: &SE3,
        p_world: &Vector3<f64>,
    ) -> Option<Point2<f64>> {
        let p_cam = world_from_camera.inverse().transform_point(p_world);
        self.project(&p_cam)
    }

    /// Normalized (undistortion-free) ray for a pixel. Used only to seed the
    /// planar solver, which assumes frames were undistorted upstream.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        Point2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }
}
