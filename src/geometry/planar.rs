//! Planar pose seeding from a homography.
//!
//! Marker corners come in coplanar groups of four. A DLT homography between
//! the marker plane and normalized image coordinates gives a closed-form
//! `camera_from_plane` estimate, which is then refined by the LM solver over
//! the full correspondence set.

use nalgebra::{DMatrix, Matrix3, Point2, SymmetricEigen, Vector3};

use super::camera::CameraIntrinsics;
use super::SE3;

/// Relative out-of-plane tolerance for treating four points as coplanar.
const COPLANAR_TOLERANCE: f64 = 1e-3;

/// Frame attached to a group of coplanar object points.
///
/// `object_from_plane` maps plane coordinates `(a, b, 0)` into the object
/// frame.
struct PlaneFrame {
    object_from_plane: SE3,
}

impl PlaneFrame {
    fn fit(points: &[Vector3<f64>]) -> Option<Self> {
        if points.len() < 4 {
            return None;
        }
        let centroid = points.iter().sum::<Vector3<f64>>() / points.len() as f64;
        let u = points[1] - points[0];
        let w = points[points.len() - 1] - points[0];
        let normal = u.cross(&w);
        let scale = u.norm().max(w.norm());
        if scale < 1e-12 || normal.norm() < 1e-12 * scale * scale {
            return None;
        }
        let u = u.normalize();
        let n = normal.normalize();
        let v = n.cross(&u);
        let rotation = Matrix3::from_columns(&[u, v, n]);
        let frame = Self {
            object_from_plane: SE3::from_rt(rotation, centroid),
        };

        let plane_from_object = frame.object_from_plane.inverse();
        let coplanar = points
            .iter()
            .all(|p| plane_from_object.transform_point(p).z.abs() <= COPLANAR_TOLERANCE * scale);
        coplanar.then_some(frame)
    }
}

/// Estimate the homography mapping plane coordinates to normalized image
/// coordinates, with Hartley-style scaling of the plane side.
fn estimate_homography(plane: &[Point2<f64>], image: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = plane.len();
    let mean_dist = plane.iter().map(|p| p.coords.norm()).sum::<f64>() / n as f64;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (p, m)) in plane.iter().zip(image).enumerate() {
        let (pa, pb) = (p.x * s, p.y * s);
        let (x, y) = (m.x, m.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -pa;
        a[(r0, 1)] = -pb;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = x * pa;
        a[(r0, 7)] = x * pb;
        a[(r0, 8)] = x;
        a[(r1, 3)] = -pa;
        a[(r1, 4)] = -pb;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = y * pa;
        a[(r1, 7)] = y * pb;
        a[(r1, 8)] = y;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue.
    let ata = a.transpose() * &a;
    let eig = SymmetricEigen::new(ata);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    let h = eig.eigenvectors.column(min_idx);

    let h_scaled = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let denorm = Matrix3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0);
    Some(h_scaled * denorm)
}

/// Closed-form `camera_from_object` estimate from coplanar correspondences.
///
/// Distortion is ignored here; the refinement stage accounts for it.
pub fn planar_pose(
    object_points: &[Vector3<f64>],
    image_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
) -> Option<SE3> {
    if object_points.len() < 4 || object_points.len() != image_points.len() {
        return None;
    }
    let frame = PlaneFrame::fit(object_points)?;
    let plane_from_object = frame.object_from_plane.inverse();

    let plane: Vec<Point2<f64>> = object_points
        .iter()
        .map(|p| {
            let q = plane_from_object.transform_point(p);
            Point2::new(q.x, q.y)
        })
        .collect();
    let normalized: Vec<Point2<f64>> = image_points.iter().map(|p| intrinsics.normalize(p)).collect();

    let h = estimate_homography(&plane, &normalized)?;
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = 0.5 * (h1.norm() + h2.norm());
    if norm < 1e-12 {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = h3 * lambda;
    let camera_from_plane = SE3::from_rt(Matrix3::from_columns(&[r1, r2, r3]), t);

    Some(camera_from_plane.compose(&plane_from_object))
}

/// Area of a simple polygon (shoelace formula), always non-negative.
pub fn polygon_area(points: &[Point2<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    0.5 * twice.abs()
}

/// Perimeter of a closed polygon.
pub fn polygon_perimeter(points: &[Point2<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| (b - a).norm())
        .sum()
}
