//! Marker detections as delivered by the (external) corner detector.

use nalgebra::Point2;

use super::catalog::MarkerId;
use crate::geometry::{polygon_area, polygon_perimeter};

/// One decoded marker in one image: ID plus its four corners in pixels, in
/// detector order (top-left, top-right, bottom-right, bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDetection {
    pub id: MarkerId,
    pub corners: [Point2<f64>; 4],
}

impl MarkerDetection {
    pub fn new(id: MarkerId, corners: [Point2<f64>; 4]) -> Self {
        Self { id, corners }
    }

    /// Pixel area covered by the quad.
    pub fn area(&self) -> f64 {
        polygon_area(&self.corners)
    }

    /// Quad perimeter in pixels.
    pub fn perimeter(&self) -> f64 {
        polygon_perimeter(&self.corners)
    }

    pub fn centroid(&self) -> Point2<f64> {
        let sum = self.corners.iter().fold(nalgebra::Vector2::zeros(), |acc, c| acc + c.coords);
        Point2::from(sum / 4.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_axis_aligned_quad_metrics() {
        let det = MarkerDetection::new(
            MarkerId(1),
            [
                Point2::new(100.0, 100.0),
                Point2::new(120.0, 100.0),
                Point2::new(120.0, 120.0),
                Point2::new(100.0, 120.0),
            ],
        );

        assert_relative_eq!(det.area(), 400.0);
        assert_relative_eq!(det.perimeter(), 80.0);
        assert_relative_eq!(det.centroid(), Point2::new(110.0, 110.0));
    }
}
