//! Pinhole de-projection, Brown-Conrady distortion and the spatial section
//! grid.

use crate::calibration::{DistortionModel, Intrinsics};
use nalgebra::{Matrix2, Vector2, Vector3};

/// Forward distortion of a normalized image point.
///
/// Returns the distorted point and the radial factor
/// `rc = 1 + k1·r² + k2·r⁴ + k3·r⁶` (1 for an undistorted model).
pub fn distort(model: DistortionModel, coeffs: &[f64; 5], x: f64, y: f64) -> (Vector2<f64>, f64) {
    match model {
        DistortionModel::None => (Vector2::new(x, y), 1.0),
        DistortionModel::BrownConrady => {
            let [k1, k2, p1, p2, k3] = *coeffs;
            let r2 = x * x + y * y;
            let rc = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let xd = x * rc + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let yd = y * rc + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
            (Vector2::new(xd, yd), rc)
        }
    }
}

/// Jacobian `d(xd, yd) / d(x, y)` of [`distort`].
pub fn distortion_jacobian(model: DistortionModel, coeffs: &[f64; 5], x: f64, y: f64) -> Matrix2<f64> {
    match model {
        DistortionModel::None => Matrix2::identity(),
        DistortionModel::BrownConrady => {
            let [k1, k2, p1, p2, k3] = *coeffs;
            let r2 = x * x + y * y;
            let rc = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            // d(rc)/d(r²)
            let q = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r2 * r2;

            let j00 = rc + 2.0 * x * x * q + 2.0 * p1 * y + 6.0 * p2 * x;
            let j01 = 2.0 * x * y * q + 2.0 * p1 * x + 2.0 * p2 * y;
            let j10 = 2.0 * x * y * q + 2.0 * p2 * y + 2.0 * p1 * x;
            let j11 = rc + 2.0 * y * y * q + 2.0 * p2 * x + 6.0 * p1 * y;
            Matrix2::new(j00, j01, j10, j11)
        }
    }
}

/// De-projects a pixel with a metric depth through the pinhole part of
/// `intrinsics`.
pub fn deproject_pixel(intrinsics: &Intrinsics, x: f64, y: f64, depth: f64) -> Vector3<f64> {
    Vector3::new(
        (x - intrinsics.ppx) / intrinsics.fx * depth,
        (y - intrinsics.ppy) / intrinsics.fy * depth,
        depth,
    )
}

/// Section grid over an image, `sections_x` columns by `sections_y` rows.
/// Sections are numbered column-major: `section_y + section_x * sections_y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionGrid {
    pub width: usize,
    pub height: usize,
    pub sections_x: usize,
    pub sections_y: usize,
}

impl SectionGrid {
    pub fn new(width: usize, height: usize, sections_x: usize, sections_y: usize) -> Self {
        Self {
            width,
            height,
            sections_x: sections_x.max(1),
            sections_y: sections_y.max(1),
        }
    }

    pub fn count(&self) -> usize {
        self.sections_x * self.sections_y
    }

    pub fn section_of(&self, x: usize, y: usize) -> usize {
        let sx = (x * self.sections_x / self.width).min(self.sections_x - 1);
        let sy = (y * self.sections_y / self.height).min(self.sections_y - 1);
        sy + sx * self.sections_y
    }

    /// Pixel count of every section.
    pub fn section_areas(&self) -> Vec<usize> {
        let mut areas = vec![0usize; self.count()];
        for y in 0..self.height {
            for x in 0..self.width {
                areas[self.section_of(x, y)] += 1;
            }
        }
        areas
    }
}
