//! Fixed-size linear algebra used by the fitting code.
//!
//! Every system solved in this crate has a size known at compile time
//! (2×2, 3×3, 6×6), so everything here works on `nalgebra` static types.

use crate::calibration::CalibrationError;
use nalgebra::{Matrix2, Matrix3, Matrix6, Vector2, Vector6};

const DET_EPS: f64 = 1e-12;

/// Inverse of a 3×3 matrix.
///
/// # Errors
///
/// [`CalibrationError::SingularMatrix`] when the determinant vanishes.
pub fn inverse3(m: &Matrix3<f64>) -> Result<Matrix3<f64>, CalibrationError> {
    if m.determinant().abs() < DET_EPS {
        return Err(CalibrationError::SingularMatrix);
    }
    m.try_inverse().ok_or(CalibrationError::SingularMatrix)
}

/// Direct solve of `a·x = b` for a 2×2 system.
pub fn solve2(a: &Matrix2<f64>, b: &Vector2<f64>) -> Result<Vector2<f64>, CalibrationError> {
    let det = a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(1, 0)];
    if det.abs() < DET_EPS {
        return Err(CalibrationError::SingularMatrix);
    }
    Ok(Vector2::new(
        (a[(1, 1)] * b.x - a[(0, 1)] * b.y) / det,
        (a[(0, 0)] * b.y - a[(1, 0)] * b.x) / det,
    ))
}

/// Solves `a·x = b` for a symmetric positive-definite 6×6 matrix via Cholesky.
pub fn cholesky_solve6(a: &Matrix6<f64>, b: &Vector6<f64>) -> Result<Vector6<f64>, CalibrationError> {
    let chol = a.cholesky().ok_or(CalibrationError::SingularMatrix)?;
    Ok(chol.solve(b))
}

/// `f(x, y) = c[0]·x² + c[1]·y² + c[2]·x·y + c[3]·x + c[4]·y + c[5]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticSurface {
    pub coeffs: Vector6<f64>,
}

impl QuadraticSurface {
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let c = &self.coeffs;
        c[0] * x * x + c[1] * y * y + c[2] * x * y + c[3] * x + c[4] * y + c[5]
    }

    /// Hessian `[[2a, c], [c, 2b]]` is positive definite.
    pub fn is_positive_definite(&self) -> bool {
        let (a, b, c) = (self.coeffs[0], self.coeffs[1], self.coeffs[2]);
        a > 0.0 && 4.0 * a * b - c * c > 0.0
    }

    /// Stationary point of the surface; `None` unless the Hessian is positive
    /// definite.
    pub fn minimum(&self) -> Option<Vector2<f64>> {
        if !self.is_positive_definite() {
            return None;
        }
        let c = &self.coeffs;
        let hessian = Matrix2::new(2.0 * c[0], c[2], c[2], 2.0 * c[1]);
        solve2(&hessian, &Vector2::new(-c[3], -c[4])).ok()
    }
}

/// Least-squares fit of a [`QuadraticSurface`] to `(x, y, f)` samples.
///
/// # Errors
///
/// [`CalibrationError::SingularMatrix`] when the samples do not determine the
/// six coefficients (fewer than six points, or collinear sampling).
pub fn fit_quadratic_surface(samples: &[(f64, f64, f64)]) -> Result<QuadraticSurface, CalibrationError> {
    let mut ata = Matrix6::<f64>::zeros();
    let mut atb = Vector6::<f64>::zeros();
    for &(x, y, f) in samples {
        let row = Vector6::new(x * x, y * y, x * y, x, y, 1.0);
        ata += row * row.transpose();
        atb += row * f;
    }
    let coeffs = cholesky_solve6(&ata, &atb)?;
    Ok(QuadraticSurface { coeffs })
}
