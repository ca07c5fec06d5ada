//! The optimizer's parameter vector.
//!
//! A [`Calib`] carries the RGB rotation twice: as a 3×3 matrix and as the
//! Euler angles `(alpha, beta, gamma)` with `R = Rx(alpha)·Ry(beta)·Rz(gamma)`.
//! Every constructor and operator leaves the two forms in agreement.
//!
//! The ten optimized scalars are ordered
//! `[alpha, beta, gamma, t1, t2, t3, fx, fy, ppx, ppy]`; width, height and the
//! distortion model/coefficients are carried along unchanged.

use super::{DistortionModel, Extrinsics, Intrinsics};
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Combined 3×4 projection `K·[R|t]`.
pub type PMatrix = Matrix3x4<f64>;

/// Number of optimized scalars in a [`Calib`].
pub const N_PARAMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationAngles {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// `R = Rx(alpha)·Ry(beta)·Rz(gamma)`.
pub fn rotation_from_angles(angles: &RotationAngles) -> Matrix3<f64> {
    let (sa, ca) = angles.alpha.sin_cos();
    let (sb, cb) = angles.beta.sin_cos();
    let (sg, cg) = angles.gamma.sin_cos();

    Matrix3::new(
        cb * cg,
        -cb * sg,
        sb,
        ca * sg + cg * sa * sb,
        ca * cg - sa * sb * sg,
        -cb * sa,
        sa * sg - ca * cg * sb,
        cg * sa + ca * sb * sg,
        ca * cb,
    )
}

/// Inverse of [`rotation_from_angles`] for `|beta| <= pi/2`.
pub fn angles_from_rotation(r: &Matrix3<f64>) -> RotationAngles {
    RotationAngles {
        alpha: (-r[(1, 2)]).atan2(r[(2, 2)]),
        beta: r[(0, 2)].clamp(-1.0, 1.0).asin(),
        gamma: (-r[(0, 1)]).atan2(r[(0, 0)]),
    }
}

/// Partial derivatives `[dR/dalpha, dR/dbeta, dR/dgamma]`.
pub fn rotation_derivatives(angles: &RotationAngles) -> [Matrix3<f64>; 3] {
    let (sa, ca) = angles.alpha.sin_cos();
    let (sb, cb) = angles.beta.sin_cos();
    let (sg, cg) = angles.gamma.sin_cos();

    let rx = Matrix3::new(1.0, 0.0, 0.0, 0.0, ca, -sa, 0.0, sa, ca);
    let ry = Matrix3::new(cb, 0.0, sb, 0.0, 1.0, 0.0, -sb, 0.0, cb);
    let rz = Matrix3::new(cg, -sg, 0.0, sg, cg, 0.0, 0.0, 0.0, 1.0);

    let drx = Matrix3::new(0.0, 0.0, 0.0, 0.0, -sa, -ca, 0.0, ca, -sa);
    let dry = Matrix3::new(-sb, 0.0, cb, 0.0, 0.0, 0.0, -cb, 0.0, -sb);
    let drz = Matrix3::new(-sg, -cg, 0.0, cg, -sg, 0.0, 0.0, 0.0, 0.0);

    [drx * ry * rz, rx * dry * rz, rx * ry * drz]
}

/// RGB calibration as seen by the optimizer.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Calib {
    pub rotation: Matrix3<f64>,
    pub angles: RotationAngles,
    pub translation: Vector3<f64>,
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
    pub width: u32,
    pub height: u32,
    pub model: DistortionModel,
    pub coeffs: [f64; 5],
}

impl Calib {
    pub fn from_intrinsics_extrinsics(intrinsics: &Intrinsics, extrinsics: &Extrinsics) -> Self {
        let angles = angles_from_rotation(&extrinsics.rotation);
        Self {
            // re-derived so that the matrix is exactly the one the angles describe
            rotation: rotation_from_angles(&angles),
            angles,
            translation: extrinsics.translation,
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            ppx: intrinsics.ppx,
            ppy: intrinsics.ppy,
            width: intrinsics.width,
            height: intrinsics.height,
            model: intrinsics.model,
            coeffs: intrinsics.coeffs,
        }
    }

    pub fn to_intrinsics_extrinsics(&self) -> (Intrinsics, Extrinsics) {
        (
            Intrinsics {
                width: self.width,
                height: self.height,
                fx: self.fx,
                fy: self.fy,
                ppx: self.ppx,
                ppy: self.ppy,
                model: self.model,
                coeffs: self.coeffs,
            },
            Extrinsics {
                rotation: self.rotation,
                translation: self.translation,
            },
        )
    }

    /// A calib with every optimized scalar at `value` and the non-optimized
    /// fields copied from `self`.
    pub fn filled(&self, value: f64) -> Self {
        self.with_params(&[value; N_PARAMS])
    }

    pub fn params(&self) -> [f64; N_PARAMS] {
        [
            self.angles.alpha,
            self.angles.beta,
            self.angles.gamma,
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.fx,
            self.fy,
            self.ppx,
            self.ppy,
        ]
    }

    /// Replaces the optimized scalars and re-synchronizes the rotation matrix.
    pub fn with_params(&self, p: &[f64; N_PARAMS]) -> Self {
        let angles = RotationAngles {
            alpha: p[0],
            beta: p[1],
            gamma: p[2],
        };
        Self {
            rotation: rotation_from_angles(&angles),
            angles,
            translation: Vector3::new(p[3], p[4], p[5]),
            fx: p[6],
            fy: p[7],
            ppx: p[8],
            ppy: p[9],
            width: self.width,
            height: self.height,
            model: self.model,
            coeffs: self.coeffs,
        }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.ppx, 0.0, self.fy, self.ppy, 0.0, 0.0, 1.0)
    }

    pub fn p_matrix(&self) -> PMatrix {
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        rt.set_column(3, &self.translation);
        self.k_matrix() * rt
    }

    fn zip_with(&self, other: &Calib, f: impl Fn(f64, f64) -> f64) -> Calib {
        let a = self.params();
        let b = other.params();
        let mut out = [0.0; N_PARAMS];
        for i in 0..N_PARAMS {
            out[i] = f(a[i], b[i]);
        }
        self.with_params(&out)
    }

    /// Euclidean norm over the ten optimized scalars.
    pub fn norm(&self) -> f64 {
        self.params().iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn sum(&self) -> f64 {
        self.params().iter().sum()
    }

    /// `self / self.norm()`; a zero vector stays zero.
    pub fn normalize(&self) -> Calib {
        let norm = self.norm();
        if norm == 0.0 {
            return self.clone();
        }
        self * (1.0 / norm)
    }
}

impl fmt::Debug for Calib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Calib [angles: ({:.9}, {:.9}, {:.9}) t: ({:.6}, {:.6}, {:.6}) fx: {:.6} fy: {:.6} ppx: {:.6} ppy: {:.6}]",
            self.angles.alpha,
            self.angles.beta,
            self.angles.gamma,
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.fx,
            self.fy,
            self.ppx,
            self.ppy,
        )
    }
}

impl Add<&Calib> for &Calib {
    type Output = Calib;
    fn add(self, rhs: &Calib) -> Calib {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl Sub<&Calib> for &Calib {
    type Output = Calib;
    fn sub(self, rhs: &Calib) -> Calib {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl Mul<f64> for &Calib {
    type Output = Calib;
    fn mul(self, rhs: f64) -> Calib {
        let mut p = self.params();
        p.iter_mut().for_each(|v| *v *= rhs);
        self.with_params(&p)
    }
}

/// Element-wise division; a zero divisor yields zero.
impl Div<&Calib> for &Calib {
    type Output = Calib;
    fn div(self, rhs: &Calib) -> Calib {
        self.zip_with(rhs, |a, b| if b == 0.0 { 0.0 } else { a / b })
    }
}
