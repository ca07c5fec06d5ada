//! Calibration value types shared by every stage of an attempt.
//!
//! [`Intrinsics`] and [`Extrinsics`] are the boundary snapshots handed in by
//! the caller; [`Calib`] is the optimizer's parameter vector built from them.
//! Everything is double precision.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

pub mod calib;
pub mod yaml;

pub use calib::{
    angles_from_rotation, rotation_derivatives, rotation_from_angles, Calib, PMatrix,
    RotationAngles, N_PARAMS,
};

/// Lens distortion model attached to an [`Intrinsics`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistortionModel {
    /// Pure pinhole; coefficients are ignored.
    #[default]
    None,
    /// Brown-Conrady radial + tangential model, coefficients `[k1, k2, p1, p2, k3]`.
    BrownConrady,
}

/// Pinhole intrinsics of one sensor, with optional distortion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
    #[serde(default)]
    pub model: DistortionModel,
    /// `[k1, k2, p1, p2, k3]`
    #[serde(default)]
    pub coeffs: [f64; 5],
}

impl Intrinsics {
    pub fn pinhole(width: u32, height: u32, fx: f64, fy: f64, ppx: f64, ppy: f64) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            ppx,
            ppy,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.ppx, 0.0, self.fy, self.ppy, 0.0, 0.0, 1.0)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Focal lengths multiplied by `scale`; used to move between raw and
    /// temperature-compensated RGB intrinsics.
    pub fn with_focal_scaled(&self, scale: f64) -> Self {
        let mut out = self.clone();
        out.fx *= scale;
        out.fy *= scale;
        out
    }
}

/// Rigid transform mapping depth-sensor space to RGB-sensor space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Buffer size mismatch for {what}: expected {expected}, got {actual}")]
    BufferSizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid frame dimensions for {what}: {width}x{height}")]
    InvalidDimensions {
        what: &'static str,
        width: u32,
        height: u32,
    },
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Unsupported DSM correction model: {0}")]
    UnsupportedDsmModel(u8),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Matrix singularity detected")]
    SingularMatrix,
    #[error("No valid vertices: {0}")]
    NoValidVertices(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Failed to parse JSON: {0}")]
    JsonError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CalibrationError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::JsonError(err.to_string())
    }
}

/// Common validation functions for calibration inputs
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CalibrationError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CalibrationError::FocalLengthMustBePositive);
        }
        if !intrinsics.ppx.is_finite() || !intrinsics.ppy.is_finite() {
            return Err(CalibrationError::PrincipalPointMustBeFinite);
        }
        if intrinsics.width == 0 || intrinsics.height == 0 {
            return Err(CalibrationError::InvalidDimensions {
                what: "intrinsics",
                width: intrinsics.width,
                height: intrinsics.height,
            });
        }
        Ok(())
    }

    pub fn validate_buffer(
        what: &'static str,
        width: u32,
        height: u32,
        actual: usize,
    ) -> Result<(), CalibrationError> {
        if width < 3 || height < 3 {
            return Err(CalibrationError::InvalidDimensions {
                what,
                width,
                height,
            });
        }
        let expected = width as usize * height as usize;
        if expected != actual {
            return Err(CalibrationError::BufferSizeMismatch {
                what,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_intrinsics() {
        let good = Intrinsics::pinhole(640, 480, 600.0, 600.0, 320.0, 240.0);
        assert!(validation::validate_intrinsics(&good).is_ok());

        let mut bad = good.clone();
        bad.fy = 0.0;
        assert!(matches!(
            validation::validate_intrinsics(&bad),
            Err(CalibrationError::FocalLengthMustBePositive)
        ));

        let mut bad = good;
        bad.ppx = f64::NAN;
        assert!(matches!(
            validation::validate_intrinsics(&bad),
            Err(CalibrationError::PrincipalPointMustBeFinite)
        ));
    }

    #[test]
    fn test_validate_buffer_mismatch() {
        assert!(validation::validate_buffer("depth", 4, 4, 16).is_ok());
        match validation::validate_buffer("depth", 4, 4, 15) {
            Err(CalibrationError::BufferSizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 15);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
