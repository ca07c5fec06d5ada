//! Re-expresses a depth focal-length correction as a DSM correction.
//!
//! Relevant pixels are de-projected with the old intrinsics and converted to
//! LOS. A LOS scaling is then searched so that the re-mapped rays, projected
//! with the old intrinsics, land where the new intrinsics say the pixel's
//! true ray lands. The search runs on a coarse 5×5 grid and a refined 5×5
//! grid, each closed by a quadratic-surface fit of the residual.

use super::los::{los_to_vertices, vertices_to_los};
use super::{
    apply_ac_res_on_dsm_model, dsm_params_from_los_error, los_error_from_dsm_params, AcToDsmDirection,
    AlgoCalibrationInfo, AlgoCalibrationRegisters, DsmParams, LosError,
};
use crate::calibration::{CalibrationError, Intrinsics};
use crate::frame::Mask;
use crate::linalg::{fit_quadratic_surface, inverse3};
use log::{debug, info};
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::Serialize;

const GRID_HALF: i32 = 2;
const COARSE_STEP: f64 = 0.01;
const FINE_STEP: f64 = 0.0025;

pub struct KToDsmInputs<'a> {
    pub old_intrinsics: &'a Intrinsics,
    pub new_intrinsics: &'a Intrinsics,
    /// Depth pixels used as anchors, at the old intrinsics' resolution.
    pub relevant_pixels: &'a Mask,
    /// Correction currently applied on top of the factory registers.
    pub previous: &'a DsmParams,
    /// Registers currently active in the sensor.
    pub registers: &'a AlgoCalibrationRegisters,
    pub info: &'a AlgoCalibrationInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DsmConversion {
    pub params: DsmParams,
    pub registers: AlgoCalibrationRegisters,
    pub factory_registers: AlgoCalibrationRegisters,
    /// Scaling found by the search, on top of the previous correction.
    pub los_scaling: [f64; 2],
    /// Total LOS correction relative to the factory registers.
    pub los_error: LosError,
    /// Mean squared pixel residual at `los_scaling`.
    pub fit_error: f64,
    pub relevant_pixels: usize,
}

struct ScalingProblem<'a> {
    info: &'a AlgoCalibrationInfo,
    k_old: Matrix3<f64>,
    los: Vec<Vector2<f64>>,
    targets: Vec<Vector2<f64>>,
}

impl ScalingProblem<'_> {
    fn error(&self, scaling: [f64; 2]) -> f64 {
        let scaled: Vec<Vector2<f64>> = self
            .los
            .iter()
            .map(|l| Vector2::new(l.x * scaling[0], l.y * scaling[1]))
            .collect();
        let rays = los_to_vertices(self.info, &scaled);
        let mut sum = 0.0;
        let mut n = 0usize;
        for (ray, target) in rays.iter().zip(&self.targets) {
            if ray.z <= f64::EPSILON {
                continue;
            }
            let p = self.k_old * (ray / ray.z);
            sum += (Vector2::new(p.x, p.y) - target).norm_squared();
            n += 1;
        }
        if n == 0 {
            f64::INFINITY
        } else {
            sum / n as f64
        }
    }

    /// 5×5 grid around `center`, closed by a quadratic fit. Falls back to the
    /// best grid point when the fit has no minimum inside the grid.
    fn grid_search(&self, center: [f64; 2], step: f64) -> Result<([f64; 2], f64), CalibrationError> {
        let mut samples = Vec::with_capacity(25);
        let mut best = (center, f64::INFINITY);
        for i in -GRID_HALF..=GRID_HALF {
            for j in -GRID_HALF..=GRID_HALF {
                let s = [center[0] + f64::from(i) * step, center[1] + f64::from(j) * step];
                let e = self.error(s);
                if e < best.1 {
                    best = (s, e);
                }
                samples.push((f64::from(i), f64::from(j), e));
            }
        }
        let surface = fit_quadratic_surface(&samples)?;
        let limit = f64::from(GRID_HALF);
        match surface.minimum() {
            Some(m) if m.x.abs() <= limit && m.y.abs() <= limit => {
                let s = [center[0] + m.x * step, center[1] + m.y * step];
                Ok((s, self.error(s)))
            }
            _ => {
                debug!("quadratic fit has no minimum inside the grid; using best grid point {:?}", best.0);
                Ok(best)
            }
        }
    }
}

/// Converts the old → new depth intrinsics change into DSM params.
///
/// # Errors
///
/// * The relevant-pixel mask does not match the old intrinsics' resolution.
/// * No relevant pixel is set.
/// * Singular intrinsics.
pub fn k_to_dsm(inputs: &KToDsmInputs<'_>) -> Result<DsmConversion, CalibrationError> {
    let old_k = inputs.old_intrinsics;
    let mask = inputs.relevant_pixels;
    let expected = old_k.pixel_count();
    let actual = mask.width() * mask.height();
    if actual != expected || mask.width() != old_k.width as usize {
        return Err(CalibrationError::BufferSizeMismatch {
            what: "relevant pixels",
            expected,
            actual,
        });
    }

    let k_old = old_k.k_matrix();
    let k_old_inv = inverse3(&k_old)?;
    let k_new_inv = inverse3(&inputs.new_intrinsics.k_matrix())?;

    let mut rays = Vec::new();
    let mut targets = Vec::new();
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if !mask.at(x, y) {
                continue;
            }
            let pixel = Vector3::new(x as f64, y as f64, 1.0);
            rays.push(k_old_inv * pixel);
            let t = k_old * (k_new_inv * pixel);
            targets.push(Vector2::new(t.x / t.z, t.y / t.z));
        }
    }
    if rays.is_empty() {
        return Err(CalibrationError::NoValidVertices(
            "no relevant pixels for the DSM conversion".to_string(),
        ));
    }

    let problem = ScalingProblem {
        info: inputs.info,
        k_old,
        los: vertices_to_los(inputs.info, &rays),
        targets,
    };
    let (coarse, coarse_err) = problem.grid_search([1.0, 1.0], COARSE_STEP)?;
    debug!("k_to_dsm: coarse LOS scaling {coarse:?} (err {coarse_err:.6})");
    let (scaling, fit_error) = problem.grid_search(coarse, FINE_STEP)?;
    debug!("k_to_dsm: refined LOS scaling {scaling:?} (err {fit_error:.6})");

    let factory = apply_ac_res_on_dsm_model(inputs.previous, inputs.registers, AcToDsmDirection::Inverse);
    let last = los_error_from_dsm_params(inputs.previous, &factory);
    let los_error = last.then(&LosError {
        scaling,
        shift: [0.0; 2],
    });
    let params = dsm_params_from_los_error(inputs.previous.model, &los_error, &factory);
    let registers = apply_ac_res_on_dsm_model(&params, &factory, AcToDsmDirection::Direct);
    info!(
        "DSM params: model {:?} scale [{:.6} {:.6}] offset [{:.6} {:.6}]",
        params.model, params.h_scale, params.v_scale, params.h_offset, params.v_offset
    );

    Ok(DsmConversion {
        params,
        registers,
        factory_registers: factory,
        los_scaling: scaling,
        los_error,
        fit_error,
        relevant_pixels: rays.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsm::DsmModel;
    use approx::assert_relative_eq;

    fn registers() -> AlgoCalibrationRegisters {
        AlgoCalibrationRegisters {
            dsm_x_scale: 1.37,
            dsm_y_scale: 1.52,
            dsm_x_offset: 1490.0,
            dsm_y_offset: 1345.0,
        }
    }

    fn sparse_mask(width: usize, height: usize) -> Mask {
        let mut mask = Mask::new(width, height);
        for y in (8..height - 8).step_by(16) {
            for x in (8..width - 8).step_by(16) {
                mask.set(x, y, true);
            }
        }
        mask
    }

    fn convert(new_fx: f64) -> DsmConversion {
        let old = Intrinsics::pinhole(640, 480, 600.0, 600.0, 320.0, 240.0);
        let new = Intrinsics { fx: new_fx, ..old.clone() };
        let mask = sparse_mask(640, 480);
        let previous = DsmParams {
            model: DsmModel::Aot,
            ..DsmParams::default()
        };
        k_to_dsm(&KToDsmInputs {
            old_intrinsics: &old,
            new_intrinsics: &new,
            relevant_pixels: &mask,
            previous: &previous,
            registers: &registers(),
            info: &AlgoCalibrationInfo::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_unchanged_intrinsics_keep_identity() {
        let c = convert(600.0);
        assert_eq!(c.params.model, DsmModel::Aot);
        assert_relative_eq!(c.params.h_scale, 1.0, epsilon = 1e-3);
        assert_relative_eq!(c.params.v_scale, 1.0, epsilon = 1e-3);
        assert_relative_eq!(c.registers.dsm_x_scale, registers().dsm_x_scale, epsilon = 2e-3);
        assert!(c.fit_error < 1e-2);
    }

    #[test]
    fn test_larger_focal_shrinks_horizontal_los() {
        let c = convert(606.0);
        assert_relative_eq!(c.params.h_scale, 1.0 / 1.01, epsilon = 5e-3);
        assert_relative_eq!(c.params.v_scale, 1.0, epsilon = 5e-3);
        assert!(c.params.h_scale < 1.0);
        assert_relative_eq!(c.los_error.scaling[0], c.los_scaling[0], epsilon = 1e-12);
    }

    #[test]
    fn test_mask_size_mismatch() {
        let old = Intrinsics::pinhole(640, 480, 600.0, 600.0, 320.0, 240.0);
        let mask = Mask::new(320, 240);
        let err = k_to_dsm(&KToDsmInputs {
            old_intrinsics: &old,
            new_intrinsics: &old,
            relevant_pixels: &mask,
            previous: &DsmParams::default(),
            registers: &registers(),
            info: &AlgoCalibrationInfo::default(),
        });
        assert!(matches!(err, Err(CalibrationError::BufferSizeMismatch { .. })));
    }

    #[test]
    fn test_empty_mask() {
        let old = Intrinsics::pinhole(64, 48, 60.0, 60.0, 32.0, 24.0);
        let mask = Mask::new(64, 48);
        let err = k_to_dsm(&KToDsmInputs {
            old_intrinsics: &old,
            new_intrinsics: &old,
            relevant_pixels: &mask,
            previous: &DsmParams::default(),
            registers: &registers(),
            info: &AlgoCalibrationInfo::default(),
        });
        assert!(matches!(err, Err(CalibrationError::NoValidVertices(_))));
    }
}
