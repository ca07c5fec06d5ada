//! Depth sensor module (DSM) correction model.
//!
//! The depth sensor places each laser ray in the image according to its
//! mirror reading, mapped through four registers:
//! `corr = (dsm + offset) · scale − 2047`. Auto-calibration layers a
//! correction ([`DsmParams`]) on top of the factory registers in one of two
//! ways:
//!
//! * AOT, angle offset then scale: `dsm' = h_scale · dsm + h_offset`.
//! * TOA, scale then offset in corrected units:
//!   `corr' = (h_scale · dsm + offset) · scale + h_offset − 2047`.
//!
//! Both act on the corrected value ("line of sight", LOS) as
//! `corr' = scaling · corr + shift`, see [`LosError`].

pub mod k_to_dsm;
pub mod los;

pub use k_to_dsm::{k_to_dsm, DsmConversion, KToDsmInputs};
pub use los::{laser_incident_direction, los_to_vertices, vertices_to_los};

use crate::calibration::CalibrationError;
use crate::params::DsmBounds;
use crate::validity::CheckFailure;
use log::warn;
use serde::{Deserialize, Serialize};

/// Center of the corrected mirror range.
pub const DSM_CENTER: f64 = 2047.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DsmModel {
    #[default]
    None,
    Aot,
    Toa,
}

impl TryFrom<u8> for DsmModel {
    type Error = CalibrationError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(DsmModel::None),
            1 => Ok(DsmModel::Aot),
            2 => Ok(DsmModel::Toa),
            other => Err(CalibrationError::UnsupportedDsmModel(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgoCalibrationRegisters {
    pub dsm_x_scale: f64,
    pub dsm_y_scale: f64,
    pub dsm_x_offset: f64,
    pub dsm_y_offset: f64,
}

impl Default for AlgoCalibrationRegisters {
    fn default() -> Self {
        Self {
            dsm_x_scale: 1.0,
            dsm_y_scale: 1.0,
            dsm_x_offset: 0.0,
            dsm_y_offset: 0.0,
        }
    }
}

/// Per-unit laser and mirror geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgoCalibrationInfo {
    pub fovex_existence_flag: bool,
    /// Polynomial of the field-of-view expander, in degrees.
    pub fovex_nominal: [f64; 4],
    pub laser_angle_h: f64,
    pub laser_angle_v: f64,
    /// Mirror field of view per movement mode, in degrees.
    pub fov_x: [f64; 5],
    pub fov_y: [f64; 5],
    /// Horizontal angle polynomial, in degrees.
    pub poly_vars: [f64; 3],
    pub undist_ang_horz: [f64; 4],
    pub pitch_fix_factor: f64,
}

impl Default for AlgoCalibrationInfo {
    fn default() -> Self {
        Self {
            fovex_existence_flag: false,
            fovex_nominal: [0.0; 4],
            laser_angle_h: 0.0,
            laser_angle_v: 0.0,
            fov_x: [56.0; 5],
            fov_y: [44.0; 5],
            poly_vars: [0.0; 3],
            undist_ang_horz: [0.0; 4],
            pitch_fix_factor: 0.0,
        }
    }
}

impl AlgoCalibrationInfo {
    /// Mirror degrees per corrected DSM unit, `[x, y]`.
    pub fn degrees_per_unit(&self) -> [f64; 2] {
        [
            self.fov_x[0] * 0.25 / DSM_CENTER,
            self.fov_y[0] * 0.25 / DSM_CENTER,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DsmParams {
    pub model: DsmModel,
    pub h_scale: f64,
    pub v_scale: f64,
    pub h_offset: f64,
    pub v_offset: f64,
}

impl Default for DsmParams {
    fn default() -> Self {
        Self {
            model: DsmModel::None,
            h_scale: 1.0,
            v_scale: 1.0,
            h_offset: 0.0,
            v_offset: 0.0,
        }
    }
}

/// LOS correction `corr' = scaling · corr + shift`, `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LosError {
    pub scaling: [f64; 2],
    pub shift: [f64; 2],
}

impl Default for LosError {
    fn default() -> Self {
        Self {
            scaling: [1.0; 2],
            shift: [0.0; 2],
        }
    }
}

impl LosError {
    /// `other` applied after `self`.
    pub fn then(&self, other: &LosError) -> LosError {
        LosError {
            scaling: [self.scaling[0] * other.scaling[0], self.scaling[1] * other.scaling[1]],
            shift: [
                self.shift[0] * other.scaling[0] + other.shift[0],
                self.shift[1] * other.scaling[1] + other.shift[1],
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcToDsmDirection {
    /// Factory registers to corrected registers.
    Direct,
    /// Corrected registers back to factory registers.
    Inverse,
}

pub fn apply_ac_res_on_dsm_model(
    params: &DsmParams,
    regs: &AlgoCalibrationRegisters,
    direction: AcToDsmDirection,
) -> AlgoCalibrationRegisters {
    let (hs, vs, ho, vo) = (params.h_scale, params.v_scale, params.h_offset, params.v_offset);
    match (params.model, direction) {
        (DsmModel::None, _) => *regs,
        (DsmModel::Aot, AcToDsmDirection::Direct) => AlgoCalibrationRegisters {
            dsm_x_scale: regs.dsm_x_scale * hs,
            dsm_y_scale: regs.dsm_y_scale * vs,
            dsm_x_offset: (regs.dsm_x_offset + ho) / hs,
            dsm_y_offset: (regs.dsm_y_offset + vo) / vs,
        },
        (DsmModel::Toa, AcToDsmDirection::Direct) => AlgoCalibrationRegisters {
            dsm_x_scale: regs.dsm_x_scale * hs,
            dsm_y_scale: regs.dsm_y_scale * vs,
            dsm_x_offset: (regs.dsm_x_offset + ho / regs.dsm_x_scale) / hs,
            dsm_y_offset: (regs.dsm_y_offset + vo / regs.dsm_y_scale) / vs,
        },
        (DsmModel::Aot, AcToDsmDirection::Inverse) => AlgoCalibrationRegisters {
            dsm_x_scale: regs.dsm_x_scale / hs,
            dsm_y_scale: regs.dsm_y_scale / vs,
            dsm_x_offset: regs.dsm_x_offset * hs - ho,
            dsm_y_offset: regs.dsm_y_offset * vs - vo,
        },
        (DsmModel::Toa, AcToDsmDirection::Inverse) => {
            let x_scale = regs.dsm_x_scale / hs;
            let y_scale = regs.dsm_y_scale / vs;
            AlgoCalibrationRegisters {
                dsm_x_scale: x_scale,
                dsm_y_scale: y_scale,
                dsm_x_offset: regs.dsm_x_offset * hs - ho / x_scale,
                dsm_y_offset: regs.dsm_y_offset * vs - vo / y_scale,
            }
        }
    }
}

/// LOS correction expressed by `params` on top of `factory` registers.
pub fn los_error_from_dsm_params(params: &DsmParams, factory: &AlgoCalibrationRegisters) -> LosError {
    let lever = |scale: f64, offset: f64| DSM_CENTER - offset * scale;
    let (hx, hy) = (
        lever(factory.dsm_x_scale, factory.dsm_x_offset),
        lever(factory.dsm_y_scale, factory.dsm_y_offset),
    );
    match params.model {
        DsmModel::None => LosError::default(),
        DsmModel::Aot => LosError {
            scaling: [params.h_scale, params.v_scale],
            shift: [
                (params.h_scale - 1.0) * hx + params.h_offset * factory.dsm_x_scale,
                (params.v_scale - 1.0) * hy + params.v_offset * factory.dsm_y_scale,
            ],
        },
        DsmModel::Toa => LosError {
            scaling: [params.h_scale, params.v_scale],
            shift: [
                (params.h_scale - 1.0) * hx + params.h_offset,
                (params.v_scale - 1.0) * hy + params.v_offset,
            ],
        },
    }
}

/// DSM params of `model` that realize `los` on top of `factory` registers.
/// `DsmModel::None` cannot carry a correction and is written as AOT.
pub fn dsm_params_from_los_error(model: DsmModel, los: &LosError, factory: &AlgoCalibrationRegisters) -> DsmParams {
    let model = match model {
        DsmModel::None => DsmModel::Aot,
        m => m,
    };
    let [sx, sy] = los.scaling;
    let base_x = los.shift[0] - (sx - 1.0) * (DSM_CENTER - factory.dsm_x_offset * factory.dsm_x_scale);
    let base_y = los.shift[1] - (sy - 1.0) * (DSM_CENTER - factory.dsm_y_offset * factory.dsm_y_scale);
    let (h_offset, v_offset) = match model {
        DsmModel::Toa => (base_x, base_y),
        _ => (base_x / factory.dsm_x_scale, base_y / factory.dsm_y_scale),
    };
    DsmParams {
        model,
        h_scale: sx,
        v_scale: sy,
        h_offset,
        v_offset,
    }
}

/// Offsets of `params` in mirror degrees, `[h, v]`.
pub fn offsets_in_degrees(
    params: &DsmParams,
    factory: &AlgoCalibrationRegisters,
    info: &AlgoCalibrationInfo,
) -> [f64; 2] {
    let [kx, ky] = info.degrees_per_unit();
    match params.model {
        DsmModel::Toa => [params.h_offset * kx, params.v_offset * ky],
        _ => [
            params.h_offset * factory.dsm_x_scale * kx,
            params.v_offset * factory.dsm_y_scale * ky,
        ],
    }
}

/// Physical plausibility of a DSM correction. Only AOT corrections are
/// accepted.
pub fn validate_dsm_params(
    params: &DsmParams,
    factory: &AlgoCalibrationRegisters,
    info: &AlgoCalibrationInfo,
    bounds: &DsmBounds,
) -> Option<CheckFailure> {
    if params.model != DsmModel::Aot {
        warn!("dsm_model: {:?} corrections are not accepted", params.model);
        return Some(CheckFailure::new("dsm_model", params.model as u8 as f64, DsmModel::Aot as u8 as f64));
    }
    for scale in [params.h_scale, params.v_scale] {
        let deviation = (scale - 1.0).abs();
        if !(deviation <= bounds.max_scale_deviation) {
            warn!("dsm_scale: scale {scale} deviates by {deviation}, limit {}", bounds.max_scale_deviation);
            return Some(CheckFailure::new("dsm_scale", deviation, bounds.max_scale_deviation));
        }
    }
    for offset in offsets_in_degrees(params, factory, info) {
        if !(offset.abs() <= bounds.max_offset_deg) {
            warn!("dsm_offset: offset {offset} deg, limit {}", bounds.max_offset_deg);
            return Some(CheckFailure::new("dsm_offset", offset.abs(), bounds.max_offset_deg));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn factory() -> AlgoCalibrationRegisters {
        AlgoCalibrationRegisters {
            dsm_x_scale: 1.37,
            dsm_y_scale: 1.52,
            dsm_x_offset: 1490.0,
            dsm_y_offset: 1345.0,
        }
    }

    fn params(model: DsmModel) -> DsmParams {
        DsmParams {
            model,
            h_scale: 1.004,
            v_scale: 0.997,
            h_offset: 0.8,
            v_offset: -1.3,
        }
    }

    #[test]
    fn test_model_from_raw() {
        assert_eq!(DsmModel::try_from(1).unwrap(), DsmModel::Aot);
        assert!(matches!(
            DsmModel::try_from(7),
            Err(CalibrationError::UnsupportedDsmModel(7))
        ));
    }

    #[test]
    fn test_direct_then_inverse_restores_registers() {
        for model in [DsmModel::None, DsmModel::Aot, DsmModel::Toa] {
            let p = params(model);
            let corrected = apply_ac_res_on_dsm_model(&p, &factory(), AcToDsmDirection::Direct);
            let back = apply_ac_res_on_dsm_model(&p, &corrected, AcToDsmDirection::Inverse);
            assert_relative_eq!(back.dsm_x_scale, factory().dsm_x_scale, epsilon = 1e-12);
            assert_relative_eq!(back.dsm_y_offset, factory().dsm_y_offset, epsilon = 1e-9);
            assert_relative_eq!(back.dsm_x_offset, factory().dsm_x_offset, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_los_error_matches_corrected_registers() {
        // corr' computed through the corrected registers equals scaling · corr + shift
        for model in [DsmModel::Aot, DsmModel::Toa] {
            let p = params(model);
            let f = factory();
            let c = apply_ac_res_on_dsm_model(&p, &f, AcToDsmDirection::Direct);
            let los = los_error_from_dsm_params(&p, &f);
            for dsm in [100.0, 1500.0, 2900.0] {
                let corr = (dsm + f.dsm_x_offset) * f.dsm_x_scale - DSM_CENTER;
                let corrected = (dsm + c.dsm_x_offset) * c.dsm_x_scale - DSM_CENTER;
                assert_relative_eq!(corrected, los.scaling[0] * corr + los.shift[0], epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn test_params_from_los_error_inverts() {
        for model in [DsmModel::Aot, DsmModel::Toa] {
            let p = params(model);
            let los = los_error_from_dsm_params(&p, &factory());
            let back = dsm_params_from_los_error(model, &los, &factory());
            assert_eq!(back.model, model);
            assert_relative_eq!(back.h_scale, p.h_scale, epsilon = 1e-12);
            assert_relative_eq!(back.h_offset, p.h_offset, epsilon = 1e-9);
            assert_relative_eq!(back.v_offset, p.v_offset, epsilon = 1e-9);
        }
        let none = dsm_params_from_los_error(DsmModel::None, &LosError::default(), &factory());
        assert_eq!(none.model, DsmModel::Aot);
        assert_relative_eq!(none.h_offset, 0.0);
    }

    #[test]
    fn test_los_composition() {
        let a = LosError {
            scaling: [1.01, 0.99],
            shift: [2.0, -1.0],
        };
        let b = LosError {
            scaling: [0.98, 1.0],
            shift: [0.5, 0.0],
        };
        let ab = a.then(&b);
        let x = 123.0;
        assert_relative_eq!(ab.scaling[0] * x + ab.shift[0], 0.98 * (1.01 * x + 2.0) + 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_validate_bounds() {
        let f = factory();
        let info = AlgoCalibrationInfo::default();
        let bounds = DsmBounds::default();
        let ok = DsmParams {
            model: DsmModel::Aot,
            h_scale: 1.01,
            v_scale: 0.995,
            h_offset: 1.0,
            v_offset: -1.0,
        };
        assert!(validate_dsm_params(&ok, &f, &info, &bounds).is_none());

        let scale = DsmParams { h_scale: 1.02, ..ok };
        assert_eq!(validate_dsm_params(&scale, &f, &info, &bounds).unwrap().name, "dsm_scale");

        // 2° at 56°/4 per 2047 units
        let offset = DsmParams { h_offset: 300.0 / f.dsm_x_scale, ..ok };
        assert_eq!(validate_dsm_params(&offset, &f, &info, &bounds).unwrap().name, "dsm_offset");

        let toa = DsmParams { model: DsmModel::Toa, ..ok };
        assert_eq!(validate_dsm_params(&toa, &f, &info, &bounds).unwrap().name, "dsm_model");
    }
}
