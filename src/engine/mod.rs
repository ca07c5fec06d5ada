//! One calibration attempt, end to end.
//!
//! [`DepthToRgbCalibration::new`] validates and preprocesses the frames;
//! malformed input is returned as an error. [`DepthToRgbCalibration::optimize`]
//! then runs scene validity, the optimizer and result validity, and folds
//! every outcome, including numerical failures, into a
//! [`CalibrationOutcome`].

use crate::calibration::{validation, Calib, CalibrationError, Extrinsics, Intrinsics};
use crate::diagnostics::{write_attempt_data, AttemptData};
use crate::dsm::{AlgoCalibrationInfo, AlgoCalibrationRegisters, DsmConversion, DsmModel, DsmParams};
use crate::frame::{Mask, Plane};
use crate::optimization::{IterationData, OptimizationOutcome, Optimizer};
use crate::params::AlgoParams;
use crate::preprocess::{
    detect_movement, preprocess_depth, preprocess_ir, preprocess_yuy, DepthFrameData, IrFrameData,
    YuyFrameData,
};
use crate::validity::result::DsmCheckInputs;
use crate::validity::{
    is_scene_valid, is_valid_results, ResultInputs, ResultValidity, SceneInputs, SceneValidity, SvmModel,
    N_FEATURES,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibrationStatus {
    Successful,
    NotNeeded,
    SceneInvalid,
    BadResult,
    Failed,
}

impl fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalibrationStatus::Successful => "SUCCESSFUL",
            CalibrationStatus::NotNeeded => "NOT_NEEDED",
            CalibrationStatus::SceneInvalid => "SCENE_INVALID",
            CalibrationStatus::BadResult => "BAD_RESULT",
            CalibrationStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Hardware state for the DSM path.
#[derive(Debug, Clone)]
pub struct DsmInputs {
    pub registers: AlgoCalibrationRegisters,
    pub info: AlgoCalibrationInfo,
    /// Raw model of the correction currently applied: 0 NONE, 1 AOT, 2 TOA.
    pub model: u8,
    /// `[h, v]`
    pub scale: [f64; 2],
    /// `[h, v]`
    pub offset: [f64; 2],
    /// Anchor pixels at the depth resolution.
    pub relevant_pixels: Mask,
}

/// Raw frames and starting calibration of one attempt.
#[derive(Debug, Clone)]
pub struct CalibrationInputs {
    pub depth: Vec<u16>,
    pub depth_intrinsics: Intrinsics,
    /// Depth units per raw sample, e.g. 0.001 for millimeters to meters.
    pub depth_units: f64,
    /// At the depth resolution.
    pub ir: Vec<u8>,
    pub yuy: Vec<u16>,
    pub prev_yuy: Vec<u16>,
    /// Raw RGB intrinsics.
    pub rgb_intrinsics: Intrinsics,
    pub extrinsics: Extrinsics,
    /// Temperature factor; the RGB focal length is divided by it before
    /// optimizing.
    pub thermal_scale: Option<f64>,
    /// Factory RGB calibration, for the origin-distance check.
    pub factory: Option<(Intrinsics, Extrinsics)>,
    /// Luminance of the last successfully calibrated scene.
    pub last_success_lum: Option<Plane<u8>>,
    /// Number of earlier calibrations; selects the movement cap.
    pub iteration_number: usize,
    pub dsm: Option<DsmInputs>,
    /// Overrides the params' classifier.
    pub svm: Option<SvmModel>,
    /// Directory for the diagnostics dump.
    pub debug_dir: Option<PathBuf>,
}

impl CalibrationInputs {
    /// Inputs with every optional part unset.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        depth: Vec<u16>,
        depth_intrinsics: Intrinsics,
        depth_units: f64,
        ir: Vec<u8>,
        yuy: Vec<u16>,
        prev_yuy: Vec<u16>,
        rgb_intrinsics: Intrinsics,
        extrinsics: Extrinsics,
    ) -> Self {
        Self {
            depth,
            depth_intrinsics,
            depth_units,
            ir,
            yuy,
            prev_yuy,
            rgb_intrinsics,
            extrinsics,
            thermal_scale: None,
            factory: None,
            last_success_lum: None,
            iteration_number: 0,
            dsm: None,
            svm: None,
            debug_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub status: CalibrationStatus,
    pub scene: SceneValidity,
    pub optimization: Option<OptimizationOutcome>,
    pub result: Option<ResultValidity>,
    /// Refined RGB intrinsics as optimized, i.e. thermally compensated.
    pub rgb_intrinsics: Option<Intrinsics>,
    /// Refined RGB intrinsics with the thermal scale multiplied back.
    pub raw_rgb_intrinsics: Option<Intrinsics>,
    pub extrinsics: Option<Extrinsics>,
    pub dsm: Option<DsmConversion>,
    /// Set when the status is FAILED.
    pub error: Option<String>,
}

impl CalibrationOutcome {
    fn new(status: CalibrationStatus, scene: SceneValidity) -> Self {
        Self {
            status,
            scene,
            optimization: None,
            result: None,
            rgb_intrinsics: None,
            raw_rgb_intrinsics: None,
            extrinsics: None,
            dsm: None,
            error: None,
        }
    }
}

struct DsmState {
    registers: AlgoCalibrationRegisters,
    info: AlgoCalibrationInfo,
    previous: DsmParams,
    relevant_pixels: Mask,
}

pub struct DepthToRgbCalibration {
    params: AlgoParams,
    depth: DepthFrameData,
    ir: IrFrameData,
    yuy: YuyFrameData,
    start: Calib,
    thermal_scale: f64,
    factory: Option<Calib>,
    last_success_lum: Option<Plane<u8>>,
    iteration_number: usize,
    dsm: Option<DsmState>,
    svm: SvmModel,
    debug_dir: Option<PathBuf>,
}

impl DepthToRgbCalibration {
    /// Validates the inputs and preprocesses every frame.
    ///
    /// # Errors
    ///
    /// * Invalid params, intrinsics or thermal scale.
    /// * Buffer sizes that do not match their dimensions.
    /// * An unsupported DSM model or a relevant-pixel mask at the wrong
    ///   resolution.
    /// * A classifier that cannot be loaded or does not take the decision
    ///   features.
    pub fn new(inputs: CalibrationInputs, params: AlgoParams) -> Result<Self, CalibrationError> {
        params.validate()?;
        let d = &inputs.depth_intrinsics;
        let rgb = &inputs.rgb_intrinsics;
        validation::validate_intrinsics(rgb)?;
        validation::validate_buffer("depth", d.width, d.height, inputs.depth.len())?;
        validation::validate_buffer("ir", d.width, d.height, inputs.ir.len())?;
        validation::validate_buffer("yuy", rgb.width, rgb.height, inputs.yuy.len())?;
        validation::validate_buffer("previous yuy", rgb.width, rgb.height, inputs.prev_yuy.len())?;

        let thermal_scale = inputs.thermal_scale.unwrap_or(1.0);
        if !(thermal_scale.is_finite() && thermal_scale > 0.0) {
            return Err(CalibrationError::InvalidParams(format!(
                "thermal scale must be positive, got {thermal_scale}"
            )));
        }

        let dsm = match inputs.dsm {
            Some(dsm) => {
                let model = DsmModel::try_from(dsm.model)?;
                if dsm.relevant_pixels.width() != d.width as usize || dsm.relevant_pixels.height() != d.height as usize {
                    return Err(CalibrationError::BufferSizeMismatch {
                        what: "relevant pixels",
                        expected: d.pixel_count(),
                        actual: dsm.relevant_pixels.width() * dsm.relevant_pixels.height(),
                    });
                }
                Some(DsmState {
                    registers: dsm.registers,
                    info: dsm.info,
                    previous: DsmParams {
                        model,
                        h_scale: dsm.scale[0],
                        v_scale: dsm.scale[1],
                        h_offset: dsm.offset[0],
                        v_offset: dsm.offset[1],
                    },
                    relevant_pixels: dsm.relevant_pixels,
                })
            }
            None => None,
        };

        let svm = match (inputs.svm, &params.result.svm_model) {
            (Some(svm), _) => {
                svm.validate()?;
                svm
            }
            (None, Some(path)) => SvmModel::load(path)?,
            (None, None) => SvmModel::embedded()?,
        };
        if svm.feature_count() != N_FEATURES {
            return Err(CalibrationError::InvalidParams(format!(
                "svm model takes {} features, expected {N_FEATURES}",
                svm.feature_count()
            )));
        }

        let sections = (params.scene.num_of_sections_x, params.scene.num_of_sections_y);
        let ir = preprocess_ir(d.width as usize, d.height as usize, inputs.ir, &params.preprocess)?;
        let depth = preprocess_depth(d, inputs.depth_units, inputs.depth, &ir, &params.preprocess, sections)?;
        let yuy = preprocess_yuy(
            rgb.width as usize,
            rgb.height as usize,
            inputs.yuy,
            inputs.prev_yuy,
            &params.preprocess,
        )?;
        info!(
            "preprocessed attempt: {} depth edge vertices, depth {}x{}, rgb {}x{}",
            depth.vertices.len(),
            d.width,
            d.height,
            rgb.width,
            rgb.height
        );

        let thermal = rgb.with_focal_scaled(1.0 / thermal_scale);
        let start = Calib::from_intrinsics_extrinsics(&thermal, &inputs.extrinsics);
        let factory = inputs
            .factory
            .map(|(k, rt)| Calib::from_intrinsics_extrinsics(&k.with_focal_scaled(1.0 / thermal_scale), &rt));

        Ok(Self {
            params,
            depth,
            ir,
            yuy,
            start,
            thermal_scale,
            factory,
            last_success_lum: inputs.last_success_lum,
            iteration_number: inputs.iteration_number,
            dsm,
            svm,
            debug_dir: inputs.debug_dir,
        })
    }

    /// Luminance of the current color frame, for the caller to keep as the
    /// last successful scene.
    pub fn luminance(&self) -> &Plane<u8> {
        &self.yuy.lum
    }

    pub fn depth_data(&self) -> &DepthFrameData {
        &self.depth
    }

    pub fn yuy_data(&self) -> &YuyFrameData {
        &self.yuy
    }

    /// Starting calibration, thermally compensated.
    pub fn start_calib(&self) -> &Calib {
        &self.start
    }

    pub fn scene_validity(&self) -> SceneValidity {
        is_scene_valid(
            &SceneInputs {
                depth: &self.depth,
                ir: &self.ir,
                yuy: &self.yuy,
                calib: &self.start,
                last_success_lum: self.last_success_lum.as_ref(),
            },
            &self.params,
        )
    }

    fn check_results(
        &self,
        new: &Calib,
        scene: &SceneValidity,
    ) -> Result<ResultValidity, CalibrationError> {
        let dsm = self.dsm.as_ref().map(|s| DsmCheckInputs {
            depth_intrinsics: &self.depth.intrinsics,
            relevant_pixels: &s.relevant_pixels,
            previous: &s.previous,
            registers: &s.registers,
            info: &s.info,
        });
        is_valid_results(
            &ResultInputs {
                vertices: &self.depth.vertices,
                yuy: &self.yuy,
                original: &self.start,
                new,
                factory: self.factory.as_ref(),
                iteration_number: self.iteration_number,
                num_sections: self.depth.section_grid.count(),
                scene: &scene.statistics,
                svm: &self.svm,
                dsm,
            },
            &self.params,
        )
    }

    fn dump(
        &self,
        scene: &SceneValidity,
        optimization: Option<&OptimizationOutcome>,
        result: Option<&ResultValidity>,
    ) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let movement = detect_movement(&self.yuy, self.params.preprocess.edge_thresh4_logic_lum, &self.params.scene);
        write_attempt_data(
            dir,
            &AttemptData {
                depth: &self.depth,
                ir: &self.ir,
                yuy: &self.yuy,
                movement: Some(&movement),
                stats: optimization.map(|o| &o.stats),
                scene: Some(scene),
                result,
            },
        );
    }

    /// Runs the attempt. `callback` receives every optimizer iteration.
    pub fn optimize(&self, callback: Option<&mut dyn FnMut(&IterationData)>) -> CalibrationOutcome {
        let scene = self.scene_validity();
        if !scene.is_valid() {
            for failure in &scene.failures {
                warn!("scene invalid: {failure}");
            }
            self.dump(&scene, None, None);
            return CalibrationOutcome::new(CalibrationStatus::SceneInvalid, scene);
        }

        let mut optimizer = Optimizer::new(&self.depth.vertices, &self.yuy, &self.params.optimizer);
        let optimization = match optimizer.optimize(&self.start, callback) {
            Ok(o) => o,
            Err(e) => {
                error!("optimization failed: {e}");
                self.dump(&scene, None, None);
                let mut out = CalibrationOutcome::new(CalibrationStatus::Failed, scene);
                out.error = Some(e.to_string());
                return out;
            }
        };
        info!("{}", optimization.stats.report());

        if optimization.not_necessary() {
            info!("calibration not needed: the starting calibration is already optimal");
            self.dump(&scene, Some(&optimization), None);
            let mut out = CalibrationOutcome::new(CalibrationStatus::NotNeeded, scene);
            out.optimization = Some(optimization);
            return out;
        }

        let result = match self.check_results(&optimization.calib, &scene) {
            Ok(r) => r,
            Err(e) => {
                error!("result validation failed: {e}");
                self.dump(&scene, Some(&optimization), None);
                let mut out = CalibrationOutcome::new(CalibrationStatus::Failed, scene);
                out.optimization = Some(optimization);
                out.error = Some(e.to_string());
                return out;
            }
        };
        self.dump(&scene, Some(&optimization), Some(&result));

        let status = if result.valid {
            CalibrationStatus::Successful
        } else {
            if let Some(failure) = &result.failure {
                warn!("bad result: {failure}");
            }
            CalibrationStatus::BadResult
        };
        let mut out = CalibrationOutcome::new(status, scene);
        if result.valid {
            let (intrinsics, extrinsics) = result.calib.to_intrinsics_extrinsics();
            out.raw_rgb_intrinsics = Some(intrinsics.with_focal_scaled(self.thermal_scale));
            out.rgb_intrinsics = Some(intrinsics);
            out.extrinsics = Some(extrinsics);
            out.dsm = result.dsm.clone();
        }
        info!("calibration status: {status}");
        out.optimization = Some(optimization);
        out.result = Some(result);
        out
    }
}
