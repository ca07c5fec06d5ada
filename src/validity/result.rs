//! Result validity: movement clipping, distance from the factory
//! calibration, per-section regression, the classifier and the DSM bounds,
//! checked in that order.

use super::features::{extract_features, DecisionFeatures, DecisionParams};
use super::scene::SceneStatistics;
use super::svm::SvmModel;
use super::CheckFailure;
use crate::calibration::{Calib, CalibrationError};
use crate::cost::{calc_cost, cost_per_section, project_vertices};
use crate::dsm::{k_to_dsm, validate_dsm_params, DsmConversion, KToDsmInputs};
use crate::params::AlgoParams;
use crate::preprocess::{EdgeVertex, YuyFrameData};
use log::{debug, info, warn};
use serde::Serialize;

const CLIP_REFINEMENTS: usize = 8;
const CLIP_TOLERANCE: f64 = 1e-9;

/// Mean pixel displacement of the vertices between two calibrations.
///
/// Every vertex in front of both cameras counts, including those that land
/// outside the RGB frame.
///
/// # Errors
///
/// [`CalibrationError::NoValidVertices`] when no vertex projects under both
/// calibrations.
pub fn xy_movement(vertices: &[EdgeVertex], from: &Calib, to: &Calib) -> Result<f64, CalibrationError> {
    let (sum, n) = project_vertices(vertices, from)
        .into_iter()
        .zip(project_vertices(vertices, to))
        .filter_map(|(a, b)| Some((a?, b?)))
        .fold((0.0, 0usize), |(sum, n), (a, b)| (sum + (b - a).norm(), n + 1));
    if n == 0 {
        return Err(CalibrationError::NoValidVertices(
            "no depth edge projects under both calibrations; movement is undefined".into(),
        ));
    }
    Ok(sum / n as f64)
}

/// Scales the `original → new` delta so that the movement equals
/// `max_movement`. Rotation makes movement slightly non-linear in the scale,
/// so the scale is refined a few times.
fn clip_movement(
    vertices: &[EdgeVertex],
    original: &Calib,
    new: &Calib,
    movement: f64,
    max_movement: f64,
) -> Result<Calib, CalibrationError> {
    let delta = new - original;
    let mut scale = max_movement / movement;
    let mut clipped = original + &(&delta * scale);
    for _ in 0..CLIP_REFINEMENTS {
        let m = xy_movement(vertices, original, &clipped)?;
        if m <= 0.0 || (m - max_movement).abs() <= CLIP_TOLERANCE * max_movement {
            break;
        }
        scale *= max_movement / m;
        clipped = original + &(&delta * scale);
    }
    Ok(clipped)
}

/// DSM inputs; the depth intrinsics change is derived from the RGB focal
/// change of the refined calibration.
pub struct DsmCheckInputs<'a> {
    pub depth_intrinsics: &'a crate::calibration::Intrinsics,
    pub relevant_pixels: &'a crate::frame::Mask,
    pub previous: &'a crate::dsm::DsmParams,
    pub registers: &'a crate::dsm::AlgoCalibrationRegisters,
    pub info: &'a crate::dsm::AlgoCalibrationInfo,
}

pub struct ResultInputs<'a> {
    pub vertices: &'a [EdgeVertex],
    pub yuy: &'a YuyFrameData,
    pub original: &'a Calib,
    pub new: &'a Calib,
    pub factory: Option<&'a Calib>,
    /// Caller's count of earlier calibrations; selects the movement cap.
    pub iteration_number: usize,
    pub num_sections: usize,
    pub scene: &'a SceneStatistics,
    pub svm: &'a SvmModel,
    pub dsm: Option<DsmCheckInputs<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultValidity {
    pub valid: bool,
    /// First failed check.
    pub failure: Option<CheckFailure>,
    /// Refined calibration after movement clipping.
    pub calib: Calib,
    pub clipped: bool,
    pub xy_movement: f64,
    pub xy_movement_from_origin: f64,
    pub initial_cost: f64,
    pub new_cost: f64,
    pub improvement_per_section: Vec<f64>,
    pub features: DecisionFeatures,
    pub svm_score: f64,
    pub dsm: Option<DsmConversion>,
}

/// Checks a refined calibration.
///
/// # Errors
///
/// Numerical failures only: the costs cannot be evaluated, or the DSM
/// conversion fails. Rejections are reported in the returned value.
pub fn is_valid_results(inputs: &ResultInputs<'_>, params: &AlgoParams) -> Result<ResultValidity, CalibrationError> {
    let ResultInputs {
        vertices,
        yuy,
        original,
        new,
        factory,
        ..
    } = *inputs;

    let max_movement = params.result.max_movement_for(inputs.iteration_number);
    let raw_movement = xy_movement(vertices, original, new)?;
    let (calib, clipped) = if raw_movement > max_movement {
        info!("xy movement {raw_movement:.3} exceeds {max_movement:.3} pixels; clipping");
        (clip_movement(vertices, original, new, raw_movement, max_movement)?, true)
    } else {
        (new.clone(), false)
    };
    let movement = xy_movement(vertices, original, &calib)?;
    let from_origin = xy_movement(vertices, factory.unwrap_or(original), &calib)?;

    let initial_cost = calc_cost(vertices, yuy, original)?;
    let new_cost = calc_cost(vertices, yuy, &calib)?;
    let before = cost_per_section(vertices, yuy, original, inputs.num_sections);
    let after = cost_per_section(vertices, yuy, &calib, inputs.num_sections);
    let improvement_per_section: Vec<f64> = after.iter().zip(&before).map(|(a, b)| a - b).collect();
    debug!("cost per section before {before:?} after {after:?}");

    let features = extract_features(&DecisionParams {
        distribution_per_section_depth: inputs.scene.depth_section_weights.clone(),
        distribution_per_section_rgb: inputs.scene.rgb_section_weights.clone(),
        edge_weights_per_dir: inputs.scene.weights_per_direction,
        initial_cost,
        new_cost,
        xy_movement: movement,
        xy_movement_from_origin: from_origin,
        improvement_per_section: improvement_per_section.clone(),
    });
    let svm_score = inputs.svm.score(&features.to_array());
    debug!("decision features {:?} -> svm score {svm_score:.6}", features.to_array());

    let mut out = ResultValidity {
        valid: false,
        failure: None,
        calib,
        clipped,
        xy_movement: movement,
        xy_movement_from_origin: from_origin,
        initial_cost,
        new_cost,
        improvement_per_section,
        features,
        svm_score,
        dsm: None,
    };

    if factory.is_some() && from_origin > params.result.max_xy_movement_from_origin {
        warn!(
            "movement_from_origin: {from_origin:.3} pixels from the factory calibration, limit {}",
            params.result.max_xy_movement_from_origin
        );
        out.failure = Some(CheckFailure::new(
            "movement_from_origin",
            from_origin,
            params.result.max_xy_movement_from_origin,
        ));
        return Ok(out);
    }

    let worst = out.improvement_per_section.iter().copied().fold(f64::INFINITY, f64::min);
    if worst < 0.0 {
        warn!("cost_per_section: a section lost {:.6} of cost", -worst);
        out.failure = Some(CheckFailure::new("cost_per_section", worst, 0.0));
        return Ok(out);
    }

    if svm_score < 0.0 {
        warn!("svm: classifier rejected the result with score {svm_score:.6}");
        out.failure = Some(CheckFailure::new("svm", svm_score, 0.0));
        return Ok(out);
    }

    if let Some(dsm) = &inputs.dsm {
        let ratio_x = out.calib.fx / original.fx;
        let ratio_y = out.calib.fy / original.fy;
        let mut new_depth = dsm.depth_intrinsics.clone();
        new_depth.fx *= ratio_x;
        new_depth.fy *= ratio_y;
        let conversion = k_to_dsm(&KToDsmInputs {
            old_intrinsics: dsm.depth_intrinsics,
            new_intrinsics: &new_depth,
            relevant_pixels: dsm.relevant_pixels,
            previous: dsm.previous,
            registers: dsm.registers,
            info: dsm.info,
        })?;
        let failure = validate_dsm_params(
            &conversion.params,
            &conversion.factory_registers,
            dsm.info,
            &params.dsm,
        );
        out.dsm = Some(conversion);
        if failure.is_some() {
            out.failure = failure;
            return Ok(out);
        }
    }

    out.valid = true;
    Ok(out)
}
