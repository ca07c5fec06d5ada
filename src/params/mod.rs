//! Tuned thresholds of one calibration attempt.
//!
//! Every group carries `#[serde(default)]`, so a config file only lists the
//! values it changes. Unknown keys are rejected.
//!
//! ```yaml
//! preprocess:
//!   grad_z_threshold: 30.0
//! optimizer:
//!   max_optimization_iters: 20
//! ```

use crate::calibration::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Depth resolution that gets the lower default IR gradient threshold.
pub const XGA: (usize, usize) = (1024, 768);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessParams {
    /// Decay of the edge propagation that builds the IDT field.
    pub gamma: f64,
    /// Weight of the raw edges in the IDT blend.
    pub alpha: f64,
    /// IR edge threshold; `None` picks 1.5 at XGA depth resolution and 3.5
    /// otherwise.
    pub grad_ir_threshold: Option<f64>,
    pub grad_z_threshold: f64,
    pub grad_z_min: f64,
    pub grad_z_max: f64,
    /// Fraction of the strongest luminance edge above which a pixel counts as
    /// an edge pixel.
    pub edge_thresh4_logic_lum: f64,
    pub zero_gradient_margin: bool,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            gamma: 0.98,
            alpha: 1.0 / 3.0,
            grad_ir_threshold: None,
            grad_z_threshold: 25.0,
            grad_z_min: 25.0,
            grad_z_max: 1000.0,
            edge_thresh4_logic_lum: 0.1,
            zero_gradient_margin: true,
        }
    }
}

impl PreprocessParams {
    pub fn grad_ir_threshold_for(&self, depth_width: usize, depth_height: usize) -> f64 {
        match self.grad_ir_threshold {
            Some(th) => th,
            None if (depth_width, depth_height) == XGA => 1.5,
            None => 3.5,
        }
    }
}

/// Per-parameter scale applied to the gradient before the line search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizationParams {
    /// `[alpha, beta, gamma]`
    pub rot: [f64; 3],
    pub trans: [f64; 3],
    /// `[fx, fy, ppx, ppy]`
    pub k: [f64; 4],
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            rot: [1508.9478, 1604.943, 649.38434],
            trans: [0.91300839, 0.91698289, 0.43305457],
            k: [0.35417202, 0.26570305, 1.0017655, 1.0066491],
        }
    }
}

impl NormalizationParams {
    /// In [`crate::calibration::Calib`] parameter order.
    pub fn as_params(&self) -> [f64; 10] {
        [
            self.rot[0],
            self.rot[1],
            self.rot[2],
            self.trans[0],
            self.trans[1],
            self.trans[2],
            self.k[0],
            self.k[1],
            self.k[2],
            self.k[3],
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerParams {
    pub max_step_size: f64,
    pub min_step_size: f64,
    pub control_param: f64,
    pub max_back_track_iters: usize,
    pub max_optimization_iters: usize,
    pub min_rgb_mat_delta: f64,
    pub min_cost_delta: f64,
    pub tau: f64,
    pub normalize_mat: NormalizationParams,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            max_step_size: 1.0,
            min_step_size: 1e-5,
            control_param: 0.5,
            max_back_track_iters: 50,
            max_optimization_iters: 50,
            min_rgb_mat_delta: 1e-5,
            min_cost_delta: 1.0,
            tau: 0.5,
            normalize_mat: NormalizationParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneParams {
    pub num_of_sections_x: usize,
    pub num_of_sections_y: usize,
    pub edge_distribution_min_max_ratio: f64,
    pub min_weighted_edge_per_section_depth: f64,
    pub min_weighted_edge_per_section_rgb: f64,
    pub grad_dir_ratio: f64,
    pub grad_dir_ratio_prep: f64,
    pub dilation_size: usize,
    pub move_thresh_pix_val: f64,
    /// Moving-pixel budget as a fraction of the RGB frame area.
    pub move_thresh_pix_ratio: f64,
    pub move_last_success_thresh_pix_val: f64,
    pub move_last_success_thresh_pix_num: f64,
    pub edges_per_direction_ratio_th: f64,
    pub dir_std_th: [f64; 4],
    pub minimal_full_directions: usize,
    pub pix_per_section_depth_th: f64,
    pub pix_per_section_rgb_th: f64,
    pub min_section_with_enough_edges: usize,
    pub saturation_value: u8,
    pub saturation_ratio_th: f64,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            num_of_sections_x: 2,
            num_of_sections_y: 2,
            edge_distribution_min_max_ratio: 0.005,
            min_weighted_edge_per_section_depth: 50.0,
            min_weighted_edge_per_section_rgb: 0.05,
            grad_dir_ratio: 10.0,
            grad_dir_ratio_prep: 1.5,
            dilation_size: 3,
            move_thresh_pix_val: 20.0,
            move_thresh_pix_ratio: 3e-5,
            move_last_success_thresh_pix_val: 25.0,
            move_last_success_thresh_pix_num: 100.0,
            edges_per_direction_ratio_th: 0.004,
            dir_std_th: [0.126; 4],
            minimal_full_directions: 2,
            pix_per_section_depth_th: 0.002,
            pix_per_section_rgb_th: 0.002,
            min_section_with_enough_edges: 2,
            saturation_value: 230,
            saturation_ratio_th: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultParams {
    /// Pixel-movement cap indexed by the caller's iteration number; the last
    /// entry applies to every later iteration.
    pub max_xy_movement_per_calibration: Vec<f64>,
    pub max_xy_movement_from_origin: f64,
    /// JSON classifier document; `None` uses the embedded linear model.
    pub svm_model: Option<String>,
}

impl Default for ResultParams {
    fn default() -> Self {
        Self {
            max_xy_movement_per_calibration: vec![10.0, 2.0, 2.0],
            max_xy_movement_from_origin: 20.0,
            svm_model: None,
        }
    }
}

impl ResultParams {
    pub fn max_movement_for(&self, iteration_number: usize) -> f64 {
        let caps = &self.max_xy_movement_per_calibration;
        match caps.len() {
            0 => f64::INFINITY,
            n => caps[iteration_number.min(n - 1)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DsmBounds {
    pub max_scale_deviation: f64,
    pub max_offset_deg: f64,
}

impl Default for DsmBounds {
    fn default() -> Self {
        Self {
            max_scale_deviation: 0.015,
            max_offset_deg: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlgoParams {
    pub preprocess: PreprocessParams,
    pub optimizer: OptimizerParams,
    pub scene: SceneParams,
    pub result: ResultParams,
    pub dsm: DsmBounds,
}

impl AlgoParams {
    /// Loads params from a `.json` file, or YAML for any other extension.
    pub fn load(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let is_json = Path::new(path)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(serde_yaml::from_str(&contents)?)
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, CalibrationError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let o = &self.optimizer;
        if !(o.tau > 0.0 && o.tau < 1.0) {
            return Err(CalibrationError::InvalidParams(format!(
                "tau must lie in (0, 1), got {}",
                o.tau
            )));
        }
        if o.max_step_size <= 0.0 || o.min_step_size < 0.0 {
            return Err(CalibrationError::InvalidParams(
                "step sizes must be positive".to_string(),
            ));
        }
        if self.scene.num_of_sections_x == 0 || self.scene.num_of_sections_y == 0 {
            return Err(CalibrationError::InvalidParams(
                "section grid must have at least one section".to_string(),
            ));
        }
        if self.preprocess.grad_z_max <= self.preprocess.grad_z_min {
            return Err(CalibrationError::InvalidParams(
                "grad_z_max must exceed grad_z_min".to_string(),
            ));
        }
        Ok(())
    }
}
