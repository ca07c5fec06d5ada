//! Decision features fed to the result classifier.

use serde::{Deserialize, Serialize};

pub const N_FEATURES: usize = 10;

/// Cap applied to both movement features.
const MAX_MOVEMENT_FEATURE: f64 = 100.0;
/// Keeps the max/min ratios finite when a bin is empty.
const RATIO_EPS: f64 = 1e-3;

/// Raw quantities collected over one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionParams {
    pub distribution_per_section_depth: Vec<f64>,
    pub distribution_per_section_rgb: Vec<f64>,
    /// Depth edge weight per canonical direction (0°, 45°, 90°, 135°).
    pub edge_weights_per_dir: [f64; 4],
    pub initial_cost: f64,
    pub new_cost: f64,
    pub xy_movement: f64,
    pub xy_movement_from_origin: f64,
    /// New minus initial cost, per depth section.
    pub improvement_per_section: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionFeatures {
    pub max_over_min_depth: f64,
    pub max_over_min_rgb: f64,
    /// 0° against 90°.
    pub max_over_min_perp: f64,
    /// 45° against 135°.
    pub max_over_min_diag: f64,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub xy_movement: f64,
    pub xy_movement_from_origin: f64,
    pub positive_improvement_sum: f64,
    pub negative_improvement_sum: f64,
}

impl DecisionFeatures {
    /// Classifier input order.
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.max_over_min_depth,
            self.max_over_min_rgb,
            self.max_over_min_perp,
            self.max_over_min_diag,
            self.initial_cost,
            self.final_cost,
            self.xy_movement,
            self.xy_movement_from_origin,
            self.positive_improvement_sum,
            self.negative_improvement_sum,
        ]
    }
}

fn max_over_min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    max / (min + RATIO_EPS)
}

pub fn extract_features(params: &DecisionParams) -> DecisionFeatures {
    let dirs = &params.edge_weights_per_dir;
    let (positive, negative) = params
        .improvement_per_section
        .iter()
        .fold((0.0, 0.0), |(pos, neg), &v| if v > 0.0 { (pos + v, neg) } else { (pos, neg + v) });

    DecisionFeatures {
        max_over_min_depth: max_over_min(&params.distribution_per_section_depth),
        max_over_min_rgb: max_over_min(&params.distribution_per_section_rgb),
        max_over_min_perp: max_over_min(&[dirs[0], dirs[2]]),
        max_over_min_diag: max_over_min(&[dirs[1], dirs[3]]),
        initial_cost: params.initial_cost,
        final_cost: params.new_cost,
        xy_movement: params.xy_movement.min(MAX_MOVEMENT_FEATURE),
        xy_movement_from_origin: params.xy_movement_from_origin.min(MAX_MOVEMENT_FEATURE),
        positive_improvement_sum: positive,
        negative_improvement_sum: negative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_extract_features() {
        let params = DecisionParams {
            distribution_per_section_depth: vec![980.0, 780.0, 1023.0, 816.0],
            distribution_per_section_rgb: vec![3.0, 2.0, 4.0, 2.5],
            edge_weights_per_dir: [636.0, 898.0, 1318.0, 747.0],
            initial_cost: 15608.0,
            new_cost: 16772.0,
            xy_movement: 2.376,
            xy_movement_from_origin: 250.0,
            improvement_per_section: vec![-4.4, 828.9, 1424.0, 2536.4],
        };
        let f = extract_features(&params);
        assert_relative_eq!(f.max_over_min_depth, 1023.0 / 780.001, epsilon = 1e-12);
        assert_relative_eq!(f.max_over_min_rgb, 4.0 / 2.001, epsilon = 1e-12);
        assert_relative_eq!(f.max_over_min_perp, 1318.0 / 636.001, epsilon = 1e-12);
        assert_relative_eq!(f.max_over_min_diag, 898.0 / 747.001, epsilon = 1e-12);
        assert_relative_eq!(f.xy_movement, 2.376);
        assert_relative_eq!(f.xy_movement_from_origin, 100.0);
        assert_relative_eq!(f.positive_improvement_sum, 828.9 + 1424.0 + 2536.4, epsilon = 1e-9);
        assert_relative_eq!(f.negative_improvement_sum, -4.4);
        assert_eq!(f.to_array()[5], 16772.0);
    }

    #[test]
    fn test_empty_inputs_are_finite() {
        let f = extract_features(&DecisionParams::default());
        assert!(f.to_array().iter().all(|v| v.is_finite()));
    }
}
