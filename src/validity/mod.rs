//! Gates around the optimizer.
//!
//! [`is_scene_valid`] decides, before optimizing, whether the frames carry
//! enough well-spread structure and no motion. [`is_valid_results`] decides,
//! afterwards, whether the refined calibration can be trusted. Both are
//! pure functions of their inputs and report rejections as values.

pub mod features;
pub mod result;
pub mod scene;
pub mod svm;

pub use features::{extract_features, DecisionFeatures, DecisionParams, N_FEATURES};
pub use result::{is_valid_results, xy_movement, ResultInputs, ResultValidity};
pub use scene::{is_scene_valid, SceneInputs, SceneStatistics, SceneValidity};
pub use svm::SvmModel;

use serde::Serialize;
use std::fmt;

/// One failed check, with the value that failed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckFailure {
    pub name: &'static str,
    pub observed: f64,
    pub threshold: f64,
}

impl CheckFailure {
    pub fn new(name: &'static str, observed: f64, threshold: f64) -> Self {
        Self {
            name,
            observed,
            threshold,
        }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: observed {:.6}, threshold {:.6}",
            self.name, self.observed, self.threshold
        )
    }
}
