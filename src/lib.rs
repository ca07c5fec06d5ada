//! Depth-to-RGB Auto-Calibration Library
//!
//! Target-less refinement of the calibration between a depth sensor and an
//! RGB sensor on one camera module, from the live frames alone:
//! - Depth, IR and color frame preprocessing into edge fields and a 3D
//!   edge-vertex set
//! - An alignment cost with analytic gradients over rotation, translation
//!   and the RGB pinhole intrinsics
//! - A backtracking gradient optimizer
//! - Scene and result validity gates, including a pre-trained SVM
//! - Conversion of a depth focal correction into the depth sensor's DSM
//!   mirror-correction registers
//!
//! One attempt is one [`DepthToRgbCalibration`]; it is synchronous and owns
//! all of its frame data.

pub mod calibration;
pub mod cost;
pub mod diagnostics;
pub mod dsm;
pub mod engine;
pub mod frame;
pub mod geometry;
pub mod linalg;
pub mod optimization;
pub mod params;
pub mod preprocess;
pub mod validity;

// Re-export commonly used types
pub use calibration::{
    angles_from_rotation, rotation_from_angles, Calib, CalibrationError, DistortionModel, Extrinsics,
    Intrinsics,
};

pub use engine::{CalibrationInputs, CalibrationOutcome, CalibrationStatus, DepthToRgbCalibration, DsmInputs};

pub use optimization::{IterationData, OptimizationOutcome, Optimizer};
pub use params::AlgoParams;
pub use validity::{SceneValidity, SvmModel};
