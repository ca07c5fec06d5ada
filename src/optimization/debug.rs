//! Per-iteration snapshots and run statistics of the optimizer.

use crate::calibration::{Calib, N_PARAMS};
use serde::{Deserialize, Serialize};

/// Snapshot handed to the per-iteration callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationData {
    pub iteration: usize,
    /// Calib at the start of the iteration.
    pub calib: Calib,
    /// Cost at `calib`.
    pub cost: f64,
    pub gradient: Calib,
    /// Step size the line search ended with.
    pub step_size: f64,
    pub back_tracks: usize,
    /// Whether the line search moved the calib.
    pub accepted: bool,
}

/// Summary of one optimizer run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationStats {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Cost at the start of each iteration.
    pub cost_history: Vec<f64>,
    pub step_history: Vec<f64>,
    /// Calib parameters at the start of each iteration.
    pub parameter_history: Vec<[f64; N_PARAMS]>,
    pub convergence_reason: String,
    pub optimization_time_ms: f64,
    pub initial_parameters: Vec<f64>,
    pub final_parameters: Vec<f64>,
}

impl OptimizationStats {
    pub fn record(&mut self, data: &IterationData) {
        self.cost_history.push(data.cost);
        self.step_history.push(data.step_size);
        self.parameter_history.push(data.calib.params());
    }

    /// Human-readable summary for logs.
    pub fn report(&self) -> String {
        format!(
            "Optimization Statistics:\n  \
             Iterations: {}\n  \
             Initial Cost: {:.6e}\n  \
             Final Cost: {:.6e}\n  \
             Optimization Time: {:.2} ms\n  \
             Convergence: {}",
            self.iterations,
            self.initial_cost,
            self.final_cost,
            self.optimization_time_ms,
            self.convergence_reason
        )
    }
}
