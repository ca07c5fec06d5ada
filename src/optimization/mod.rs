//! Iterative refinement of the RGB calibration.
//!
//! Each iteration evaluates the cost and its analytic gradient, normalizes
//! the gradient per parameter group, and runs a backtracking line search
//! along it. The cost is an alignment score, so the search looks for an
//! increase: a step is accepted only if it raises the cost by at least
//! `step · |t|`, where `t` is the directional term scaled by
//! `control_param`. A rejected search leaves the calib unchanged.
//!
//! The loop stops when the calib stops moving, when the cost stops
//! changing, or after `max_optimization_iters`. Stopping before the first
//! counted iteration means the calibration was not necessary.

pub mod debug;

pub use debug::{IterationData, OptimizationStats};

use crate::calibration::{Calib, CalibrationError};
use crate::cost::{calc_cost, calc_cost_and_gradients};
use crate::params::OptimizerParams;
use crate::preprocess::{EdgeVertex, YuyFrameData};
use log::{debug, info, warn};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    Initial,
    Iterating,
    /// Stopped on the calib-delta or cost-delta criterion.
    Converged,
    MaxIterations,
    /// The cost or its gradient could not be evaluated.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub calib: Calib,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Counted iterations; 0 means the calibration was not necessary.
    pub iterations: usize,
    pub state: OptimizerState,
    pub stats: OptimizationStats,
}

impl OptimizationOutcome {
    pub fn not_necessary(&self) -> bool {
        self.iterations == 0
    }
}

struct LineSearch {
    calib: Calib,
    cost: f64,
    step_size: f64,
    back_tracks: usize,
    accepted: bool,
}

pub struct Optimizer<'a> {
    vertices: &'a [EdgeVertex],
    yuy: &'a YuyFrameData,
    params: &'a OptimizerParams,
    state: OptimizerState,
}

impl<'a> Optimizer<'a> {
    pub fn new(vertices: &'a [EdgeVertex], yuy: &'a YuyFrameData, params: &'a OptimizerParams) -> Self {
        Self {
            vertices,
            yuy,
            params,
            state: OptimizerState::Initial,
        }
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    fn invalid(&mut self, e: CalibrationError) -> CalibrationError {
        warn!("optimizer stopped: {e}");
        self.state = OptimizerState::Invalid;
        e
    }

    /// Cost of a line-search candidate; a candidate that loses every vertex
    /// is never better than the current calib.
    fn candidate_cost(&self, calib: &Calib) -> Result<f64, CalibrationError> {
        match calc_cost(self.vertices, self.yuy, calib) {
            Ok(cost) => Ok(cost),
            Err(CalibrationError::NoValidVertices(_)) => Ok(f64::NEG_INFINITY),
            Err(e) => Err(e),
        }
    }

    fn line_search(&self, curr: &Calib, curr_cost: f64, gradient: &Calib) -> Result<LineSearch, CalibrationError> {
        let p = self.params;
        let normalize_mat = curr.with_params(&p.normalize_mat.as_params());
        let normalized = &gradient.normalize() / &normalize_mat;
        let normalized_norm = normalized.norm();
        let unit = normalized.normalize();
        let unit_norm = unit.norm();

        let rejected = |step_size: f64, back_tracks: usize| LineSearch {
            calib: curr.clone(),
            cost: curr_cost,
            step_size,
            back_tracks,
            accepted: false,
        };
        if unit_norm == 0.0 {
            return Ok(rejected(0.0, 0));
        }

        let mut step_size = p.max_step_size * normalized_norm / unit_norm;
        let t: f64 = normalized
            .params()
            .iter()
            .zip(unit.params().iter())
            .filter(|(_, &u)| u != 0.0)
            .map(|(&n, &u)| n * -p.control_param / u)
            .sum();

        let mut candidate = curr + &(&unit * step_size);
        let mut candidate_cost = self.candidate_cost(&candidate)?;
        let mut back_tracks = 0usize;
        while curr_cost - candidate_cost >= step_size * t
            && step_size.abs() > p.min_step_size
            && back_tracks < p.max_back_track_iters
        {
            back_tracks += 1;
            step_size *= p.tau;
            candidate = curr + &(&unit * step_size);
            candidate_cost = self.candidate_cost(&candidate)?;
            debug!("    back tracking line search: step {step_size:.3e} cost {candidate_cost:.6}");
        }

        if curr_cost - candidate_cost >= step_size * t {
            return Ok(rejected(step_size, back_tracks));
        }
        Ok(LineSearch {
            calib: candidate,
            cost: candidate_cost,
            step_size,
            back_tracks,
            accepted: true,
        })
    }

    /// Runs the refinement from `start`.
    ///
    /// `callback` receives one [`IterationData`] per loop pass, including the
    /// pass that stops the loop.
    ///
    /// # Errors
    ///
    /// Numerical failures of the cost: no vertex projects inside the RGB frame
    /// at the current calib, or a non-finite cost or gradient.
    pub fn optimize(
        &mut self,
        start: &Calib,
        mut callback: Option<&mut dyn FnMut(&IterationData)>,
    ) -> Result<OptimizationOutcome, CalibrationError> {
        let timer = Instant::now();
        let p = self.params;
        let initial = calc_cost_and_gradients(self.vertices, self.yuy, start).map_err(|e| self.invalid(e))?;
        let mut stats = OptimizationStats {
            initial_cost: initial.cost,
            initial_parameters: start.params().to_vec(),
            ..OptimizationStats::default()
        };

        self.state = OptimizerState::Iterating;
        let mut curr = start.clone();
        let mut curr_cost = initial.cost;
        let mut n_iterations = 0usize;
        let reason;

        loop {
            let eval = calc_cost_and_gradients(self.vertices, self.yuy, &curr).map_err(|e| self.invalid(e))?;
            curr_cost = eval.cost;
            debug!("{n_iterations}: cost = {curr_cost:.9}");

            let search = self
                .line_search(&curr, curr_cost, &eval.gradient)
                .map_err(|e| self.invalid(e))?;
            let data = IterationData {
                iteration: n_iterations,
                calib: curr.clone(),
                cost: curr_cost,
                gradient: eval.gradient,
                step_size: search.step_size,
                back_tracks: search.back_tracks,
                accepted: search.accepted,
            };
            stats.record(&data);
            if let Some(cb) = callback.as_mut() {
                cb(&data);
            }

            let delta_norm = (&search.calib - &curr).norm();
            let cost_delta = search.cost - curr_cost;
            curr = search.calib;
            curr_cost = search.cost;

            if delta_norm < p.min_rgb_mat_delta {
                debug!("... norm(new - curr) {delta_norm:.3e} < {} (min_rgb_mat_delta) --> stopping", p.min_rgb_mat_delta);
                reason = "calib delta below minimum";
                self.state = OptimizerState::Converged;
                break;
            }
            debug!("    delta = {cost_delta:.6}");
            if cost_delta.abs() < p.min_cost_delta {
                debug!("... |delta| < {} --> stopping", p.min_cost_delta);
                reason = "cost delta below minimum";
                self.state = OptimizerState::Converged;
                break;
            }
            n_iterations += 1;
            if n_iterations >= p.max_optimization_iters {
                debug!("... exceeding max iterations --> stopping");
                reason = "maximum iterations reached";
                self.state = OptimizerState::MaxIterations;
                break;
            }
        }

        if n_iterations == 0 {
            info!("Calibration not necessary; nothing done");
        } else {
            info!(
                "Calibration finished after {n_iterations} iterations; original cost = {:.6} optimized cost = {curr_cost:.6}",
                initial.cost
            );
        }

        stats.iterations = n_iterations;
        stats.final_cost = curr_cost;
        stats.final_parameters = curr.params().to_vec();
        stats.convergence_reason = reason.to_string();
        stats.optimization_time_ms = timer.elapsed().as_secs_f64() * 1000.0;

        Ok(OptimizationOutcome {
            calib: curr,
            initial_cost: initial.cost,
            final_cost: curr_cost,
            iterations: n_iterations,
            state: self.state,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{Extrinsics, Intrinsics};
    use crate::cost::test_support::{linear_idt, vertex};
    use nalgebra::Vector3;

    fn start() -> Calib {
        Calib::from_intrinsics_extrinsics(
            &Intrinsics::pinhole(320, 240, 300.0, 300.0, 160.0, 120.0),
            &Extrinsics::default(),
        )
    }

    fn vertices() -> Vec<EdgeVertex> {
        vec![
            vertex(Vector3::new(-200.0, -150.0, 1500.0), 200.0, 0),
            vertex(Vector3::new(250.0, 100.0, 1800.0), 200.0, 3),
            vertex(Vector3::new(30.0, -60.0, 1200.0), 200.0, 2),
        ]
    }

    #[test]
    fn test_flat_field_is_not_necessary() {
        let yuy = linear_idt(320, 240, 0.0, 0.0, 50.0);
        let vs = vertices();
        let params = OptimizerParams::default();
        let mut opt = Optimizer::new(&vs, &yuy, &params);
        let outcome = opt.optimize(&start(), None).unwrap();
        assert!(outcome.not_necessary());
        assert_eq!(outcome.state, OptimizerState::Converged);
        assert_eq!(outcome.calib.params(), start().params());
    }

    #[test]
    fn test_unprojectable_vertices_leave_optimizer_invalid() {
        let yuy = linear_idt(320, 240, 0.5, 0.3, 10.0);
        let behind = vec![
            vertex(Vector3::new(-200.0, -150.0, -1500.0), 200.0, 0),
            vertex(Vector3::new(250.0, 100.0, -1800.0), 200.0, 3),
        ];
        let params = OptimizerParams::default();
        let mut opt = Optimizer::new(&behind, &yuy, &params);
        assert_eq!(opt.state(), OptimizerState::Initial);
        let result = opt.optimize(&start(), None);
        assert!(matches!(result, Err(CalibrationError::NoValidVertices(_))));
        assert_eq!(opt.state(), OptimizerState::Invalid);
    }

    #[test]
    fn test_vertices_outside_the_frame_leave_optimizer_invalid() {
        let yuy = linear_idt(320, 240, 0.5, 0.3, 10.0);
        let vs = vertices();
        let params = OptimizerParams::default();
        let mut p = start().params();
        p[8] += 5000.0;
        let mut opt = Optimizer::new(&vs, &yuy, &params);
        assert!(opt.optimize(&start().with_params(&p), None).is_err());
        assert_eq!(opt.state(), OptimizerState::Invalid);
    }

    #[test]
    fn test_accepted_steps_never_lower_the_cost() {
        let yuy = linear_idt(320, 240, 0.5, 0.3, 10.0);
        let vs = vertices();
        let params = OptimizerParams {
            max_optimization_iters: 5,
            ..OptimizerParams::default()
        };
        let mut opt = Optimizer::new(&vs, &yuy, &params);
        let mut seen = Vec::new();
        let mut cb = |d: &IterationData| seen.push((d.cost, d.accepted));
        let outcome = opt.optimize(&start(), Some(&mut cb)).unwrap();

        assert!(!seen.is_empty());
        for pair in seen.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
        }
        assert!(outcome.final_cost >= outcome.initial_cost);
        assert_eq!(outcome.stats.cost_history.len(), seen.len());
    }
}
