//! Scene validity: motion, edge distribution, direction balance, spread and
//! IR saturation. Every sub-check runs; the scene is valid only when none
//! fails.

use super::CheckFailure;
use crate::calibration::Calib;
use crate::cost::{bilinear_interp, project_with_calib};
use crate::frame::{Direction, Plane};
use crate::geometry::SectionGrid;
use crate::params::AlgoParams;
use crate::preprocess::{count_changed_pixels, detect_movement, DepthFrameData, IrFrameData, YuyFrameData};
use log::{debug, warn};
use serde::Serialize;

/// Guards the direction ratios against empty bins.
const MIN_DIRECTION_WEIGHT: f64 = 1e-3;
const NO_OPPOSITE_RATIO: f64 = 1e6;

pub struct SceneInputs<'a> {
    pub depth: &'a DepthFrameData,
    pub ir: &'a IrFrameData,
    pub yuy: &'a YuyFrameData,
    /// Starting calibration; decides which depth edges can be seen in RGB.
    pub calib: &'a Calib,
    /// Luminance of the last successfully calibrated scene.
    pub last_success_lum: Option<&'a Plane<u8>>,
}

/// Quantities measured while checking the scene; they feed the result
/// classifier later.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneStatistics {
    pub depth_section_weights: Vec<f64>,
    pub rgb_section_weights: Vec<f64>,
    pub weights_per_direction: [f64; 4],
    pub dir_ratio: f64,
    pub moving_pixels: usize,
    pub changed_from_last_success: Option<usize>,
    pub ir_saturation_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneValidity {
    pub failures: Vec<CheckFailure>,
    pub statistics: SceneStatistics,
}

impl SceneValidity {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.name == name)
    }
}

/// Depth edge weight per depth section, over the vertices that project
/// inside the RGB frame under `calib`.
fn depth_section_weights(depth: &DepthFrameData, yuy: &YuyFrameData, calib: &Calib) -> Vec<f64> {
    let mut sums = vec![0.0; depth.section_grid.count()];
    for v in &depth.vertices {
        let seen = project_with_calib(calib, &v.vertex).and_then(|uv| bilinear_interp(&yuy.idt, &uv));
        if seen.is_some() && v.section < sums.len() {
            sums[v.section] += v.weight;
        }
    }
    sums
}

fn rgb_section_weights(yuy: &YuyFrameData, grid: &SectionGrid) -> Vec<f64> {
    let mut sums = vec![0.0; grid.count()];
    for y in 0..yuy.idt.height() {
        for x in 0..yuy.idt.width() {
            let v = yuy.idt.at(x, y);
            if v > 0.0 {
                sums[grid.section_of(x, y)] += v;
            }
        }
    }
    sums
}

/// Min/max ratio first, then the per-section floor.
fn check_edge_distribution(
    name: &'static str,
    sums: &[f64],
    min_max_ratio: f64,
    min_per_section: f64,
) -> Option<CheckFailure> {
    let max = sums.iter().copied().fold(0.0, f64::max);
    let min = sums.iter().copied().fold(f64::INFINITY, f64::min);
    let ratio = if max > 0.0 { min / max } else { 0.0 };
    if ratio < min_max_ratio {
        warn!("{name}: edge distribution ratio ({min}/{max} = {ratio}) is too small; threshold = {min_max_ratio}");
        return Some(CheckFailure::new(name, ratio, min_max_ratio));
    }
    if min < min_per_section {
        warn!("{name}: weighted edge per section is too low: {sums:?}; threshold = {min_per_section}");
        return Some(CheckFailure::new(name, min, min_per_section));
    }
    None
}

fn weights_per_direction(depth: &DepthFrameData) -> [f64; 4] {
    let mut out = [0.0; 4];
    for v in &depth.vertices {
        out[v.direction.index()] += v.weight;
    }
    out
}

/// Returns the opposite-direction ratio and, when unbalanced, the failure.
fn check_direction_balance(weights: &[f64; 4], grad_dir_ratio: f64, grad_dir_ratio_prep: f64) -> (f64, Option<CheckFailure>) {
    const NAME: &str = "gradient_direction_balance";
    let (max_ix, max_val) = weights
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, w)| if w > best.1 { (i, w) } else { best });
    let ix_match = (max_ix + 2) % 4;
    let dir_ratio = if weights[ix_match] < MIN_DIRECTION_WEIGHT {
        NO_OPPOSITE_RATIO
    } else {
        max_val / weights[ix_match]
    };
    if dir_ratio <= grad_dir_ratio {
        return (dir_ratio, None);
    }

    let perp: Vec<f64> = (0..4)
        .filter(|&i| i != max_ix && i != ix_match)
        .map(|i| weights[i])
        .collect();
    let max_perp = perp.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_perp = perp.iter().copied().fold(f64::INFINITY, f64::min);
    let unbalanced = || {
        debug!("is_grad_dir_balanced: gradient direction is not balanced: {dir_ratio}; threshold is {grad_dir_ratio}");
        Some(CheckFailure::new(NAME, dir_ratio, grad_dir_ratio))
    };

    if max_val / max_perp > grad_dir_ratio_prep || min_perp < MIN_DIRECTION_WEIGHT {
        return (dir_ratio, unbalanced());
    }
    if max_perp / min_perp > grad_dir_ratio {
        return (dir_ratio, unbalanced());
    }
    (dir_ratio, None)
}

/// Directions holding enough edges that are spread along the edge line.
fn full_directions(depth: &DepthFrameData, ratio_th: f64, std_th: &[f64; 4]) -> usize {
    let total = depth.vertices.len();
    if total == 0 {
        return 0;
    }
    let diag = (depth.width() as f64).hypot(depth.height() as f64);
    Direction::ALL
        .iter()
        .filter(|dir| {
            let (dx, dy) = dir.offset();
            let len = f64::from(dx).hypot(f64::from(dy));
            let (ax, ay) = (-f64::from(dy) / len, f64::from(dx) / len);
            let along: Vec<f64> = depth
                .vertices
                .iter()
                .filter(|v| v.direction == **dir)
                .map(|v| v.subpixel.x * ax + v.subpixel.y * ay)
                .collect();
            if (along.len() as f64) / (total as f64) < ratio_th {
                return false;
            }
            let n = along.len() as f64;
            let mean = along.iter().sum::<f64>() / n;
            let std = (along.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n).sqrt();
            std / diag >= std_th[dir.index()]
        })
        .count()
}

/// Sections whose edge-pixel density reaches `ratio_th`.
fn sections_with_enough_edges(counts: &[usize], areas: &[usize], ratio_th: f64) -> usize {
    counts
        .iter()
        .zip(areas)
        .filter(|&(&c, &a)| a > 0 && c as f64 / a as f64 >= ratio_th)
        .count()
}

pub fn is_scene_valid(inputs: &SceneInputs<'_>, params: &AlgoParams) -> SceneValidity {
    let scene = &params.scene;
    let SceneInputs {
        depth,
        ir,
        yuy,
        calib,
        last_success_lum,
    } = *inputs;
    let mut failures = Vec::new();
    let mut stats = SceneStatistics::default();

    let movement = detect_movement(yuy, params.preprocess.edge_thresh4_logic_lum, scene);
    stats.moving_pixels = movement.moving_pixels;
    if movement.is_movement() {
        warn!(
            "movement_between_frames: {} pixels above threshold, allowed {}",
            movement.moving_pixels, movement.allowed_pixels
        );
        failures.push(CheckFailure::new(
            "movement_between_frames",
            movement.moving_pixels as f64,
            movement.allowed_pixels,
        ));
    }

    if let Some(last) = last_success_lum {
        if last.width() == yuy.lum.width() && last.height() == yuy.lum.height() {
            let changed = count_changed_pixels(last, &yuy.lum, scene.move_last_success_thresh_pix_val);
            stats.changed_from_last_success = Some(changed);
            if changed as f64 <= scene.move_last_success_thresh_pix_num {
                warn!(
                    "movement_from_last_success: only {changed} pixels changed, need more than {}",
                    scene.move_last_success_thresh_pix_num
                );
                failures.push(CheckFailure::new(
                    "movement_from_last_success",
                    changed as f64,
                    scene.move_last_success_thresh_pix_num,
                ));
            }
        } else {
            debug!("last successful frame has a different resolution; scene counts as changed");
        }
    }

    let rgb_grid = SectionGrid::new(
        yuy.width(),
        yuy.height(),
        scene.num_of_sections_x,
        scene.num_of_sections_y,
    );
    stats.depth_section_weights = depth_section_weights(depth, yuy, calib);
    stats.rgb_section_weights = rgb_section_weights(yuy, &rgb_grid);
    debug!("depth section weights {:?}", stats.depth_section_weights);
    debug!("rgb section weights {:?}", stats.rgb_section_weights);
    failures.extend(check_edge_distribution(
        "depth_edge_distribution",
        &stats.depth_section_weights,
        scene.edge_distribution_min_max_ratio,
        scene.min_weighted_edge_per_section_depth,
    ));
    failures.extend(check_edge_distribution(
        "rgb_edge_distribution",
        &stats.rgb_section_weights,
        scene.edge_distribution_min_max_ratio,
        scene.min_weighted_edge_per_section_rgb,
    ));

    stats.weights_per_direction = weights_per_direction(depth);
    let (dir_ratio, balance) = check_direction_balance(
        &stats.weights_per_direction,
        scene.grad_dir_ratio,
        scene.grad_dir_ratio_prep,
    );
    stats.dir_ratio = dir_ratio;
    failures.extend(balance);

    let full = full_directions(depth, scene.edges_per_direction_ratio_th, &scene.dir_std_th);
    if full < scene.minimal_full_directions {
        warn!("direction_spread: {full} directions qualify, need {}", scene.minimal_full_directions);
        failures.push(CheckFailure::new(
            "direction_spread",
            full as f64,
            scene.minimal_full_directions as f64,
        ));
    }

    let mut depth_counts = vec![0usize; depth.section_grid.count()];
    for v in &depth.vertices {
        if let Some(c) = depth_counts.get_mut(v.section) {
            *c += 1;
        }
    }
    let depth_sections = sections_with_enough_edges(
        &depth_counts,
        &depth.section_grid.section_areas(),
        scene.pix_per_section_depth_th,
    );
    let logic = yuy.edges.logic_edges(params.preprocess.edge_thresh4_logic_lum);
    let mut rgb_counts = vec![0usize; rgb_grid.count()];
    for y in 0..logic.height() {
        for x in 0..logic.width() {
            if logic.at(x, y) {
                rgb_counts[rgb_grid.section_of(x, y)] += 1;
            }
        }
    }
    let rgb_sections = sections_with_enough_edges(&rgb_counts, &rgb_grid.section_areas(), scene.pix_per_section_rgb_th);
    for (name, n) in [("depth_edge_spread", depth_sections), ("rgb_edge_spread", rgb_sections)] {
        if n < scene.min_section_with_enough_edges {
            warn!("{name}: {n} sections with enough edges, need {}", scene.min_section_with_enough_edges);
            failures.push(CheckFailure::new(name, n as f64, scene.min_section_with_enough_edges as f64));
        }
    }

    stats.ir_saturation_ratio = ir.saturation_ratio(scene.saturation_value);
    if stats.ir_saturation_ratio > scene.saturation_ratio_th {
        warn!(
            "ir_saturation: {:.4} of IR pixels saturated, threshold {}",
            stats.ir_saturation_ratio, scene.saturation_ratio_th
        );
        failures.push(CheckFailure::new(
            "ir_saturation",
            stats.ir_saturation_ratio,
            scene.saturation_ratio_th,
        ));
    }

    SceneValidity {
        failures,
        statistics: stats,
    }
}
