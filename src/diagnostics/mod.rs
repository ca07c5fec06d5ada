//! Dump of one calibration attempt for offline inspection.
//!
//! [`write_attempt_data`] writes the derived frame fields as 8-bit PNGs, the
//! vertex set and the optimizer history as CSV, and the scene and result
//! reports as JSON. Writing is best effort: failures are logged and never
//! reach the attempt.

use crate::calibration::CalibrationError;
use crate::frame::Plane;
use crate::optimization::OptimizationStats;
use crate::preprocess::{DepthFrameData, EdgeVertex, IrFrameData, MovementData, YuyFrameData};
use crate::validity::{ResultValidity, SceneValidity};
use image::{GrayImage, Luma};
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Everything an attempt can dump; missing stages are skipped.
pub struct AttemptData<'a> {
    pub depth: &'a DepthFrameData,
    pub ir: &'a IrFrameData,
    pub yuy: &'a YuyFrameData,
    pub movement: Option<&'a MovementData>,
    pub stats: Option<&'a OptimizationStats>,
    pub scene: Option<&'a SceneValidity>,
    pub result: Option<&'a ResultValidity>,
}

#[derive(Serialize)]
struct VertexRow {
    x: f64,
    y: f64,
    z: f64,
    col: f64,
    row: f64,
    weight: f64,
    section: usize,
    direction: usize,
}

impl From<&EdgeVertex> for VertexRow {
    fn from(v: &EdgeVertex) -> Self {
        Self {
            x: v.vertex.x,
            y: v.vertex.y,
            z: v.vertex.z,
            col: v.subpixel.x,
            row: v.subpixel.y,
            weight: v.weight,
            section: v.section,
            direction: v.direction.index(),
        }
    }
}

/// Linearly maps `[0, max]` to `[0, 255]`; an all-zero plane stays black.
fn to_gray(plane: &Plane<f64>) -> GrayImage {
    let max = plane.max_value();
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
    let src = plane.as_image();
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        Luma([(src.get_pixel(x, y)[0].max(0.0) * scale).round().min(255.0) as u8])
    })
}

fn save_gray(dir: &Path, name: &str, image: &GrayImage) -> Result<(), CalibrationError> {
    let filename = dir.join(format!("{name}.png"));
    image
        .save(&filename)
        .map_err(|e| CalibrationError::IOError(format!("Failed to save {}: {e}", filename.display())))
}

fn save_png(dir: &Path, name: &str, plane: &Plane<f64>) -> Result<(), CalibrationError> {
    save_gray(dir, name, &to_gray(plane))
}

fn write_vertices(dir: &Path, vertices: &[EdgeVertex]) -> Result<(), CalibrationError> {
    let filename = dir.join("vertices.csv");
    let mut writer = csv::Writer::from_path(&filename)
        .map_err(|e| CalibrationError::IOError(format!("Failed to create {}: {e}", filename.display())))?;
    for v in vertices {
        writer
            .serialize(VertexRow::from(v))
            .map_err(|e| CalibrationError::IOError(format!("Failed to write vertex row: {e}")))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_history(dir: &Path, stats: &OptimizationStats) -> Result<(), CalibrationError> {
    let filename = dir.join("iterations.csv");
    let mut writer = csv::Writer::from_path(&filename)
        .map_err(|e| CalibrationError::IOError(format!("Failed to create {}: {e}", filename.display())))?;
    let csv_err = |e: csv::Error| CalibrationError::IOError(format!("Failed to write iteration row: {e}"));
    writer
        .write_record([
            "iteration", "cost", "step_size", "alpha", "beta", "gamma", "tx", "ty", "tz", "fx", "fy", "ppx",
            "ppy",
        ])
        .map_err(csv_err)?;
    let rows = stats
        .cost_history
        .iter()
        .zip(&stats.step_history)
        .zip(&stats.parameter_history)
        .enumerate();
    for (i, ((cost, step), params)) in rows {
        let mut record = vec![i.to_string(), format!("{cost:.9}"), format!("{step:.9}")];
        record.extend(params.iter().map(|p| format!("{p:.12}")));
        writer.write_record(&record).map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), CalibrationError> {
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(dir.join(format!("{name}.json")), contents)?;
    Ok(())
}

fn try_write(dir: &Path, data: &AttemptData<'_>) -> Result<(), CalibrationError> {
    fs::create_dir_all(dir)?;

    save_png(dir, "z_edges", &data.depth.edges)?;
    save_png(dir, "z_suppressed_edges", &data.depth.suppressed_edges)?;
    save_png(dir, "ir_edges", &data.ir.edges)?;
    save_png(dir, "yuy_lum", &data.yuy.lum.to_f64())?;
    save_png(dir, "yuy_edges", &data.yuy.edges)?;
    save_png(dir, "yuy_idt", &data.yuy.idt)?;
    if let Some(movement) = data.movement {
        save_gray(dir, "movement_mask", movement.dilated.as_image())?;
        save_png(dir, "movement_diff", &movement.diff_masked)?;
    }

    write_vertices(dir, &data.depth.vertices)?;
    if let Some(stats) = data.stats {
        write_history(dir, stats)?;
    }
    if let Some(scene) = data.scene {
        write_json(dir, "scene_validity", scene)?;
    }
    if let Some(result) = data.result {
        write_json(dir, "result_validity", result)?;
    }
    Ok(())
}

/// Writes the attempt under `dir`, creating it if needed.
pub fn write_attempt_data(dir: &Path, data: &AttemptData<'_>) {
    match try_write(dir, data) {
        Ok(()) => info!("attempt data written to {}", dir.display()),
        Err(e) => warn!("failed to write attempt data to {}: {e}", dir.display()),
    }
}
