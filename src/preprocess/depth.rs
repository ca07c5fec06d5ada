use super::ir::IrFrameData;
use crate::calibration::{validation, CalibrationError, Intrinsics};
use crate::frame::{magnitude, Direction, Plane};
use crate::geometry::{deproject_pixel, SectionGrid};
use crate::params::PreprocessParams;
use log::debug;
use nalgebra::{Vector2, Vector3};

/// A depth edge that survived suppression, de-projected to 3D.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeVertex {
    pub pixel: (usize, usize),
    pub subpixel: Vector2<f64>,
    /// Nearer of the two depth samples straddling the edge, in raw counts.
    pub closest: u16,
    pub edge: f64,
    pub weight: f64,
    pub vertex: Vector3<f64>,
    pub direction: Direction,
    /// Section of `pixel` on the depth section grid.
    pub section: usize,
}

#[derive(Debug, Clone)]
pub struct DepthFrameData {
    pub intrinsics: Intrinsics,
    pub depth_units: f64,
    pub frame: Plane<u16>,
    pub gradient_x: Plane<f64>,
    pub gradient_y: Plane<f64>,
    pub edges: Plane<f64>,
    /// Quantized gradient direction per pixel, row-major.
    pub directions: Vec<Direction>,
    /// Edge intensity where the pixel survived suppression, 0 elsewhere.
    pub suppressed_edges: Plane<f64>,
    pub section_grid: SectionGrid,
    pub vertices: Vec<EdgeVertex>,
}

impl DepthFrameData {
    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

/// `min(max(edge − grad_z_min, 0), grad_z_max − grad_z_min)`
pub fn edge_weight(edge: f64, params: &PreprocessParams) -> f64 {
    (edge - params.grad_z_min)
        .max(0.0)
        .min(params.grad_z_max - params.grad_z_min)
}

/// Parabolic peak offset of three samples along the gradient.
pub fn subpixel_offset(minus: f64, edge: f64, plus: f64) -> f64 {
    let denom = plus + minus - 2.0 * edge;
    if denom == 0.0 {
        0.0
    } else {
        -0.5 * (plus - minus) / denom
    }
}

/// Extracts the depth-edge vertex set.
///
/// # Errors
///
/// * Buffer or dimension mismatch between `data`, `intrinsics` and the IR frame.
/// * Intrinsics validation errors.
pub fn preprocess_depth(
    intrinsics: &Intrinsics,
    depth_units: f64,
    data: Vec<u16>,
    ir: &IrFrameData,
    params: &PreprocessParams,
    sections: (usize, usize),
) -> Result<DepthFrameData, CalibrationError> {
    validation::validate_intrinsics(intrinsics)?;
    let (width, height) = (intrinsics.width as usize, intrinsics.height as usize);
    let frame = Plane::from_vec("depth", width, height, data)?;
    if ir.frame.width() != width || ir.frame.height() != height {
        return Err(CalibrationError::BufferSizeMismatch {
            what: "ir vs depth",
            expected: width * height,
            actual: ir.frame.len(),
        });
    }
    if !(depth_units.is_finite() && depth_units > 0.0) {
        return Err(CalibrationError::InvalidParams(format!(
            "depth units must be positive, got {depth_units}"
        )));
    }

    let as_f64 = frame.to_f64();
    let mut gradient_x = as_f64.gradient_x();
    let mut gradient_y = as_f64.gradient_y();
    if params.zero_gradient_margin {
        gradient_x.zero_inner_margin();
        gradient_y.zero_inner_margin();
    }
    let edges = magnitude(&gradient_x, &gradient_y);

    let directions: Vec<Direction> = gradient_x
        .as_raw()
        .iter()
        .zip(gradient_y.as_raw())
        .map(|(&gx, &gy)| Direction::from_gradient(gx, gy))
        .collect();

    let grad_ir_threshold = params.grad_ir_threshold_for(width, height);
    let section_grid = SectionGrid::new(width, height, sections.0, sections.1);
    let mut suppressed_edges: Plane<f64> = Plane::new(width, height);
    let mut vertices = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = frame.index(x, y);
            let edge = edges.as_raw()[idx];
            if edge <= params.grad_z_threshold || ir.edges.as_raw()[idx] <= grad_ir_threshold {
                continue;
            }

            let direction = directions[idx];
            let (dx, dy) = direction.offset();
            let (px, py) = frame.wrapped_offset(x, y, -dx, -dy);
            let (nx, ny) = frame.wrapped_offset(x, y, dx, dy);
            let minus = edges.at(px, py);
            let plus = edges.at(nx, ny);
            if minus > edge || plus > edge {
                continue;
            }
            suppressed_edges.set(x, y, edge);

            let closest = frame.at(px, py).min(frame.at(nx, ny));
            if closest == 0 {
                continue;
            }

            let fraq = subpixel_offset(minus, edge, plus);
            let subpixel = Vector2::new(x as f64 + fraq * dx as f64, y as f64 + fraq * dy as f64);
            let vertex = deproject_pixel(
                intrinsics,
                subpixel.x,
                subpixel.y,
                closest as f64 * depth_units,
            );

            vertices.push(EdgeVertex {
                pixel: (x, y),
                subpixel,
                closest,
                edge,
                weight: edge_weight(edge, params),
                vertex,
                direction,
                section: section_grid.section_of(x, y),
            });
        }
    }

    debug!(
        "preprocess_depth: {} strong edges, {} vertices (ir threshold {grad_ir_threshold})",
        suppressed_edges.as_raw().iter().filter(|&&e| e > 0.0).count(),
        vertices.len()
    );

    Ok(DepthFrameData {
        intrinsics: intrinsics.clone(),
        depth_units,
        frame,
        gradient_x,
        gradient_y,
        edges,
        directions,
        suppressed_edges,
        section_grid,
        vertices,
    })
}
