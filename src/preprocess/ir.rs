use crate::calibration::CalibrationError;
use crate::frame::{magnitude, Plane};
use crate::params::PreprocessParams;

/// IR gradients and edge intensity; used only to gate depth edges.
#[derive(Debug, Clone)]
pub struct IrFrameData {
    pub frame: Plane<u8>,
    pub gradient_x: Plane<f64>,
    pub gradient_y: Plane<f64>,
    pub edges: Plane<f64>,
}

impl IrFrameData {
    /// Fraction of pixels at or above `saturation_value`.
    pub fn saturation_ratio(&self, saturation_value: u8) -> f64 {
        if self.frame.is_empty() {
            return 0.0;
        }
        let saturated = self.frame.as_raw().iter().filter(|&&v| v >= saturation_value).count();
        saturated as f64 / self.frame.len() as f64
    }
}

pub fn preprocess_ir(
    width: usize,
    height: usize,
    data: Vec<u8>,
    params: &PreprocessParams,
) -> Result<IrFrameData, CalibrationError> {
    let frame = Plane::from_vec("ir", width, height, data)?;
    let as_f64 = frame.to_f64();
    let mut gradient_x = as_f64.gradient_x();
    let mut gradient_y = as_f64.gradient_y();
    if params.zero_gradient_margin {
        gradient_x.zero_inner_margin();
        gradient_y.zero_inner_margin();
    }
    let edges = magnitude(&gradient_x, &gradient_y);
    Ok(IrFrameData {
        frame,
        gradient_x,
        gradient_y,
        edges,
    })
}
