use crate::calibration::CalibrationError;
use crate::frame::{magnitude, Mask, Plane};
use crate::params::{PreprocessParams, SceneParams};
use log::debug;

/// Current and previous color frame with the fields derived from them.
#[derive(Debug, Clone)]
pub struct YuyFrameData {
    pub frame: Plane<u16>,
    pub prev_frame: Plane<u16>,
    pub lum: Plane<u8>,
    pub prev_lum: Plane<u8>,
    pub edges: Plane<f64>,
    pub prev_edges: Plane<f64>,
    /// Propagated-and-blended edge field sampled by the cost.
    pub idt: Plane<f64>,
    pub idt_x: Plane<f64>,
    pub idt_y: Plane<f64>,
}

impl YuyFrameData {
    pub fn width(&self) -> usize {
        self.lum.width()
    }

    pub fn height(&self) -> usize {
        self.lum.height()
    }
}

/// Luminance is the low byte of each packed sample.
pub fn luminance_from_yuy2(frame: &Plane<u16>) -> Plane<u8> {
    frame.map(|s| (s & 0x00ff) as u8)
}

fn sobel_edges(lum: &Plane<u8>) -> Plane<f64> {
    let f = lum.to_f64();
    magnitude(&f.gradient_x(), &f.gradient_y())
}

pub fn preprocess_yuy(
    width: usize,
    height: usize,
    data: Vec<u16>,
    prev_data: Vec<u16>,
    params: &PreprocessParams,
) -> Result<YuyFrameData, CalibrationError> {
    let frame = Plane::from_vec("yuy", width, height, data)?;
    let prev_frame = Plane::from_vec("previous yuy", width, height, prev_data)?;

    let lum = luminance_from_yuy2(&frame);
    let prev_lum = luminance_from_yuy2(&prev_frame);
    let edges = sobel_edges(&lum);
    let prev_edges = sobel_edges(&prev_lum);

    let idt = edges.blur_edges(params.gamma, params.alpha);
    let idt_x = idt.gradient_x();
    let idt_y = idt.gradient_y();

    Ok(YuyFrameData {
        frame,
        prev_frame,
        lum,
        prev_lum,
        edges,
        prev_edges,
        idt,
        idt_x,
        idt_y,
    })
}

/// Intermediates of the frame-to-frame movement detector.
#[derive(Debug, Clone)]
pub struct MovementData {
    /// Dilated edge mask of the reference frame.
    pub dilated: Mask,
    /// `|gauss(reference − current)|`, zeroed under `dilated`.
    pub diff_masked: Plane<f64>,
    pub moving_pixels: usize,
    pub allowed_pixels: f64,
}

impl MovementData {
    pub fn is_movement(&self) -> bool {
        self.moving_pixels as f64 > self.allowed_pixels
    }
}

/// `|gauss(reference − current)|` per pixel.
pub fn filtered_abs_diff(reference: &Plane<u8>, current: &Plane<u8>) -> Plane<f64> {
    let mut diff: Plane<f64> = Plane::new(current.width(), current.height());
    for ((d, &a), &b) in diff.as_raw_mut().iter_mut().zip(reference.as_raw()).zip(current.as_raw()) {
        *d = f64::from(a) - f64::from(b);
    }
    diff.gaussian5x5().map(f64::abs)
}

/// Flags movement between the previous and the current color frame.
///
/// Texture boundaries of the previous frame are masked out, so only
/// luminance changes in flat regions count.
pub fn detect_movement(
    yuy: &YuyFrameData,
    logic_thresh: f64,
    scene: &SceneParams,
) -> MovementData {
    let logic_edges = yuy.prev_edges.logic_edges(logic_thresh);
    let dilated = logic_edges.dilate(scene.dilation_size);

    let mut diff_masked = filtered_abs_diff(&yuy.prev_lum, &yuy.lum);
    for (v, masked) in diff_masked.as_raw_mut().iter_mut().zip(dilated.iter()) {
        if masked {
            *v = 0.0;
        }
    }
    let moving_pixels = diff_masked
        .as_raw()
        .iter()
        .filter(|&&v| v > scene.move_thresh_pix_val)
        .count();
    let allowed_pixels = scene.move_thresh_pix_ratio * yuy.lum.len() as f64;
    debug!("detect_movement: {moving_pixels} pixels above threshold, allowed {allowed_pixels}");

    MovementData {
        dilated,
        diff_masked,
        moving_pixels,
        allowed_pixels,
    }
}

/// Pixels whose filtered luminance difference from `reference` exceeds
/// `thresh_pix_val`.
pub fn count_changed_pixels(reference: &Plane<u8>, current: &Plane<u8>, thresh_pix_val: f64) -> usize {
    filtered_abs_diff(reference, current)
        .as_raw()
        .iter()
        .filter(|&&v| v > thresh_pix_val)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: usize, height: usize, lum: u16) -> Vec<u16> {
        vec![0x8000 | lum; width * height]
    }

    #[test]
    fn test_luminance_is_low_byte() {
        let p = Plane::from_vec("yuy", 3, 3, vec![0x80ff; 9]).unwrap();
        assert!(luminance_from_yuy2(&p).as_raw().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_identical_frames_have_no_movement() {
        let (w, h) = (32, 24);
        let yuy = preprocess_yuy(w, h, flat(w, h, 90), flat(w, h, 90), &PreprocessParams::default())
            .unwrap();
        let m = detect_movement(&yuy, 0.1, &SceneParams::default());
        assert_eq!(m.moving_pixels, 0);
        assert!(!m.is_movement());
        assert!(yuy.idt.as_raw().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_brightness_jump_is_movement() {
        let (w, h) = (32, 24);
        let yuy = preprocess_yuy(w, h, flat(w, h, 200), flat(w, h, 20), &PreprocessParams::default())
            .unwrap();
        let m = detect_movement(&yuy, 0.1, &SceneParams::default());
        assert_eq!(m.moving_pixels, w * h);
        assert!(m.is_movement());
    }

    #[test]
    fn test_count_changed_pixels() {
        let a = Plane::from_vec("a", 10, 10, vec![10u8; 100]).unwrap();
        let b = Plane::from_vec("b", 10, 10, vec![100u8; 100]).unwrap();
        assert_eq!(count_changed_pixels(&a, &b, 25.0), 100);
        assert_eq!(count_changed_pixels(&a, &a, 25.0), 0);
    }
}
