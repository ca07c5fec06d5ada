//! Image planes and the fixed-kernel filters run over them.
//!
//! Numeric planes are single-channel `image` buffers; filtering and
//! morphology go through `imageproc`.

use crate::calibration::{validation, CalibrationError};
use image::{GrayImage, ImageBuffer, Luma, Primitive};
use imageproc::distance_transform::Norm;
use imageproc::filter::{separable_filter, separable_filter_equal};
use imageproc::morphology;

/// Sobel derivative taps.
const SOBEL_DIFF: [f64; 3] = [-1.0, 0.0, 1.0];
/// Sobel smoothing taps, with the 1/8 normalization folded in.
const SOBEL_SMOOTH: [f64; 3] = [0.125, 0.25, 0.125];

/// 1-D factor of the 5×5 Gaussian, sigma 1, normalized to unit sum.
const GAUSSIAN_5: [f64; 5] = [
    0.05448868454964294,
    0.24420134200323332,
    0.4026199468942474,
    0.24420134200323332,
    0.05448868454964294,
];

const MASK_SET: u8 = 255;

/// One image channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane<T: Primitive> {
    image: ImageBuffer<Luma<T>, Vec<T>>,
}

impl<T: Primitive> Plane<T> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            image: ImageBuffer::new(width as u32, height as u32),
        }
    }

    /// Wraps `data`, checking that it holds exactly `width × height` samples.
    pub fn from_vec(
        what: &'static str,
        width: usize,
        height: usize,
        data: Vec<T>,
    ) -> Result<Self, CalibrationError> {
        validation::validate_buffer(what, width as u32, height as u32, data.len())?;
        let actual = data.len();
        let image = ImageBuffer::from_raw(width as u32, height as u32, data).ok_or(
            CalibrationError::BufferSizeMismatch {
                what,
                expected: width * height,
                actual,
            },
        )?;
        Ok(Self { image })
    }

    pub fn from_image(image: ImageBuffer<Luma<T>, Vec<T>>) -> Self {
        Self { image }
    }

    pub fn as_image(&self) -> &ImageBuffer<Luma<T>, Vec<T>> {
        &self.image
    }

    pub fn width(&self) -> usize {
        self.image.width() as usize
    }

    pub fn height(&self) -> usize {
        self.image.height() as usize
    }

    /// Row-major samples.
    pub fn as_raw(&self) -> &[T] {
        &self.image
    }

    pub fn as_raw_mut(&mut self) -> &mut [T] {
        &mut self.image
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width() + x
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> T {
        self.image.get_pixel(x as u32, y as u32).0[0]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.image.put_pixel(x as u32, y as u32, Luma([value]));
    }

    pub fn len(&self) -> usize {
        self.as_raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_raw().is_empty()
    }

    pub fn map<U: Primitive>(&self, f: impl Fn(T) -> U) -> Plane<U> {
        Plane {
            image: ImageBuffer::from_fn(self.image.width(), self.image.height(), |x, y| {
                Luma([f(self.image.get_pixel(x, y).0[0])])
            }),
        }
    }

    /// Pixel `(x, y)` moved by `(dx, dy)`, wrapping around the frame edges.
    pub fn wrapped_offset(&self, x: usize, y: usize, dx: i32, dy: i32) -> (usize, usize) {
        let nx = (x as i64 + dx as i64).rem_euclid(self.width() as i64) as usize;
        let ny = (y as i64 + dy as i64).rem_euclid(self.height() as i64) as usize;
        (nx, ny)
    }
}

impl<T: Primitive + Into<f64>> Plane<T> {
    pub fn to_f64(&self) -> Plane<f64> {
        self.map(|v| v.into())
    }
}

impl Plane<f64> {
    pub fn max_value(&self) -> f64 {
        self.as_raw().iter().copied().fold(f64::MIN, f64::max)
    }

    /// Separable 3×3 correlation; the one-pixel border is set to 0.
    fn sobel(&self, h_kernel: &[f64; 3], v_kernel: &[f64; 3]) -> Plane<f64> {
        let mut out = Plane::from_image(separable_filter(&self.image, h_kernel, v_kernel));
        out.zero_border();
        out
    }

    fn zero_border(&mut self) {
        let (w, h) = (self.width(), self.height());
        for x in 0..w {
            self.set(x, 0, 0.0);
            if h > 0 {
                self.set(x, h - 1, 0.0);
            }
        }
        for y in 0..h {
            self.set(0, y, 0.0);
            if w > 0 {
                self.set(w - 1, y, 0.0);
            }
        }
    }

    /// `+d/dx` gradient (vertical-edge Sobel, divided by 8).
    pub fn gradient_x(&self) -> Plane<f64> {
        self.sobel(&SOBEL_DIFF, &SOBEL_SMOOTH)
    }

    /// `+d/dy` gradient (horizontal-edge Sobel, divided by 8).
    pub fn gradient_y(&self) -> Plane<f64> {
        self.sobel(&SOBEL_SMOOTH, &SOBEL_DIFF)
    }

    /// Zeroes the second and second-to-last rows and columns.
    pub fn zero_inner_margin(&mut self) {
        let (w, h) = (self.width(), self.height());
        if w < 3 || h < 3 {
            return;
        }
        for x in 0..w {
            self.set(x, 1, 0.0);
            self.set(x, h - 2, 0.0);
        }
        for y in 0..h {
            self.set(1, y, 0.0);
            self.set(w - 2, y, 0.0);
        }
    }

    /// 5×5 Gaussian (sigma 1) with replicated borders.
    pub fn gaussian5x5(&self) -> Plane<f64> {
        Plane::from_image(separable_filter_equal(&self.image, &GAUSSIAN_5))
    }

    /// Two-pass max-decay propagation of an edge map, blended with the
    /// original: `alpha·edges + (1 − alpha)·propagated`.
    pub fn blur_edges(&self, gamma: f64, alpha: f64) -> Plane<f64> {
        let (w, h) = (self.width(), self.height());
        let mut res = self.as_raw().to_vec();

        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let mut best = res[i];
                if x > 0 {
                    best = best.max(res[i - 1] * gamma);
                }
                if y > 0 {
                    best = best.max(res[i - w] * gamma);
                }
                res[i] = best;
            }
        }
        for y in (0..h).rev() {
            for x in (0..w).rev() {
                let i = y * w + x;
                let mut best = res[i];
                if x + 1 < w {
                    best = best.max(res[i + 1] * gamma);
                }
                if y + 1 < h {
                    best = best.max(res[i + w] * gamma);
                }
                res[i] = best;
            }
        }

        let mut out = self.clone();
        for (o, r) in out.as_raw_mut().iter_mut().zip(res) {
            *o = alpha * *o + (1.0 - alpha) * r;
        }
        out
    }

    /// `edge > thresh · max(edges)`
    pub fn logic_edges(&self, thresh: f64) -> Mask {
        let limit = thresh * self.max_value();
        Mask::from_plane(self, |v| v > limit)
    }
}

/// `sqrt(gx² + gy²)` per pixel.
pub fn magnitude(gx: &Plane<f64>, gy: &Plane<f64>) -> Plane<f64> {
    let mut out = gx.clone();
    for (o, y) in out.as_raw_mut().iter_mut().zip(gy.as_raw()) {
        *o = o.hypot(*y);
    }
    out
}

/// Binary image; set pixels hold 255.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    image: GrayImage,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            image: GrayImage::new(width as u32, height as u32),
        }
    }

    /// Pixels of `plane` for which `pred` holds.
    pub fn from_plane<T: Primitive>(plane: &Plane<T>, pred: impl Fn(T) -> bool) -> Self {
        let src = plane.as_image();
        Self {
            image: GrayImage::from_fn(src.width(), src.height(), |x, y| {
                Luma([if pred(src.get_pixel(x, y).0[0]) { MASK_SET } else { 0 }])
            }),
        }
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> usize {
        self.image.width() as usize
    }

    pub fn height(&self) -> usize {
        self.image.height() as usize
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> bool {
        self.image.get_pixel(x as u32, y as u32).0[0] != 0
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        let v = if value { MASK_SET } else { 0 };
        self.image.put_pixel(x as u32, y as u32, Luma([v]));
    }

    /// Set flags in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.image.as_raw().iter().map(|&v| v != 0)
    }

    pub fn count(&self) -> usize {
        self.iter().filter(|&b| b).count()
    }

    /// Square binary dilation; pixels outside the frame count as unset.
    pub fn dilate(&self, size: usize) -> Mask {
        let radius = u8::try_from(size / 2).unwrap_or(u8::MAX);
        Self {
            image: morphology::dilate(&self.image, Norm::LInf, radius),
        }
    }
}

/// Canonical gradient direction, folded into `[0°, 180°)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Deg0,
    Deg45,
    Deg90,
    Deg135,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Deg0,
        Direction::Deg45,
        Direction::Deg90,
        Direction::Deg135,
    ];

    /// Nearest canonical direction of a gradient.
    pub fn from_gradient(gx: f64, gy: f64) -> Self {
        let mut angle = gy.atan2(gx).to_degrees();
        if angle < 0.0 {
            angle += 180.0;
        }
        let angle = angle % 180.0;
        let mut best = Direction::Deg0;
        let mut best_dist = f64::MAX;
        for (i, dir) in Direction::ALL.iter().enumerate() {
            let dist = (angle - 45.0 * i as f64).abs();
            if dist < best_dist {
                best_dist = dist;
                best = *dir;
            }
        }
        // 180° is the 0° bucket folded over
        if (180.0 - angle) < best_dist {
            best = Direction::Deg0;
        }
        best
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Pixel step `(dx, dy)` along the direction.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Deg0 => (1, 0),
            Direction::Deg45 => (1, 1),
            Direction::Deg90 => (0, 1),
            Direction::Deg135 => (-1, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(width: usize, height: usize) -> Plane<f64> {
        let mut p = Plane::new(width, height);
        for y in 0..height {
            for x in 0..width {
                p.set(x, y, 2.0 * x as f64 + 3.0 * y as f64);
            }
        }
        p
    }

    #[test]
    fn test_gradients_of_a_ramp() {
        let p = ramp(6, 5);
        let gx = p.gradient_x();
        let gy = p.gradient_y();
        assert_relative_eq!(gx.at(2, 2), 2.0);
        assert_relative_eq!(gy.at(2, 2), 3.0);
        assert_eq!(gx.at(0, 2), 0.0);
        assert_eq!(gy.at(5, 4), 0.0);
    }

    #[test]
    fn test_zero_inner_margin() {
        let mut p = Plane::from_vec("test", 5, 5, vec![1.0; 25]).unwrap();
        p.zero_inner_margin();
        assert_eq!(p.at(2, 1), 0.0);
        assert_eq!(p.at(1, 2), 0.0);
        assert_eq!(p.at(3, 2), 0.0);
        assert_eq!(p.at(2, 3), 0.0);
        assert_eq!(p.at(2, 2), 1.0);
        assert_eq!(p.at(0, 0), 1.0);
    }

    #[test]
    fn test_gaussian_preserves_constant() {
        let p = Plane::from_vec("test", 7, 6, vec![4.0; 42]).unwrap();
        let g = p.gaussian5x5();
        for &v in g.as_raw() {
            assert_relative_eq!(v, 4.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_gaussian_matches_the_5x5_kernel() {
        let mut p: Plane<f64> = Plane::new(9, 9);
        p.set(4, 4, 1.0);
        let g = p.gaussian5x5();
        assert_relative_eq!(g.at(4, 4), 0.16210282163712664, epsilon = 1e-12);
        assert_relative_eq!(g.at(2, 2), 0.0029690167439504968, epsilon = 1e-12);
        assert_relative_eq!(g.at(4, 3), 0.098320331348845769, epsilon = 1e-12);
        assert_relative_eq!(g.as_raw().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_eq!(g.at(1, 4), 0.0);
    }

    #[test]
    fn test_gaussian_replicates_the_border() {
        let mut p: Plane<f64> = Plane::new(6, 6);
        for y in 0..6 {
            p.set(0, y, 10.0);
        }
        let g = p.gaussian5x5();
        // the first column sees three replicated copies of itself
        let expected = 10.0 * (GAUSSIAN_5[0] + GAUSSIAN_5[1] + GAUSSIAN_5[2]);
        assert_relative_eq!(g.at(0, 3), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_blur_edges_decays_from_a_peak() {
        let mut p: Plane<f64> = Plane::new(5, 1);
        p.set(2, 0, 10.0);
        let blurred = p.blur_edges(0.5, 0.0);
        assert_relative_eq!(blurred.at(2, 0), 10.0);
        assert_relative_eq!(blurred.at(1, 0), 5.0);
        assert_relative_eq!(blurred.at(3, 0), 5.0);
        assert_relative_eq!(blurred.at(0, 0), 2.5);

        let mixed = p.blur_edges(0.5, 1.0);
        assert_eq!(mixed, p);
    }

    #[test]
    fn test_dilate() {
        let mut m = Mask::new(5, 5);
        m.set(0, 0, true);
        let d = m.dilate(3);
        assert_eq!(d.count(), 4);
        assert!(d.at(1, 1));
        assert!(!d.at(2, 2));

        let mut centre = Mask::new(7, 7);
        centre.set(3, 3, true);
        assert_eq!(centre.dilate(5).count(), 25);
    }

    #[test]
    fn test_logic_edges() {
        let p = Plane::from_vec("test", 3, 1, vec![1.0, 5.0, 10.0]).unwrap();
        let m = p.logic_edges(0.4);
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![false, true, true]);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Plane::<u8>::from_vec("test", 4, 4, vec![0; 15]).is_err());
    }

    #[test]
    fn test_direction_buckets() {
        assert_eq!(Direction::from_gradient(1.0, 0.0), Direction::Deg0);
        assert_eq!(Direction::from_gradient(-1.0, 0.0), Direction::Deg0);
        assert_eq!(Direction::from_gradient(1.0, 1.0), Direction::Deg45);
        assert_eq!(Direction::from_gradient(0.0, 1.0), Direction::Deg90);
        assert_eq!(Direction::from_gradient(-1.0, 1.0), Direction::Deg135);
        assert_eq!(Direction::from_gradient(1.0, -1.0), Direction::Deg135);
        assert_eq!(Direction::from_gradient(1.0, -0.05), Direction::Deg0);
    }

    #[test]
    fn test_wrapped_offset() {
        let p: Plane<u8> = Plane::new(4, 3);
        assert_eq!(p.wrapped_offset(0, 0, -1, 1), (3, 1));
        assert_eq!(p.wrapped_offset(3, 2, 1, 1), (0, 0));
    }
}
