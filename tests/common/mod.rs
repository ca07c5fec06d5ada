//! Synthetic scenes with known geometry.
//!
//! Four foreground discs, one per image quadrant, sit in front of a flat
//! background. Depth, IR and color are rendered with 4×4 supersampling so
//! that edges carry sub-pixel information. Depth and RGB share intrinsics
//! and the true translation is zero, so the color frame is the depth scene
//! seen through the true rotation.

#![allow(dead_code)]

use depth_rgb_autocal::{CalibrationInputs, Extrinsics, Intrinsics};
use nalgebra::{Matrix3, Rotation3, Vector3};

pub const WIDTH: usize = 320;
pub const HEIGHT: usize = 240;
pub const FOCAL: f64 = 300.0;
pub const FOREGROUND_MM: f64 = 1000.0;
pub const BACKGROUND_MM: f64 = 2000.0;

const SUPERSAMPLE: usize = 4;

struct Disc {
    cx: f64,
    cy: f64,
    r: f64,
}

const DISCS: [Disc; 4] = [
    Disc { cx: 80.3, cy: 62.6, r: 34.2 },
    Disc { cx: 236.7, cy: 58.1, r: 28.7 },
    Disc { cx: 84.9, cy: 178.4, r: 38.1 },
    Disc { cx: 242.2, cy: 181.8, r: 31.4 },
];

pub fn intrinsics() -> Intrinsics {
    Intrinsics::pinhole(WIDTH as u32, HEIGHT as u32, FOCAL, FOCAL, 159.5, 119.5)
}

pub fn rotation_z_deg(deg: f64) -> Matrix3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), deg.to_radians()).into_inner()
}

pub fn extrinsics_with_roll(deg: f64) -> Extrinsics {
    Extrinsics {
        rotation: rotation_z_deg(deg),
        translation: Vector3::zeros(),
    }
}

fn inside_any_disc(x: f64, y: f64) -> bool {
    DISCS.iter().any(|d| (x - d.cx).powi(2) + (y - d.cy).powi(2) <= d.r * d.r)
}

/// Fraction of the pixel at `(x, y)` covered by foreground, with sample
/// positions mapped through `to_depth_image`.
fn coverage(x: usize, y: usize, to_depth_image: &impl Fn(f64, f64) -> (f64, f64)) -> f64 {
    let mut hits = 0usize;
    for sy in 0..SUPERSAMPLE {
        for sx in 0..SUPERSAMPLE {
            let px = x as f64 + (sx as f64 + 0.5) / SUPERSAMPLE as f64 - 0.5;
            let py = y as f64 + (sy as f64 + 0.5) / SUPERSAMPLE as f64 - 0.5;
            let (dx, dy) = to_depth_image(px, py);
            if inside_any_disc(dx, dy) {
                hits += 1;
            }
        }
    }
    hits as f64 / (SUPERSAMPLE * SUPERSAMPLE) as f64
}

fn depth_coverage() -> Vec<f64> {
    let identity = |x: f64, y: f64| (x, y);
    (0..HEIGHT)
        .flat_map(|y| (0..WIDTH).map(move |x| (x, y)))
        .map(|(x, y)| coverage(x, y, &identity))
        .collect()
}

pub fn depth_frame() -> Vec<u16> {
    depth_coverage()
        .into_iter()
        .map(|c| (FOREGROUND_MM * c + BACKGROUND_MM * (1.0 - c)).round() as u16)
        .collect()
}

pub fn ir_frame() -> Vec<u8> {
    depth_coverage()
        .into_iter()
        .map(|c| (180.0 * c + 60.0 * (1.0 - c)).round() as u8)
        .collect()
}

/// Packed color frame whose luminance shows the scene through
/// `true_rotation`.
pub fn yuy_frame(true_rotation: &Matrix3<f64>) -> Vec<u16> {
    let k = intrinsics().k_matrix();
    let Some(k_inv) = k.try_inverse() else {
        panic!("intrinsics are invertible");
    };
    let back = true_rotation.transpose();
    let to_depth_image = |u: f64, v: f64| {
        let ray = back * (k_inv * Vector3::new(u, v, 1.0));
        let p = k * (ray / ray.z);
        (p.x, p.y)
    };
    let mut out = Vec::with_capacity(WIDTH * HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let c = coverage(x, y, &to_depth_image);
            let lum = (200.0 * c + 40.0 * (1.0 - c)).round() as u16;
            out.push(lum | (128 << 8));
        }
    }
    out
}

pub fn flat_yuy_frame(lum: u8) -> Vec<u16> {
    vec![u16::from(lum) | (128 << 8); WIDTH * HEIGHT]
}

/// Luminance plane of a packed frame.
pub fn luminance(yuy: &[u16]) -> depth_rgb_autocal::frame::Plane<u8> {
    let data = yuy.iter().map(|s| (s & 0xff) as u8).collect();
    let Ok(lum) = depth_rgb_autocal::frame::Plane::from_vec("lum", WIDTH, HEIGHT, data) else {
        panic!("packed frame is {WIDTH}x{HEIGHT}");
    };
    lum
}

/// Attempt over the disc scene; the true rotation is identity and the
/// starting calibration is rolled by `start_roll_deg`.
pub fn disc_scene_inputs(start_roll_deg: f64) -> CalibrationInputs {
    let yuy = yuy_frame(&Matrix3::identity());
    CalibrationInputs::new(
        depth_frame(),
        intrinsics(),
        1.0,
        ir_frame(),
        yuy.clone(),
        yuy,
        intrinsics(),
        extrinsics_with_roll(start_roll_deg),
    )
}
