//! Ray direction ⇄ line-of-sight (LOS) conversion through the laser and
//! mirror geometry.
//!
//! A unit ray `d` leaves the mirror whose normal is `normalize(d − l)`, with
//! `l` the laser incident direction. The mirror angles of that normal,
//! divided by the degrees-per-unit of the mirror, give the LOS in corrected
//! DSM units. The optional field-of-view expander bends the ray by a
//! polynomial in its off-axis angle.

use super::AlgoCalibrationInfo;
use nalgebra::{Vector2, Vector3};

const EPS: f64 = 1e-12;
const MAX_ITERATIONS: u32 = 50;

/// Incident laser direction for the unit's laser angles (degrees).
pub fn laser_incident_direction(info: &AlgoCalibrationInfo) -> Vector3<f64> {
    let h = info.laser_angle_h.to_radians();
    let v = (info.laser_angle_v + 180.0).to_radians();
    Vector3::new(v.cos() * h.sin(), v.sin(), v.cos() * h.cos())
}

/// `a + c0·a + c1·a² + …` for angles in degrees.
fn poly_angle(coeffs: &[f64], a: f64) -> f64 {
    a + coeffs
        .iter()
        .enumerate()
        .map(|(k, c)| c * a.powi(k as i32 + 1))
        .sum::<f64>()
}

fn poly_angle_derivative(coeffs: &[f64], a: f64) -> f64 {
    1.0 + coeffs
        .iter()
        .enumerate()
        .map(|(k, c)| c * (k as f64 + 1.0) * a.powi(k as i32))
        .sum::<f64>()
}

/// Solves `poly_angle(coeffs, a) = target` by Newton iterations.
fn invert_poly_angle(coeffs: &[f64], target: f64) -> f64 {
    let mut a = target;
    for _ in 0..MAX_ITERATIONS {
        let f = poly_angle(coeffs, a) - target;
        if f.abs() < EPS {
            break;
        }
        let df = poly_angle_derivative(coeffs, a);
        if df.abs() < EPS {
            break;
        }
        a -= f / df;
    }
    a
}

/// Rotates a unit ray so that its off-axis angle becomes `map(angle)`.
fn bend_off_axis(d: &Vector3<f64>, map: impl Fn(f64) -> f64) -> Vector3<f64> {
    let xy = d.x.hypot(d.y);
    if xy < EPS {
        return *d;
    }
    let angle = map(d.z.clamp(-1.0, 1.0).acos().to_degrees()).to_radians();
    let s = angle.sin() / xy;
    Vector3::new(d.x * s, d.y * s, angle.cos())
}

/// LOS of each ray, `[x, y]` in corrected DSM units. Rays need not be unit
/// length.
pub fn vertices_to_los(info: &AlgoCalibrationInfo, vertices: &[Vector3<f64>]) -> Vec<Vector2<f64>> {
    let laser = laser_incident_direction(info);
    let [kx, ky] = info.degrees_per_unit();
    vertices
        .iter()
        .map(|v| {
            let mut d = v.normalize();
            if info.fovex_existence_flag {
                d = bend_off_axis(&d, |post| invert_poly_angle(&info.fovex_nominal, post));
            }
            let n = (d - laser).normalize();
            let ang_x = invert_poly_angle(&info.poly_vars, n.x.atan2(n.z).to_degrees());
            let ang_y = n.y.clamp(-1.0, 1.0).asin().to_degrees();
            Vector2::new(ang_x / kx, ang_y / ky)
        })
        .collect()
}

/// Unit rays of each LOS; the inverse of [`vertices_to_los`].
pub fn los_to_vertices(info: &AlgoCalibrationInfo, los: &[Vector2<f64>]) -> Vec<Vector3<f64>> {
    let laser = laser_incident_direction(info);
    let [kx, ky] = info.degrees_per_unit();
    los.iter()
        .map(|l| {
            let ang_x = poly_angle(&info.poly_vars, l.x * kx).to_radians();
            let ang_y = (l.y * ky).to_radians();
            let n = Vector3::new(ang_y.cos() * ang_x.sin(), ang_y.sin(), ang_y.cos() * ang_x.cos());
            let d = laser - 2.0 * laser.dot(&n) * n;
            if info.fovex_existence_flag {
                bend_off_axis(&d, |pre| poly_angle(&info.fovex_nominal, pre))
            } else {
                d
            }
        })
        .collect()
}
