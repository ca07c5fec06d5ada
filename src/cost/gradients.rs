//! Closed-form derivatives of a projected pixel with respect to the ten
//! calibration parameters.
//!
//! With `X = R·v + t`, `(x, y) = (X/Z, Y/Z)`, `(xd, yd) = distort(x, y)` and
//! `(u, v) = (fx·xd + ppx, fy·yd + ppy)`:
//!
//! * `d(u, v)/dθ = diag(fx, fy) · J_dist · d(x, y)/dX · dX/dθ` for the
//!   rotation angles (`dX/dθ = dR/dθ · v`) and the translation
//!   (`dX/dt_k = e_k`),
//! * `du/dfx = xd`, `du/dppx = 1`, `dv/dfy = yd`, `dv/dppy = 1`.

use crate::calibration::{Calib, N_PARAMS};
use crate::geometry::{distort, distortion_jacobian};
use nalgebra::{Matrix3, Vector2, Vector3};

/// Projection of a depth-space point, or `None` when it lands on or behind
/// the RGB image plane.
pub fn project_with_calib(calib: &Calib, point: &Vector3<f64>) -> Option<Vector2<f64>> {
    let p = calib.p_matrix() * point.push(1.0);
    if p.z <= 0.0 {
        return None;
    }
    let x = (p.x / p.z - calib.ppx) / calib.fx;
    let y = (p.y / p.z - calib.ppy) / calib.fy;
    let (d, _) = distort(calib.model, &calib.coeffs, x, y);
    Some(Vector2::new(d.x * calib.fx + calib.ppx, d.y * calib.fy + calib.ppy))
}

/// Derivatives of the projected pixel, one per parameter in
/// [`Calib::params`] order.
///
/// `rotation_derivs` are `[dR/dalpha, dR/dbeta, dR/dgamma]` at the calib's
/// angles, computed once per calib by the caller.
pub fn pixel_derivatives(
    calib: &Calib,
    rotation_derivs: &[Matrix3<f64>; 3],
    point: &Vector3<f64>,
) -> Option<[Vector2<f64>; N_PARAMS]> {
    let cam = calib.rotation * point + calib.translation;
    if cam.z <= 0.0 {
        return None;
    }
    let inv_z = 1.0 / cam.z;
    let x = cam.x * inv_z;
    let y = cam.y * inv_z;
    let (d, _) = distort(calib.model, &calib.coeffs, x, y);
    let j = distortion_jacobian(calib.model, &calib.coeffs, x, y);

    // d(u, v)/dX through the perspective division
    let chain = |dcam: Vector3<f64>| -> Vector2<f64> {
        let dx = (dcam.x - x * dcam.z) * inv_z;
        let dy = (dcam.y - y * dcam.z) * inv_z;
        let dd = j * Vector2::new(dx, dy);
        Vector2::new(calib.fx * dd.x, calib.fy * dd.y)
    };

    let mut out = [Vector2::zeros(); N_PARAMS];
    for (k, dr) in rotation_derivs.iter().enumerate() {
        out[k] = chain(dr * point);
    }
    for k in 0..3 {
        let mut e = Vector3::zeros();
        e[k] = 1.0;
        out[3 + k] = chain(e);
    }
    out[6] = Vector2::new(d.x, 0.0);
    out[7] = Vector2::new(0.0, d.y);
    out[8] = Vector2::new(1.0, 0.0);
    out[9] = Vector2::new(0.0, 1.0);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{rotation_derivatives, DistortionModel, Extrinsics, Intrinsics, RotationAngles};
    use crate::calibration::rotation_from_angles;
    use approx::assert_relative_eq;

    fn distorted_calib() -> Calib {
        let intrinsics = Intrinsics {
            width: 640,
            height: 480,
            fx: 610.0,
            fy: 605.0,
            ppx: 322.0,
            ppy: 241.0,
            model: DistortionModel::BrownConrady,
            coeffs: [0.08, -0.12, 0.0012, -0.0009, 0.02],
        };
        let extrinsics = Extrinsics {
            rotation: rotation_from_angles(&RotationAngles {
                alpha: 0.02,
                beta: -0.015,
                gamma: 0.01,
            }),
            translation: Vector3::new(15.0, -0.5, 1.2),
        };
        Calib::from_intrinsics_extrinsics(&intrinsics, &extrinsics)
    }

    #[test]
    fn test_pixel_derivatives_match_finite_differences() {
        let calib = distorted_calib();
        let point = Vector3::new(-210.0, 140.0, 1300.0);
        let derivs = rotation_derivatives(&calib.angles);
        let analytic = pixel_derivatives(&calib, &derivs, &point).unwrap();

        let base = calib.params();
        for k in 0..N_PARAMS {
            let h = if k < 3 { 1e-7 } else { 1e-4 };
            let mut plus = base;
            let mut minus = base;
            plus[k] += h;
            minus[k] -= h;
            let up = project_with_calib(&calib.with_params(&plus), &point).unwrap();
            let um = project_with_calib(&calib.with_params(&minus), &point).unwrap();
            let numeric = (up - um) / (2.0 * h);
            assert_relative_eq!(analytic[k], numeric, epsilon = 1e-4, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_point_behind_camera() {
        let calib = distorted_calib();
        let point = Vector3::new(0.0, 0.0, -500.0);
        assert!(project_with_calib(&calib, &point).is_none());
        assert!(pixel_derivatives(&calib, &rotation_derivatives(&calib.angles), &point).is_none());
    }
}
