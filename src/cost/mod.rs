//! Alignment cost between the depth-edge vertices and the RGB IDT field.
//!
//! `cost(calib) = Σ w_i · IDT(project(v_i)) / N` over the vertices whose
//! projection can be sampled. A vertex that falls outside the RGB frame is
//! excluded from both the sum and `N`; it is never counted as zero.

pub mod gradients;

use crate::calibration::{rotation_derivatives, Calib, CalibrationError, N_PARAMS};
use crate::frame::Plane;
use crate::preprocess::{EdgeVertex, YuyFrameData};
use nalgebra::Vector2;

pub use gradients::{pixel_derivatives, project_with_calib};

/// Projects every vertex into the RGB frame. Points behind the camera map
/// to `None`.
pub fn project_vertices(vertices: &[EdgeVertex], calib: &Calib) -> Vec<Option<Vector2<f64>>> {
    vertices
        .iter()
        .map(|v| project_with_calib(calib, &v.vertex))
        .collect()
}

/// Bilinear sample of `plane` at `uv`.
///
/// Returns `None` outside `[0, width − 1] × [0, height − 1]`. Integer
/// positions return the stored value exactly.
pub fn bilinear_interp(plane: &Plane<f64>, uv: &Vector2<f64>) -> Option<f64> {
    let (w, h) = (plane.width(), plane.height());
    if w < 2 || h < 2 || !uv.x.is_finite() || !uv.y.is_finite() {
        return None;
    }
    if uv.x < 0.0 || uv.y < 0.0 || uv.x > (w - 1) as f64 || uv.y > (h - 1) as f64 {
        return None;
    }
    let x0 = (uv.x.floor() as usize).min(w - 2);
    let y0 = (uv.y.floor() as usize).min(h - 2);
    let ax = uv.x - x0 as f64;
    let ay = uv.y - y0 as f64;

    let v00 = plane.at(x0, y0);
    let v10 = plane.at(x0 + 1, y0);
    let v01 = plane.at(x0, y0 + 1);
    let v11 = plane.at(x0 + 1, y0 + 1);

    let top = if ax == 0.0 { v00 } else if ax == 1.0 { v10 } else { v00 * (1.0 - ax) + v10 * ax };
    let bottom = if ax == 0.0 { v01 } else if ax == 1.0 { v11 } else { v01 * (1.0 - ax) + v11 * ax };
    Some(if ay == 0.0 {
        top
    } else if ay == 1.0 {
        bottom
    } else {
        top * (1.0 - ay) + bottom * ay
    })
}

/// Cost, its gradient and the number of vertices that contributed.
#[derive(Debug, Clone)]
pub struct CostAndGradients {
    pub cost: f64,
    /// Gradient laid out as a [`Calib`]; only the ten optimized scalars carry
    /// meaning.
    pub gradient: Calib,
    pub valid_vertices: usize,
}

fn no_valid(what: &str) -> CalibrationError {
    CalibrationError::NoValidVertices(format!("no depth edge projects inside the RGB frame ({what})"))
}

pub fn calc_cost(vertices: &[EdgeVertex], yuy: &YuyFrameData, calib: &Calib) -> Result<f64, CalibrationError> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in vertices {
        let Some(uv) = project_with_calib(calib, &v.vertex) else {
            continue;
        };
        if let Some(idt) = bilinear_interp(&yuy.idt, &uv) {
            sum += v.weight * idt;
            n += 1;
        }
    }
    if n == 0 {
        return Err(no_valid("cost"));
    }
    let cost = sum / n as f64;
    if !cost.is_finite() {
        return Err(CalibrationError::NumericalError(format!("non-finite cost {cost}")));
    }
    Ok(cost)
}

pub fn calc_cost_and_gradients(
    vertices: &[EdgeVertex],
    yuy: &YuyFrameData,
    calib: &Calib,
) -> Result<CostAndGradients, CalibrationError> {
    let derivs = rotation_derivatives(&calib.angles);
    let mut cost_sum = 0.0;
    let mut grad_sum = [0.0; N_PARAMS];
    let mut n = 0usize;

    for v in vertices {
        let Some(uv) = project_with_calib(calib, &v.vertex) else {
            continue;
        };
        let (Some(idt), Some(idt_x), Some(idt_y)) = (
            bilinear_interp(&yuy.idt, &uv),
            bilinear_interp(&yuy.idt_x, &uv),
            bilinear_interp(&yuy.idt_y, &uv),
        ) else {
            continue;
        };
        let Some(duv) = pixel_derivatives(calib, &derivs, &v.vertex) else {
            continue;
        };

        cost_sum += v.weight * idt;
        for (g, d) in grad_sum.iter_mut().zip(duv.iter()) {
            *g += v.weight * (idt_x * d.x + idt_y * d.y);
        }
        n += 1;
    }

    if n == 0 {
        return Err(no_valid("gradients"));
    }
    let inv_n = 1.0 / n as f64;
    grad_sum.iter_mut().for_each(|g| *g *= inv_n);
    let cost = cost_sum * inv_n;
    if !cost.is_finite() || grad_sum.iter().any(|g| !g.is_finite()) {
        return Err(CalibrationError::NumericalError(
            "non-finite cost or gradient".to_string(),
        ));
    }

    Ok(CostAndGradients {
        cost,
        gradient: calib.with_params(&grad_sum),
        valid_vertices: n,
    })
}

/// Mean `w · IDT` per depth section over the vertices that project inside
/// the RGB frame; sections without such vertices report 0.
pub fn cost_per_section(
    vertices: &[EdgeVertex],
    yuy: &YuyFrameData,
    calib: &Calib,
    num_sections: usize,
) -> Vec<f64> {
    let mut sums = vec![0.0; num_sections];
    let mut counts = vec![0usize; num_sections];
    for v in vertices {
        if v.section >= num_sections {
            continue;
        }
        let Some(uv) = project_with_calib(calib, &v.vertex) else {
            continue;
        };
        if let Some(idt) = bilinear_interp(&yuy.idt, &uv) {
            sums[v.section] += v.weight * idt;
            counts[v.section] += 1;
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(&s, &c)| if c == 0 { 0.0 } else { s / c as f64 })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::frame::Direction;
    use nalgebra::Vector3;

    /// Color frame data whose IDT is `a·u + b·v + c`; gradients are filled
    /// analytically.
    pub fn linear_idt(width: usize, height: usize, a: f64, b: f64, c: f64) -> YuyFrameData {
        let mut idt = Plane::new(width, height);
        for y in 0..height {
            for x in 0..width {
                idt.set(x, y, a * x as f64 + b * y as f64 + c);
            }
        }
        let blank_u16: Plane<u16> = Plane::new(width, height);
        let blank_u8: Plane<u8> = Plane::new(width, height);
        let blank_f64: Plane<f64> = Plane::new(width, height);
        YuyFrameData {
            frame: blank_u16.clone(),
            prev_frame: blank_u16,
            lum: blank_u8.clone(),
            prev_lum: blank_u8,
            edges: blank_f64.clone(),
            prev_edges: blank_f64.clone(),
            idt,
            idt_x: blank_f64.map(|_| a),
            idt_y: blank_f64.map(|_| b),
        }
    }

    pub fn vertex(point: Vector3<f64>, weight: f64, section: usize) -> EdgeVertex {
        EdgeVertex {
            pixel: (0, 0),
            subpixel: Vector2::zeros(),
            closest: point.z as u16,
            edge: weight,
            weight,
            vertex: point,
            direction: Direction::Deg0,
            section,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::calibration::{Extrinsics, Intrinsics};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn calib() -> Calib {
        let intrinsics = Intrinsics::pinhole(320, 240, 300.0, 300.0, 160.0, 120.0);
        let mut extrinsics = Extrinsics::default();
        extrinsics.translation = Vector3::new(12.0, 0.5, -0.3);
        let mut c = Calib::from_intrinsics_extrinsics(&intrinsics, &extrinsics);
        c = c.with_params(&{
            let mut p = c.params();
            p[0] = 0.01;
            p[1] = -0.02;
            p[2] = 0.015;
            p
        });
        c
    }

    fn vertices() -> Vec<EdgeVertex> {
        vec![
            vertex(Vector3::new(-200.0, -150.0, 1500.0), 40.0, 0),
            vertex(Vector3::new(250.0, 100.0, 1800.0), 80.0, 3),
            vertex(Vector3::new(30.0, -60.0, 1200.0), 10.0, 2),
            vertex(Vector3::new(-90.0, 170.0, 2100.0), 55.0, 1),
        ]
    }

    #[test]
    fn test_bilinear_boundaries() {
        let yuy = linear_idt(5, 4, 1.0, 10.0, 0.0);
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(2.0, 1.0)), Some(12.0));
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(4.0, 3.0)), Some(34.0));
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(0.0, 0.0)), Some(0.0));
        assert_relative_eq!(
            bilinear_interp(&yuy.idt, &Vector2::new(1.25, 2.5)).unwrap(),
            26.25,
            epsilon = 1e-12
        );
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(4.0001, 1.0)), None);
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(-0.0001, 1.0)), None);
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(1.0, 3.5)), None);
        assert_eq!(bilinear_interp(&yuy.idt, &Vector2::new(f64::NAN, 1.0)), None);
    }

    #[test]
    fn test_cost_gradient_matches_finite_differences() {
        let yuy = linear_idt(320, 240, 0.7, -0.4, 200.0);
        let c = calib();
        let vs = vertices();
        let analytic = calc_cost_and_gradients(&vs, &yuy, &c).unwrap();
        assert_eq!(analytic.valid_vertices, vs.len());
        assert_relative_eq!(analytic.cost, calc_cost(&vs, &yuy, &c).unwrap(), epsilon = 1e-9);

        let base = c.params();
        let grad = analytic.gradient.params();
        for k in 0..N_PARAMS {
            let h = if k < 3 { 1e-6 } else { 1e-3 };
            let mut plus = base;
            let mut minus = base;
            plus[k] += h;
            minus[k] -= h;
            let numeric = (calc_cost(&vs, &yuy, &c.with_params(&plus)).unwrap()
                - calc_cost(&vs, &yuy, &c.with_params(&minus)).unwrap())
                / (2.0 * h);
            assert_relative_eq!(grad[k], numeric, epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_out_of_frame_vertices_are_excluded() {
        let yuy = linear_idt(320, 240, 0.0, 0.0, 100.0);
        let c = calib();
        let mut vs = vertices();
        // far outside the RGB frame
        vs.push(vertex(Vector3::new(5000.0, 0.0, 1000.0), 1000.0, 0));
        let cost = calc_cost(&vs, &yuy, &c).unwrap();
        let expected = 100.0 * (40.0 + 80.0 + 10.0 + 55.0) / 4.0;
        assert_relative_eq!(cost, expected, epsilon = 1e-9);

        let per_section = cost_per_section(&vs, &yuy, &c, 4);
        assert_relative_eq!(per_section[0], 4000.0, epsilon = 1e-9);
        assert_relative_eq!(per_section[3], 8000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_valid_vertices_is_an_error() {
        let yuy = linear_idt(320, 240, 0.0, 0.0, 1.0);
        let vs = vec![vertex(Vector3::new(0.0, 0.0, -1000.0), 1.0, 0)];
        assert!(matches!(
            calc_cost(&vs, &yuy, &calib()),
            Err(CalibrationError::NoValidVertices(_))
        ));
        assert!(project_vertices(&vs, &calib())[0].is_none());
    }
}
