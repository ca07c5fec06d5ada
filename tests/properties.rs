mod common;

use approx::assert_relative_eq;
use common::*;
use depth_rgb_autocal::calibration::{angles_from_rotation, rotation_from_angles, RotationAngles};
use depth_rgb_autocal::cost::bilinear_interp;
use depth_rgb_autocal::frame::Plane;
use depth_rgb_autocal::validity::{
    extract_features, is_scene_valid, is_valid_results, xy_movement, ResultInputs, SceneInputs,
};
use depth_rgb_autocal::{AlgoParams, Calib, DepthToRgbCalibration, SvmModel};
use nalgebra::Vector2;

#[test]
fn test_rotation_duality_is_idempotent() {
    let samples = [
        (0.0, 0.0, 0.0),
        (0.01, -0.02, 0.005),
        (0.7, 0.3, -1.1),
        (-2.5, 1.2, 2.9),
        (0.2, -1.4, 0.4),
    ];
    for (alpha, beta, gamma) in samples {
        let r0 = rotation_from_angles(&RotationAngles { alpha, beta, gamma });
        let r = rotation_from_angles(&angles_from_rotation(&r0));
        let again = rotation_from_angles(&angles_from_rotation(&r));
        assert_relative_eq!(r, again, epsilon = 1e-12);
        assert_relative_eq!(r, r0, epsilon = 1e-12);
    }
}

#[test]
fn test_bilinear_sampling_boundary_law() {
    let mut plane: Plane<f64> = Plane::new(5, 4);
    for y in 0..4 {
        for x in 0..5 {
            plane.set(x, y, (x * 10 + y) as f64 + 0.25);
        }
    }
    for y in 0..4 {
        for x in 0..5 {
            let v = bilinear_interp(&plane, &Vector2::new(x as f64, y as f64));
            assert_eq!(v, Some(plane.at(x, y)));
        }
    }
    for uv in [
        Vector2::new(-1e-9, 1.0),
        Vector2::new(4.000001, 1.0),
        Vector2::new(2.0, 3.5),
        Vector2::new(2.0, -0.5),
        Vector2::new(f64::NAN, 1.0),
    ] {
        assert_eq!(bilinear_interp(&plane, &uv), None);
    }
}

#[test]
fn test_validity_checks_are_pure() {
    let params = AlgoParams::default();
    let attempt = DepthToRgbCalibration::new(disc_scene_inputs(0.5), params.clone()).unwrap();
    let depth = attempt.depth_data();
    let yuy = attempt.yuy_data();
    let start = attempt.start_calib();

    let a = attempt.scene_validity();
    let b = attempt.scene_validity();
    assert_eq!(a, b);

    let mut p = start.params();
    p[2] -= 0.3_f64.to_radians();
    let new = start.with_params(&p);
    let svm = SvmModel::embedded().unwrap();
    let run = || {
        is_valid_results(
            &ResultInputs {
                vertices: &depth.vertices,
                yuy,
                original: start,
                new: &new,
                factory: None,
                iteration_number: 0,
                num_sections: depth.section_grid.count(),
                scene: &a.statistics,
                svm: &svm,
                dsm: None,
            },
            &params,
        )
        .unwrap()
    };
    let r1 = run();
    let r2 = run();
    assert_eq!(r1, r2);
    assert_eq!(r1.features.to_array(), r2.features.to_array());
}

#[test]
fn test_scene_check_does_not_depend_on_call_order() {
    let params = AlgoParams::default();
    let attempt = DepthToRgbCalibration::new(disc_scene_inputs(0.0), params.clone()).unwrap();
    let lum = attempt.luminance().clone();
    let ir = depth_rgb_autocal::preprocess::preprocess_ir(WIDTH, HEIGHT, ir_frame(), &params.preprocess).unwrap();
    let stale = SceneInputs {
        depth: attempt.depth_data(),
        ir: &ir,
        yuy: attempt.yuy_data(),
        calib: attempt.start_calib(),
        last_success_lum: Some(&lum),
    };
    let first = is_scene_valid(&stale, &params);
    let fresh = attempt.scene_validity();
    let second = is_scene_valid(&stale, &params);
    assert_eq!(first, second);
    assert!(first.failed("movement_from_last_success"));
    assert!(!fresh.failed("movement_from_last_success"));
}

#[test]
fn test_clipped_movement_equals_cap() {
    let params = AlgoParams::default();
    let attempt = DepthToRgbCalibration::new(disc_scene_inputs(0.0), params.clone()).unwrap();
    let depth = attempt.depth_data();
    let start: &Calib = attempt.start_calib();
    let scene = attempt.scene_validity();
    let svm = SvmModel::embedded().unwrap();

    let mut p = start.params();
    p[2] += 2.0_f64.to_radians();
    p[8] += 3.0;
    let new = start.with_params(&p);
    let cap = params.result.max_movement_for(1);
    assert!(xy_movement(&depth.vertices, start, &new).unwrap() > cap);

    let r = is_valid_results(
        &ResultInputs {
            vertices: &depth.vertices,
            yuy: attempt.yuy_data(),
            original: start,
            new: &new,
            factory: None,
            iteration_number: 1,
            num_sections: depth.section_grid.count(),
            scene: &scene.statistics,
            svm: &svm,
            dsm: None,
        },
        &params,
    )
    .unwrap();
    assert!(r.clipped);
    assert_relative_eq!(r.xy_movement, cap, epsilon = 1e-6);
    assert_relative_eq!(xy_movement(&depth.vertices, start, &r.calib).unwrap(), cap, epsilon = 1e-6);
}

#[test]
fn test_feature_vector_matches_result_inputs() {
    let params = AlgoParams::default();
    let attempt = DepthToRgbCalibration::new(disc_scene_inputs(0.5), params).unwrap();
    let outcome = attempt.optimize(None);
    let result = outcome.result.unwrap();
    let stats = &outcome.scene.statistics;

    let features = extract_features(&depth_rgb_autocal::validity::DecisionParams {
        distribution_per_section_depth: stats.depth_section_weights.clone(),
        distribution_per_section_rgb: stats.rgb_section_weights.clone(),
        edge_weights_per_dir: stats.weights_per_direction,
        initial_cost: result.initial_cost,
        new_cost: result.new_cost,
        xy_movement: result.xy_movement,
        xy_movement_from_origin: result.xy_movement_from_origin,
        improvement_per_section: result.improvement_per_section.clone(),
    });
    assert_eq!(features, result.features);
    let svm = SvmModel::embedded().unwrap();
    assert_relative_eq!(svm.score(&features.to_array()), result.svm_score, epsilon = 1e-12);
}
