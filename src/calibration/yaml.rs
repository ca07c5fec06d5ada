//! Camera YAML files.
//!
//! Layout (one block per sensor, `cam0` = depth, `cam1` = RGB by convention):
//!
//! ```yaml
//! cam1:
//!   camera_model: pinhole
//!   distortion_model: brown_conrady
//!   intrinsics: [fx, fy, ppx, ppy]
//!   distortion_coeffs: [k1, k2, p1, p2, k3]
//!   resolution: [width, height]
//!   rotation: [r00, r01, r02, r10, r11, r12, r20, r21, r22]
//!   translation: [t1, t2, t3]
//! ```
//!
//! `distortion_model`, `distortion_coeffs`, `rotation` and `translation` are
//! optional; missing extrinsics load as identity.

use super::{validation, CalibrationError, DistortionModel, Extrinsics, Intrinsics};
use nalgebra::{Matrix3, Vector3};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

fn f64_list(node: &Yaml, key: &str, len: usize) -> Result<Vec<f64>, CalibrationError> {
    let list = node[key].as_vec().ok_or_else(|| {
        CalibrationError::InvalidParams(format!("YAML missing '{key}' or not an array"))
    })?;
    if list.len() != len {
        return Err(CalibrationError::InvalidParams(format!(
            "'{key}' must have {len} entries, found {}",
            list.len()
        )));
    }
    list.iter()
        .enumerate()
        .map(|(i, v)| {
            // integers are accepted where floats are expected
            v.as_f64().or_else(|| v.as_i64().map(|x| x as f64)).ok_or_else(|| {
                CalibrationError::InvalidParams(format!("Invalid {key}[{i}]: not a number"))
            })
        })
        .collect()
}

/// Loads one camera block from a YAML file.
///
/// # Errors
///
/// * [`CalibrationError::IOError`] if the file cannot be read.
/// * [`CalibrationError::YamlError`] if the document cannot be parsed.
/// * [`CalibrationError::InvalidParams`] if a required key is missing or malformed.
/// * Intrinsics validation errors.
pub fn load_camera_yaml(path: &str, camera: &str) -> Result<(Intrinsics, Extrinsics), CalibrationError> {
    let contents = fs::read_to_string(path)?;
    let docs = YamlLoader::load_from_str(&contents)?;
    let doc = docs
        .first()
        .ok_or_else(|| CalibrationError::YamlError(format!("{path} is empty")))?;
    let node = &doc[camera];
    if node.is_badvalue() {
        return Err(CalibrationError::InvalidParams(format!(
            "YAML missing camera block '{camera}'"
        )));
    }

    let k = f64_list(node, "intrinsics", 4)?;
    let resolution = f64_list(node, "resolution", 2)?;

    let model = match node["distortion_model"].as_str() {
        None | Some("none") => DistortionModel::None,
        Some("brown_conrady") | Some("radtan") => DistortionModel::BrownConrady,
        Some(other) => {
            return Err(CalibrationError::InvalidParams(format!(
                "Unknown distortion_model '{other}'"
            )))
        }
    };
    let mut coeffs = [0.0; 5];
    if !node["distortion_coeffs"].is_badvalue() {
        coeffs.copy_from_slice(&f64_list(node, "distortion_coeffs", 5)?);
    }

    let intrinsics = Intrinsics {
        width: resolution[0] as u32,
        height: resolution[1] as u32,
        fx: k[0],
        fy: k[1],
        ppx: k[2],
        ppy: k[3],
        model,
        coeffs,
    };
    validation::validate_intrinsics(&intrinsics)?;

    let mut extrinsics = Extrinsics::default();
    if !node["rotation"].is_badvalue() {
        extrinsics.rotation = Matrix3::from_row_slice(&f64_list(node, "rotation", 9)?);
    }
    if !node["translation"].is_badvalue() {
        extrinsics.translation = Vector3::from_row_slice(&f64_list(node, "translation", 3)?);
    }

    Ok((intrinsics, extrinsics))
}

/// Writes one camera block in the layout [`load_camera_yaml`] reads.
pub fn save_camera_yaml(
    path: &str,
    camera: &str,
    intrinsics: &Intrinsics,
    extrinsics: &Extrinsics,
) -> Result<(), CalibrationError> {
    let model = match intrinsics.model {
        DistortionModel::None => "none",
        DistortionModel::BrownConrady => "brown_conrady",
    };
    let r = &extrinsics.rotation;
    let rotation: Vec<f64> = (0..3)
        .flat_map(|row| (0..3).map(move |col| r[(row, col)]))
        .collect();

    let mut block = serde_yaml::Mapping::new();
    block.insert("camera_model".into(), "pinhole".into());
    block.insert("distortion_model".into(), model.into());
    block.insert(
        "intrinsics".into(),
        serde_yaml::to_value(vec![
            intrinsics.fx,
            intrinsics.fy,
            intrinsics.ppx,
            intrinsics.ppy,
        ])?,
    );
    block.insert(
        "distortion_coeffs".into(),
        serde_yaml::to_value(intrinsics.coeffs.to_vec())?,
    );
    block.insert(
        "resolution".into(),
        serde_yaml::to_value(vec![intrinsics.width, intrinsics.height])?,
    );
    block.insert("rotation".into(), serde_yaml::to_value(rotation)?);
    block.insert(
        "translation".into(),
        serde_yaml::to_value(extrinsics.translation.iter().copied().collect::<Vec<f64>>())?,
    );
    let mut doc = serde_yaml::Mapping::new();
    doc.insert(camera.into(), serde_yaml::Value::Mapping(block));

    let yaml_string = serde_yaml::to_string(&doc)?;
    let mut file = fs::File::create(path)?;
    file.write_all(yaml_string.as_bytes())?;
    Ok(())
}
