//! Auto-Calibration Replay
//!
//! Replays one recorded attempt: raw depth, IR and two color frames plus a
//! camera YAML with the depth (`cam0`) and RGB (`cam1`) blocks. Prints the
//! status and, on success, writes the refined RGB calibration.
//!
//! Frame files are headerless little-endian dumps: depth and color as
//! 16-bit samples, IR as 8-bit samples.
//!
//! Usage:
//! ```bash
//! cargo run --example autocal_replay -- \
//!   --cameras samples/cameras.yaml \
//!   --depth z.bin --ir i.bin --yuy yuy.bin --prev-yuy yuy_prev.bin \
//!   --output refined.yaml
//! ```

use clap::Parser;
use depth_rgb_autocal::calibration::yaml::{load_camera_yaml, save_camera_yaml};
use depth_rgb_autocal::{AlgoParams, CalibrationInputs, CalibrationStatus, DepthToRgbCalibration, SvmModel};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::info;
use std::fs;
use std::path::PathBuf;

/// Depth-to-RGB auto-calibration replay tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Camera YAML with `cam0` (depth) and `cam1` (RGB) blocks
    #[arg(short = 'c', long)]
    cameras: PathBuf,

    #[arg(long)]
    depth: PathBuf,

    #[arg(long)]
    ir: PathBuf,

    #[arg(long)]
    yuy: PathBuf,

    #[arg(long)]
    prev_yuy: PathBuf,

    /// Depth units per raw sample
    #[arg(long, default_value = "0.001")]
    depth_units: f64,

    /// Thermal scale applied to the RGB focal length
    #[arg(long)]
    thermal_scale: Option<f64>,

    /// Number of earlier calibrations on this unit
    #[arg(long, default_value = "0")]
    iteration_number: usize,

    /// Algorithm params, YAML or JSON
    #[arg(short = 'p', long)]
    params: Option<PathBuf>,

    /// SVM model JSON
    #[arg(long)]
    svm: Option<PathBuf>,

    /// Directory for the attempt's diagnostics dump
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Write logs to this directory as well as the terminal
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Where to write the refined RGB calibration
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn path_str(path: &std::path::Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.to_str().ok_or_else(|| format!("Invalid path: {path:?}").into())
}

fn read_u16_frame(path: &std::path::Path) -> Result<Vec<u16>, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    if bytes.len() % 2 != 0 {
        return Err(format!("{path:?} has an odd number of bytes").into());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect())
}

fn init_logging(log_dir: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    match log_dir {
        Some(dir) => {
            Logger::try_with_str("info")?
                .log_to_file(
                    FileSpec::default()
                        .directory(dir)
                        .suppress_timestamp()
                        .suffix("log"),
                )
                .duplicate_to_stderr(Duplicate::All)
                .format_for_files(detailed_format)
                .format_for_stderr(colored_detailed_format)
                .start()?;
        }
        None => env_logger::init(),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_ref())?;

    let cameras = path_str(&cli.cameras)?;
    let (depth_k, _) = load_camera_yaml(cameras, "cam0")?;
    let (rgb_k, extrinsics) = load_camera_yaml(cameras, "cam1")?;
    info!("depth {}x{}, rgb {}x{}", depth_k.width, depth_k.height, rgb_k.width, rgb_k.height);

    let params = match &cli.params {
        Some(p) => AlgoParams::load(path_str(p)?)?,
        None => AlgoParams::default(),
    };

    let mut inputs = CalibrationInputs::new(
        read_u16_frame(&cli.depth)?,
        depth_k,
        cli.depth_units,
        fs::read(&cli.ir)?,
        read_u16_frame(&cli.yuy)?,
        read_u16_frame(&cli.prev_yuy)?,
        rgb_k,
        extrinsics,
    );
    inputs.thermal_scale = cli.thermal_scale;
    inputs.iteration_number = cli.iteration_number;
    inputs.debug_dir = cli.debug_dir.clone();
    if let Some(svm) = &cli.svm {
        inputs.svm = Some(SvmModel::load(path_str(svm)?)?);
    }

    let attempt = DepthToRgbCalibration::new(inputs, params)?;
    let mut on_iteration = |data: &depth_rgb_autocal::IterationData| {
        info!(
            "iteration {}: cost {:.6} step {:.3e} back-tracks {}",
            data.iteration, data.cost, data.step_size, data.back_tracks
        );
    };
    let outcome = attempt.optimize(Some(&mut on_iteration));

    println!("Status: {}", outcome.status);
    for failure in &outcome.scene.failures {
        println!("  scene check failed: {failure}");
    }
    if let Some(result) = &outcome.result {
        println!(
            "  cost {:.6} -> {:.6}, movement {:.3} px, svm score {:.4}",
            result.initial_cost, result.new_cost, result.xy_movement, result.svm_score
        );
        if let Some(failure) = &result.failure {
            println!("  result check failed: {failure}");
        }
    }
    if let Some(e) = &outcome.error {
        println!("  error: {e}");
    }

    if outcome.status == CalibrationStatus::Successful {
        if let (Some(k), Some(rt), Some(out)) = (&outcome.raw_rgb_intrinsics, &outcome.extrinsics, &cli.output) {
            save_camera_yaml(path_str(out)?, "cam1", k, rt)?;
            println!("Refined calibration written to {out:?}");
        }
    }
    Ok(())
}
