//! Image Pair Matching Tool
//!
//! Matches a real image pair from two calibrated EUCM cameras and writes the
//! disparity, the distances and the epipolar curve of one cell.
//!
//! The pose maps camera-2 coordinates into camera 1 (`X1 = T12 * X2`) and is
//! given as a translation plus an axis-angle rotation.
//!
//! Usage:
//! ```bash
//! cargo run --release --example match_images -- \
//!   --camera1 samples/eucm.yaml --camera2 samples/eucm.yaml \
//!   --params samples/stereo.yaml \
//!   --image1 left.png --image2 right.png \
//!   --translation 0.5,0,0 --rotation 0,0,0
//! ```

use clap::Parser;
use fisheye_stereo::camera::EucmModel;
use fisheye_stereo::stereo::{EucmStereo, StereoParameters};
use fisheye_stereo::util::{self, distance_statistics};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{info, warn};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use std::path::PathBuf;

/// Stereo matching tool for fisheye image pairs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the first camera YAML file
    #[arg(long)]
    camera1: PathBuf,

    /// Path to the second camera YAML file
    #[arg(long)]
    camera2: PathBuf,

    /// Optional matcher parameters (YAML or JSON)
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// First image
    #[arg(long)]
    image1: PathBuf,

    /// Second image
    #[arg(long)]
    image2: PathBuf,

    /// Translation of T12, as x,y,z
    #[arg(short, long, value_delimiter = ',', num_args = 3, allow_hyphen_values = true)]
    translation: Vec<f64>,

    /// Rotation of T12 as an axis-angle vector x,y,z (radians)
    #[arg(short, long, value_delimiter = ',', num_args = 3, default_value = "0,0,0", allow_hyphen_values = true)]
    rotation: Vec<f64>,

    /// Working cell whose epipolar curve is drawn, as u,v
    #[arg(long, value_delimiter = ',', num_args = 2)]
    trace: Option<Vec<usize>>,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    output: PathBuf,
}

fn load_params(path: &Option<PathBuf>) -> Result<StereoParameters, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(StereoParameters::default());
    };
    let path_str = path.to_str().ok_or("Invalid parameter path string")?;
    let params = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => StereoParameters::load_from_json(path_str)?,
        _ => StereoParameters::load_from_yaml(path_str)?,
    };
    Ok(params)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    let camera1 = EucmModel::load_from_yaml(cli.camera1.to_str().ok_or("Invalid camera1 path")?)?;
    let camera2 = EucmModel::load_from_yaml(cli.camera2.to_str().ok_or("Invalid camera2 path")?)?;
    info!("Camera 1: {:?}", camera1);
    info!("Camera 2: {:?}", camera2);

    let params = load_params(&cli.params)?;
    info!("Parameters: {:?}", params);

    let translation = Translation3::new(cli.translation[0], cli.translation[1], cli.translation[2]);
    let rotation =
        UnitQuaternion::from_scaled_axis(Vector3::new(cli.rotation[0], cli.rotation[1], cli.rotation[2]));
    let pose = Isometry3::from_parts(translation, rotation);
    info!("T12: {}", pose);

    let img1 = util::load_gray_image(cli.image1.to_str().ok_or("Invalid image1 path")?)?;
    let img2 = util::load_gray_image(cli.image2.to_str().ok_or("Invalid image2 path")?)?;
    util::check_same_size(&img1, &img2)?;

    let mut stereo = EucmStereo::new(camera1, camera2, pose, params)?;
    let depth = stereo.compute_depth(&img1, &img2)?;
    match distance_statistics(&depth, stereo.params().max_distance) {
        Ok(stats) => info!("{:?}", stats),
        Err(e) => warn!("{}", e),
    }

    util::ensure_output_dir(&cli.output)?;
    let disparity_path = cli.output.join("disparity.png");
    util::save_disparity_image(
        &stereo.disparity().to_gray_image(),
        stereo.params().disp_max,
        disparity_path.to_str().ok_or("Invalid output path")?,
    )?;
    depth
        .to_gray_image(stereo.params().max_distance)
        .save(cli.output.join("distance.png"))?;
    depth.save_csv(cli.output.join("distance.csv"))?;
    info!("Results written to {:?}", cli.output);

    if let Some(cell) = &cli.trace {
        let mut overlay = img2.clone();
        let dots = stereo.trace_epipolar_curve(cell[0], cell[1], &mut overlay);
        if dots == 0 {
            warn!("Cell ({}, {}) has no epipolar curve", cell[0], cell[1]);
        }
        overlay.save(cli.output.join("epipolar_curve.png"))?;
    }

    Ok(())
}
