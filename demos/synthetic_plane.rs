//! Synthetic Plane Stereo Demo
//!
//! Renders a textured plane with two EUCM cameras, matches the pair with both
//! patch kernels and compares the recovered distances with the ground truth.
//!
//! Usage:
//! ```bash
//! cargo run --release --example synthetic_plane -- \
//!   --camera samples/eucm.yaml \
//!   --tx 0.5 --distance 5.0
//! ```

use clap::Parser;
use fisheye_stereo::camera::{CameraModel, EucmModel};
use fisheye_stereo::stereo::{EucmStereo, MatchingKernel, StereoParameters};
use fisheye_stereo::util::{self, distance_statistics};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use image::{GrayImage, Luma};
use log::{error, info};
use nalgebra::{Isometry3, Vector2, Vector3};
use std::path::PathBuf;
use std::time::Instant;

/// Synthetic plane matching tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the EUCM camera YAML file, used for both cameras
    #[arg(short, long, default_value = "samples/eucm.yaml")]
    camera: PathBuf,

    /// Baseline, x component
    #[arg(long, default_value = "0.5", allow_hyphen_values = true)]
    tx: f64,

    /// Baseline, y component
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    ty: f64,

    /// Baseline, z component
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    tz: f64,

    /// Distance of the fronto-parallel plane
    #[arg(short, long, default_value = "5.0")]
    distance: f64,

    /// Directory for the rendered pair and the disparity images
    #[arg(short, long, default_value = "output")]
    output: PathBuf,
}

fn texture(x: f64, y: f64) -> u8 {
    let value = 128.0
        + 50.0 * (5.3 * x + 1.1).sin()
        + 30.0 * (11.7 * x - 3.1 * y).sin()
        + 20.0 * (2.1 * y + 0.4).sin()
        + 15.0 * (23.0 * x + 7.0 * y).sin();
    (value as i32).clamp(0, 255) as u8
}

/// Image of the plane `z = distance` taken from `centre`.
fn render(camera: &EucmModel, centre: &Vector3<f64>, distance: f64) -> GrayImage {
    let resolution = camera.get_resolution();
    GrayImage::from_fn(resolution.width, resolution.height, |x, y| {
        match camera.unproject(&Vector2::new(x as f64, y as f64)) {
            Ok(ray) if ray.z > 1e-6 => {
                let lambda = (distance - centre.z) / ray.z;
                Luma([texture(centre.x + lambda * ray.x, centre.y + lambda * ray.y)])
            }
            _ => Luma([0]),
        }
    })
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
    let camera_path = cli.camera.to_str().ok_or("Invalid camera path string")?;
    let camera = EucmModel::load_from_yaml(camera_path)?;
    info!("Camera: {:?}", camera);

    let baseline = Vector3::new(cli.tx, cli.ty, cli.tz);
    let img1 = render(&camera, &Vector3::zeros(), cli.distance);
    let img2 = render(&camera, &baseline, cli.distance);
    util::ensure_output_dir(&cli.output)?;
    img1.save(cli.output.join("left.png"))?;
    img2.save(cli.output.join("right.png"))?;

    let pose = Isometry3::translation(baseline.x, baseline.y, baseline.z);
    let plane = Isometry3::translation(0.0, 0.0, cli.distance);

    for kernel in [MatchingKernel::CurvePatch, MatchingKernel::BoxPatch] {
        let params = StereoParameters {
            kernel,
            verbosity: 1,
            ..Default::default()
        };
        let start = Instant::now();
        let mut stereo = match EucmStereo::new(camera.clone(), camera.clone(), pose, params) {
            Ok(stereo) => stereo,
            Err(e) => {
                error!("Cannot set up the matcher: {}", e);
                return Err(e.into());
            }
        };
        let depth = stereo.compute_depth(&img1, &img2)?;
        info!("{:?}: matched in {:?}", kernel, start.elapsed());

        let (u, v) = (depth.width() / 2, depth.height() / 2);
        let truth = stereo.generate_plane(&plane, &[]);
        info!(
            "{:?}: centre cell ({}, {}) at {:.4}, ground truth {:.4}",
            kernel,
            u,
            v,
            depth.at(u, v),
            truth.at(u, v)
        );
        match distance_statistics(&depth, stereo.params().max_distance) {
            Ok(stats) => info!("{:?}: {:?}", kernel, stats),
            Err(e) => error!("{:?}: {}", kernel, e),
        }

        let name = format!("disparity_{:?}.png", kernel).to_lowercase();
        let disparity = stereo.disparity().to_gray_image();
        let path = cli.output.join(name);
        let path_str = path.to_str().ok_or("Invalid output path string")?;
        util::save_disparity_image(&disparity, stereo.params().disp_max, path_str)?;
        info!("Saved {}", path_str);
    }

    Ok(())
}
