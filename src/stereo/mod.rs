//! Semi-global block matching for non-rectified wide-angle image pairs.
//!
//! The pipeline, leaf first:
//!
//! 1. [`EpipolarCurveField`] precomputes one implicit quadratic curve per
//!    epipolar plane bin, once per relative pose.
//! 2. [`CurveRasterizer`] walks such a curve pixel by pixel in the second image.
//! 3. [`cost`] fills the disparity cost volume with one of two
//!    [`MatchingKernel`]s.
//! 4. [`DisparityOptimizer`] aggregates the volume with four dynamic
//!    programming sweeps and fuses them.
//! 5. [`EucmStereo`] triangulates the winning disparities into distances.

pub mod config;
pub mod cost;
pub mod engine;
pub mod epipolar;
pub mod optimizer;
pub mod rasterizer;
pub mod reconstruct;

pub use config::{MatchingKernel, StereoParameters, StereoThresholds};
pub use engine::{Correspondence, EucmStereo};
pub use epipolar::EpipolarCurveField;
pub use optimizer::{DisparityMap, DisparityOptimizer};
pub use rasterizer::CurveRasterizer;
pub use reconstruct::triangulate_rays;

use crate::camera::CameraModelError;

#[derive(thiserror::Error, Debug)]
pub enum StereoError {
    #[error("Invalid stereo parameters: {0}")]
    InvalidParams(String),
    #[error("Baseline is zero, the epipolar geometry is undefined")]
    ZeroBaseline,
    #[error("Epipole cannot be projected into the second camera")]
    EpipoleNotProjectable,
    #[error("Image size mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ImageSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
    #[error("Pixel cannot be reconstructed")]
    NotReconstructed,
    #[error("Rays are nearly parallel (determinant {determinant:e})")]
    DegenerateTriangulation { determinant: f64 },
    #[error("Camera model error: {0}")]
    Camera(#[from] CameraModelError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
