use crate::depth::DepthMap;
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Ensure the output directory exists
pub fn ensure_output_dir(output_dir: &Path) -> Result<(), UtilError> {
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| {
            UtilError::InvalidParams(format!("Failed to create output directory: {e}"))
        })?;
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Image sizes differ: {0}x{1} vs {2}x{3}")]
    SizeMismatch(u32, u32, u32, u32),
    #[error("No valid distances")]
    NoValidDistances,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

/// Summary of the reconstructed distances of a [`DepthMap`].
#[derive(Clone, Serialize, Deserialize)]
pub struct DistanceStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Cells with a positive distance below the far limit.
    pub valid: usize,
    pub total: usize,
}

impl fmt::Debug for DistanceStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Distances [ min: {:.4}, max: {:.4}, mean: {:.4}, median: {:.4}, valid: {}/{} ]",
            self.min, self.max, self.mean, self.median, self.valid, self.total
        )
    }
}

/// Statistics over cells whose distance is in `(0, far)`.
///
/// Zero marks a failed reconstruction and `far` the zero-disparity sentinel;
/// both are left out.
pub fn distance_statistics(depth: &DepthMap, far: f64) -> Result<DistanceStatistics, UtilError> {
    let mut values: Vec<f64> = depth
        .values()
        .iter()
        .copied()
        .filter(|d| *d > 0.0 && *d < far)
        .collect();
    if values.is_empty() {
        return Err(UtilError::NoValidDistances);
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let median = if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    };
    Ok(DistanceStatistics {
        min: values[0],
        max: values[n - 1],
        mean: values.iter().sum::<f64>() / n as f64,
        median,
        valid: n,
        total: depth.values().len(),
    })
}

/// Load an image from file and convert it to 8-bit grayscale
///
/// # Arguments
///
/// * `image_path` - Path to the image file
pub fn load_gray_image(image_path: &str) -> Result<GrayImage, UtilError> {
    let img = image::open(image_path)
        .map_err(|e| UtilError::InvalidParams(format!("Failed to load image: {e}")))?;

    Ok(img.to_luma8())
}

/// Checks that a stereo pair has matching sizes.
pub fn check_same_size(img1: &GrayImage, img2: &GrayImage) -> Result<(), UtilError> {
    if img1.dimensions() != img2.dimensions() {
        return Err(UtilError::SizeMismatch(
            img1.width(),
            img1.height(),
            img2.width(),
            img2.height(),
        ));
    }
    Ok(())
}

/// Stretches disparities `[0, disp_max)` over the full gray range.
pub fn stretch_disparity(disparity: &GrayImage, disp_max: usize) -> GrayImage {
    let top = disp_max.saturating_sub(1).max(1) as u32;
    GrayImage::from_fn(disparity.width(), disparity.height(), |x, y| {
        let d = disparity.get_pixel(x, y)[0] as u32;
        Luma([(d.min(top) * 255 / top) as u8])
    })
}

/// Save a disparity image, stretched for viewing
///
/// # Arguments
///
/// * `disparity` - Working-resolution disparity image
/// * `disp_max` - Number of disparity hypotheses
/// * `path` - Output file, format chosen by extension
pub fn save_disparity_image(
    disparity: &GrayImage,
    disp_max: usize,
    path: &str,
) -> Result<(), UtilError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            ensure_output_dir(parent)?;
        }
    }
    stretch_disparity(disparity, disp_max)
        .save(path)
        .map_err(|e| UtilError::InvalidParams(format!("Failed to save disparity image: {e}")))?;
    Ok(())
}
