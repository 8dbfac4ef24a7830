//! Matching parameters and their YAML/JSON persistence.

use crate::stereo::StereoError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

/// Rays whose normal-equation determinant falls below this are treated as parallel.
pub const TRIANGULATION_EPSILON: f64 = 1e-10;
/// Rays this close to the baseline direction map to curve bin 0.
pub const DIRECTION_EPSILON: f64 = 1e-4;
/// Below this ratio an epipolar conic is replaced by a straight line.
pub const LINE_RATIO: f64 = 0.5;

/// Which patch shape is compared along the epipolar curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingKernel {
    /// Weighted 1-D descriptor sampled along the local epipolar direction.
    #[default]
    CurvePatch,
    /// Square `scale × scale` block, remapped along the curve.
    BoxPatch,
}

/// Numerical thresholds of the geometric stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoThresholds {
    pub triangulation_epsilon: f64,
    pub direction_epsilon: f64,
    pub line_ratio: f64,
}

impl Default for StereoThresholds {
    fn default() -> Self {
        StereoThresholds {
            triangulation_epsilon: TRIANGULATION_EPSILON,
            direction_epsilon: DIRECTION_EPSILON,
            line_ratio: LINE_RATIO,
        }
    }
}

/// Parameters of the matcher.
///
/// Disparities are estimated on a sub-sampled working grid: cell `(u, v)` sits
/// on full-image pixel `(u0 + u·scale, v0 + v·scale)`.
///
/// ```rust
/// use fisheye_stereo::stereo::StereoParameters;
///
/// let params = StereoParameters::default().with_image_size(640, 480);
/// assert_eq!(params.disp_width, 213);
/// assert_eq!(params.u_img(2), 7);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoParameters {
    /// Grid step and patch side, in pixels.
    pub scale: u32,
    /// Full-image column of the first grid cell.
    pub u0: u32,
    /// Full-image row of the first grid cell.
    pub v0: u32,
    /// Grid width in cells; 0 means "derive from the image size".
    pub disp_width: usize,
    /// Grid height in cells; 0 means "derive from the image size".
    pub disp_height: usize,
    /// Number of disparity hypotheses per cell.
    pub disp_max: usize,
    /// Penalty for a ±1 disparity change between neighbouring cells.
    pub lambda_step: i32,
    /// Penalty for any larger disparity change.
    pub lambda_jump: i32,
    /// Clamp of the photometric bias of the curve kernel.
    pub max_bias: i32,
    /// Distance reported for zero disparity.
    pub max_distance: f64,
    pub verbosity: u8,
    /// Number of epipolar curve bins, must be even.
    pub epipolar_steps: usize,
    pub kernel: MatchingKernel,
    pub thresholds: StereoThresholds,
}

impl Default for StereoParameters {
    fn default() -> Self {
        StereoParameters {
            scale: 3,
            u0: 1,
            v0: 1,
            disp_width: 0,
            disp_height: 0,
            disp_max: 48,
            lambda_step: 5,
            lambda_jump: 32,
            max_bias: 10,
            max_distance: 100.0,
            verbosity: 0,
            epipolar_steps: 2000,
            kernel: MatchingKernel::CurvePatch,
            thresholds: StereoThresholds::default(),
        }
    }
}

impl StereoParameters {
    /// Full-image column of grid column `u`.
    #[inline]
    pub fn u_img(&self, u: usize) -> i32 {
        self.u0 as i32 + u as i32 * self.scale as i32
    }

    /// Full-image row of grid row `v`.
    #[inline]
    pub fn v_img(&self, v: usize) -> i32 {
        self.v0 as i32 + v as i32 * self.scale as i32
    }

    /// Number of cells in the working grid.
    pub fn cell_count(&self) -> usize {
        self.disp_width * self.disp_height
    }

    /// Fills a zero `disp_width`/`disp_height` from the image size.
    ///
    /// The grid is clipped so that every `scale × scale` block centred on a
    /// cell stays inside the image.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        let fit = |size: u32, origin: u32| -> usize {
            let scale = self.scale.max(1);
            if size < origin + scale {
                0
            } else {
                ((size - origin - scale) / scale + 1) as usize
            }
        };
        if self.disp_width == 0 {
            self.disp_width = fit(width, self.u0);
        }
        if self.disp_height == 0 {
            self.disp_height = fit(height, self.v0);
        }
        self
    }

    /// Checks the parameters for values the matcher cannot work with.
    ///
    /// # Errors
    ///
    /// * [`StereoError::InvalidParams`] naming the first offending field.
    pub fn validate(&self) -> Result<(), StereoError> {
        let invalid = |msg: &str| Err(StereoError::InvalidParams(msg.to_string()));
        if self.scale == 0 {
            return invalid("scale must be at least 1");
        }
        if self.disp_max == 0 || self.disp_max > 256 {
            return invalid("disp_max must be in [1, 256]");
        }
        if self.epipolar_steps == 0 || self.epipolar_steps % 2 != 0 {
            return invalid("epipolar_steps must be even and positive");
        }
        if self.disp_width == 0 || self.disp_height == 0 {
            return invalid("working grid is empty");
        }
        if self.lambda_step < 0 || self.lambda_jump < 0 || self.max_bias < 0 {
            return invalid("penalties and max_bias must be non-negative");
        }
        if self.max_distance.is_nan() || self.max_distance <= 0.0 {
            return invalid("max_distance must be positive");
        }
        Ok(())
    }

    pub fn load_from_yaml(path: &str) -> Result<Self, StereoError> {
        let contents = fs::read_to_string(path)?;
        let params: StereoParameters = serde_yaml::from_str(&contents)?;
        Ok(params)
    }

    pub fn load_from_json(path: &str) -> Result<Self, StereoError> {
        let contents = fs::read_to_string(path)?;
        let params: StereoParameters = serde_json::from_str(&contents)?;
        Ok(params)
    }

    pub fn save_to_yaml(&self, path: &str) -> Result<(), StereoError> {
        let yaml_string = serde_yaml::to_string(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }
}
