//! Extended Unified Camera Model (EUCM) Implementation
//!
//! This module implements the Extended Unified Camera Model (EUCM), which extends
//! the Unified Camera Model (UCM) with an additional parameter for better modeling
//! of wide-angle and fisheye cameras. The model uses two parameters (alpha, beta)
//! to handle the distortion characteristics of such cameras. It adheres to the
//! [`CameraModel`] trait defined in the parent `camera` module ([`crate::camera`]).
//!
//! Under this model the image of a plane through the projection center is a
//! conic, which is what makes the closed-form epipolar curves of
//! [`crate::stereo::EpipolarCurveField`] possible.
//!
//! # References
//!
//! The Extended Unified Camera Model is based on:
//! "A Generic Camera Model and Calibration Method for Conventional, Wide-Angle,
//! and Fish-Eye Lenses" by Bogdan Khomutenko, Gaëtan Garcia, and Philippe Martinet.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use log::info;
use nalgebra::{DVector, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// Denominators below this value are treated as unprojectable.
const PRECISION: f64 = 1e-3;

/// Implements the Extended Unified Camera Model (EUCM) for wide-angle/fisheye lenses.
///
/// The EUCM model represents the camera using standard intrinsic parameters
/// ([`Intrinsics`]: fx, fy, cx, cy), image [`Resolution`], and two distortion
/// parameters: `alpha` and `beta`. With `alpha = 0` the model reduces to a
/// pinhole camera.
///
/// # Examples
///
/// ```rust
/// use fisheye_stereo::camera::{CameraModel, EucmModel};
/// use nalgebra::Vector3;
///
/// // alpha, beta, fu, fv, u0, v0
/// let model = EucmModel::from_generalized(&[0.5, 1.0, 250.0, 250.0, 320.0, 240.0]);
/// let pixel = model.project(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
/// assert!((pixel.x - 320.0).abs() < 1e-9);
/// assert!((pixel.y - 240.0).abs() < 1e-9);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EucmModel {
    /// Camera intrinsic parameters: `fx`, `fy`, `cx`, `cy`.
    pub intrinsics: Intrinsics,
    /// Image resolution as width and height in pixels.
    pub resolution: Resolution,
    /// First distortion parameter, controlling the sphere projection.
    pub alpha: f64,
    /// Second distortion parameter, shaping the projection ellipsoid.
    pub beta: f64,
}

impl EucmModel {
    /// Creates a new [`EucmModel`] from `[fx, fy, cx, cy, alpha, beta]`.
    ///
    /// The resolution is initialized to 0x0 and can be set with
    /// [`EucmModel::with_resolution`].
    ///
    /// # Panics
    ///
    /// Panics if `parameters.len()` is less than 6.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        let model = EucmModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            alpha: parameters[4],
            beta: parameters[5],
        };

        model.validate_params()?;
        info!("new EUCM model is: {:?}", model);
        Ok(model)
    }

    /// Creates a model from the generalized parameter vector
    /// `[alpha, beta, fu, fv, u0, v0]`.
    pub fn from_generalized(params: &[f64; 6]) -> Self {
        EucmModel {
            intrinsics: Intrinsics {
                fx: params[2],
                fy: params[3],
                cx: params[4],
                cy: params[5],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            alpha: params[0],
            beta: params[1],
        }
    }

    /// Returns the parameters as `[alpha, beta, fu, fv, u0, v0]`.
    pub fn generalized_params(&self) -> [f64; 6] {
        [
            self.alpha,
            self.beta,
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
        ]
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution { width, height };
        self
    }

    /// Checks that a point lies in the half-space the model can image.
    ///
    /// The boundary is `z = -w * d` with `w = alpha / (1 - alpha)` for
    /// `alpha <= 0.5` and `w = (1 - alpha) / alpha` otherwise.
    pub fn check_proj_condition(z: f64, d: f64, alpha: f64) -> bool {
        let w = if alpha <= 0.5 {
            alpha / (1.0 - alpha)
        } else {
            (1.0 - alpha) / alpha
        };
        z > -w * d
    }

    /// Checks that a normalized radius lies inside the model's image disc.
    fn check_unproj_condition(r_squared: f64, alpha: f64, beta: f64) -> bool {
        !(alpha > 0.5 && r_squared > 1.0 / (beta * (2.0 * alpha - 1.0)))
    }

    /// Loads [`EucmModel`] parameters from a YAML file.
    ///
    /// The intrinsics array under `cam0` holds `[fx, fy, cx, cy, alpha, beta]`
    /// and `cam0.resolution` holds `[width, height]`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`]: If there's an issue reading the file.
    /// * [`CameraModelError::YamlError`]: If the YAML content is malformed.
    /// * [`CameraModelError::InvalidParams`]: If fields are missing or have the wrong type.
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }

        let doc = &docs[0];

        let intrinsics_yaml_vec = doc["cam0"]["intrinsics"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams(
                "YAML missing 'intrinsics' array under 'cam0'".to_string(),
            )
        })?;
        let resolution_yaml_vec = doc["cam0"]["resolution"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams(
                "YAML missing 'resolution' array under 'cam0'".to_string(),
            )
        })?;

        if intrinsics_yaml_vec.len() < 6 {
            return Err(CameraModelError::InvalidParams(
                "Intrinsics array in YAML must have at least 6 elements (fx, fy, cx, cy, alpha, beta)".to_string()
            ));
        }
        if resolution_yaml_vec.len() < 2 {
            return Err(CameraModelError::InvalidParams(
                "Resolution array in YAML must have at least 2 elements (width, height)"
                    .to_string(),
            ));
        }

        let names = ["fx", "fy", "cx", "cy", "alpha", "beta"];
        let mut values = [0.0; 6];
        for (i, name) in names.iter().enumerate() {
            values[i] = intrinsics_yaml_vec[i].as_f64().ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid {name} in YAML: not a float"))
            })?;
        }

        let width = resolution_yaml_vec[0].as_i64().ok_or_else(|| {
            CameraModelError::InvalidParams("Invalid width in YAML: not an integer".to_string())
        })? as u32;
        let height = resolution_yaml_vec[1].as_i64().ok_or_else(|| {
            CameraModelError::InvalidParams("Invalid height in YAML: not an integer".to_string())
        })? as u32;

        let model = EucmModel {
            intrinsics: Intrinsics {
                fx: values[0],
                fy: values[1],
                cx: values[2],
                cy: values[3],
            },
            resolution: Resolution { width, height },
            alpha: values[4],
            beta: values[5],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Saves the [`EucmModel`] parameters to a YAML file, in the layout read by
    /// [`EucmModel::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::to_value(serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("camera_model".to_string()),
                    serde_yaml::Value::String("eucm".to_string()),
                ),
                (
                    serde_yaml::Value::String("intrinsics".to_string()),
                    serde_yaml::to_value(vec![
                        self.intrinsics.fx,
                        self.intrinsics.fy,
                        self.intrinsics.cx,
                        self.intrinsics.cy,
                        self.alpha,
                        self.beta,
                    ])
                    .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("resolution".to_string()),
                    serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])
                        .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
            ]))
            .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

/// Provides a debug string representation for [`EucmModel`].
impl fmt::Debug for EucmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EUCM [fx: {} fy: {} cx: {} cy: {} alpha: {} beta: {}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.alpha,
            self.beta
        )
    }
}

impl CameraModel for EucmModel {
    /// Projects a 3D point from camera coordinates to 2D image coordinates.
    ///
    /// `u = fx * x / D + cx`, `v = fy * y / D + cy` with
    /// `D = alpha * sqrt(beta * (x² + y²) + z²) + (1 - alpha) * z`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If `D` is too small or the
    ///   point lies outside the projectable half-space.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        let x = point_3d.x;
        let y = point_3d.y;
        let z = point_3d.z;

        let d = (self.beta * (x * x + y * y) + z * z).sqrt();
        let denom = self.alpha * d + (1.0 - self.alpha) * z;

        if denom < PRECISION || !Self::check_proj_condition(z, d, self.alpha) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let projected_x = self.intrinsics.fx * (x / denom) + self.intrinsics.cx;
        let projected_y = self.intrinsics.fy * (y / denom) + self.intrinsics.cy;

        Ok(Vector2::new(projected_x, projected_y))
    }

    /// Unprojects a 2D image point to a unit-length 3D ray.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If the pixel lies outside the
    ///   region the model can unproject.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let alpha = self.alpha;
        let beta = self.beta;

        let mx = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let my = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        let r_squared = mx * mx + my * my;
        let gamma = 1.0 - alpha;
        let num = 1.0 - r_squared * alpha * alpha * beta;
        let det = 1.0 - (alpha - gamma) * beta * r_squared;

        if det < PRECISION || !Self::check_unproj_condition(r_squared, alpha, beta) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let denom = gamma + alpha * det.sqrt();
        let mz = num / denom;
        let norm = (mx * mx + my * my + mz * mz).sqrt();

        Ok(Vector3::new(mx / norm, my / norm, mz / norm))
    }

    fn projection_jacobian(
        &self,
        point_3d: &Vector3<f64>,
    ) -> Result<Matrix2x3<f64>, CameraModelError> {
        let x = point_3d.x;
        let y = point_3d.y;
        let z = point_3d.z;
        let fx = self.intrinsics.fx;
        let fy = self.intrinsics.fy;

        let d = (self.beta * (x * x + y * y) + z * z).sqrt();
        let denom = self.alpha * d + (1.0 - self.alpha) * z;
        if d < f64::EPSILON
            || denom < PRECISION
            || !Self::check_proj_condition(z, d, self.alpha)
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        // partial derivatives of the denominator
        let dd_dx = self.alpha * self.beta * x / d;
        let dd_dy = self.alpha * self.beta * y / d;
        let dd_dz = self.alpha * z / d + (1.0 - self.alpha);
        let denom2 = denom * denom;

        Ok(Matrix2x3::new(
            fx * (1.0 / denom - x * dd_dx / denom2),
            -fx * x * dd_dy / denom2,
            -fx * x * dd_dz / denom2,
            -fy * y * dd_dx / denom2,
            fy * (1.0 / denom - y * dd_dy / denom2),
            -fy * y * dd_dz / denom2,
        ))
    }

    /// Validates the parameters of the [`EucmModel`].
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidParams`]: If `alpha` or `beta` is not finite.
    /// * Errors propagated from [`validation::validate_intrinsics`].
    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;

        if !self.alpha.is_finite() {
            return Err(CameraModelError::InvalidParams(
                "alpha must be finite".to_string(),
            ));
        }

        if !self.beta.is_finite() {
            return Err(CameraModelError::InvalidParams(
                "beta must be finite".to_string(),
            ));
        }

        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution.clone()
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    /// Returns `[alpha, beta]`.
    fn get_distortion(&self) -> Vec<f64> {
        vec![self.alpha, self.beta]
    }

    fn clone_box(&self) -> Box<dyn CameraModel> {
        Box::new(self.clone())
    }
}

/// Unit tests for the [`EucmModel`].
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Wide-angle model used throughout the stereo tests.
    fn get_sample_model() -> EucmModel {
        EucmModel::from_generalized(&[0.5, 1.0, 250.0, 250.0, 320.0, 240.0])
            .with_resolution(640, 480)
    }

    /// Tests `project(unproject(p)) ≈ p` over the interior of the image.
    #[test]
    fn test_eucm_pixel_round_trip() {
        let model = get_sample_model();

        for v in (10..470).step_by(46) {
            for u in (10..630).step_by(31) {
                let pixel = Vector2::new(u as f64, v as f64);
                let ray = model.unproject(&pixel).unwrap();
                assert_relative_eq!(ray.norm(), 1.0, epsilon = 1e-12);

                let back = model.project(&ray).unwrap();
                assert_relative_eq!(back.x, pixel.x, epsilon = 1e-6);
                assert_relative_eq!(back.y, pixel.y, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_eucm_project_unproject() {
        let model = EucmModel::from_generalized(&[1.01674, 0.5, 1313.83, 1313.27, 960.471, 546.981]);

        let point_3d = Vector3::new(0.1, 0.1, 3.0);
        let norm_3d = point_3d.normalize();

        let point_2d = model.project(&point_3d).unwrap();
        assert!(point_2d.x.is_finite() && point_2d.y.is_finite());

        let point_3d_unprojected = model.unproject(&point_2d).unwrap();
        assert_relative_eq!(norm_3d.x, point_3d_unprojected.x, epsilon = 1e-4);
        assert_relative_eq!(norm_3d.y, point_3d_unprojected.y, epsilon = 1e-4);
        assert_relative_eq!(norm_3d.z, point_3d_unprojected.z, epsilon = 1e-4);
    }

    /// A point at 90 degrees from the optical axis is still imaged by a wide-angle model.
    #[test]
    fn test_project_sideways_point() {
        let model = get_sample_model();
        let pixel = model.project(&Vector3::new(-0.5, 0.0, 0.0)).unwrap();
        assert_relative_eq!(pixel.x, -180.0, epsilon = 1e-9);
        assert_relative_eq!(pixel.y, 240.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_point_at_center() {
        let model = get_sample_model();
        let result = model.project(&Vector3::new(0.0, 0.0, 0.0));
        assert!(matches!(result, Err(CameraModelError::PointIsOutSideImage)));
    }

    #[test]
    fn test_project_point_behind_camera() {
        let model = get_sample_model();
        let result = model.project(&Vector3::new(0.0, 0.0, -1.0));
        assert!(matches!(result, Err(CameraModelError::PointIsOutSideImage)));
    }

    /// The analytic Jacobian matches central finite differences.
    #[test]
    fn test_projection_jacobian_matches_finite_differences() {
        let model = EucmModel::from_generalized(&[0.6, 1.2, 300.0, 280.0, 320.0, 240.0]);
        let point = Vector3::new(0.3, -0.2, 1.1);
        let jac = model.projection_jacobian(&point).unwrap();

        let h = 1e-6;
        for k in 0..3 {
            let mut plus = point;
            let mut minus = point;
            plus[k] += h;
            minus[k] -= h;
            let numeric = (model.project(&plus).unwrap() - model.project(&minus).unwrap()) / (2.0 * h);
            assert_relative_eq!(jac[(0, k)], numeric.x, epsilon = 1e-4);
            assert_relative_eq!(jac[(1, k)], numeric.y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_new_from_vector() {
        let params = DVector::from_vec(vec![250.0, 251.0, 320.0, 240.0, 0.5, 1.0]);
        let model = EucmModel::new(&params).unwrap();
        assert_eq!(model.generalized_params(), [0.5, 1.0, 250.0, 251.0, 320.0, 240.0]);
    }

    #[test]
    fn test_validate_params_invalid_alpha() {
        let mut model = get_sample_model();
        model.alpha = f64::NAN;
        assert!(matches!(
            model.validate_params(),
            Err(CameraModelError::InvalidParams(msg)) if msg == "alpha must be finite"
        ));
    }

    #[test]
    fn test_validate_params_invalid_intrinsics() {
        let mut model = get_sample_model();
        model.intrinsics.fx = 0.0;
        assert!(matches!(
            model.validate_params(),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
    }

    #[test]
    fn test_yaml_round_trip() {
        let model = get_sample_model();
        let path = std::env::temp_dir().join("fisheye_stereo_eucm_round_trip.yaml");
        let path = path.to_str().unwrap();

        model.save_to_yaml(path).unwrap();
        let loaded = EucmModel::load_from_yaml(path).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_load_sample_yaml() {
        let model = EucmModel::load_from_yaml("samples/eucm.yaml").unwrap();
        assert_relative_eq!(model.alpha, 0.5);
        assert_relative_eq!(model.beta, 1.0);
        assert_eq!(model.resolution.width, 640);
        assert_eq!(model.resolution.height, 480);
    }
}
