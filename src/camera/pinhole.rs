//! Implements the Pinhole camera model.
//!
//! This module provides the [`PinholeModel`] struct, a distortion-free camera
//! adhering to the [`CameraModel`] trait ([`crate::camera`]). A pinhole camera is
//! the `alpha = 0` member of the EUCM family, so it converts losslessly into an
//! [`EucmModel`] for epipolar curve construction.

use crate::camera::{validation, CameraModel, CameraModelError, EucmModel, Intrinsics, Resolution};
use nalgebra::{DVector, Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Represents a Pinhole camera model.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{DVector, Vector3};
/// use fisheye_stereo::camera::{CameraModel, PinholeModel};
///
/// let params = DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0]); // fx, fy, cx, cy
/// let model = PinholeModel::new(&params).unwrap();
///
/// let point_2d = model.project(&Vector3::new(0.1, 0.2, 1.0)).unwrap();
/// assert!((point_2d.x - 370.0).abs() < 1e-6);
/// assert!((point_2d.y - 340.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] from `[fx, fy, cx, cy]`.
    ///
    /// The resolution is initialized to 0x0.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
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
        };

        model.validate_params()?;

        Ok(model)
    }
}

impl From<&PinholeModel> for EucmModel {
    fn from(pinhole: &PinholeModel) -> Self {
        EucmModel {
            intrinsics: pinhole.intrinsics.clone(),
            resolution: pinhole.resolution.clone(),
            alpha: 0.0,
            beta: 1.0,
        }
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point: `u = fx * X / Z + cx`, `v = fy * Y / Z + cy`.
    ///
    /// Points projecting outside the image are still returned; the stereo
    /// engine needs curve anchors that may lie beyond the image border.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If `Z` is too close to zero or negative.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let u: f64 = self.intrinsics.fx * point_3d.x / point_3d.z + self.intrinsics.cx;
        let v: f64 = self.intrinsics.fy * point_3d.y / point_3d.z + self.intrinsics.cy;

        Ok(Vector2::new(u, v))
    }

    /// Unprojects a pixel to the normalized ray `(mx, my, 1) / ‖(mx, my, 1)‖`.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let mx: f64 = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let my: f64 = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        let r2: f64 = mx * mx + my * my;

        let norm: f64 = (1.0 + r2).sqrt();
        let norm_inv: f64 = 1.0 / norm;

        Ok(Vector3::new(mx * norm_inv, my * norm_inv, norm_inv))
    }

    fn projection_jacobian(
        &self,
        point_3d: &Vector3<f64>,
    ) -> Result<Matrix2x3<f64>, CameraModelError> {
        let (x, y, z) = (point_3d.x, point_3d.y, point_3d.z);
        if z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let fx = self.intrinsics.fx;
        let fy = self.intrinsics.fy;
        let zz = z * z;
        Ok(Matrix2x3::new(
            fx / z,
            0.0,
            -x * fx / zz,
            0.0,
            fy / z,
            -y * fy / zz,
        ))
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution.clone()
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        vec![] // Pinhole model has no distortion parameters
    }

    fn clone_box(&self) -> Box<dyn CameraModel> {
        Box::new(self.clone())
    }
}
