//! Camera capability used by the stereo engine.
//!
//! The matcher never depends on a concrete projection model. It consumes the
//! [`CameraModel`] trait: projection of 3D points, unprojection of pixels to
//! rays, and the projection Jacobian. Two implementations are provided:
//! [`EucmModel`] (the generalized model the epipolar curves are derived for) and
//! [`PinholeModel`].

use nalgebra::{Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod eucm;
pub mod pinhole;

pub use eucm::EucmModel;
pub use pinhole::PinholeModel;

/// Focal lengths and principal point, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Image size in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the capability set the stereo engine needs from a camera.
///
/// Implementors must be thread-safe: per-pixel reconstruction and cost
/// computation run on a rayon pool and share the camera by reference.
pub trait CameraModel: Send + Sync + fmt::Debug {
    /// Project a 3D point in camera coordinates to pixel coordinates.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject pixel coordinates to a unit-length viewing ray.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Jacobian of [`CameraModel::project`] with respect to the 3D point.
    fn projection_jacobian(
        &self,
        point_3d: &Vector3<f64>,
    ) -> Result<Matrix2x3<f64>, CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    /// Model specific distortion parameters, in the model's own order.
    fn get_distortion(&self) -> Vec<f64>;

    /// Boxed copy of the model, for owners that need their own instance.
    fn clone_box(&self) -> Box<dyn CameraModel>;
}

impl Clone for Box<dyn CameraModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_intrinsics() {
        let good = Intrinsics {
            fx: 250.0,
            fy: 250.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(validation::validate_intrinsics(&good).is_ok());

        let bad_focal = Intrinsics { fx: -1.0, ..good.clone() };
        assert!(matches!(
            validation::validate_intrinsics(&bad_focal),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));

        let bad_center = Intrinsics {
            cy: f64::NAN,
            ..good
        };
        assert!(matches!(
            validation::validate_intrinsics(&bad_center),
            Err(CameraModelError::PrincipalPointMustBeFinite)
        ));
    }

    #[test]
    fn test_boxed_clone_keeps_parameters() {
        let model: Box<dyn CameraModel> = Box::new(EucmModel::from_generalized(&[
            0.5, 1.0, 250.0, 250.0, 320.0, 240.0,
        ]));
        let copy = model.clone();
        assert_eq!(copy.get_intrinsics(), model.get_intrinsics());
        assert_eq!(copy.get_distortion(), vec![0.5, 1.0]);
    }
}
