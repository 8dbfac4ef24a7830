//! Fisheye Stereo Library
//!
//! Dense stereo matching for calibrated pairs of wide-angle cameras, without
//! rectification. This library provides:
//! - The Enhanced Unified Camera Model (EUCM) and a pinhole model
//! - Epipolar curves of generalized cameras, precomputed per relative pose
//! - Semi-global matching along those curves with two patch kernels
//! - Triangulation of the matches into per-pixel distances
//!
//! The entry point is [`EucmStereo`].

pub mod camera;
pub mod depth;
pub mod geometry;
pub mod stereo;
pub mod util;

// Re-export commonly used types
pub use camera::{CameraModel, CameraModelError, EucmModel, Intrinsics, PinholeModel, Resolution};
pub use depth::DepthMap;
pub use geometry::QuadraticCurve;
pub use stereo::{
    EucmStereo, MatchingKernel, StereoError, StereoParameters, StereoThresholds,
};
