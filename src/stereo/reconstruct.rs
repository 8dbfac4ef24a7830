//! Ray triangulation and ray/plane intersection.

use crate::stereo::StereoError;
use nalgebra::{Isometry3, Vector3};

/// Rays grazing a plane closer than this are not intersected.
const MIN_PLANE_INCIDENCE: f64 = 1e-3;

/// Midpoint of the shortest segment between two rays.
///
/// `v1` starts at the origin, `v2` at `t`; both are expressed in the same
/// frame and need not be unit length.
///
/// # Errors
///
/// * [`StereoError::DegenerateTriangulation`]: If `|δ| < epsilon` with
///   `δ = (v1·v2)² - (v1·v1)(v2·v2)`, i.e. the rays are nearly parallel.
pub fn triangulate_rays(
    v1: &Vector3<f64>,
    v2: &Vector3<f64>,
    t: &Vector3<f64>,
    epsilon: f64,
) -> Result<Vector3<f64>, StereoError> {
    let v1v2 = v1.dot(v2);
    let v1v1 = v1.dot(v1);
    let v2v2 = v2.dot(v2);
    let tv1 = t.dot(v1);
    let tv2 = t.dot(v2);
    let delta = -v1v1 * v2v2 + v1v2 * v1v2;
    if delta.abs() < epsilon {
        return Err(StereoError::DegenerateTriangulation { determinant: delta });
    }
    let l1 = (-tv1 * v2v2 + tv2 * v1v2) / delta;
    let l2 = (tv2 * v1v1 - tv1 * v1v2) / delta;
    Ok((v1 * l1 + t + v2 * l2) * 0.5)
}

/// Polygonal patch of a plane, in camera coordinates.
#[derive(Debug, Clone)]
pub struct PlanePatch {
    origin: Vector3<f64>,
    normal: Vector3<f64>,
    corners: Vec<Vector3<f64>>,
}

impl PlanePatch {
    /// `camera_plane` maps plane coordinates into the camera frame; the plane
    /// is `z = 0` of its own frame and `polygon` lists its corners there. An
    /// empty polygon leaves the plane unbounded.
    pub fn new(camera_plane: &Isometry3<f64>, polygon: &[Vector3<f64>]) -> Self {
        PlanePatch {
            origin: camera_plane.translation.vector,
            normal: camera_plane.rotation * Vector3::z(),
            corners: polygon
                .iter()
                .map(|p| camera_plane.transform_vector(p) + camera_plane.translation.vector)
                .collect(),
        }
    }

    /// Distance along a unit camera ray to the patch, or `None` if the ray
    /// misses it or meets the plane at a grazing angle.
    pub fn intersect(&self, ray: &Vector3<f64>) -> Option<f64> {
        let incidence = self.normal.dot(ray);
        if incidence < MIN_PLANE_INCIDENCE {
            return None;
        }
        let n = self.corners.len();
        for i in 0..n {
            let edge_normal = self.corners[i].cross(&self.corners[(i + 1) % n]);
            if ray.dot(&edge_normal) < 0.0 {
                return None;
            }
        }
        Some((ray * (self.origin.dot(&self.normal) / incidence)).norm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parallel_rays_fail() {
        let v = Vector3::new(0.1, -0.2, 1.0);
        let result = triangulate_rays(&v, &(v * 3.0), &Vector3::new(0.5, 0.0, 0.0), 1e-10);
        assert!(matches!(
            result,
            Err(StereoError::DegenerateTriangulation { .. })
        ));
    }

    #[test]
    fn test_intersecting_rays() {
        let point = Vector3::new(0.3, -0.4, 5.0);
        let t = Vector3::new(0.5, 0.1, -0.2);
        let v1 = point.normalize();
        let v2 = (point - t).normalize();
        let x = triangulate_rays(&v1, &v2, &t, 1e-10).unwrap();
        assert_relative_eq!(x, point, epsilon = 1e-9);
    }

    /// Skew rays: the result is the midpoint of the common perpendicular.
    #[test]
    fn test_skew_rays_midpoint() {
        let v1 = Vector3::new(1.0, 0.0, 0.0);
        let v2 = Vector3::new(0.0, 1.0, 0.0);
        let t = Vector3::new(0.0, 0.0, 2.0);
        let x = triangulate_rays(&v1, &v2, &t, 1e-10).unwrap();
        assert_relative_eq!(x, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);

        // lies on both rays up to the half gap
        let on1 = v1 * x.dot(&v1);
        let on2 = t + v2 * (x - t).dot(&v2);
        assert_relative_eq!((x - on1).norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!((x - on2).norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_patch_intersection() {
        let pose = Isometry3::translation(0.0, 0.0, 5.0);
        let square = [
            Vector3::new(-1.0, -1.0, 0.0),
            Vector3::new(1.0, -1.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(-1.0, 1.0, 0.0),
        ];
        let patch = PlanePatch::new(&pose, &square);

        assert_relative_eq!(patch.intersect(&Vector3::z()).unwrap(), 5.0, epsilon = 1e-12);
        let ray = Vector3::new(0.1, 0.1, 1.0).normalize();
        assert_relative_eq!(
            patch.intersect(&ray).unwrap(),
            5.0 / ray.z,
            epsilon = 1e-12
        );
        // outside the square
        assert!(patch.intersect(&Vector3::new(0.5, 0.0, 1.0).normalize()).is_none());
        // behind the camera
        assert!(patch.intersect(&-Vector3::z()).is_none());

        let unbounded = PlanePatch::new(&pose, &[]);
        assert!(unbounded.intersect(&Vector3::new(0.5, 0.0, 1.0).normalize()).is_some());
    }
}
