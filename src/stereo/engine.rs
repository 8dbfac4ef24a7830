//! Dense matching of a calibrated generalized camera pair.
//!
//! [`EucmStereo`] is built once per pose. Construction precomputes the
//! epipolar curve field and, for every working-grid cell, a
//! [`Correspondence`] record. Each `compute_*` call then reuses those records
//! and the instance-owned buffers:
//!
//! ```text
//! images -> cost volume -> four DP sweeps -> disparity -> distances
//! ```

use crate::camera::{CameraModel, EucmModel};
use crate::depth::DepthMap;
use crate::geometry::QuadraticCurve;
use crate::stereo::cost::{CostVolume, CostVolumeBuilder};
use crate::stereo::reconstruct::{triangulate_rays, PlanePatch};
use crate::stereo::{
    CurveRasterizer, DisparityMap, DisparityOptimizer, EpipolarCurveField, StereoError,
    StereoParameters,
};
use image::{GrayImage, Luma};
use log::{debug, info, trace};
use nalgebra::{DMatrix, Isometry3, UnitQuaternion, Vector2, Vector3};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// What a working-grid cell of image 1 knows about its match in image 2.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    /// Full-image pixel in image 1.
    pub pixel: Vector2<f64>,
    /// Unit viewing ray in camera 1.
    pub ray1: Vector3<f64>,
    /// The same direction expressed in camera 2.
    pub ray2: Vector3<f64>,
    /// Image of the ray's point at infinity in image 2.
    pub pinf: Vector2<f64>,
    pub pinf_px: Vector2<i32>,
    /// Unit image-1 direction in which the pixel's match moves as depth
    /// decreases. `None` where the projection Jacobian is unavailable.
    pub direction: Option<Vector2<f64>>,
    /// Epipolar curve of the ray in image 2.
    pub curve: QuadraticCurve,
}

/// Per-frame working memory, reshaped lazily at the start of every match.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffers {
    pub cost: CostVolume,
    pub optimizer: DisparityOptimizer,
    pub disparity: DisparityMap,
}

impl StereoBuffers {
    pub fn new(params: &StereoParameters) -> Self {
        let mut buffers = StereoBuffers {
            optimizer: DisparityOptimizer::from_params(params),
            ..Default::default()
        };
        buffers.resize(params);
        buffers
    }

    pub fn resize(&mut self, params: &StereoParameters) {
        let (w, h, n) = (params.disp_width, params.disp_height, params.disp_max);
        if self.cost.width() != w || self.cost.height() != h || self.cost.disp_max() != n {
            self.cost.resize(w, h, n);
        }
        if self.disparity.width() != w || self.disparity.height() != h {
            self.disparity.resize(w, h);
        }
    }
}

#[inline]
fn round_pixel(p: &Vector2<f64>) -> Vector2<i32> {
    Vector2::new(p.x.round() as i32, p.y.round() as i32)
}

/// Semi-global matcher along the epipolar curves of two EUCM cameras.
///
/// # Examples
///
/// ```rust
/// use fisheye_stereo::camera::EucmModel;
/// use fisheye_stereo::stereo::{EucmStereo, StereoParameters};
/// use nalgebra::Isometry3;
///
/// let camera = EucmModel::from_generalized(&[0.5, 1.0, 250.0, 250.0, 320.0, 240.0])
///     .with_resolution(640, 480);
/// let pose = Isometry3::translation(0.5, 0.0, 0.0);
/// let stereo = EucmStereo::new(camera.clone(), camera, pose, StereoParameters::default()).unwrap();
///
/// assert_eq!(stereo.params().disp_width, 213);
/// // nothing matched yet: every cell sits at infinity
/// assert_eq!(stereo.distance(100, 80), 100.0);
/// ```
pub struct EucmStereo {
    camera1: Arc<dyn CameraModel>,
    camera2: Arc<dyn CameraModel>,
    t12: Isometry3<f64>,
    params: StereoParameters,
    field: EpipolarCurveField,
    epipole_px: Vector2<i32>,
    records: Vec<Option<Correspondence>>,
    buffers: StereoBuffers,
}

impl EucmStereo {
    /// Prepares matching for the pose `t12` (`X1 = t12 * X2`).
    ///
    /// A zero grid size in `params` is derived from the resolution of
    /// `camera1`.
    ///
    /// # Errors
    ///
    /// * [`StereoError::InvalidParams`]: If the parameters fail validation.
    /// * [`StereoError::ZeroBaseline`]: If the cameras share their centre.
    /// * [`StereoError::EpipoleNotProjectable`]: If camera 1 is invisible to camera 2.
    pub fn new(
        camera1: EucmModel,
        camera2: EucmModel,
        t12: Isometry3<f64>,
        params: StereoParameters,
    ) -> Result<Self, StereoError> {
        camera1.validate_params()?;
        camera2.validate_params()?;
        let resolution = camera1.get_resolution();
        let params = params.with_image_size(resolution.width, resolution.height);
        params.validate()?;

        let start = Instant::now();
        let field =
            EpipolarCurveField::new(&t12, &camera2, params.epipolar_steps, &params.thresholds)?;
        let epipole = field.epipole().ok_or(StereoError::EpipoleNotProjectable)?;
        let epipole_px = round_pixel(&epipole);
        if params.verbosity > 0 {
            info!(
                "EucmStereo: {} epipolar curves in {:?}, epipole {:?}",
                field.steps(),
                start.elapsed(),
                epipole_px
            );
        }

        let camera1: Arc<dyn CameraModel> = Arc::new(camera1);
        let camera2: Arc<dyn CameraModel> = Arc::new(camera2);

        let start = Instant::now();
        let records = compute_correspondences(camera1.as_ref(), camera2.as_ref(), &t12, &field, &params);
        if params.verbosity > 0 {
            let missing = records.iter().filter(|r| r.is_none()).count();
            info!(
                "EucmStereo: {}x{} correspondences in {:?}, {} unreconstructable",
                params.disp_width,
                params.disp_height,
                start.elapsed(),
                missing
            );
        }

        let buffers = StereoBuffers::new(&params);
        Ok(EucmStereo {
            camera1,
            camera2,
            t12,
            params,
            field,
            epipole_px,
            records,
            buffers,
        })
    }

    pub fn params(&self) -> &StereoParameters {
        &self.params
    }

    pub fn pose(&self) -> &Isometry3<f64> {
        &self.t12
    }

    pub fn camera1(&self) -> &Arc<dyn CameraModel> {
        &self.camera1
    }

    pub fn curve_field(&self) -> &EpipolarCurveField {
        &self.field
    }

    /// Rounded epipole in image 2.
    pub fn epipole_px(&self) -> Vector2<i32> {
        self.epipole_px
    }

    /// Record of cell `(u, v)`, `None` when the cell cannot be reconstructed
    /// or lies outside the grid.
    pub fn correspondence(&self, u: usize, v: usize) -> Option<&Correspondence> {
        if u >= self.params.disp_width {
            return None;
        }
        self.records.get(v * self.params.disp_width + u)?.as_ref()
    }

    /// Result of the last match.
    pub fn disparity(&self) -> &DisparityMap {
        &self.buffers.disparity
    }

    pub fn disparity_mut(&mut self) -> &mut DisparityMap {
        &mut self.buffers.disparity
    }

    /// Fused score of every cell of the last match.
    pub fn fused_costs(&self) -> &[i32] {
        self.buffers.disparity.scores()
    }

    /// Raw cost volume of the last match.
    pub fn cost_volume(&self) -> &CostVolume {
        &self.buffers.cost
    }

    fn check_images(&self, img1: &GrayImage, img2: &GrayImage) -> Result<(), StereoError> {
        let expected = self.camera1.get_resolution();
        let (expected_width, expected_height) = if expected.width > 0 && expected.height > 0 {
            (expected.width, expected.height)
        } else {
            img1.dimensions()
        };
        for image in [img1, img2] {
            if image.dimensions() != (expected_width, expected_height) {
                return Err(StereoError::ImageSizeMismatch {
                    expected_width,
                    expected_height,
                    width: image.width(),
                    height: image.height(),
                });
            }
        }
        Ok(())
    }

    fn match_images(&mut self, img1: &GrayImage, img2: &GrayImage) -> Result<(), StereoError> {
        self.check_images(img1, img2)?;
        self.buffers.resize(&self.params);
        let verbosity = self.params.verbosity;

        let start = Instant::now();
        CostVolumeBuilder::new(&self.params, &self.records, self.epipole_px).build(
            img1,
            img2,
            &mut self.buffers.cost,
        );
        if verbosity > 0 {
            info!(
                "EucmStereo: {:?} cost in {:?}",
                self.params.kernel,
                start.elapsed()
            );
        }
        if verbosity > 1 {
            debug!(
                "    cost volume {}x{}x{}",
                self.buffers.cost.width(),
                self.buffers.cost.height(),
                self.buffers.cost.disp_max()
            );
        }

        let start = Instant::now();
        let StereoBuffers {
            cost,
            optimizer,
            disparity,
        } = &mut self.buffers;
        optimizer.optimize(cost, disparity);
        if verbosity > 0 {
            info!("EucmStereo: dynamic programming in {:?}", start.elapsed());
        }
        Ok(())
    }

    /// Matches an image pair and returns the disparity at working resolution.
    pub fn compute_disparity(
        &mut self,
        img1: &GrayImage,
        img2: &GrayImage,
    ) -> Result<GrayImage, StereoError> {
        self.match_images(img1, img2)?;
        Ok(self.buffers.disparity.to_gray_image())
    }

    /// Matches an image pair and returns the distance of every cell.
    pub fn compute_depth(
        &mut self,
        img1: &GrayImage,
        img2: &GrayImage,
    ) -> Result<DepthMap, StereoError> {
        self.match_images(img1, img2)?;
        let start = Instant::now();
        let depth = self.depth_from_disparity();
        if self.params.verbosity > 0 {
            info!("EucmStereo: distances in {:?}", start.elapsed());
        }
        Ok(depth)
    }

    /// Like [`compute_depth`](Self::compute_depth), as a `disp_height × disp_width` matrix.
    pub fn compute_distance_matrix(
        &mut self,
        img1: &GrayImage,
        img2: &GrayImage,
    ) -> Result<DMatrix<f64>, StereoError> {
        Ok(self.compute_depth(img1, img2)?.to_matrix())
    }

    fn empty_depth_map(&self) -> DepthMap {
        DepthMap::new(
            self.camera1.clone(),
            self.params.disp_width,
            self.params.disp_height,
            self.params.u0,
            self.params.v0,
            self.params.scale,
        )
    }

    /// Distances of the current disparity map.
    pub fn depth_from_disparity(&self) -> DepthMap {
        let mut depth = self.empty_depth_map();
        let width = self.params.disp_width;
        depth
            .values_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(v, row)| {
                for (u, value) in row.iter_mut().enumerate() {
                    *value = self.distance(u, v);
                }
            });
        depth
    }

    /// Distance seen by cell `(u, v)` at its current disparity.
    ///
    /// Zero disparity means infinity and gives `max_distance`. A cell that
    /// cannot be triangulated gives 0.
    pub fn distance(&self, u: usize, v: usize) -> f64 {
        let disparity = self.buffers.disparity.disparity(u, v) as i32;
        if disparity <= 0 {
            return self.params.max_distance;
        }
        let Some(record) = self.correspondence(u, v) else {
            return 0.0;
        };
        let mut raster = CurveRasterizer::new(record.pinf_px, self.epipole_px, &record.curve);
        raster.steps(disparity);
        let p2 = Vector2::new(raster.x as f64, raster.y as f64);
        match self.triangulate_ray(&record.ray1, &p2) {
            Ok(point) => point.norm(),
            Err(err) => {
                if self.params.verbosity > 2 {
                    trace!("cell ({u}, {v}) at disparity {disparity}: {err}");
                }
                0.0
            }
        }
    }

    /// Scene point, in camera-1 coordinates, seen at `p1` in image 1 and `p2`
    /// in image 2.
    ///
    /// # Errors
    ///
    /// * [`StereoError::NotReconstructed`]: If either pixel cannot be unprojected.
    /// * [`StereoError::DegenerateTriangulation`]: If the two rays are nearly parallel.
    pub fn triangulate(
        &self,
        p1: &Vector2<f64>,
        p2: &Vector2<f64>,
    ) -> Result<Vector3<f64>, StereoError> {
        let v1 = self
            .camera1
            .unproject(p1)
            .map_err(|_| StereoError::NotReconstructed)?;
        self.triangulate_ray(&v1, p2)
    }

    fn triangulate_ray(
        &self,
        v1: &Vector3<f64>,
        p2: &Vector2<f64>,
    ) -> Result<Vector3<f64>, StereoError> {
        let v2 = self
            .camera2
            .unproject(p2)
            .map_err(|_| StereoError::NotReconstructed)?;
        triangulate_rays(
            v1,
            &(self.t12.rotation * v2),
            &self.t12.translation.vector,
            self.params.thresholds.triangulation_epsilon,
        )
    }

    /// Ground-truth distances of a planar polygon seen by camera 1.
    ///
    /// `camera_plane` maps plane coordinates (plane `z = 0`) into camera 1 and
    /// `polygon` lists the corners in plane coordinates. Cells that miss the
    /// polygon get 0.
    pub fn generate_plane(&self, camera_plane: &Isometry3<f64>, polygon: &[Vector3<f64>]) -> DepthMap {
        if self.params.verbosity > 0 {
            info!("EucmStereo: generate_plane with {} corners", polygon.len());
        }
        let patch = PlanePatch::new(camera_plane, polygon);
        let mut depth = self.empty_depth_map();
        let width = self.params.disp_width;
        depth
            .values_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(v, row)| {
                for (u, value) in row.iter_mut().enumerate() {
                    let pixel = Vector2::new(self.params.u_img(u) as f64, self.params.v_img(v) as f64);
                    *value = self
                        .camera1
                        .unproject(&pixel)
                        .ok()
                        .and_then(|ray| patch.intersect(&ray))
                        .unwrap_or(0.0);
                }
            });
        depth
    }

    /// Draws the epipolar curve of cell `(u, v)` into `out` as 2×2 black dots,
    /// from the infinity point to the epipole. Returns the number of dots.
    pub fn trace_epipolar_curve(&self, u: usize, v: usize, out: &mut GrayImage) -> usize {
        let Some(record) = self.correspondence(u, v) else {
            return 0;
        };
        let count = (record.pinf_px - self.epipole_px).cast::<f64>().norm() as usize;
        let mut raster = CurveRasterizer::new(record.pinf_px, self.epipole_px, &record.curve);
        for _ in 0..count {
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (x, y) = (raster.x + dx, raster.y + dy);
                if x >= 0 && y >= 0 && (x as u32) < out.width() && (y as u32) < out.height() {
                    out.put_pixel(x as u32, y as u32, Luma([0]));
                }
            }
            raster.step();
        }
        count
    }
}

/// Builds the record of every working-grid cell, rows in parallel.
fn compute_correspondences(
    camera1: &dyn CameraModel,
    camera2: &dyn CameraModel,
    t12: &Isometry3<f64>,
    field: &EpipolarCurveField,
    params: &StereoParameters,
) -> Vec<Option<Correspondence>> {
    let r21 = t12.rotation.inverse();
    let baseline = t12.translation.vector.normalize();
    let mut records = vec![None; params.cell_count()];
    records
        .par_chunks_mut(params.disp_width)
        .enumerate()
        .for_each(|(v, row)| {
            for (u, slot) in row.iter_mut().enumerate() {
                let pixel = Vector2::new(params.u_img(u) as f64, params.v_img(v) as f64);
                *slot = correspondence(camera1, camera2, &r21, &baseline, field, pixel);
                if slot.is_none() && params.verbosity > 2 {
                    trace!("cell ({u}, {v}) at {pixel:?} is not reconstructable");
                }
            }
        });
    records
}

fn correspondence(
    camera1: &dyn CameraModel,
    camera2: &dyn CameraModel,
    r21: &UnitQuaternion<f64>,
    baseline: &Vector3<f64>,
    field: &EpipolarCurveField,
    pixel: Vector2<f64>,
) -> Option<Correspondence> {
    let ray1 = camera1.unproject(&pixel).ok()?;
    let ray2 = r21 * ray1;
    let pinf = camera2.project(&ray2).ok()?;
    Some(Correspondence {
        pixel,
        ray1,
        ray2,
        pinf,
        pinf_px: round_pixel(&pinf),
        direction: epipolar_direction(camera1, &ray1, baseline),
        curve: *field.curve_for_ray(&ray1),
    })
}

/// Image-1 direction of `ray` moving against the unit baseline: `-J·t̂`,
/// normalized.
fn epipolar_direction(
    camera: &dyn CameraModel,
    ray: &Vector3<f64>,
    baseline: &Vector3<f64>,
) -> Option<Vector2<f64>> {
    let jacobian = camera.projection_jacobian(ray).ok()?;
    let shift = -(jacobian * baseline);
    let norm = shift.norm();
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    Some(shift / norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera(alpha: f64) -> EucmModel {
        EucmModel::from_generalized(&[alpha, 1.0, 250.0, 250.0, 320.0, 240.0]).with_resolution(640, 480)
    }

    fn small_params() -> StereoParameters {
        StereoParameters {
            u0: 290,
            v0: 210,
            disp_width: 21,
            disp_height: 21,
            ..Default::default()
        }
    }

    fn sideways(params: StereoParameters) -> EucmStereo {
        EucmStereo::new(camera(0.5), camera(0.5), Isometry3::translation(0.5, 0.0, 0.0), params).unwrap()
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            EucmStereo::new(camera(0.5), camera(0.5), Isometry3::identity(), small_params()),
            Err(StereoError::ZeroBaseline)
        ));
        let odd = StereoParameters {
            epipolar_steps: 7,
            ..small_params()
        };
        assert!(matches!(
            EucmStereo::new(camera(0.5), camera(0.5), Isometry3::translation(0.5, 0.0, 0.0), odd),
            Err(StereoError::InvalidParams(_))
        ));
        // camera 1 straight behind a narrow camera 2
        assert!(matches!(
            EucmStereo::new(camera(0.0), camera(0.0), Isometry3::translation(0.0, 0.0, 1.0), small_params()),
            Err(StereoError::EpipoleNotProjectable)
        ));
    }

    #[test]
    fn test_correspondence_records() {
        let stereo = sideways(small_params());
        assert_eq!(stereo.epipole_px(), Vector2::new(-180, 240));

        // grid cell (10, 10) sits on the principal point
        let record = stereo.correspondence(10, 10).unwrap();
        assert_eq!(record.pixel, Vector2::new(320.0, 240.0));
        assert_relative_eq!(record.ray1, Vector3::z(), epsilon = 1e-12);
        assert_eq!(record.pinf_px, Vector2::new(320, 240));
        let dir = record.direction.unwrap();
        assert_relative_eq!(dir, Vector2::new(-1.0, 0.0), epsilon = 1e-12);
        assert!(record.curve.distance_estimate(100.0, 240.0) < 1e-6);
    }

    #[test]
    fn test_distance_sentinels() {
        let mut stereo = sideways(small_params());
        assert_eq!(stereo.distance(10, 10), 100.0);

        *stereo.disparity_mut().disparity_mut(10, 10) = 25;
        let distance = stereo.distance(10, 10);
        // disparity 25 at the centre of a 0.5 baseline is about 5
        assert!(distance > 4.5 && distance < 5.5, "{distance}");

        let depth = stereo.depth_from_disparity();
        assert_eq!(depth.at(0, 0), 100.0);
        assert_relative_eq!(depth.at(10, 10), distance);
    }

    #[test]
    fn test_unreconstructable_cell_gives_zero() {
        // alpha > 0.5 images a disc; the image corners lie outside it
        let params = StereoParameters {
            u0: 1,
            v0: 1,
            disp_width: 4,
            disp_height: 4,
            ..Default::default()
        };
        let mut stereo = EucmStereo::new(
            camera(0.8),
            camera(0.8),
            Isometry3::translation(0.5, 0.0, 0.0),
            params,
        )
        .unwrap();
        assert!(stereo.correspondence(0, 0).is_none());
        *stereo.disparity_mut().disparity_mut(0, 0) = 5;
        assert_eq!(stereo.distance(0, 0), 0.0);
    }

    #[test]
    fn test_triangulate() {
        let stereo = sideways(small_params());
        let cam = camera(0.5);
        let point = Vector3::new(0.2, -0.1, 4.0);
        let p1 = cam.project(&point).unwrap();
        let p2 = cam.project(&(point - Vector3::new(0.5, 0.0, 0.0))).unwrap();
        let x = stereo.triangulate(&p1, &p2).unwrap();
        assert_relative_eq!(x, point, epsilon = 1e-6);

        // the infinity point of a ray is parallel to it
        let centre = Vector2::new(320.0, 240.0);
        assert!(matches!(
            stereo.triangulate(&centre, &centre),
            Err(StereoError::DegenerateTriangulation { .. })
        ));
    }

    #[test]
    fn test_generate_plane() {
        let stereo = sideways(small_params());
        let depth = stereo.generate_plane(&Isometry3::translation(0.0, 0.0, 5.0), &[]);
        assert_relative_eq!(depth.at(10, 10), 5.0, epsilon = 1e-9);
        let ray = stereo.correspondence(0, 0).unwrap().ray1;
        assert_relative_eq!(depth.at(0, 0), 5.0 / ray.z, epsilon = 1e-9);
    }

    #[test]
    fn test_trace_epipolar_curve() {
        let stereo = sideways(small_params());
        let mut canvas = GrayImage::from_pixel(640, 480, Luma([255]));
        assert_eq!(stereo.trace_epipolar_curve(21, 0, &mut canvas), 0);
        let count = stereo.trace_epipolar_curve(10, 10, &mut canvas);
        assert_eq!(count, 500);
        assert_eq!(canvas.get_pixel(320, 240)[0], 0);
        assert_eq!(canvas.get_pixel(0, 241)[0], 0);
        assert_eq!(canvas.get_pixel(100, 239)[0], 255);
        assert_eq!(canvas.get_pixel(100, 300)[0], 255);
    }

    #[test]
    fn test_image_size_mismatch() {
        let mut stereo = sideways(small_params());
        let img = GrayImage::new(640, 480);
        let small = GrayImage::new(320, 240);
        assert!(matches!(
            stereo.compute_disparity(&img, &small),
            Err(StereoError::ImageSizeMismatch { width: 320, height: 240, .. })
        ));
    }

    #[test]
    fn test_blank_images_stay_at_infinity() {
        let mut stereo = sideways(small_params());
        let img = GrayImage::from_pixel(640, 480, Luma([90]));
        let disparity = stereo.compute_disparity(&img, &img).unwrap();
        assert_eq!(disparity.dimensions(), (21, 21));
        assert!(disparity.as_raw().iter().all(|d| *d == 0));
        assert!(stereo.fused_costs().iter().all(|c| *c == 0));
    }
}
