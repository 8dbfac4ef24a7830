//! Per-cell metric distances on the working grid.

use crate::camera::CameraModel;
use crate::stereo::StereoError;
use image::{GrayImage, Luma};
use nalgebra::{DMatrix, Vector2, Vector3};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Distances along the viewing rays of a sub-sampled grid of camera pixels.
///
/// Cell `(u, v)` holds the distance seen through full-image pixel
/// `(u0 + u·scale, v0 + v·scale)` of `camera`. A zero distance marks a cell
/// that could not be reconstructed.
#[derive(Clone)]
pub struct DepthMap {
    camera: Arc<dyn CameraModel>,
    width: usize,
    height: usize,
    u0: u32,
    v0: u32,
    scale: u32,
    values: Vec<f64>,
}

impl fmt::Debug for DepthMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DepthMap [{}x{} u0: {} v0: {} scale: {} camera: {:?}]",
            self.width, self.height, self.u0, self.v0, self.scale, self.camera
        )
    }
}

impl DepthMap {
    /// Zero-filled map.
    pub fn new(
        camera: Arc<dyn CameraModel>,
        width: usize,
        height: usize,
        u0: u32,
        v0: u32,
        scale: u32,
    ) -> Self {
        DepthMap {
            camera,
            width,
            height,
            u0,
            v0,
            scale,
            values: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn camera(&self) -> &Arc<dyn CameraModel> {
        &self.camera
    }

    #[inline]
    pub fn at(&self, u: usize, v: usize) -> f64 {
        self.values[v * self.width + u]
    }

    #[inline]
    pub fn at_mut(&mut self, u: usize, v: usize) -> &mut f64 {
        &mut self.values[v * self.width + u]
    }

    /// Row-major distances.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Full-image pixel of cell `(u, v)`.
    pub fn pixel(&self, u: usize, v: usize) -> Vector2<f64> {
        Vector2::new(
            (self.u0 as usize + u * self.scale as usize) as f64,
            (self.v0 as usize + v * self.scale as usize) as f64,
        )
    }

    /// Distance of the cell nearest to a full-image pixel, if any cell is.
    pub fn nearest(&self, x: f64, y: f64) -> Option<f64> {
        let u = ((x - self.u0 as f64) / self.scale as f64).round();
        let v = ((y - self.v0 as f64) / self.scale as f64).round();
        if u < 0.0 || v < 0.0 || u >= self.width as f64 || v >= self.height as f64 {
            return None;
        }
        Some(self.at(u as usize, v as usize))
    }

    /// Scene point of cell `(u, v)` in camera coordinates.
    ///
    /// `None` for unreconstructed cells.
    pub fn point(&self, u: usize, v: usize) -> Option<Vector3<f64>> {
        let distance = self.at(u, v);
        if distance <= 0.0 {
            return None;
        }
        let ray = self.camera.unproject(&self.pixel(u, v)).ok()?;
        Some(ray * distance)
    }

    /// Distances as a `height × width` matrix.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.height, self.width, &self.values)
    }

    /// Gray rendering where 255 is at or beyond `max_distance` and 0 is
    /// unreconstructed or touching the camera.
    pub fn to_gray_image(&self, max_distance: f64) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |u, v| {
            let ratio = (self.at(u as usize, v as usize) / max_distance).clamp(0.0, 1.0);
            Luma([(ratio * 255.0).round() as u8])
        })
    }

    /// Writes one `u,v,x,y,distance` record per cell.
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), StereoError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["u", "v", "x", "y", "distance"])?;
        for v in 0..self.height {
            for u in 0..self.width {
                let pixel = self.pixel(u, v);
                writer.write_record(&[
                    u.to_string(),
                    v.to_string(),
                    pixel.x.to_string(),
                    pixel.y.to_string(),
                    self.at(u, v).to_string(),
                ])?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
