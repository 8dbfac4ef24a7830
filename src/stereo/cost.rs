//! Disparity cost volume.
//!
//! For every working-grid cell, image 1 is compared with image 2 sampled along
//! the cell's epipolar curve, starting at the infinite-depth projection and
//! walking toward the epipole. Disparity `d` is the number of rasterizer steps
//! away from infinity. Costs are bytes, lower is better.

use crate::stereo::engine::Correspondence;
use crate::stereo::{CurveRasterizer, MatchingKernel, StereoParameters};
use image::GrayImage;
use nalgebra::Vector2;
use rayon::prelude::*;

/// Clamp of the photometric bias of the box kernel.
const BOX_MAX_BIAS: i32 = 10;

/// `[row][col][disparity]` byte costs.
#[derive(Debug, Clone, Default)]
pub struct CostVolume {
    width: usize,
    height: usize,
    disp_max: usize,
    data: Vec<u8>,
}

impl CostVolume {
    pub fn new(width: usize, height: usize, disp_max: usize) -> Self {
        CostVolume {
            width,
            height,
            disp_max,
            data: vec![0; width * height * disp_max],
        }
    }

    /// Reshapes the volume, reusing the allocation when possible.
    pub fn resize(&mut self, width: usize, height: usize, disp_max: usize) {
        self.width = width;
        self.height = height;
        self.disp_max = disp_max;
        self.data.clear();
        self.data.resize(width * height * disp_max, 0);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn disp_max(&self) -> usize {
        self.disp_max
    }

    /// Costs of all disparities of cell `(u, v)`.
    #[inline]
    pub fn cell(&self, u: usize, v: usize) -> &[u8] {
        let start = (v * self.width + u) * self.disp_max;
        &self.data[start..start + self.disp_max]
    }

    #[inline]
    pub fn cell_mut(&mut self, u: usize, v: usize) -> &mut [u8] {
        let start = (v * self.width + u) * self.disp_max;
        &mut self.data[start..start + self.disp_max]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn row_len(&self) -> usize {
        self.width * self.disp_max
    }
}

/// Summed-area table with a zero first row and column.
///
/// `sum(x, y, w, h)` is the sum of the `w × h` block whose top left pixel is
/// `(x, y)`.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    stride: usize,
    data: Vec<u32>,
}

impl IntegralImage {
    pub fn new(width: usize, height: usize, pixels: &[u8]) -> Self {
        let stride = width + 1;
        let mut data = vec![0u32; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0u32;
            for x in 0..width {
                row_sum += pixels[y * width + x] as u32;
                data[(y + 1) * stride + x + 1] = data[y * stride + x + 1] + row_sum;
            }
        }
        IntegralImage { stride, data }
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        Self::new(image.width() as usize, image.height() as usize, image.as_raw())
    }

    #[inline]
    pub fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> i32 {
        let at = |xx: usize, yy: usize| self.data[yy * self.stride + xx] as i64;
        (at(x + w, y + h) + at(x, y) - at(x + w, y) - at(x, y + h)) as i32
    }
}

/// Pixel value, or `None` off the image.
#[inline]
fn pixel(image: &GrayImage, x: i32, y: i32) -> Option<u8> {
    if x < 0 || y < 0 || x >= image.width() as i32 || y >= image.height() as i32 {
        return None;
    }
    Some(image.as_raw()[y as usize * image.width() as usize + x as usize])
}

/// Bilinear intensity at a sub-pixel position, rounded to the nearest integer.
///
/// Positions whose 2×2 support leaves the image read as 0.
pub fn bilinear(image: &GrayImage, x: f64, y: f64) -> i32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (w, h) = (image.width() as f64, image.height() as f64);
    if !(x0 >= 0.0 && y0 >= 0.0 && x0 < w - 1.0 && y0 < h - 1.0) {
        return 0;
    }
    let (ix, iy) = (x0 as i32, y0 as i32);
    let fx = x - x0;
    let fy = y - y0;
    let at = |dx: i32, dy: i32| pixel(image, ix + dx, iy + dy).unwrap_or(0) as f64;
    let top = at(0, 0) * (1.0 - fx) + at(1, 0) * fx;
    let bottom = at(0, 1) * (1.0 - fx) + at(1, 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round() as i32
}

/// Fills a [`CostVolume`] from the per-cell correspondence records.
pub struct CostVolumeBuilder<'a> {
    params: &'a StereoParameters,
    records: &'a [Option<Correspondence>],
    epipole: Vector2<i32>,
}

impl<'a> CostVolumeBuilder<'a> {
    /// `records` is row-major over the working grid; `epipole` is the rounded
    /// epipole in image 2, the target of every curve walk.
    pub fn new(
        params: &'a StereoParameters,
        records: &'a [Option<Correspondence>],
        epipole: Vector2<i32>,
    ) -> Self {
        CostVolumeBuilder {
            params,
            records,
            epipole,
        }
    }

    pub fn build(&self, img1: &GrayImage, img2: &GrayImage, volume: &mut CostVolume) {
        volume.resize(
            self.params.disp_width,
            self.params.disp_height,
            self.params.disp_max,
        );
        match self.params.kernel {
            MatchingKernel::CurvePatch => self.curve_patch(img1, img2, volume),
            MatchingKernel::BoxPatch => self.box_patch(img1, img2, volume),
        }
    }

    fn rasterizer(&self, record: &Correspondence) -> CurveRasterizer {
        CurveRasterizer::new(record.pinf_px, self.epipole, &record.curve)
    }

    /// Weighted comparison of two 1-D profiles.
    ///
    /// The image-1 descriptor is sampled along the local epipolar direction,
    /// the image-2 band along the epipolar curve. Weights fall off linearly
    /// from the centre.
    pub fn curve_patch(&self, img1: &GrayImage, img2: &GrayImage, volume: &mut CostVolume) {
        let params = self.params;
        let width = params.disp_width;
        let disp_max = params.disp_max;
        let half_length = (params.scale as i32 - 1).max(1);
        let length = (2 * half_length + 1) as usize;

        let weights: Vec<i32> = (0..length as i32)
            .map(|i| (half_length + 1) - (i - half_length).abs())
            .collect();
        let normalizer: i32 = weights.iter().sum();

        let row_len = volume.row_len();
        volume
            .data
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(v, row)| {
                let mut descriptor = vec![0i32; length];
                let mut band = vec![0i32; disp_max + length - 1];
                for u in 0..width {
                    let out = &mut row[u * disp_max..(u + 1) * disp_max];
                    let Some(record) = &self.records[v * width + u] else {
                        out.fill(0);
                        continue;
                    };
                    let Some(dir) = record.direction else {
                        out.fill(0);
                        continue;
                    };

                    for (i, value) in descriptor.iter_mut().enumerate() {
                        let shifted = record.pixel + (i as f64 - half_length as f64) * dir;
                        *value = bilinear(img1, shifted.x, shifted.y);
                    }

                    let mut raster = self.rasterizer(record);
                    raster.steps(-half_length);
                    for value in band.iter_mut() {
                        *value = pixel(img2, raster.x, raster.y).unwrap_or(0) as i32;
                        raster.step();
                    }

                    let sum1: i32 = descriptor.iter().sum();
                    let mut sum2: i32 = band[..length].iter().sum();
                    for d in 0..disp_max {
                        let bias = ((sum2 - sum1) / length as i32)
                            .clamp(-params.max_bias, params.max_bias);
                        let acc: i32 = descriptor
                            .iter()
                            .zip(&band[d..d + length])
                            .zip(&weights)
                            .map(|((a, b), w)| (a - b + bias).abs() * w)
                            .sum();
                        out[d] = (acc / normalizer).min(u8::MAX as i32) as u8;
                        if d + length < band.len() {
                            sum2 += band[d + length] - band[d];
                        }
                    }
                }
            });
    }

    /// Sum of absolute differences of `scale × scale` blocks.
    ///
    /// Image 2 is remapped into a straight band, one column per rasterizer
    /// step. The band is laid out as if the curve ran toward decreasing image
    /// columns, so the kernel is only accurate for motions where it does.
    /// Cells whose image-1 block leaves the image cost 0.
    pub fn box_patch(&self, img1: &GrayImage, img2: &GrayImage, volume: &mut CostVolume) {
        let params = self.params;
        let width = params.disp_width;
        let disp_max = params.disp_max;
        let scale = params.scale as usize;
        let scale_i = params.scale as i32;
        let scale_squared = scale_i * scale_i;
        let hblock = scale_i / 2;
        let radius = (scale_i - 1) as f64 / 2.0;
        let center_shift = if scale % 2 == 1 { 1.0 } else { 0.5 };
        let (img_w, img_h) = (img1.width() as i32, img1.height() as i32);

        let integral1 = IntegralImage::from_gray(img1);
        let band_cols = scale + disp_max - 1;

        let row_len = volume.row_len();
        volume
            .data
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(v, row)| {
                let mut remap = vec![0u8; scale * band_cols];
                for u in 0..width {
                    let out = &mut row[u * disp_max..(u + 1) * disp_max];
                    let u1 = params.u_img(u) - hblock;
                    let v1 = params.v_img(v) - hblock;
                    let record = match &self.records[v * width + u] {
                        Some(record)
                            if u1 >= 0
                                && v1 >= 0
                                && u1 + scale_i <= img_w
                                && v1 + scale_i <= img_h =>
                        {
                            record
                        }
                        _ => {
                            out.fill(0);
                            continue;
                        }
                    };
                    let (u1, v1) = (u1 as usize, v1 as usize);

                    remap.fill(0);
                    let mut raster = self.rasterizer(record);

                    // columns right of the infinity point
                    let u_base = (raster.x as f64 + center_shift).round() as i32;
                    let v_base = (raster.y as f64 - radius).round() as i32;
                    let dst_base = disp_max + hblock as usize;
                    for i in 0..hblock {
                        let col = dst_base + i as usize;
                        if col >= band_cols {
                            break;
                        }
                        copy_column(img2, u_base + i, v_base, scale, &mut remap, band_cols, col);
                    }

                    // one column per step toward the epipole
                    for col in (0..disp_max + hblock as usize).rev() {
                        let u2 = (raster.x as f64 + center_shift - 1.0).round() as i32;
                        let v_base = (raster.y as f64 - radius).round() as i32;
                        copy_column(img2, u2, v_base, scale, &mut remap, band_cols, col);
                        raster.step();
                    }

                    let integral2 = IntegralImage::new(band_cols, scale, &remap);
                    let block1 = integral1.sum(u1, v1, scale, scale);
                    for (d, cost) in out.iter_mut().enumerate() {
                        let i = disp_max - 1 - d;
                        let block2 = integral2.sum(i, 0, scale, scale);
                        let bias = ((block2 - block1) / scale_squared)
                            .clamp(-BOX_MAX_BIAS, BOX_MAX_BIAS);
                        let mut acc = 0i32;
                        for y in 0..scale {
                            let src = &img1.as_raw()[(v1 + y) * img_w as usize + u1..][..scale];
                            let dst = &remap[y * band_cols + i..][..scale];
                            for (a, b) in src.iter().zip(dst) {
                                acc += (*a as i32 - *b as i32 + bias).abs();
                            }
                        }
                        *cost = (acc / scale_squared).min(u8::MAX as i32) as u8;
                    }
                }
            });
    }
}

/// Copies `scale` pixels of image column `u2` starting at row `v_base` into
/// band column `col`, skipping off-image pixels.
fn copy_column(
    image: &GrayImage,
    u2: i32,
    v_base: i32,
    scale: usize,
    remap: &mut [u8],
    band_cols: usize,
    col: usize,
) {
    for j in 0..scale {
        if let Some(value) = pixel(image, u2, v_base + j as i32) {
            remap[j * band_cols + col] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::QuadraticCurve;
    use nalgebra::Vector3;

    fn texture(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            image::Luma([((x * 37 + y * 91 + (x * x) % 17 * 11 + (x * y) % 13 * 7) % 256) as u8])
        })
    }

    fn params(kernel: MatchingKernel) -> StereoParameters {
        StereoParameters {
            disp_width: 4,
            disp_height: 3,
            disp_max: 8,
            u0: 20,
            v0: 20,
            kernel,
            ..Default::default()
        }
    }

    /// Record of a pure horizontal motion: the match of image-1 pixel `x`
    /// sits at image-2 pixel `x - disparity`.
    fn horizontal_record(params: &StereoParameters, u: usize, v: usize) -> Option<Correspondence> {
        let x = params.u_img(u);
        let y = params.v_img(v);
        Some(Correspondence {
            pixel: Vector2::new(x as f64, y as f64),
            ray1: Vector3::z(),
            ray2: Vector3::z(),
            pinf: Vector2::new(x as f64, y as f64),
            pinf_px: Vector2::new(x, y),
            direction: Some(Vector2::new(-1.0, 0.0)),
            curve: QuadraticCurve::line(0.0, 1.0, -(y as f64)),
        })
    }

    fn shifted_pair(shift: u32) -> (GrayImage, GrayImage) {
        let img1 = texture(80, 60);
        let img2 = GrayImage::from_fn(80, 60, |x, y| *img1.get_pixel((x + shift).min(79), y));
        (img1, img2)
    }

    fn argmin(costs: &[u8]) -> usize {
        let mut best = 0;
        for (d, c) in costs.iter().enumerate() {
            if *c < costs[best] {
                best = d;
            }
        }
        best
    }

    #[test]
    fn test_integral_image_sums() {
        let pixels: Vec<u8> = (0..12).collect();
        let integral = IntegralImage::new(4, 3, &pixels);
        assert_eq!(integral.sum(0, 0, 4, 3), (0..12).sum::<i32>());
        // rows 1..3, cols 1..3: 5 + 6 + 9 + 10
        assert_eq!(integral.sum(1, 1, 2, 2), 30);
        assert_eq!(integral.sum(3, 2, 1, 1), 11);
    }

    #[test]
    fn test_bilinear() {
        let img = GrayImage::from_fn(4, 4, |x, _| image::Luma([(x * 10) as u8]));
        assert_eq!(bilinear(&img, 1.0, 1.0), 10);
        assert_eq!(bilinear(&img, 1.5, 2.25), 15);
        assert_eq!(bilinear(&img, 1.26, 0.0), 13);
        assert_eq!(bilinear(&img, -0.5, 1.0), 0);
        assert_eq!(bilinear(&img, 3.0, 1.0), 0);
    }

    #[test]
    fn test_kernels_find_horizontal_shift() {
        let (img1, img2) = shifted_pair(5);
        for kernel in [MatchingKernel::CurvePatch, MatchingKernel::BoxPatch] {
            let params = params(kernel);
            let records: Vec<_> = (0..params.cell_count())
                .map(|i| horizontal_record(&params, i % params.disp_width, i / params.disp_width))
                .collect();
            let epipole = Vector2::new(-500, params.v_img(0));
            let mut volume = CostVolume::default();
            CostVolumeBuilder::new(&params, &records, epipole).build(&img1, &img2, &mut volume);

            assert_eq!(volume.width(), 4);
            assert_eq!(volume.disp_max(), 8);
            for v in 0..params.disp_height {
                for u in 0..params.disp_width {
                    let costs = volume.cell(u, v);
                    assert_eq!(costs[5], 0, "{kernel:?} cell ({u}, {v})");
                    assert_eq!(argmin(costs), 5, "{kernel:?} cell ({u}, {v}): {costs:?}");
                }
            }
        }
    }

    #[test]
    fn test_missing_record_costs_nothing() {
        let (img1, img2) = shifted_pair(2);
        for kernel in [MatchingKernel::CurvePatch, MatchingKernel::BoxPatch] {
            let params = params(kernel);
            let mut records: Vec<_> = (0..params.cell_count())
                .map(|i| horizontal_record(&params, i % params.disp_width, i / params.disp_width))
                .collect();
            records[1] = None;
            if let Some(record) = records[2].as_mut() {
                record.direction = None;
            }
            let mut volume = CostVolume::default();
            CostVolumeBuilder::new(&params, &records, Vector2::new(-500, 20))
                .build(&img1, &img2, &mut volume);
            assert!(volume.cell(1, 0).iter().all(|c| *c == 0));
            if kernel == MatchingKernel::CurvePatch {
                assert!(volume.cell(2, 0).iter().all(|c| *c == 0));
            }
            assert!(volume.cell(0, 0).iter().any(|c| *c > 0));
        }
    }

    #[test]
    fn test_box_patch_outside_image_costs_nothing() {
        let (img1, img2) = shifted_pair(1);
        let params = StereoParameters {
            u0: 0,
            ..params(MatchingKernel::BoxPatch)
        };
        let records: Vec<_> = (0..params.cell_count())
            .map(|i| horizontal_record(&params, i % params.disp_width, i / params.disp_width))
            .collect();
        let mut volume = CostVolume::default();
        CostVolumeBuilder::new(&params, &records, Vector2::new(-500, 20)).build(&img1, &img2, &mut volume);
        // the block centred on column 0 starts at column -1
        assert!(volume.cell(0, 0).iter().all(|c| *c == 0));
        assert!(volume.cell(1, 0).iter().any(|c| *c > 0));
    }
}
