//! Four-direction dynamic programming over the cost volume.
//!
//! Each sweep runs a 1-D smoothness recursion along one grid direction,
//! left-to-right, right-to-left, top-down and bottom-up. The four tableaus are
//! summed per cell and the raw cost counted once:
//! `score = TL + TR + TT + TB - 2·cost`. Every cell takes the disparity of
//! its lowest score.

use crate::stereo::cost::CostVolume;
use crate::stereo::StereoParameters;
use image::{GrayImage, Luma};
use rayon::prelude::*;

/// Direction of a dynamic programming sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Left,
    Right,
    Top,
    Bottom,
}

/// Winning disparity and fused score of every working-grid cell.
#[derive(Debug, Clone, Default)]
pub struct DisparityMap {
    width: usize,
    height: usize,
    disparity: Vec<u8>,
    score: Vec<i32>,
}

impl DisparityMap {
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.disparity.clear();
        self.disparity.resize(width * height, 0);
        self.score.clear();
        self.score.resize(width * height, 0);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn disparity(&self, u: usize, v: usize) -> u8 {
        self.disparity[v * self.width + u]
    }

    #[inline]
    pub fn disparity_mut(&mut self, u: usize, v: usize) -> &mut u8 {
        &mut self.disparity[v * self.width + u]
    }

    #[inline]
    pub fn score(&self, u: usize, v: usize) -> i32 {
        self.score[v * self.width + u]
    }

    /// Row-major disparities.
    pub fn disparities(&self) -> &[u8] {
        &self.disparity
    }

    /// Row-major fused scores.
    pub fn scores(&self) -> &[i32] {
        &self.score
    }

    /// Disparity image at working resolution, one gray level per step.
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |u, v| {
            Luma([self.disparity(u as usize, v as usize)])
        })
    }
}

/// One recursion step: `out[d] = err[d] + min(in[d], in[d±1] + λstep, min(in) + λjump)`.
fn dynamic_step(input: &[i32], error: &[u8], output: &mut [i32], lambda_step: i32, lambda_jump: i32) {
    let n = input.len();
    let best = input.iter().copied().fold(i32::MAX, i32::min);
    for d in 0..n {
        let mut value = input[d].min(best + lambda_jump);
        if d > 0 {
            value = value.min(input[d - 1] + lambda_step);
        }
        if d + 1 < n {
            value = value.min(input[d + 1] + lambda_step);
        }
        output[d] = value + error[d] as i32;
    }
}

/// Owns the four tableaus and reuses them between frames.
#[derive(Debug, Clone, Default)]
pub struct DisparityOptimizer {
    lambda_step: i32,
    lambda_jump: i32,
    width: usize,
    height: usize,
    disp_max: usize,
    left: Vec<i32>,
    right: Vec<i32>,
    top: Vec<i32>,
    bottom: Vec<i32>,
}

impl DisparityOptimizer {
    pub fn new(lambda_step: i32, lambda_jump: i32) -> Self {
        DisparityOptimizer {
            lambda_step,
            lambda_jump,
            ..Default::default()
        }
    }

    pub fn from_params(params: &StereoParameters) -> Self {
        Self::new(params.lambda_step, params.lambda_jump)
    }

    pub fn tableau(&self, sweep: Sweep) -> &[i32] {
        match sweep {
            Sweep::Left => &self.left,
            Sweep::Right => &self.right,
            Sweep::Top => &self.top,
            Sweep::Bottom => &self.bottom,
        }
    }

    fn resize(&mut self, volume: &CostVolume) {
        self.width = volume.width();
        self.height = volume.height();
        self.disp_max = volume.disp_max();
        let len = self.width * self.height * self.disp_max;
        for tableau in [&mut self.left, &mut self.right, &mut self.top, &mut self.bottom] {
            tableau.clear();
            tableau.resize(len, 0);
        }
    }

    /// Runs the four sweeps concurrently, then fuses them into `out`.
    pub fn optimize(&mut self, volume: &CostVolume, out: &mut DisparityMap) {
        self.resize(volume);
        out.resize(self.width, self.height);
        if volume.as_slice().is_empty() {
            return;
        }

        let (ls, lj) = (self.lambda_step, self.lambda_jump);
        let DisparityOptimizer {
            left,
            right,
            top,
            bottom,
            ..
        } = self;
        rayon::join(
            || {
                rayon::join(
                    || horizontal_sweep(left, volume, false, ls, lj),
                    || horizontal_sweep(right, volume, true, ls, lj),
                )
            },
            || {
                rayon::join(
                    || vertical_sweep(top, volume, false, ls, lj),
                    || vertical_sweep(bottom, volume, true, ls, lj),
                )
            },
        );
        self.fuse(volume, out);
    }

    fn fuse(&self, volume: &CostVolume, out: &mut DisparityMap) {
        let costs = volume.as_slice();
        let n = self.disp_max;
        for cell in 0..self.width * self.height {
            let base = cell * n;
            let mut best_score = i32::MAX;
            let mut best_disp = 0usize;
            for d in 0..n {
                let i = base + d;
                let score = self.left[i] + self.right[i] + self.top[i] + self.bottom[i]
                    - 2 * costs[i] as i32;
                if score < best_score {
                    best_score = score;
                    best_disp = d;
                }
            }
            out.disparity[cell] = best_disp as u8;
            out.score[cell] = best_score;
        }
    }
}

/// Sweeps every grid row, rows in parallel.
fn horizontal_sweep(
    tableau: &mut [i32],
    volume: &CostVolume,
    reverse: bool,
    lambda_step: i32,
    lambda_jump: i32,
) {
    let n = volume.disp_max();
    let width = volume.width();
    let row_len = width * n;
    let costs = volume.as_slice();
    tableau
        .par_chunks_mut(row_len)
        .zip(costs.par_chunks(row_len))
        .for_each(|(row, cost_row)| {
            let first = if reverse { width - 1 } else { 0 };
            row[first * n..(first + 1) * n]
                .iter_mut()
                .zip(&cost_row[first * n..(first + 1) * n])
                .for_each(|(t, c)| *t = *c as i32);
            for k in 1..width {
                let (prev, cur, u) = if reverse {
                    let u = width - 1 - k;
                    let (head, tail) = row.split_at_mut((u + 1) * n);
                    (&tail[..n], &mut head[u * n..], u)
                } else {
                    let u = k;
                    let (head, tail) = row.split_at_mut(u * n);
                    (&head[(u - 1) * n..], &mut tail[..n], u)
                };
                dynamic_step(prev, &cost_row[u * n..(u + 1) * n], cur, lambda_step, lambda_jump);
            }
        });
}

/// Sweeps every grid column, one row after the other.
fn vertical_sweep(
    tableau: &mut [i32],
    volume: &CostVolume,
    reverse: bool,
    lambda_step: i32,
    lambda_jump: i32,
) {
    let n = volume.disp_max();
    let height = volume.height();
    let row_len = volume.width() * n;
    let costs = volume.as_slice();

    let first = if reverse { height - 1 } else { 0 };
    tableau[first * row_len..(first + 1) * row_len]
        .iter_mut()
        .zip(&costs[first * row_len..(first + 1) * row_len])
        .for_each(|(t, c)| *t = *c as i32);

    for k in 1..height {
        let (prev_row, cur_row, v) = if reverse {
            let v = height - 1 - k;
            let (head, tail) = tableau.split_at_mut((v + 1) * row_len);
            (&tail[..row_len], &mut head[v * row_len..], v)
        } else {
            let v = k;
            let (head, tail) = tableau.split_at_mut(v * row_len);
            (&head[(v - 1) * row_len..], &mut tail[..row_len], v)
        };
        let cost_row = &costs[v * row_len..(v + 1) * row_len];
        for ((prev, cur), cost) in prev_row
            .chunks(n)
            .zip(cur_row.chunks_mut(n))
            .zip(cost_row.chunks(n))
        {
            dynamic_step(prev, cost, cur, lambda_step, lambda_jump);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random costs.
    fn noisy_volume(width: usize, height: usize, disp_max: usize) -> CostVolume {
        let mut volume = CostVolume::new(width, height, disp_max);
        let mut state = 12345u32;
        for v in 0..height {
            for u in 0..width {
                for c in volume.cell_mut(u, v) {
                    state = state.wrapping_mul(1103515245).wrapping_add(12345);
                    *c = (state >> 16) as u8;
                }
            }
        }
        volume
    }

    fn fused_score(opt: &DisparityOptimizer, volume: &CostVolume, u: usize, v: usize, d: usize) -> i32 {
        let i = (v * volume.width() + u) * volume.disp_max() + d;
        opt.tableau(Sweep::Left)[i]
            + opt.tableau(Sweep::Right)[i]
            + opt.tableau(Sweep::Top)[i]
            + opt.tableau(Sweep::Bottom)[i]
            - 2 * volume.as_slice()[i] as i32
    }

    #[test]
    fn test_dynamic_step() {
        let input = [10, 3, 40, 50];
        let error = [1, 1, 1, 1];
        let mut output = [0; 4];
        dynamic_step(&input, &error, &mut output, 5, 20);
        // d0: min(10, 3 + 5, 3 + 20); d2: min(40, 3 + 5, 50 + 5, 23)
        assert_eq!(output, [9, 4, 9, 24]);
    }

    #[test]
    fn test_single_disparity() {
        let mut volume = CostVolume::new(3, 2, 1);
        volume.cell_mut(1, 1)[0] = 7;
        let mut optimizer = DisparityOptimizer::new(5, 32);
        let mut map = DisparityMap::default();
        optimizer.optimize(&volume, &mut map);
        assert!(map.disparities().iter().all(|d| *d == 0));
    }

    #[test]
    fn test_ties_pick_smallest_disparity() {
        let volume = CostVolume::new(4, 3, 6);
        let mut optimizer = DisparityOptimizer::new(5, 32);
        let mut map = DisparityMap::default();
        optimizer.optimize(&volume, &mut map);
        assert!(map.disparities().iter().all(|d| *d == 0));
        assert!(map.scores().iter().all(|s| *s == 0));
    }

    #[test]
    fn test_smoothing_overrides_outlier() {
        let mut volume = CostVolume::new(5, 1, 8);
        for u in 0..5 {
            let cell = volume.cell_mut(u, 0);
            cell.fill(50);
            cell[2] = 0;
        }
        let outlier = volume.cell_mut(2, 0);
        outlier.fill(50);
        outlier[2] = 10;
        outlier[6] = 0;

        let mut map = DisparityMap::default();
        let mut smooth = DisparityOptimizer::new(5, 32);
        smooth.optimize(&volume, &mut map);
        assert_eq!(map.disparity(2, 0), 2);
        assert_eq!(map.score(2, 0), 20);

        let mut free = DisparityOptimizer::new(5, 0);
        free.optimize(&volume, &mut map);
        assert_eq!(map.disparity(2, 0), 6);
    }

    #[test]
    fn test_tableaus_grow_with_jump_penalty() {
        let volume = noisy_volume(9, 7, 12);
        let mut low = DisparityOptimizer::new(5, 10);
        let mut high = DisparityOptimizer::new(5, 40);
        let mut map = DisparityMap::default();
        low.optimize(&volume, &mut map);
        high.optimize(&volume, &mut map);
        for sweep in [Sweep::Left, Sweep::Right, Sweep::Top, Sweep::Bottom] {
            for (a, b) in low.tableau(sweep).iter().zip(high.tableau(sweep)) {
                assert!(a <= b, "{sweep:?}: {a} > {b}");
            }
        }
    }

    #[test]
    fn test_selected_disparity_is_optimal() {
        let volume = noisy_volume(11, 8, 16);
        let mut optimizer = DisparityOptimizer::new(5, 32);
        let mut map = DisparityMap::default();
        optimizer.optimize(&volume, &mut map);
        for v in 0..8 {
            for u in 0..11 {
                let best = map.disparity(u, v) as usize;
                let score = fused_score(&optimizer, &volume, u, v, best);
                assert_eq!(score, map.score(u, v));
                for d in 0..16 {
                    let other = fused_score(&optimizer, &volume, u, v, d);
                    assert!(score <= other);
                    if d < best {
                        assert!(score < other, "tie at ({u}, {v}) must keep the smaller disparity");
                    }
                }
            }
        }
    }

    #[test]
    fn test_sweep_boundaries_hold_raw_cost() {
        let volume = noisy_volume(6, 5, 4);
        let mut optimizer = DisparityOptimizer::new(5, 32);
        let mut map = DisparityMap::default();
        optimizer.optimize(&volume, &mut map);
        let n = 4;
        let raw = |u: usize, v: usize| -> Vec<i32> { volume.cell(u, v).iter().map(|c| *c as i32).collect() };
        let at = |sweep: Sweep, u: usize, v: usize| -> Vec<i32> {
            let i = (v * 6 + u) * n;
            optimizer.tableau(sweep)[i..i + n].to_vec()
        };
        assert_eq!(at(Sweep::Left, 0, 3), raw(0, 3));
        assert_eq!(at(Sweep::Right, 5, 3), raw(5, 3));
        assert_eq!(at(Sweep::Top, 2, 0), raw(2, 0));
        assert_eq!(at(Sweep::Bottom, 2, 4), raw(2, 4));
    }
}
