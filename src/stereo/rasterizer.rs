//! Pixel-by-pixel traversal of an implicit quadratic curve.

use crate::geometry::QuadraticCurve;
use nalgebra::Vector2;

/// Tangents shorter than this are treated as undefined.
const DEGENERATE_TANGENT: f64 = 1e-12;

#[inline]
fn sign(value: f64) -> i32 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

/// Walks a [`QuadraticCurve`] one pixel at a time.
///
/// The travel orientation is fixed at construction so that the walk heads
/// from the start pixel toward the target pixel. Each [`step`](Self::step)
/// advances the major axis of the local tangent by one pixel and the minor
/// axis by zero or one, whichever keeps `|f|` smallest. Ties keep the
/// axis-aligned move. Positions outside any image are produced as is; the
/// caller bounds-checks them.
///
/// ```rust
/// use fisheye_stereo::geometry::QuadraticCurve;
/// use fisheye_stereo::stereo::CurveRasterizer;
/// use nalgebra::Vector2;
///
/// // the row v = 240, walked to the left
/// let row = QuadraticCurve::line(0.0, 1.0, -240.0);
/// let mut raster = CurveRasterizer::new(Vector2::new(300, 240), Vector2::new(-180, 240), &row);
/// raster.steps(480);
/// assert_eq!((raster.x, raster.y), (-180, 240));
/// ```
#[derive(Debug, Clone)]
pub struct CurveRasterizer {
    pub x: i32,
    pub y: i32,
    curve: QuadraticCurve,
    orient: f64,
    last: (i32, i32),
}

impl CurveRasterizer {
    pub fn new(start: Vector2<i32>, target: Vector2<i32>, curve: &QuadraticCurve) -> Self {
        let (gx, gy) = curve.gradient(start.x as f64, start.y as f64);
        let (dx, dy) = (target.x - start.x, target.y - start.y);
        let forward = -gy * dx as f64 + gx * dy as f64;
        let orient = if forward < 0.0 { -1.0 } else { 1.0 };
        let last = match (dx.signum(), dy.signum()) {
            (0, 0) => (1, 0),
            toward => toward,
        };
        CurveRasterizer {
            x: start.x,
            y: start.y,
            curve: *curve,
            orient,
            last,
        }
    }

    /// Current pixel.
    pub fn position(&self) -> Vector2<i32> {
        Vector2::new(self.x, self.y)
    }

    /// Moves to the next pixel along the curve.
    pub fn step(&mut self) {
        let (gx, gy) = self.curve.gradient(self.x as f64, self.y as f64);
        let (tx, ty) = (-gy * self.orient, gx * self.orient);
        if tx.abs() + ty.abs() < DEGENERATE_TANGENT {
            self.x += self.last.0;
            self.y += self.last.1;
            return;
        }

        let (sx, sy) = (sign(tx), sign(ty));
        let axis = if tx.abs() >= ty.abs() {
            (self.x + sx, self.y)
        } else {
            (self.x, self.y + sy)
        };
        let diagonal = (self.x + sx, self.y + sy);

        let best = if diagonal != axis
            && self.residual(diagonal) < self.residual(axis)
        {
            diagonal
        } else {
            axis
        };
        self.last = (best.0 - self.x, best.1 - self.y);
        self.x = best.0;
        self.y = best.1;
    }

    /// Takes `n` steps; a negative `n` walks back against the travel orientation.
    pub fn steps(&mut self, n: i32) {
        if n < 0 {
            self.reverse();
            for _ in 0..n.unsigned_abs() {
                self.step();
            }
            self.reverse();
        } else {
            for _ in 0..n {
                self.step();
            }
        }
    }

    fn reverse(&mut self) {
        self.orient = -self.orient;
        self.last = (-self.last.0, -self.last.1);
    }

    #[inline]
    fn residual(&self, (x, y): (i32, i32)) -> f64 {
        self.curve.value(x as f64, y as f64).abs()
    }
}
