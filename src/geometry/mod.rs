//! Planar curve primitives shared by the epipolar curve field and the rasterizer.

use serde::{Deserialize, Serialize};

/// Implicit second order curve in pixel coordinates:
///
/// `kuu·u² + kuv·u·v + kvv·v² + ku·u + kv·v + k1 = 0`
///
/// A straight line has `kuu = kuv = kvv = 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuadraticCurve {
    pub kuu: f64,
    pub kuv: f64,
    pub kvv: f64,
    pub ku: f64,
    pub kv: f64,
    pub k1: f64,
}

impl QuadraticCurve {
    /// Straight line `ku·u + kv·v + k1 = 0`.
    pub fn line(ku: f64, kv: f64, k1: f64) -> Self {
        QuadraticCurve {
            ku,
            kv,
            k1,
            ..Default::default()
        }
    }

    /// Evaluates the implicit function at `(u, v)`.
    #[inline]
    pub fn value(&self, u: f64, v: f64) -> f64 {
        self.kuu * u * u + self.kuv * u * v + self.kvv * v * v + self.ku * u + self.kv * v + self.k1
    }

    /// Gradient `(∂f/∂u, ∂f/∂v)` at `(u, v)`.
    #[inline]
    pub fn gradient(&self, u: f64, v: f64) -> (f64, f64) {
        (
            2.0 * self.kuu * u + self.kuv * v + self.ku,
            self.kuv * u + 2.0 * self.kvv * v + self.kv,
        )
    }

    pub fn is_linear(&self) -> bool {
        self.kuu == 0.0 && self.kuv == 0.0 && self.kvv == 0.0
    }

    /// First order estimate of the pixel distance from `(u, v)` to the curve.
    ///
    /// Returns `f64::INFINITY` where the gradient vanishes.
    pub fn distance_estimate(&self, u: f64, v: f64) -> f64 {
        let (gu, gv) = self.gradient(u, v);
        let norm = (gu * gu + gv * gv).sqrt();
        if norm == 0.0 {
            return f64::INFINITY;
        }
        self.value(u, v).abs() / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_line_value_and_gradient() {
        // v = 240
        let line = QuadraticCurve::line(0.0, 1.0, -240.0);
        assert!(line.is_linear());
        assert_relative_eq!(line.value(17.0, 240.0), 0.0);
        assert_relative_eq!(line.value(17.0, 243.0), 3.0);
        assert_eq!(line.gradient(5.0, 5.0), (0.0, 1.0));
        assert_relative_eq!(line.distance_estimate(100.0, 238.0), 2.0);
    }

    #[test]
    fn test_circle_distance_estimate() {
        // u² + v² - 100 = 0
        let circle = QuadraticCurve {
            kuu: 1.0,
            kvv: 1.0,
            k1: -100.0,
            ..Default::default()
        };
        assert!(!circle.is_linear());
        assert_relative_eq!(circle.value(6.0, 8.0), 0.0);
        let (gu, gv) = circle.gradient(6.0, 8.0);
        assert_relative_eq!(gu, 12.0);
        assert_relative_eq!(gv, 16.0);
        assert!(circle.distance_estimate(0.0, 0.0).is_infinite());
        assert_relative_eq!(circle.distance_estimate(0.0, 10.5), 10.25 / 21.0, epsilon = 1e-12);
    }
}
