//! Precomputed epipolar curves of a generalized camera pair.
//!
//! Every plane through the baseline cuts the second image along a conic. The
//! planes are parametrized by the direction of a first-camera ray around the
//! baseline; [`EpipolarCurveField`] discretizes that direction into `N` bins
//! (`N` even) and stores one [`QuadraticCurve`] per bin, plus a wrap-around
//! copy of bin 0 at index `N`.

use crate::camera::{CameraModel, EucmModel};
use crate::geometry::QuadraticCurve;
use crate::stereo::{StereoError, StereoThresholds};
use nalgebra::{Isometry3, Vector2, Vector3};

#[derive(Debug, Clone)]
pub struct EpipolarCurveField {
    x_base: Vector3<f64>,
    y_base: Vector3<f64>,
    z_base: Vector3<f64>,
    step: f64,
    steps: usize,
    direction_epsilon: f64,
    epipole: Option<Vector2<f64>>,
    curves: Vec<QuadraticCurve>,
}

impl EpipolarCurveField {
    /// Builds the curve table for the pose `t12` (`X1 = t12 * X2`) and the
    /// second camera.
    ///
    /// # Errors
    ///
    /// * [`StereoError::InvalidParams`]: If `steps` is zero or odd.
    /// * [`StereoError::ZeroBaseline`]: If the translation of `t12` vanishes.
    pub fn new(
        t12: &Isometry3<f64>,
        camera2: &EucmModel,
        steps: usize,
        thresholds: &StereoThresholds,
    ) -> Result<Self, StereoError> {
        if steps == 0 || steps % 2 != 0 {
            return Err(StereoError::InvalidParams(format!(
                "number of epipolar steps must be even and positive, got {steps}"
            )));
        }
        let baseline = t12.translation.vector;
        if baseline.norm() < f64::EPSILON {
            return Err(StereoError::ZeroBaseline);
        }

        let z_base = -baseline.normalize();
        let seed = if z_base.z * z_base.z > z_base.x * z_base.x + z_base.y * z_base.y {
            Vector3::x()
        } else {
            Vector3::z()
        };
        let x_base = (seed - z_base * seed.dot(&z_base)).normalize();
        let y_base = z_base.cross(&x_base);

        let r21 = t12.rotation.inverse();
        let t21n = r21 * z_base;
        let epipole = camera2.project(&t21n).ok();

        let step = 4.0 / steps as f64;
        let half = steps / 2;
        let mut curves = Vec::with_capacity(steps + 1);
        for idx in 0..steps {
            let x = if idx < half {
                let s = step * idx as f64 - 1.0;
                x_base + s * y_base
            } else {
                let c = step * (half as f64 - idx as f64) + 1.0;
                c * x_base + y_base
            };
            let plane = (r21 * x).cross(&t21n);
            curves.push(conic_of_plane(
                &plane,
                camera2,
                epipole.as_ref(),
                thresholds.line_ratio,
            ));
        }
        curves.push(curves[0]);

        Ok(EpipolarCurveField {
            x_base,
            y_base,
            z_base,
            step,
            steps,
            direction_epsilon: thresholds.direction_epsilon,
            epipole,
            curves,
        })
    }

    /// Bin of a first-camera ray, in `[0, N]`.
    pub fn index(&self, ray: &Vector3<f64>) -> usize {
        let c = ray.dot(&self.x_base);
        let s = ray.dot(&self.y_base);
        let (ac, as_) = (c.abs(), s.abs());
        if ac + as_ < self.direction_epsilon {
            0
        } else if ac > as_ {
            ((s / c + 1.0) / self.step).round() as usize
        } else {
            ((1.0 - c / s) / self.step).round() as usize + self.steps / 2
        }
    }

    #[inline]
    pub fn curve(&self, idx: usize) -> &QuadraticCurve {
        &self.curves[idx]
    }

    /// Epipolar curve in the second image of a first-camera ray.
    pub fn curve_for_ray(&self, ray: &Vector3<f64>) -> &QuadraticCurve {
        self.curve(self.index(ray))
    }

    /// Image of the first camera centre in the second image, if projectable.
    pub fn epipole(&self) -> Option<Vector2<f64>> {
        self.epipole
    }

    /// Unit direction from the second camera centre towards the first, in
    /// first-camera coordinates.
    pub fn baseline_direction(&self) -> Vector3<f64> {
        self.z_base
    }

    /// Number of bins `N`; the table holds `N + 1` curves.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

/// Image of the plane `A·x + B·y + C·z = 0` (second-camera frame) under EUCM.
///
/// Planes nearly containing the optical axis image as lines through the
/// principal point. Otherwise the constant term is fixed by the epipole, which
/// every epipolar curve passes through; without a projectable epipole the
/// closed-form constant is used.
fn conic_of_plane(
    plane: &Vector3<f64>,
    camera: &EucmModel,
    epipole: Option<&Vector2<f64>>,
    line_ratio: f64,
) -> QuadraticCurve {
    let [alpha, beta, fu, fv, u0, v0] = camera.generalized_params();
    let (a, b, c) = (plane.x, plane.y, plane.z);

    let gamma = 1.0 - alpha;
    let ag = alpha - gamma;
    let a2b = alpha * alpha * beta;
    let fufv = fu * fv;

    let aa = a * a;
    let bb = b * b;
    let cc = c * c;
    let ccfufv = cc * fufv;

    // aa + bb == 0 gives +inf and falls through to the conic
    if ccfufv / (aa + bb) < line_ratio {
        return QuadraticCurve::line(a / fu, b / fv, -u0 * a / fu - v0 * b / fv);
    }

    let mut curve = QuadraticCurve {
        kuu: (aa * ag + cc * a2b) / (cc * fu * fu),
        kuv: 2.0 * a * b * ag / ccfufv,
        kvv: (bb * ag + cc * a2b) / (cc * fv * fv),
        ku: 2.0 * (-(aa * fv * u0 + a * b * fu * v0) * ag - a * c * fufv * gamma - cc * a2b * fv * u0)
            / (ccfufv * fu),
        kv: 2.0 * (-(bb * fu * v0 + a * b * fv * u0) * ag - b * c * fufv * gamma - cc * a2b * fu * v0)
            / (ccfufv * fv),
        k1: 0.0,
    };

    curve.k1 = match epipole {
        Some(e) => -curve.value(e.x, e.y),
        None => {
            let l0 = -(a * u0 / fu + b * v0 / fv);
            let r0_sq = (u0 / fu).powi(2) + (v0 / fv).powi(2);
            ag * l0 * l0 / cc + a2b * r0_sq - 2.0 * gamma * l0 / c - 1.0
        }
    };
    curve
}
