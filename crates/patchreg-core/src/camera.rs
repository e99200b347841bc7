//! Pinhole intrinsics and radial-tangential lens distortion.
//!
//! Calibration is loaded elsewhere; this module only evaluates the model so
//! the final remap can fold lens distortion of the moving camera into the
//! same table as the homography.

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics (pixels).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// `true` when every entry is finite and both focal lengths are non-zero.
    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    /// The calibration matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        if !self.is_valid() {
            return None;
        }
        Some(Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy))
    }

    pub fn normalized_to_pixel(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}

/// Brown-Conrady coefficients `(k1, k2, p1, p2, k3)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RadialTangentialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl RadialTangentialDistortion {
    #[inline]
    fn radial(&self, r2: f64) -> f64 {
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3))
    }

    #[inline]
    fn tangential(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort_normalized(&self, n: Point2<f64>) -> Point2<f64> {
        let r2 = n.x * n.x + n.y * n.y;
        let radial = self.radial(r2);
        let (tx, ty) = self.tangential(n.x, n.y, r2);
        Point2::new(n.x * radial + tx, n.y * radial + ty)
    }
}

/// Intrinsics plus distortion of one physical camera.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: RadialTangentialDistortion,
}

impl CameraModel {
    /// Undistorted pixel -> raw (distorted) pixel. Closed form.
    pub fn distort_pixel(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        let n = self.intrinsics.pixel_to_normalized(p)?;
        let out = self
            .intrinsics
            .normalized_to_pixel(self.distortion.distort_normalized(n));
        (out.x.is_finite() && out.y.is_finite()).then_some(out)
    }

}
