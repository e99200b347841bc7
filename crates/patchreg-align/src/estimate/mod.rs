//! Global transforms from sparse per-patch correspondences.

mod affine;
mod ransac;

pub use affine::estimate_affinity;
pub use ransac::estimate_homography_ransac;

use crate::EstimateError;
use nalgebra::Point2;
use patchreg_core::Homography;
use patchreg_match::{EstimatorParams, TransformModel};

/// Fitted transform with its support.
#[derive(Clone, Debug, PartialEq)]
pub struct Estimate {
    /// Maps input points onto output points; `h[(2,2)] == 1`.
    pub transform: Homography,
    /// Indices of the correspondences the final fit used.
    pub inliers: Vec<usize>,
    /// Residual RMS over the inliers, in pixels.
    pub rms: f64,
}

/// Fit the configured model to `(input, output)` pairs.
pub fn estimate_transform(
    input: &[Point2<f64>],
    output: &[Point2<f64>],
    params: &EstimatorParams,
) -> Result<Estimate, EstimateError> {
    if input.len() != output.len() {
        return Err(EstimateError::Degenerate("input and output lengths differ"));
    }
    match params.model {
        TransformModel::Homography => estimate_homography_ransac(input, output, params),
        TransformModel::Affinity => estimate_affinity(input, output),
    }
}

#[inline]
pub(crate) fn residual(h: &Homography, input: Point2<f64>, output: Point2<f64>) -> f64 {
    let r = (h.apply(input) - output).norm();
    if r.is_finite() {
        r
    } else {
        f64::INFINITY
    }
}

pub(crate) fn rms_over(h: &Homography, input: &[Point2<f64>], output: &[Point2<f64>], idx: &[usize]) -> f64 {
    if idx.is_empty() {
        return 0.0;
    }
    let sum: f64 = idx
        .iter()
        .map(|&i| residual(h, input[i], output[i]).powi(2))
        .sum();
    (sum / idx.len() as f64).sqrt()
}
