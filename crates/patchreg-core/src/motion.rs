//! Accumulated projective motion between a reference and a moving image.
//!
//! Convention: the model maps **reference** pixel coordinates to **moving**
//! pixel coordinates, i.e. it is the sampling map of the warp
//! `warped(p) = moving(M · p)`. Pixel centres sit at integer coordinates.
//!
//! The canonical matrix always lives at full resolution. Pyramid levels obtain
//! their own view through [`MotionModel::rescale`], which is the only place
//! where resolution changes are applied.

use crate::{CameraIntrinsics, Homography};
use nalgebra::{Matrix3, Point2, Rotation3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("matrix is not a valid homography (non-finite or M[2,2] == 0)")]
    Degenerate,
    #[error("invalid camera intrinsics")]
    InvalidIntrinsics,
    #[error("invalid downscale factor {0}")]
    InvalidScale(f64),
}

/// Matrix mapping level pixel coordinates to full-resolution pixel coordinates
/// for a level downscaled by `factor`.
///
/// Level pixel `x` covers full-resolution pixels centred on
/// `factor * (x + 0.5) - 0.5`.
pub fn level_to_full(factor: f64) -> Matrix3<f64> {
    let t = 0.5 * (factor - 1.0);
    Matrix3::new(
        factor, 0.0, t, //
        0.0, factor, t, //
        0.0, 0.0, 1.0,
    )
}

fn full_to_level(factor: f64) -> Matrix3<f64> {
    let inv = 1.0 / factor;
    let t = -0.5 * (factor - 1.0) * inv;
    Matrix3::new(
        inv, 0.0, t, //
        0.0, inv, t, //
        0.0, 0.0, 1.0,
    )
}

fn checked_scale(factor: f64) -> Result<f64, MotionError> {
    if factor.is_finite() && factor > 0.0 {
        Ok(factor)
    } else {
        Err(MotionError::InvalidScale(factor))
    }
}

fn normalize(m: Matrix3<f64>) -> Result<Matrix3<f64>, MotionError> {
    Homography::new(m)
        .normalized()
        .filter(|h| h.is_finite())
        .map(|h| h.h)
        .ok_or(MotionError::Degenerate)
}

/// Full-resolution 3×3 motion with an append-only history of increments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionModel {
    matrix: Matrix3<f64>,
    history: Vec<Matrix3<f64>>,
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::identity()
    }
}

impl MotionModel {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            history: Vec::new(),
        }
    }

    /// Wrap a full-resolution matrix, normalizing it to `M[2,2] == 1`.
    pub fn from_matrix(m: Matrix3<f64>) -> Result<Self, MotionError> {
        Ok(Self {
            matrix: normalize(m)?,
            history: Vec::new(),
        })
    }

    /// Pure-rotation pre-warp between two pinhole cameras sharing a centre:
    /// `M = K_mov · R · K_ref⁻¹`, with `R` rotating reference rays into the
    /// moving camera frame.
    pub fn from_rotation(
        k_ref: &CameraIntrinsics,
        k_mov: &CameraIntrinsics,
        rotation: &Rotation3<f64>,
    ) -> Result<Self, MotionError> {
        if !k_ref.is_valid() || !k_mov.is_valid() {
            return Err(MotionError::InvalidIntrinsics);
        }
        let k_ref_inv = k_ref
            .matrix()
            .try_inverse()
            .ok_or(MotionError::InvalidIntrinsics)?;
        Self::from_matrix(k_mov.matrix() * rotation.matrix() * k_ref_inv)
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    #[inline]
    pub fn homography(&self) -> Homography {
        Homography::new(self.matrix)
    }

    /// Increments composed so far, oldest first.
    pub fn history(&self) -> &[Matrix3<f64>] {
        &self.history
    }

    /// Map a reference pixel into the moving image.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        self.homography().apply(p)
    }

    /// Compose a full-resolution increment estimated on an image already
    /// warped by this model: warping by `self` and then by `increment` equals
    /// warping once by the updated model, whose matrix is `M · I`.
    pub fn compose(&mut self, increment: &Homography) -> Result<(), MotionError> {
        let inc = normalize(increment.h)?;
        self.matrix = normalize(self.matrix * inc)?;
        self.history.push(inc);
        Ok(())
    }

    /// Equivalent matrix for a pyramid level downscaled by `factor`.
    /// The canonical full-resolution model is left untouched.
    pub fn rescale(&self, factor: f64) -> Result<Homography, MotionError> {
        let factor = checked_scale(factor)?;
        if factor == 1.0 {
            return Ok(self.homography());
        }
        let m = full_to_level(factor) * self.matrix * level_to_full(factor);
        Ok(Homography::new(normalize(m)?))
    }

    /// Lift a transform estimated at a level downscaled by `factor` back to
    /// full resolution.
    pub fn lift_increment(increment: &Homography, factor: f64) -> Result<Homography, MotionError> {
        let factor = checked_scale(factor)?;
        if factor == 1.0 {
            return Ok(Homography::new(normalize(increment.h)?));
        }
        let m = level_to_full(factor) * increment.h * full_to_level(factor);
        Ok(Homography::new(normalize(m)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> MotionModel {
        MotionModel::from_matrix(Matrix3::new(
            0.99, -0.08, 3.0, //
            0.08, 0.99, -7.0, //
            1e-5, -2e-5, 1.0,
        ))
        .unwrap()
    }

    #[test]
    fn rescale_by_one_is_identity_operation() {
        let m = sample();
        assert_eq!(m.rescale(1.0).unwrap().h, *m.matrix());
    }

    #[test]
    fn compose_identity_keeps_matrix() {
        let mut m = sample();
        let before = *m.matrix();
        m.compose(&Homography::identity()).unwrap();
        assert_eq!(*m.matrix(), before);
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.matrix()[(2, 2)], 1.0);
    }

    #[test]
    fn rescale_and_lift_are_consistent() {
        let m = sample();
        let level = m.rescale(4.0).unwrap();
        let lifted = MotionModel::lift_increment(&level, 4.0).unwrap();
        assert_relative_eq!(lifted.h, *m.matrix(), epsilon = 1e-12);

        // A level point maps like its full-resolution counterpart.
        let p_level = Point2::new(10.0, 20.0);
        let to_full = Homography::new(level_to_full(4.0));
        let via_level = to_full.apply(level.apply(p_level));
        let via_full = m.apply(to_full.apply(p_level));
        assert_relative_eq!(via_level, via_full, epsilon = 1e-9);
    }

    #[test]
    fn compose_applies_increment_in_reference_frame() {
        let mut m = MotionModel::identity();
        let shift = Homography::from_array([[1.0, 0.0, 2.0], [0.0, 1.0, -1.0], [0.0, 0.0, 1.0]]);
        let scale = Homography::from_array([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]]);
        m.compose(&scale).unwrap();
        m.compose(&shift).unwrap();
        // M = S · T: the shift is applied first, then the scale.
        let p = m.apply(Point2::new(1.0, 1.0));
        assert_relative_eq!(p, Point2::new(6.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn degenerate_matrices_are_rejected() {
        assert_eq!(
            MotionModel::from_matrix(Matrix3::zeros()).unwrap_err(),
            MotionError::Degenerate
        );
        assert!(MotionModel::identity().rescale(0.0).is_err());
    }

    #[test]
    fn rotation_prewarp_maps_principal_point() {
        let k = CameraIntrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 128.0,
            cy: 128.0,
        };
        let m = MotionModel::from_rotation(&k, &k, &Rotation3::identity()).unwrap();
        assert_relative_eq!(*m.matrix(), Matrix3::identity(), epsilon = 1e-12);

        let spin = Rotation3::from_euler_angles(0.0, 0.0, 0.1);
        let m = MotionModel::from_rotation(&k, &k, &spin).unwrap();
        // Spinning about the optical axis keeps the principal point fixed.
        assert_relative_eq!(
            m.apply(Point2::new(128.0, 128.0)),
            Point2::new(128.0, 128.0),
            epsilon = 1e-9
        );
    }
}
