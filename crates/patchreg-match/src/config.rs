use crate::MatchError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Extra pixels a patch must have beyond the search window so the refiner
/// can always sample a full neighbourhood around an interior argmin.
pub const REFINEMENT_MARGIN: usize = 2;

/// Descriptor used to make the two spectra comparable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationMode {
    /// Squared second derivatives in four directions of the smoothed luminance.
    #[default]
    LaplacianEnergies,
    /// Smoothed luminance.
    Gray,
    /// Raw channels.
    Colored,
}

impl RepresentationMode {
    /// Output channel count for an input with `input_channels` channels.
    pub fn channels(self, input_channels: usize) -> usize {
        match self {
            Self::LaplacianEnergies => 4,
            Self::Gray => 1,
            Self::Colored => input_channels,
        }
    }
}

/// Per-offset patch distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Sum of squared differences over the patch.
    #[default]
    Ssd,
    /// Total absolute Laplacian of the difference over the patch interior.
    Ntg,
}

/// Size of the neighbourhood the quadratic model is fitted on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighborhood {
    #[default]
    Three,
    Five,
}

impl Neighborhood {
    #[inline]
    pub fn radius(self) -> usize {
        match self {
            Self::Three => 1,
            Self::Five => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineMethod {
    #[default]
    Newton,
    GradientDescent,
}

/// Sub-pixel refinement parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    pub neighborhood: Neighborhood,
    pub method: RefineMethod,
    /// Step scale `α`.
    pub step_scale: f64,
    /// Largest step per iteration, in pixels.
    pub max_step: f64,
    pub iterations: usize,
    /// Stop once the step norm drops below this many pixels.
    pub convergence: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            neighborhood: Neighborhood::Three,
            method: RefineMethod::Newton,
            step_scale: 1.0,
            max_step: 1.0,
            iterations: 10,
            convergence: 0.1,
        }
    }
}

/// Global transform family fitted to one vector field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformModel {
    #[default]
    Homography,
    Affinity,
}

/// Robust estimator parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    pub model: TransformModel,
    /// RANSAC inlier threshold (homography only), in pixels of the pyramid
    /// level being estimated: `3.0` at a 1/4 level accepts residuals of up
    /// to 12 full-resolution pixels.
    pub reprojection_threshold: f64,
    pub max_iterations: usize,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            model: TransformModel::Homography,
            reprojection_threshold: 3.0,
            max_iterations: 500,
            confidence: 0.995,
            seed: 0,
        }
    }
}

/// Everything one matching pass needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Patch grid as `(rows, cols)`.
    pub grid: (usize, usize),
    /// Search radius as `(y, x)` in pixels of the current level.
    pub search_radius: (usize, usize),
    pub mode: RepresentationMode,
    pub distance: Distance,
    /// Gaussian sigma applied to the reference before building descriptors.
    pub sigma_ref: f32,
    /// Gaussian sigma applied to the moving image before building descriptors.
    pub sigma_mov: f32,
    pub refine: RefineParams,
    pub estimator: EstimatorParams,
    /// Run one extra matching pass after the last level and return the
    /// residual vector field.
    pub dense_residual: bool,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            grid: (8, 8),
            search_radius: (4, 4),
            mode: RepresentationMode::LaplacianEnergies,
            distance: Distance::Ssd,
            sigma_ref: 1.0,
            sigma_mov: 1.0,
            refine: RefineParams::default(),
            estimator: EstimatorParams::default(),
            dense_residual: false,
        }
    }
}

/// Geometry of the non-overlapping patch grid on one image size.
///
/// Remainder pixels at the bottom and right are not covered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGrid {
    pub rows: usize,
    pub cols: usize,
    pub patch_h: usize,
    pub patch_w: usize,
}

impl PatchGrid {
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-left pixel `(x, y)` of patch `index` (row-major).
    #[inline]
    pub fn origin(&self, index: usize) -> (usize, usize) {
        let (r, c) = (index / self.cols, index % self.cols);
        (c * self.patch_w, r * self.patch_h)
    }

    /// Centre of patch `(row, col)` in pixel coordinates.
    pub fn center(&self, row: usize, col: usize) -> Point2<f64> {
        Point2::new(
            (col * self.patch_w) as f64 + 0.5 * (self.patch_w as f64 - 1.0),
            (row * self.patch_h) as f64 + 0.5 * (self.patch_h as f64 - 1.0),
        )
    }
}

fn check_positive(name: &str, v: f64) -> Result<(), MatchError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(MatchError::config(format!("{name} must be positive and finite, got {v}")))
    }
}

impl AlignmentConfig {
    /// Validate against an image size and return the resulting patch grid.
    pub fn validate(&self, width: usize, height: usize) -> Result<PatchGrid, MatchError> {
        let (rows, cols) = self.grid;
        if rows == 0 || cols == 0 {
            return Err(MatchError::config(format!(
                "grid must have at least one row and column, got {rows}x{cols}"
            )));
        }
        let patch_h = height / rows;
        let patch_w = width / cols;
        let (sy, sx) = self.search_radius;
        let need_h = 2 * sy + REFINEMENT_MARGIN;
        let need_w = 2 * sx + REFINEMENT_MARGIN;
        if patch_h <= need_h || patch_w <= need_w {
            return Err(MatchError::config(format!(
                "patch {patch_w}x{patch_h} ({width}x{height} / {cols}x{rows}) must exceed \
                 {}x{} for search radius ({sy}, {sx})",
                need_w, need_h
            )));
        }
        for (name, sigma) in [("sigma_ref", self.sigma_ref), ("sigma_mov", self.sigma_mov)] {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(MatchError::config(format!(
                    "{name} must be finite and non-negative, got {sigma}"
                )));
            }
        }

        let r = &self.refine;
        check_positive("refine.step_scale", r.step_scale)?;
        check_positive("refine.max_step", r.max_step)?;
        if !(r.convergence.is_finite() && r.convergence >= 0.0) {
            return Err(MatchError::config(format!(
                "refine.convergence must be finite and non-negative, got {}",
                r.convergence
            )));
        }
        if r.iterations == 0 {
            return Err(MatchError::config("refine.iterations must be at least 1"));
        }
        let nb = r.neighborhood.radius();
        if sy < nb || sx < nb {
            return Err(MatchError::config(format!(
                "search radius ({sy}, {sx}) is smaller than the refinement neighbourhood radius {nb}"
            )));
        }

        let e = &self.estimator;
        check_positive("estimator.reprojection_threshold", e.reprojection_threshold)?;
        if !(e.confidence > 0.0 && e.confidence < 1.0) {
            return Err(MatchError::config(format!(
                "estimator.confidence must lie in (0, 1), got {}",
                e.confidence
            )));
        }
        if e.max_iterations == 0 {
            return Err(MatchError::config("estimator.max_iterations must be at least 1"));
        }

        Ok(PatchGrid {
            rows,
            cols,
            patch_h,
            patch_w,
        })
    }
}
