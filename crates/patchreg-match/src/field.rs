use crate::{
    build_representation, compute_cost_surfaces, refine_surface, AlignmentConfig, CostSurfaces,
    Fallbacks, MatchError, RefineParams, RefineState,
};
use nalgebra::{Point2, Vector2};
use patchreg_core::{level_to_full, Homography, ImageView};
use serde::{Deserialize, Serialize};

/// One patch of a vector field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSample {
    /// Patch centre in the reference image.
    pub center: Point2<f64>,
    /// Offset such that `reference(center) ≈ moving(center + displacement)`.
    pub displacement: Vector2<f64>,
    pub state: RefineState,
    /// The discrete argmin touched the search window border.
    pub saturated: bool,
}

/// Per-patch displacements on a regular lattice of patch centres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorField {
    pub rows: usize,
    pub cols: usize,
    /// Centre of patch `(0, 0)`.
    pub origin: Point2<f64>,
    /// Distance between neighbouring centres `(x, y)`.
    pub spacing: Vector2<f64>,
    /// Row-major samples.
    pub samples: Vec<FieldSample>,
    pub fallbacks: Fallbacks,
}

impl VectorField {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &FieldSample {
        &self.samples[row * self.cols + col]
    }

    /// `(input, output)` point pairs: `output = center + displacement`.
    pub fn correspondences(&self) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
        self.samples
            .iter()
            .map(|s| (s.center, s.center + s.displacement))
            .unzip()
    }

    pub fn saturated_count(&self) -> usize {
        self.samples.iter().filter(|s| s.saturated).count()
    }

    pub fn max_displacement(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.displacement.norm())
            .fold(0.0, f64::max)
    }

    /// Express a field measured on a level downscaled by `factor` in
    /// full-resolution pixels.
    pub fn lifted(&self, factor: f64) -> VectorField {
        let to_full = Homography::new(level_to_full(factor));
        VectorField {
            rows: self.rows,
            cols: self.cols,
            origin: to_full.apply(self.origin),
            spacing: self.spacing * factor,
            samples: self
                .samples
                .iter()
                .map(|s| FieldSample {
                    center: to_full.apply(s.center),
                    displacement: s.displacement * factor,
                    ..*s
                })
                .collect(),
            fallbacks: self.fallbacks,
        }
    }

    /// Bilinear interpolation of the displacement at `p`, clamped to the
    /// outermost patch centres.
    pub fn interpolate(&self, p: Point2<f64>) -> Vector2<f64> {
        if self.samples.is_empty() {
            return Vector2::zeros();
        }
        let axis = |v: f64, origin: f64, spacing: f64, n: usize| -> (usize, usize, f64) {
            if n < 2 || spacing <= 0.0 {
                return (0, 0, 0.0);
            }
            let t = ((v - origin) / spacing).clamp(0.0, (n - 1) as f64);
            let i0 = (t.floor() as usize).min(n - 2);
            (i0, i0 + 1, t - i0 as f64)
        };
        let (c0, c1, fx) = axis(p.x, self.origin.x, self.spacing.x, self.cols);
        let (r0, r1, fy) = axis(p.y, self.origin.y, self.spacing.y, self.rows);

        let d00 = self.get(r0, c0).displacement;
        let d10 = self.get(r0, c1).displacement;
        let d01 = self.get(r1, c0).displacement;
        let d11 = self.get(r1, c1).displacement;
        let top = d00 + (d10 - d00) * fx;
        let bottom = d01 + (d11 - d01) * fx;
        top + (bottom - top) * fy
    }
}

/// Refine every surface of one pass into a vector field.
pub fn build_vector_field(surfaces: &CostSurfaces, params: &RefineParams) -> VectorField {
    let grid = surfaces.grid;
    let mut fallbacks = Fallbacks::default();
    let samples: Vec<FieldSample> = surfaces
        .surfaces
        .iter()
        .enumerate()
        .map(|(i, surface)| {
            let refined = refine_surface(surface, params, &mut fallbacks);
            FieldSample {
                center: grid.center(i / grid.cols, i % grid.cols),
                displacement: refined.offset,
                state: refined.state,
                saturated: refined.saturated,
            }
        })
        .collect();

    if fallbacks.total() > 0 {
        log::debug!(
            "refinement fallbacks over {} patches: {:?}",
            samples.len(),
            fallbacks
        );
    }
    if fallbacks.singular_step > 0 {
        log::warn!(
            "{} refinement steps used a unit gradient step (singular curvature)",
            fallbacks.singular_step
        );
    }

    VectorField {
        rows: grid.rows,
        cols: grid.cols,
        origin: grid.center(0, 0),
        spacing: Vector2::new(grid.patch_w as f64, grid.patch_h as f64),
        samples,
        fallbacks,
    }
}

/// Output of one matching pass.
#[derive(Clone, Debug)]
pub struct PatchMatch {
    pub surfaces: CostSurfaces,
    pub field: VectorField,
}

/// Representations, cost surfaces and refinement for one image pair.
///
/// The pair must share width, height and (for `Colored`) channel count.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(reference, moving, config))
)]
pub fn match_patches(
    reference: &ImageView<'_>,
    moving: &ImageView<'_>,
    config: &AlignmentConfig,
) -> Result<PatchMatch, MatchError> {
    if (reference.width, reference.height) != (moving.width, moving.height) {
        return Err(MatchError::config(format!(
            "image sizes differ: reference {}x{}, moving {}x{}",
            reference.width, reference.height, moving.width, moving.height
        )));
    }
    config.validate(reference.width, reference.height)?;

    let ref_rep = build_representation(reference, config.mode, config.sigma_ref);
    let mov_rep = build_representation(moving, config.mode, config.sigma_mov);
    let surfaces = compute_cost_surfaces(&ref_rep, &mov_rep, config)?;
    let field = build_vector_field(&surfaces, &config.refine);
    Ok(PatchMatch { surfaces, field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cost::tests::texture, RepresentationMode};
    use approx::assert_relative_eq;
    use patchreg_core::Image;

    fn blob(cx: f64, cy: f64) -> Image {
        Image::from_fn(48, 48, |x, y| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            (-(dx * dx + dy * dy) / (2.0 * 36.0)).exp() as f32
        })
    }

    #[test]
    fn subpixel_translation_is_recovered() {
        let reference = blob(24.0, 24.0);
        let moving = blob(25.3, 23.4);
        let cfg = AlignmentConfig {
            grid: (1, 1),
            search_radius: (3, 3),
            mode: RepresentationMode::Gray,
            sigma_ref: 0.0,
            sigma_mov: 0.0,
            ..AlignmentConfig::default()
        };
        let out = match_patches(&reference.view(), &moving.view(), &cfg).unwrap();
        let s = out.field.get(0, 0);
        assert!(!s.saturated);
        assert!(
            (s.displacement - Vector2::new(1.3, -0.6)).norm() < 0.05,
            "{:?}",
            s.displacement
        );
    }

    #[test]
    fn five_by_five_fit_recovers_the_same_shift() {
        let reference = blob(24.0, 24.0);
        let moving = blob(25.3, 23.4);
        let cfg = AlignmentConfig {
            grid: (1, 1),
            search_radius: (3, 3),
            mode: RepresentationMode::Gray,
            sigma_ref: 0.0,
            sigma_mov: 0.0,
            refine: RefineParams {
                neighborhood: crate::Neighborhood::Five,
                ..RefineParams::default()
            },
            ..AlignmentConfig::default()
        };
        let out = match_patches(&reference.view(), &moving.view(), &cfg).unwrap();
        let s = out.field.get(0, 0);
        assert!(!s.saturated);
        assert_eq!(s.state, RefineState::Converged);
        assert!(
            (s.displacement - Vector2::new(1.3, -0.6)).norm() < 0.1,
            "{:?}",
            s.displacement
        );
    }

    #[test]
    fn self_match_gives_zero_field() {
        let img = Image::from_fn(64, 64, |x, y| texture(x as i64, y as i64));
        let cfg = AlignmentConfig {
            grid: (4, 4),
            search_radius: (3, 3),
            ..AlignmentConfig::default()
        };
        let out = match_patches(&img.view(), &img.view(), &cfg).unwrap();
        assert_eq!(out.field.samples.len(), 16);
        for s in &out.field.samples {
            assert_eq!(s.displacement, Vector2::zeros());
            assert_eq!(s.state, RefineState::Converged);
        }
        let (input, output) = out.field.correspondences();
        assert_eq!(input, output);
    }

    fn lattice_field() -> VectorField {
        let mut samples = Vec::new();
        for r in 0..2 {
            for c in 0..3 {
                samples.push(FieldSample {
                    center: Point2::new(5.0 + 10.0 * c as f64, 5.0 + 10.0 * r as f64),
                    displacement: Vector2::new(c as f64, r as f64 * 2.0),
                    state: RefineState::Converged,
                    saturated: false,
                });
            }
        }
        VectorField {
            rows: 2,
            cols: 3,
            origin: Point2::new(5.0, 5.0),
            spacing: Vector2::new(10.0, 10.0),
            samples,
            fallbacks: Fallbacks::default(),
        }
    }

    #[test]
    fn interpolation_is_bilinear_and_clamped() {
        let f = lattice_field();
        assert_relative_eq!(f.interpolate(Point2::new(10.0, 10.0)), Vector2::new(0.5, 1.0));
        assert_relative_eq!(f.interpolate(Point2::new(25.0, 15.0)), Vector2::new(2.0, 2.0));
        assert_relative_eq!(f.interpolate(Point2::new(-40.0, -3.0)), Vector2::new(0.0, 0.0));
        assert_relative_eq!(f.interpolate(Point2::new(99.0, 99.0)), Vector2::new(2.0, 2.0));
    }

    #[test]
    fn lifting_scales_centres_and_displacements() {
        let f = lattice_field().lifted(4.0);
        // level x = 5 covers full-resolution pixels centred on 4 * 5.5 - 0.5.
        assert_relative_eq!(f.origin, Point2::new(21.5, 21.5));
        assert_relative_eq!(f.spacing, Vector2::new(40.0, 40.0));
        assert_relative_eq!(f.get(1, 2).displacement, Vector2::new(8.0, 8.0));
        assert_relative_eq!(f.get(1, 2).center, Point2::new(101.5, 61.5));
    }
}
