//! Coarse-to-fine search.
//!
//! For every `(downscale, iterations)` level the moving image is warped by
//! the model accumulated so far, matched against the reference, and the
//! estimated increment is lifted to full resolution and composed into the
//! model. The canonical model never leaves full resolution.

use crate::warp::{residual_extent, warp_homography};
use crate::{estimate_transform, AlignError, CancelToken, DebugSink, Estimate, EstimateError};
use patchreg_core::{downscale, Border, Homography, Image, ImageView, MotionModel};
use patchreg_match::{match_patches, AlignmentConfig, Fallbacks, RepresentationMode, VectorField};
use serde::{Deserialize, Serialize};

/// One entry of a [`PyramidSchedule`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PyramidLevel {
    /// Downscale factor relative to full resolution (`>= 1`).
    pub downscale: f64,
    /// Matching/estimation passes at this level.
    pub iterations: usize,
}

/// Ordered coarse-to-fine list of levels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PyramidSchedule {
    pub levels: Vec<PyramidLevel>,
}

impl Default for PyramidSchedule {
    fn default() -> Self {
        Self::new(&[(4.0, 3), (2.0, 2), (1.0, 1)])
    }
}

impl PyramidSchedule {
    pub fn new(levels: &[(f64, usize)]) -> Self {
        Self {
            levels: levels
                .iter()
                .map(|&(downscale, iterations)| PyramidLevel {
                    downscale,
                    iterations,
                })
                .collect(),
        }
    }

    /// Non-empty, finite factors `>= 1`, at least one iteration per level,
    /// factors non-increasing (coarse to fine).
    pub fn validate(&self) -> Result<(), AlignError> {
        if self.levels.is_empty() {
            return Err(AlignError::Configuration(
                "pyramid schedule is empty".into(),
            ));
        }
        let mut previous = f64::INFINITY;
        for (i, level) in self.levels.iter().enumerate() {
            let f = level.downscale;
            if !f.is_finite() || f < 1.0 {
                return Err(AlignError::Configuration(format!(
                    "level {i}: downscale must be finite and >= 1, got {f}"
                )));
            }
            if level.iterations == 0 {
                return Err(AlignError::Configuration(format!(
                    "level {i}: at least one iteration is required"
                )));
            }
            if f > previous {
                return Err(AlignError::Configuration(format!(
                    "level {i}: downscale {f} is coarser than the previous level {previous}"
                )));
            }
            previous = f;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    /// At least one increment was composed.
    Estimated,
    /// The first estimation at this level failed.
    Failed,
}

/// What happened on one pyramid level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelReport {
    pub downscale: f64,
    pub width: usize,
    pub height: usize,
    /// Increments composed at this level.
    pub iterations: usize,
    pub status: LevelStatus,
    /// Correspondences and inliers of the last successful estimate.
    pub correspondences: usize,
    pub inliers: usize,
    /// Residual RMS of the last successful estimate, in level pixels.
    pub rms: f64,
    pub fallbacks: Fallbacks,
    /// Reason the level stopped early, if it did.
    pub error: Option<String>,
}

/// Result of [`pyramidal_search`].
#[derive(Clone, Debug)]
pub struct Alignment {
    /// Accumulated full-resolution model (reference → moving).
    pub motion: MotionModel,
    /// Residual field after the last composition, in full-resolution pixels.
    pub residual: Option<VectorField>,
    pub levels: Vec<LevelReport>,
}

/// Optional inputs of [`pyramidal_search_with`].
#[derive(Default)]
pub struct SearchOptions<'a> {
    /// Starting model instead of identity, e.g. a rotation pre-warp.
    pub initial: Option<MotionModel>,
    pub cancel: Option<CancelToken>,
    pub debug: Option<&'a mut dyn DebugSink>,
}

fn level_size(width: usize, height: usize, factor: f64) -> (usize, usize) {
    if factor <= 1.0 {
        return (width, height);
    }
    (
        ((width as f64 / factor).floor() as usize).max(1),
        ((height as f64 / factor).floor() as usize).max(1),
    )
}

fn check_cancel(cancel: Option<&CancelToken>) -> Result<(), AlignError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(AlignError::Cancelled),
        _ => Ok(()),
    }
}

fn validate_inputs(
    reference: &ImageView<'_>,
    moving: &ImageView<'_>,
    config: &AlignmentConfig,
    schedule: &PyramidSchedule,
) -> Result<(), AlignError> {
    for (name, img) in [("reference", reference), ("moving", moving)] {
        if img.width == 0 || img.height == 0 || img.channels == 0 {
            return Err(AlignError::Configuration(format!("{name} image is empty")));
        }
    }
    if config.mode == RepresentationMode::Colored && reference.channels != moving.channels {
        return Err(AlignError::Configuration(format!(
            "colored mode needs equal channel counts (reference {}, moving {})",
            reference.channels, moving.channels
        )));
    }
    schedule.validate()?;
    for (i, level) in schedule.levels.iter().enumerate() {
        let (w, h) = level_size(reference.width, reference.height, level.downscale);
        config.validate(w, h).map_err(|e| {
            AlignError::Configuration(format!("level {i} ({w}x{h}): {e}"))
        })?;
    }
    Ok(())
}

/// Identity when the field is exactly zero, otherwise the configured robust fit.
fn estimate_increment(
    field: &VectorField,
    config: &AlignmentConfig,
) -> Result<Estimate, EstimateError> {
    if field.max_displacement() == 0.0 {
        return Ok(Estimate {
            transform: Homography::identity(),
            inliers: (0..field.samples.len()).collect(),
            rms: 0.0,
        });
    }
    let (input, output) = field.correspondences();
    estimate_transform(&input, &output, &config.estimator)
}

/// Coarse-to-fine alignment starting from identity.
pub fn pyramidal_search(
    reference: &ImageView<'_>,
    moving: &ImageView<'_>,
    config: &AlignmentConfig,
    schedule: &PyramidSchedule,
) -> Result<Alignment, AlignError> {
    pyramidal_search_with(reference, moving, config, schedule, SearchOptions::default())
}

/// Coarse-to-fine alignment with an optional initial model, cancellation and
/// debug output.
///
/// Every level is validated before any work. An estimation failure stops the
/// current level (identity for its remaining iterations) and the search moves
/// on; [`AlignError::AlignmentFailed`] is returned only when no level
/// produced an estimate.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "info",
        skip_all,
        fields(
            w = reference.width,
            h = reference.height,
            levels = schedule.levels.len()
        )
    )
)]
pub fn pyramidal_search_with(
    reference: &ImageView<'_>,
    moving: &ImageView<'_>,
    config: &AlignmentConfig,
    schedule: &PyramidSchedule,
    options: SearchOptions<'_>,
) -> Result<Alignment, AlignError> {
    validate_inputs(reference, moving, config, schedule)?;

    let SearchOptions {
        initial,
        cancel,
        mut debug,
    } = options;
    let cancel = cancel.as_ref();
    let mut motion = initial.unwrap_or_default();
    let mut reports = Vec::with_capacity(schedule.levels.len());
    let mut finest: Option<(f64, Image, Image)> = None;

    for (li, level) in schedule.levels.iter().enumerate() {
        check_cancel(cancel)?;
        let f = level.downscale;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("level", index = li, downscale = f).entered();

        let ref_l = downscale(reference, f);
        let mov_l = downscale(moving, f);
        let (w, h) = (ref_l.width, ref_l.height);
        let mut warped = warp_homography(&mov_l.view(), &motion.rescale(f)?, w, h, Border::Replicate);

        let mut report = LevelReport {
            downscale: f,
            width: w,
            height: h,
            iterations: 0,
            status: LevelStatus::Failed,
            correspondences: 0,
            inliers: 0,
            rms: 0.0,
            fallbacks: Fallbacks::default(),
            error: None,
        };

        for it in 0..level.iterations {
            check_cancel(cancel)?;
            if let Some(sink) = debug.as_deref_mut() {
                sink.warped(li, it, &warped);
            }

            let pass = match_patches(&ref_l.view(), &warped.view(), config)?;
            if let Some(sink) = debug.as_deref_mut() {
                sink.cost_surfaces(li, it, &pass.surfaces.mosaic());
            }
            report.fallbacks.merge(&pass.field.fallbacks);

            let step = estimate_increment(&pass.field, config)
                .map_err(|e| e.to_string())
                .and_then(|est| {
                    let inc = MotionModel::lift_increment(&est.transform, f)
                        .map_err(|e| e.to_string())?;
                    motion.compose(&inc).map_err(|e| e.to_string())?;
                    Ok(est)
                });

            match step {
                Ok(est) => {
                    report.iterations += 1;
                    report.status = LevelStatus::Estimated;
                    report.correspondences = pass.field.samples.len();
                    report.inliers = est.inliers.len();
                    report.rms = est.rms;
                    log::debug!(
                        "level {li} (1/{f}) iteration {it}: {}/{} inliers, rms {:.3} px, max |d| {:.2} px",
                        est.inliers.len(),
                        pass.field.samples.len(),
                        est.rms,
                        pass.field.max_displacement()
                    );
                    warped =
                        warp_homography(&mov_l.view(), &motion.rescale(f)?, w, h, Border::Replicate);
                }
                Err(reason) => {
                    log::warn!(
                        "level {li} (1/{f}) iteration {it}: {reason}; keeping the current model for the rest of this level"
                    );
                    report.error = Some(reason);
                    break;
                }
            }
        }

        log::info!(
            "level {li} (1/{f}, {w}x{h}): {} increment(s), {} fallbacks",
            report.iterations,
            report.fallbacks.total()
        );
        reports.push(report);
        finest = Some((f, ref_l, mov_l));
    }

    if reports.iter().all(|r| r.status == LevelStatus::Failed) {
        return Err(AlignError::AlignmentFailed {
            levels: reports.len(),
        });
    }

    let residual = match (config.dense_residual, finest) {
        (true, Some((f, ref_l, mov_l))) => {
            check_cancel(cancel)?;
            let warped = warp_homography(
                &mov_l.view(),
                &motion.rescale(f)?,
                ref_l.width,
                ref_l.height,
                Border::Replicate,
            );
            let pass = match_patches(&ref_l.view(), &warped.view(), config)?;
            let field = pass.field.lifted(f);
            let extent = residual_extent(&field);
            log::info!(
                "dense residual: {}x{} samples, max |dx| {:.3} px, max |dy| {:.3} px",
                field.cols,
                field.rows,
                extent.x,
                extent.y
            );
            Some(field)
        }
        _ => None,
    };

    Ok(Alignment {
        motion,
        residual,
        levels: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(x: usize, y: usize) -> f32 {
        let (fx, fy) = (x as f32, y as f32);
        0.5 + 0.2 * (0.31 * fx).sin() * (0.23 * fy).cos() + 0.2 * (0.17 * fx + 0.29 * fy).sin()
    }

    fn small_config() -> AlignmentConfig {
        AlignmentConfig {
            grid: (4, 4),
            search_radius: (3, 3),
            ..AlignmentConfig::default()
        }
    }

    #[test]
    fn schedule_validation() {
        assert!(PyramidSchedule::default().validate().is_ok());
        assert!(PyramidSchedule::new(&[]).validate().is_err());
        assert!(PyramidSchedule::new(&[(0.5, 1)]).validate().is_err());
        assert!(PyramidSchedule::new(&[(2.0, 0)]).validate().is_err());
        assert!(PyramidSchedule::new(&[(1.0, 1), (2.0, 1)]).validate().is_err());
    }

    #[test]
    fn undersized_coarse_level_is_rejected_up_front() {
        let img = Image::from_fn(64, 64, texture);
        let schedule = PyramidSchedule::new(&[(4.0, 1), (1.0, 1)]);
        // 64 / 4 = 16 px level, 4 px patches.
        let err = pyramidal_search(&img.view(), &img.view(), &small_config(), &schedule)
            .unwrap_err();
        assert!(matches!(err, AlignError::Configuration(_)), "{err}");
    }

    #[test]
    fn cancellation_before_the_first_level() {
        let img = Image::from_fn(64, 64, texture);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = pyramidal_search_with(
            &img.view(),
            &img.view(),
            &small_config(),
            &PyramidSchedule::new(&[(1.0, 2)]),
            SearchOptions {
                cancel: Some(cancel),
                ..SearchOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, AlignError::Cancelled);
    }

    #[derive(Default)]
    struct Recorder {
        warped: Vec<(usize, usize)>,
        mosaics: usize,
    }

    impl DebugSink for Recorder {
        fn cost_surfaces(&mut self, _level: usize, _iteration: usize, _mosaic: &Image) {
            self.mosaics += 1;
        }

        fn warped(&mut self, level: usize, iteration: usize, _image: &Image) {
            self.warped.push((level, iteration));
        }
    }

    #[test]
    fn self_alignment_is_identity_with_zero_residual() {
        let img = Image::from_fn(96, 96, texture);
        let cfg = AlignmentConfig {
            dense_residual: true,
            ..small_config()
        };
        let mut recorder = Recorder::default();
        let out = pyramidal_search_with(
            &img.view(),
            &img.view(),
            &cfg,
            &PyramidSchedule::new(&[(2.0, 2), (1.0, 1)]),
            SearchOptions {
                debug: Some(&mut recorder),
                ..SearchOptions::default()
            },
        )
        .unwrap();

        assert_eq!(*out.motion.matrix(), nalgebra::Matrix3::identity());
        assert_eq!(out.motion.history().len(), 3);
        let residual = out.residual.unwrap();
        assert!(residual.samples.iter().all(|s| s.displacement.norm() == 0.0));
        assert_eq!(recorder.warped, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(recorder.mosaics, 3);
        assert!(out.levels.iter().all(|l| l.status == LevelStatus::Estimated));
    }

    /// Texture between columns 12 and 115, flat grey outside.
    fn banded(x: i64, y: usize) -> f32 {
        if (12..116).contains(&x) {
            texture(x as usize, y)
        } else {
            0.5
        }
    }

    #[test]
    fn a_failed_level_does_not_stop_later_levels() {
        // One row of patches: any non-zero field is collinear and RANSAC
        // rejects every sample. The initial guess is exact at full
        // resolution, so the fine level sees a zero field, while the 1/4
        // level sees resampling differences.
        let reference = Image::from_fn(128, 64, |x, y| banded(x as i64, y));
        let moving = Image::from_fn(128, 64, |x, y| banded(x as i64 - 1, y));
        let cfg = AlignmentConfig {
            grid: (1, 4),
            search_radius: (2, 2),
            ..AlignmentConfig::default()
        };
        let initial = MotionModel::from_matrix(nalgebra::Matrix3::new(
            1.0, 0.0, 1.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ))
        .unwrap();
        let out = pyramidal_search_with(
            &reference.view(),
            &moving.view(),
            &cfg,
            &PyramidSchedule::new(&[(4.0, 3), (1.0, 2)]),
            SearchOptions {
                initial: Some(initial.clone()),
                ..SearchOptions::default()
            },
        )
        .unwrap();

        let coarse = &out.levels[0];
        assert_eq!(coarse.status, LevelStatus::Failed);
        assert_eq!(coarse.iterations, 0);
        assert!(coarse.error.as_deref().is_some_and(|e| e.contains("degenerate")), "{coarse:?}");

        let fine = &out.levels[1];
        assert_eq!(fine.status, LevelStatus::Estimated);
        assert_eq!(fine.iterations, 2);
        assert!(fine.error.is_none());

        assert_eq!(out.motion.history().len(), 2);
        assert_eq!(out.motion.matrix(), initial.matrix());
    }

    #[test]
    fn a_single_patch_cannot_support_a_homography() {
        let reference = Image::from_fn(64, 64, texture);
        let moving = Image::from_fn(64, 64, |x, y| texture(x + 2, y));
        let cfg = AlignmentConfig {
            grid: (1, 1),
            search_radius: (3, 3),
            ..AlignmentConfig::default()
        };
        let err = pyramidal_search(
            &reference.view(),
            &moving.view(),
            &cfg,
            &PyramidSchedule::new(&[(1.0, 2)]),
        )
        .unwrap_err();
        assert_eq!(err, AlignError::AlignmentFailed { levels: 1 });
    }
}
