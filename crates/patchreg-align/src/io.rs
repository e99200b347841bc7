//! JSON job configuration and report helpers.

use crate::{Alignment, LevelReport, PyramidSchedule};
use nalgebra::Rotation3;
use patchreg_core::{CameraIntrinsics, CameraModel, Homography, MotionError, MotionModel};
use patchreg_match::AlignmentConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum AlignIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Starting model for the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialGuess {
    /// Full-resolution reference → moving matrix, row-major.
    Matrix { matrix: [[f64; 3]; 3] },
    /// Rotation pre-warp between two cameras sharing an optical centre.
    Rotation {
        reference: CameraIntrinsics,
        moving: CameraIntrinsics,
        /// Roll, pitch, yaw in radians.
        rotation: [f64; 3],
    },
}

impl InitialGuess {
    pub fn to_motion(&self) -> Result<MotionModel, MotionError> {
        match self {
            Self::Matrix { matrix } => {
                MotionModel::from_matrix(Homography::from_array(*matrix).h)
            }
            Self::Rotation {
                reference,
                moving,
                rotation: [roll, pitch, yaw],
            } => MotionModel::from_rotation(
                reference,
                moving,
                &Rotation3::from_euler_angles(*roll, *pitch, *yaw),
            ),
        }
    }
}

fn default_fill() -> f32 {
    0.0
}

/// One alignment job as read by the `patchreg` CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignJobConfig {
    pub reference_path: String,
    pub moving_path: String,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub debug_dir: Option<String>,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub schedule: PyramidSchedule,
    #[serde(default)]
    pub initial_guess: Option<InitialGuess>,
    /// Lens model of the moving camera, applied during the final remap.
    #[serde(default)]
    pub moving_camera: Option<CameraModel>,
    /// Value for output pixels that map outside the moving image.
    #[serde(default = "default_fill")]
    pub fill: f32,
}

impl AlignJobConfig {
    pub fn new(reference_path: impl Into<String>, moving_path: impl Into<String>) -> Self {
        Self {
            reference_path: reference_path.into(),
            moving_path: moving_path.into(),
            output_path: None,
            report_path: None,
            debug_dir: None,
            alignment: AlignmentConfig::default(),
            schedule: PyramidSchedule::default(),
            initial_guess: None,
            moving_camera: None,
            fill: default_fill(),
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, AlignIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), AlignIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the warped image path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("patchreg_warped.png"))
    }

    /// Resolve the report path.
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("patchreg_report.json"))
    }

    pub fn initial_motion(&self) -> Result<Option<MotionModel>, MotionError> {
        self.initial_guess.as_ref().map(InitialGuess::to_motion).transpose()
    }
}

/// Summary of a dense residual field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub rows: usize,
    pub cols: usize,
    pub max_displacement: f64,
    pub saturated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    #[serde(default)]
    pub reference_path: Option<String>,
    #[serde(default)]
    pub moving_path: Option<String>,
    /// Full-resolution reference → moving homography, row-major, `h[2][2] == 1`.
    pub homography: [[f64; 3]; 3],
    /// Increments composed over the whole search.
    pub increments: usize,
    pub levels: Vec<LevelReport>,
    #[serde(default)]
    pub residual: Option<ResidualSummary>,
}

impl AlignmentReport {
    pub fn from_alignment(alignment: &Alignment) -> Self {
        Self {
            reference_path: None,
            moving_path: None,
            homography: alignment.motion.homography().to_array(),
            increments: alignment.motion.history().len(),
            levels: alignment.levels.clone(),
            residual: alignment.residual.as_ref().map(|field| ResidualSummary {
                rows: field.rows,
                cols: field.cols,
                max_displacement: field.max_displacement(),
                saturated: field.saturated_count(),
            }),
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, AlignIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), AlignIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LevelStatus, PyramidLevel};
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;
    use patchreg_match::{Distance, Fallbacks};

    #[test]
    fn minimal_job_uses_defaults() {
        let cfg: AlignJobConfig = serde_json::from_str(
            r#"{ "reference_path": "vis.png", "moving_path": "nir.png" }"#,
        )
        .unwrap();
        assert_eq!(cfg.alignment, AlignmentConfig::default());
        assert_eq!(cfg.schedule, PyramidSchedule::default());
        assert_eq!(cfg.output_path(), PathBuf::from("patchreg_warped.png"));
        assert!(cfg.initial_motion().unwrap().is_none());
    }

    #[test]
    fn job_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");

        let mut cfg = AlignJobConfig::new("vis.png", "nir.png");
        cfg.alignment.distance = Distance::Ntg;
        cfg.alignment.grid = (6, 5);
        cfg.schedule = PyramidSchedule::new(&[(3.0, 2), (1.0, 1)]);
        cfg.initial_guess = Some(InitialGuess::Matrix {
            matrix: [[1.0, 0.0, 4.0], [0.0, 1.0, -2.0], [0.0, 0.0, 1.0]],
        });
        cfg.write_json(&path).unwrap();

        let back = AlignJobConfig::load_json(&path).unwrap();
        assert_eq!(back.alignment, cfg.alignment);
        assert_eq!(back.schedule.levels[0], PyramidLevel { downscale: 3.0, iterations: 2 });
        assert_eq!(back.initial_guess, cfg.initial_guess);
        let motion = back.initial_motion().unwrap().unwrap();
        assert_eq!(motion.matrix()[(0, 2)], 4.0);
    }

    #[test]
    fn schedule_is_a_plain_json_list() {
        let json = serde_json::to_string(&PyramidSchedule::new(&[(2.0, 1)])).unwrap();
        assert_eq!(json, r#"[{"downscale":2.0,"iterations":1}]"#);
    }

    #[test]
    fn zero_rotation_guess_is_the_intrinsics_ratio() {
        let k = |f: f64| CameraIntrinsics {
            fx: f,
            fy: f,
            cx: 320.0,
            cy: 240.0,
        };
        let guess = InitialGuess::Rotation {
            reference: k(500.0),
            moving: k(1000.0),
            rotation: [0.0; 3],
        };
        let m = guess.to_motion().unwrap();
        let expected = Matrix3::new(
            2.0, 0.0, -320.0, //
            0.0, 2.0, -240.0, //
            0.0, 0.0, 1.0,
        );
        assert_relative_eq!(*m.matrix(), expected, epsilon = 1e-9);
    }

    #[test]
    fn report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = AlignmentReport {
            reference_path: Some("vis.png".into()),
            moving_path: Some("nir.png".into()),
            homography: [[1.0, 0.0, 1.5], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            increments: 3,
            levels: vec![LevelReport {
                downscale: 2.0,
                width: 64,
                height: 48,
                iterations: 3,
                status: LevelStatus::Estimated,
                correspondences: 16,
                inliers: 15,
                rms: 0.2,
                fallbacks: Fallbacks::default(),
                error: None,
            }],
            residual: None,
        };
        report.write_json(&path).unwrap();
        assert_eq!(AlignmentReport::load_json(&path).unwrap(), report);
    }
}
