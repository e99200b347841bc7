//! Global alignment on top of `patchreg-match`.
//!
//! - [`estimate_transform`] fits a homography (seeded RANSAC) or an affinity
//!   (re-weighted least squares) to the correspondences of a vector field.
//! - [`pyramidal_search`] runs matching passes coarse to fine and composes
//!   every increment into one full-resolution [`patchreg_core::MotionModel`].
//! - [`warp_image`] resamples the moving image once through the final model,
//!   an optional residual field and an optional lens model.
//!
//! ```no_run
//! use patchreg_align::{pyramidal_search, PyramidSchedule};
//! use patchreg_core::Image;
//! use patchreg_match::AlignmentConfig;
//!
//! # fn load(_: &str) -> Image { Image::new(1, 1, 1) }
//! let vis = load("vis.png");
//! let nir = load("nir.png");
//! let out = pyramidal_search(
//!     &vis.view(),
//!     &nir.view(),
//!     &AlignmentConfig::default(),
//!     &PyramidSchedule::new(&[(4.0, 3), (2.0, 2), (1.0, 1)]),
//! )?;
//! println!("{:?}", out.motion.matrix());
//! # Ok::<(), patchreg_align::AlignError>(())
//! ```

mod cancel;
mod debug;
mod error;
mod estimate;
mod io;
mod pyramid;
mod warp;

pub use cancel::CancelToken;
pub use debug::DebugSink;
pub use error::{AlignError, EstimateError};
pub use estimate::{estimate_affinity, estimate_homography_ransac, estimate_transform, Estimate};
pub use io::{AlignIoError, AlignJobConfig, AlignmentReport, InitialGuess, ResidualSummary};
pub use pyramid::{
    pyramidal_search, pyramidal_search_with, Alignment, LevelReport, LevelStatus, PyramidLevel,
    PyramidSchedule, SearchOptions,
};
pub use warp::{warp_image, RemapTable};
