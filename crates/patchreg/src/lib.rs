//! High-level facade for the `patchreg-*` workspace.
//!
//! Registers a moving image (typically near-infrared) onto a reference image
//! (typically visible light) by matching a grid of patches over a
//! coarse-to-fine pyramid and fitting one global homography.
//!
//! This crate provides:
//! - re-exports of the underlying crates under short module names
//! - (feature `image`) conversion between `image` buffers and the workspace
//!   [`Image`] type, a PNG [`DebugSink`] and [`run_job`], which executes a JSON
//!   job end to end
//! - (feature `cli`) the `patchreg` binary
//!
//! ## Quickstart
//!
//! ```no_run
//! use patchreg::{pyramidal_search, AlignmentConfig, PyramidSchedule};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vis = patchreg::load_image("vis.png")?;
//! let nir = patchreg::load_image("nir.png")?;
//! let out = pyramidal_search(
//!     &vis.view(),
//!     &nir.view(),
//!     &AlignmentConfig::default(),
//!     &PyramidSchedule::default(),
//! )?;
//! println!("{:?}", out.motion.matrix());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `patchreg::core`: image buffers, filters, homographies, motion model.
//! - `patchreg::matching`: representations, cost surfaces, sub-pixel refinement.
//! - `patchreg::align`: estimators, pyramid search, warping, job IO.

pub use patchreg_align as align;
pub use patchreg_core as core;
pub use patchreg_match as matching;

pub use patchreg_align::{
    pyramidal_search, pyramidal_search_with, warp_image, AlignError, AlignJobConfig, Alignment,
    AlignmentReport, CancelToken, DebugSink, PyramidSchedule, SearchOptions,
};
pub use patchreg_core::{Image, ImageView, MotionModel};
pub use patchreg_match::{AlignmentConfig, Distance, RepresentationMode, TransformModel};

mod error;
pub use error::PatchregError;

#[cfg(feature = "image")]
mod io_image;
#[cfg(feature = "image")]
mod job;

#[cfg(feature = "image")]
pub use io_image::{from_dynamic, load_image, save_image, to_dynamic, PngDebugSink};
#[cfg(feature = "image")]
pub use job::run_job;
