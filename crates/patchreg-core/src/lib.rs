//! Core types and utilities for patch-based image registration.
//!
//! This crate is intentionally small and purely geometric. It knows about
//! dense `f32` image buffers, bilinear sampling, smoothing/decimation, and
//! projective transforms. It does *not* know about cost surfaces, pyramids or
//! any image file format.

mod camera;
mod filter;
mod homography;
mod image;
mod logger;
mod motion;

pub use camera::{CameraIntrinsics, CameraModel, RadialTangentialDistortion};
pub use filter::{downscale, gaussian_blur, gaussian_blur_plane, gaussian_kernel};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, Border, Image, ImageError, ImageView, Planes};
pub use motion::{level_to_full, MotionError, MotionModel};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{
    default_directive, install_stderr_logger, level_from_verbosity, LoggerInitError,
};
