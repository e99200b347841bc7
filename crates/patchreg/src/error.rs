use patchreg_align::{AlignError, AlignIoError};
use patchreg_core::MotionError;

/// Errors produced by the facade helpers and the CLI.
#[derive(thiserror::Error, Debug)]
pub enum PatchregError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] AlignIoError),

    #[error(transparent)]
    Align(#[from] AlignError),

    #[error("invalid initial guess: {0}")]
    InitialGuess(#[from] MotionError),

    #[error(transparent)]
    Buffer(#[from] patchreg_core::ImageError),

    #[cfg(feature = "image")]
    #[error(transparent)]
    Codec(#[from] image::ImageError),

    #[error("cannot encode an image with {0} channels (expected 1 or 3)")]
    UnsupportedChannels(usize),
}
