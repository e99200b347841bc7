use patchreg_core::Image;

/// Optional side channel for intermediate products.
///
/// Called outside the per-patch loops; implementations may be slow (the
/// `patchreg` crate ships one that writes PNG files). Both methods default to
/// doing nothing.
pub trait DebugSink {
    /// Channel-summed cost surfaces of one pass, tiled per patch.
    fn cost_surfaces(&mut self, level: usize, iteration: usize, mosaic: &Image) {
        let _ = (level, iteration, mosaic);
    }

    /// Moving image after warping by the model accumulated so far.
    fn warped(&mut self, level: usize, iteration: usize, image: &Image) {
        let _ = (level, iteration, image);
    }
}
