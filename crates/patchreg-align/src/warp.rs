//! Single-pass resampling.
//!
//! The final homography, the optional dense residual field and the optional
//! lens distortion of the moving camera are folded into one table of source
//! coordinates so the moving image is interpolated exactly once.

use nalgebra::{Point2, Vector2};
use patchreg_core::{sample_bilinear, Border, CameraModel, Homography, Image, ImageView, MotionModel};
use patchreg_match::VectorField;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Per-output-pixel source coordinates `(x, y)` in the moving image.
#[derive(Clone, Debug, PartialEq)]
pub struct RemapTable {
    pub width: usize,
    pub height: usize,
    /// Row-major; non-finite entries sample as outside the image.
    pub coords: Vec<[f32; 2]>,
}

impl RemapTable {
    /// `q = H · (p + d(p))`, then `q ← distort(q)` when a camera is given.
    ///
    /// `d` is the bilinear interpolation of `residual` over its lattice of
    /// patch centres, clamped at the outermost centres. The field must be
    /// expressed in output (reference) pixels.
    pub fn new(
        h: &Homography,
        residual: Option<&VectorField>,
        camera: Option<&CameraModel>,
        width: usize,
        height: usize,
    ) -> Self {
        let map = |x: usize, y: usize| -> [f32; 2] {
            let mut p = Point2::new(x as f64, y as f64);
            if let Some(field) = residual {
                p += field.interpolate(p);
            }
            let mut q = h.apply(p);
            if let Some(cam) = camera {
                q = cam
                    .distort_pixel(q)
                    .unwrap_or(Point2::new(f64::NAN, f64::NAN));
            }
            [q.x as f32, q.y as f32]
        };

        let mut coords = vec![[0.0f32; 2]; width * height];
        let fill_row = |(y, row): (usize, &mut [[f32; 2]])| {
            for (x, c) in row.iter_mut().enumerate() {
                *c = map(x, y);
            }
        };

        #[cfg(feature = "rayon")]
        coords
            .par_chunks_mut(width.max(1))
            .enumerate()
            .for_each(fill_row);

        #[cfg(not(feature = "rayon"))]
        coords
            .chunks_mut(width.max(1))
            .enumerate()
            .for_each(fill_row);

        Self {
            width,
            height,
            coords,
        }
    }

    /// Resample `src` bilinearly through the table.
    pub fn apply(&self, src: &ImageView<'_>, border: Border) -> Image {
        let c = src.channels;
        let mut out = Image::new(self.width, self.height, c);
        let row_len = (self.width * c).max(1);
        let sample_row = |(y, row): (usize, &mut [f32])| {
            let coords = &self.coords[y * self.width..(y + 1) * self.width];
            for (px, q) in row.chunks_exact_mut(c).zip(coords) {
                sample_bilinear(src, q[0], q[1], border, px);
            }
        };

        #[cfg(feature = "rayon")]
        out.data
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(sample_row);

        #[cfg(not(feature = "rayon"))]
        out.data.chunks_mut(row_len).enumerate().for_each(sample_row);

        out
    }
}

/// Warp `src` onto a `width × height` grid through `h` (output → source).
pub(crate) fn warp_homography(
    src: &ImageView<'_>,
    h: &Homography,
    width: usize,
    height: usize,
    border: Border,
) -> Image {
    RemapTable::new(h, None, None, width, height).apply(src, border)
}

/// Warp the moving image into the reference frame in one resampling pass.
///
/// Pixels that map outside the moving image (or outside the distortion
/// model's domain) get `fill`.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip(moving, motion, residual, camera))
)]
pub fn warp_image(
    moving: &ImageView<'_>,
    motion: &MotionModel,
    residual: Option<&VectorField>,
    camera: Option<&CameraModel>,
    width: usize,
    height: usize,
    fill: f32,
) -> Image {
    RemapTable::new(&motion.homography(), residual, camera, width, height)
        .apply(moving, Border::Constant(fill))
}

/// Largest displacement a field would add anywhere, for logging.
pub(crate) fn residual_extent(field: &VectorField) -> Vector2<f64> {
    field.samples.iter().fold(Vector2::zeros(), |acc, s| {
        Vector2::new(
            acc.x.max(s.displacement.x.abs()),
            acc.y.max(s.displacement.y.abs()),
        )
    })
}
