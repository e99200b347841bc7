//! Discrete cost surfaces over a regular patch grid.
//!
//! For every patch and every integer offset `o` inside the search window the
//! engine scores how well `reference(p)` matches `moving(p + o)`. The moving
//! window is copied once per patch (edge-replicated at the image border), so
//! the per-offset loop only walks flat row slices.

use crate::{representation::laplacian_planes, AlignmentConfig, Distance, MatchError, PatchGrid};
use patchreg_core::{Image, Planes};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Scores of one patch, laid out as `[offset_y][offset_x][channel]`.
#[derive(Clone, Debug, PartialEq)]
pub struct CostSurface {
    pub radius_y: usize,
    pub radius_x: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl CostSurface {
    pub fn new(radius_y: usize, radius_x: usize, channels: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(
            data.len(),
            (2 * radius_y + 1) * (2 * radius_x + 1) * channels
        );
        Self {
            radius_y,
            radius_x,
            channels,
            data,
        }
    }

    /// Build a single-channel surface from `f(offset_x, offset_y)`.
    pub fn from_fn(radius_y: usize, radius_x: usize, mut f: impl FnMut(i32, i32) -> f32) -> Self {
        let mut data = Vec::with_capacity((2 * radius_y + 1) * (2 * radius_x + 1));
        for oy in -(radius_y as i32)..=radius_y as i32 {
            for ox in -(radius_x as i32)..=radius_x as i32 {
                data.push(f(ox, oy));
            }
        }
        Self::new(radius_y, radius_x, 1, data)
    }

    #[inline]
    pub fn height(&self) -> usize {
        2 * self.radius_y + 1
    }

    #[inline]
    pub fn width(&self) -> usize {
        2 * self.radius_x + 1
    }

    /// Cost at window index `(iy, ix)` (offset `iy - radius_y`, `ix - radius_x`).
    #[inline]
    pub fn at(&self, iy: usize, ix: usize, channel: usize) -> f32 {
        self.data[(iy * self.width() + ix) * self.channels + channel]
    }

    /// Channel-summed surface, row-major over the window.
    pub fn summed(&self) -> Vec<f32> {
        self.data
            .chunks_exact(self.channels)
            .map(|px| px.iter().sum())
            .collect()
    }
}

/// Cost surfaces of every patch of one grid, row-major.
#[derive(Clone, Debug)]
pub struct CostSurfaces {
    pub grid: PatchGrid,
    pub surfaces: Vec<CostSurface>,
}

impl CostSurfaces {
    /// Tile the summed surfaces into one image for inspection. Each tile is
    /// normalized to `0..=1` independently; tiles are separated by a 1 px gap.
    pub fn mosaic(&self) -> Image {
        let Some(first) = self.surfaces.first() else {
            return Image::new(1, 1, 1);
        };
        let (tw, th) = (first.width(), first.height());
        let w = self.grid.cols * (tw + 1) + 1;
        let h = self.grid.rows * (th + 1) + 1;
        let mut out = Image::new(w, h, 1);

        for (i, s) in self.surfaces.iter().enumerate() {
            let summed = s.summed();
            let lo = summed.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = summed.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let scale = if hi > lo { 1.0 / (hi - lo) } else { 0.0 };
            let (r, c) = (i / self.grid.cols, i % self.grid.cols);
            let (x0, y0) = (1 + c * (tw + 1), 1 + r * (th + 1));
            for iy in 0..th {
                for ix in 0..tw {
                    out.pixel_mut(x0 + ix, y0 + iy)[0] = (summed[iy * tw + ix] - lo) * scale;
                }
            }
        }
        out
    }
}

struct PatchJob<'a> {
    reference: &'a Planes,
    moving: &'a Planes,
    grid: PatchGrid,
    radius: (usize, usize),
    /// Pixels skipped at each patch border.
    inset: usize,
    squared: bool,
}

impl PatchJob<'_> {
    /// Copy the edge-replicated moving window of one channel into `buf`.
    fn fill_window(&self, channel: usize, x0: usize, y0: usize, buf: &mut Vec<f32>) {
        let (sy, sx) = self.radius;
        let (w, h) = (self.moving.width as isize, self.moving.height as isize);
        let ww = self.grid.patch_w + 2 * sx;
        let wh = self.grid.patch_h + 2 * sy;
        let plane = self.moving.plane(channel);

        buf.clear();
        buf.reserve(ww * wh);
        for j in 0..wh {
            let y = (y0 as isize + j as isize - sy as isize).clamp(0, h - 1) as usize;
            let row = &plane[y * w as usize..(y + 1) * w as usize];
            for i in 0..ww {
                let x = (x0 as isize + i as isize - sx as isize).clamp(0, w - 1) as usize;
                buf.push(row[x]);
            }
        }
    }

    fn surface(&self, index: usize, window: &mut Vec<f32>) -> CostSurface {
        let (sy, sx) = self.radius;
        let (x0, y0) = self.grid.origin(index);
        let (pw, ph) = (self.grid.patch_w, self.grid.patch_h);
        let ww = pw + 2 * sx;
        let channels = self.reference.channels();
        let (oh, ow) = (2 * sy + 1, 2 * sx + 1);
        let mut data = vec![0.0f32; oh * ow * channels];

        let m = self.inset;
        let ref_w = self.reference.width;
        for c in 0..channels {
            self.fill_window(c, x0, y0, window);
            let plane = self.reference.plane(c);
            for iy in 0..oh {
                for ix in 0..ow {
                    let mut acc = 0.0f64;
                    for ly in m..ph - m {
                        let r0 = (y0 + ly) * ref_w + x0;
                        let ref_row = &plane[r0 + m..r0 + pw - m];
                        let w0 = (ly + iy) * ww + ix;
                        let win_row = &window[w0 + m..w0 + pw - m];
                        let row: f32 = if self.squared {
                            ref_row
                                .iter()
                                .zip(win_row)
                                .map(|(a, b)| (a - b) * (a - b))
                                .sum()
                        } else {
                            ref_row.iter().zip(win_row).map(|(a, b)| (a - b).abs()).sum()
                        };
                        acc += row as f64;
                    }
                    data[(iy * ow + ix) * channels + c] = acc as f32;
                }
            }
        }
        CostSurface::new(sy, sx, channels, data)
    }
}

/// Score every integer offset of every patch.
///
/// Both representations must share size and channel count. The grid and
/// search radius are validated before any work.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(reference, moving, config),
        fields(w = reference.width, h = reference.height, grid = ?config.grid)
    )
)]
pub fn compute_cost_surfaces(
    reference: &Planes,
    moving: &Planes,
    config: &AlignmentConfig,
) -> Result<CostSurfaces, MatchError> {
    if (reference.width, reference.height) != (moving.width, moving.height) {
        return Err(MatchError::config(format!(
            "image sizes differ: reference {}x{}, moving {}x{}",
            reference.width, reference.height, moving.width, moving.height
        )));
    }
    if reference.channels() != moving.channels() || reference.channels() == 0 {
        return Err(MatchError::config(format!(
            "channel counts differ: reference {}, moving {}",
            reference.channels(),
            moving.channels()
        )));
    }
    let grid = config.validate(reference.width, reference.height)?;

    // NTG: Laplacian is linear, so |Δ(ref - mov(·+o))| = |Δref - (Δmov)(·+o)|.
    let laplacians;
    let (ref_src, mov_src) = match config.distance {
        Distance::Ssd => (reference, moving),
        Distance::Ntg => {
            laplacians = (laplacian_planes(reference), laplacian_planes(moving));
            (&laplacians.0, &laplacians.1)
        }
    };

    let job = PatchJob {
        reference: ref_src,
        moving: mov_src,
        grid,
        radius: config.search_radius,
        inset: match config.distance {
            Distance::Ssd => 0,
            Distance::Ntg => 1,
        },
        squared: config.distance == Distance::Ssd,
    };

    #[cfg(feature = "rayon")]
    let surfaces: Vec<CostSurface> = (0..grid.len())
        .into_par_iter()
        .map_init(Vec::new, |window, i| job.surface(i, window))
        .collect();

    #[cfg(not(feature = "rayon"))]
    let surfaces: Vec<CostSurface> = {
        let mut window = Vec::new();
        (0..grid.len()).map(|i| job.surface(i, &mut window)).collect()
    };

    log::trace!(
        "cost surfaces: {} patches of {}x{}, radius {:?}",
        surfaces.len(),
        grid.patch_w,
        grid.patch_h,
        config.search_radius
    );
    Ok(CostSurfaces { grid, surfaces })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::RepresentationMode;
    use patchreg_core::Image;

    /// Deterministic white-ish texture defined on all integer coordinates.
    pub(crate) fn texture(x: i64, y: i64) -> f32 {
        let mut h = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)) as u64;
        h ^= h >> 13;
        h = h.wrapping_mul(0x5bd1_e995);
        h ^= h >> 15;
        (h % 1000) as f32 / 1000.0
    }

    fn gray_config(grid: (usize, usize), radius: (usize, usize)) -> AlignmentConfig {
        AlignmentConfig {
            grid,
            search_radius: radius,
            mode: RepresentationMode::Gray,
            sigma_ref: 0.0,
            sigma_mov: 0.0,
            ..AlignmentConfig::default()
        }
    }

    fn argmin_offset(s: &CostSurface) -> (i32, i32) {
        let summed = s.summed();
        let (i, _) = summed
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        (
            (i % s.width()) as i32 - s.radius_x as i32,
            (i / s.width()) as i32 - s.radius_y as i32,
        )
    }

    #[test]
    fn integer_translation_is_the_argmin() {
        let (tx, ty) = (3i64, -2i64);
        let reference = Image::from_fn(40, 40, |x, y| texture(x as i64, y as i64));
        let moving = Image::from_fn(40, 40, |x, y| texture(x as i64 - tx, y as i64 - ty));

        for distance in [Distance::Ssd, Distance::Ntg] {
            let cfg = AlignmentConfig {
                distance,
                ..gray_config((1, 1), (4, 4))
            };
            let r = Planes::from_view(&reference.view());
            let m = Planes::from_view(&moving.view());
            let surfaces = compute_cost_surfaces(&r, &m, &cfg).unwrap();
            assert_eq!(surfaces.surfaces.len(), 1);
            let s = &surfaces.surfaces[0];
            assert_eq!((s.height(), s.width(), s.channels), (9, 9, 1));
            assert_eq!(argmin_offset(s), (3, -2), "{distance:?}");
        }
    }

    #[test]
    fn identical_images_have_zero_cost_at_origin() {
        let img = Image::from_fn(48, 32, |x, y| texture(x as i64, y as i64));
        let p = Planes::from_view(&img.view());
        let surfaces = compute_cost_surfaces(&p, &p, &gray_config((2, 3), (2, 2))).unwrap();
        assert_eq!(surfaces.surfaces.len(), 6);
        for s in &surfaces.surfaces {
            assert_eq!(s.at(2, 2, 0), 0.0);
            assert!(s.data.iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn mismatched_inputs_are_configuration_errors() {
        let a = Planes::new(32, 32, 1);
        let b = Planes::new(32, 30, 1);
        let cfg = gray_config((1, 1), (2, 2));
        assert!(matches!(
            compute_cost_surfaces(&a, &b, &cfg),
            Err(MatchError::Configuration(_))
        ));

        let c = Planes::new(32, 32, 3);
        assert!(compute_cost_surfaces(&a, &c, &cfg).is_err());
    }

    #[test]
    fn mosaic_has_one_tile_per_patch() {
        let img = Image::from_fn(48, 32, |x, y| texture(x as i64, y as i64));
        let p = Planes::from_view(&img.view());
        let surfaces = compute_cost_surfaces(&p, &p, &gray_config((2, 3), (2, 2))).unwrap();
        let m = surfaces.mosaic();
        assert_eq!((m.width, m.height), (3 * 6 + 1, 2 * 6 + 1));
        // Zero-cost centre of the first tile maps to black.
        assert_eq!(m.pixel(3, 3)[0], 0.0);
    }
}
