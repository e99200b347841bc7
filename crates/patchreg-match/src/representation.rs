//! Cross-spectral descriptors.
//!
//! NIR and visible intensities are not comparable directly. Second-derivative
//! energies of the smoothed luminance keep the structure (edges, corners) and
//! discard most of the photometric response, so the cost surfaces computed on
//! them have a usable minimum even when the two spectra invert contrast.

use crate::RepresentationMode;
use patchreg_core::{gaussian_blur_plane, ImageView, Planes};

const REC601: [f32; 3] = [0.299, 0.587, 0.114];

/// Single-plane luminance of an interleaved image.
///
/// Rec.601 weights for RGB/RGBA, identity for one channel, channel mean
/// otherwise.
pub fn luminance(src: &ImageView<'_>) -> Vec<f32> {
    let c = src.channels;
    let pixels = src.data.chunks_exact(c);
    match c {
        1 => src.data.to_vec(),
        3 | 4 => pixels
            .map(|px| REC601[0] * px[0] + REC601[1] * px[1] + REC601[2] * px[2])
            .collect(),
        _ => {
            let inv = 1.0 / c as f32;
            pixels.map(|px| px.iter().sum::<f32>() * inv).collect()
        }
    }
}

/// Squared second differences along horizontal, vertical, diagonal and
/// anti-diagonal directions. Borders replicate the edge pixel.
fn laplacian_energies(lum: &[f32], width: usize, height: usize) -> Vec<Vec<f32>> {
    let mut out = vec![vec![0.0f32; width * height]; 4];
    let at = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, width as isize - 1) as usize;
        let y = y.clamp(0, height as isize - 1) as usize;
        lum[y * width + x]
    };

    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (x as isize, y as isize);
            let c2 = 2.0 * lum[y * width + x];
            let h = at(xi - 1, yi) - c2 + at(xi + 1, yi);
            let v = at(xi, yi - 1) - c2 + at(xi, yi + 1);
            let d = at(xi - 1, yi - 1) - c2 + at(xi + 1, yi + 1);
            let a = at(xi + 1, yi - 1) - c2 + at(xi - 1, yi + 1);
            let i = y * width + x;
            out[0][i] = h * h;
            out[1][i] = v * v;
            out[2][i] = d * d;
            out[3][i] = a * a;
        }
    }
    out
}

/// Build the planar descriptor for one image.
///
/// `sigma` is the Gaussian smoothing applied to the luminance before
/// differentiation (`LaplacianEnergies`) or as the output (`Gray`). It is
/// ignored for `Colored`. Spatial size is preserved.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(src), fields(w = src.width, h = src.height))
)]
pub fn build_representation(src: &ImageView<'_>, mode: RepresentationMode, sigma: f32) -> Planes {
    let (w, h) = (src.width, src.height);
    match mode {
        RepresentationMode::Colored => Planes::from_view(src),
        RepresentationMode::Gray => {
            let lum = gaussian_blur_plane(&luminance(src), w, h, sigma);
            Planes {
                width: w,
                height: h,
                planes: vec![lum],
            }
        }
        RepresentationMode::LaplacianEnergies => {
            let lum = gaussian_blur_plane(&luminance(src), w, h, sigma);
            Planes {
                width: w,
                height: h,
                planes: laplacian_energies(&lum, w, h),
            }
        }
    }
}

/// 4-neighbour discrete Laplacian of each plane, replicating borders.
pub fn laplacian_planes(src: &Planes) -> Planes {
    let (w, h) = (src.width, src.height);
    let planes = src
        .planes
        .iter()
        .map(|p| {
            let mut out = vec![0.0f32; w * h];
            for y in 0..h {
                let up = y.saturating_sub(1);
                let down = (y + 1).min(h - 1);
                for x in 0..w {
                    let left = x.saturating_sub(1);
                    let right = (x + 1).min(w - 1);
                    out[y * w + x] = p[y * w + left] + p[y * w + right] + p[up * w + x]
                        + p[down * w + x]
                        - 4.0 * p[y * w + x];
                }
            }
            out
        })
        .collect();
    Planes {
        width: w,
        height: h,
        planes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchreg_core::Image;

    #[test]
    fn luminance_weights() {
        let rgb = Image::from_vec(1, 1, 3, vec![1.0, 0.0, 0.0]).unwrap();
        assert!((luminance(&rgb.view())[0] - 0.299).abs() < 1e-6);

        let two = Image::from_vec(1, 1, 2, vec![0.2, 0.6]).unwrap();
        assert!((luminance(&two.view())[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn channel_counts_follow_mode() {
        let img = Image::from_vec(8, 6, 3, vec![0.5; 8 * 6 * 3]).unwrap();
        let view = img.view();
        for mode in [
            RepresentationMode::LaplacianEnergies,
            RepresentationMode::Gray,
            RepresentationMode::Colored,
        ] {
            let rep = build_representation(&view, mode, 1.0);
            assert_eq!(rep.channels(), mode.channels(3));
            assert_eq!((rep.width, rep.height), (8, 6));
        }
    }

    #[test]
    fn energies_respond_to_edges_only() {
        // Vertical step edge between x = 3 and x = 4.
        let img = Image::from_fn(8, 8, |x, _| if x < 4 { 0.0 } else { 1.0 });
        let rep = build_representation(&img.view(), RepresentationMode::LaplacianEnergies, 0.0);
        let h = rep.plane(0);
        let v = rep.plane(1);
        assert_eq!(h[2 * 8 + 3], 1.0);
        assert_eq!(h[2 * 8 + 4], 1.0);
        assert_eq!(h[2 * 8 + 1], 0.0);
        assert!(v.iter().all(|&e| e == 0.0));
    }

    #[test]
    fn laplacian_of_linear_ramp_vanishes_inside() {
        let img = Image::from_fn(6, 5, |x, y| x as f32 + 2.0 * y as f32);
        let lap = laplacian_planes(&Planes::from_view(&img.view()));
        for y in 1..4 {
            for x in 1..5 {
                assert!(lap.plane(0)[y * 6 + x].abs() < 1e-6);
            }
        }
    }
}
