//! Separable Gaussian smoothing and anti-aliased decimation.
//!
//! Boundary handling replicates the edge pixel. All filters operate on `f32`
//! buffers and allocate their output; callers on hot paths keep the results.

use crate::{sample_bilinear, Border, Image, ImageView};

/// Normalized 1D Gaussian kernel with radius `ceil(3σ)` (at least 1).
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let denom = 2.0 * sigma * sigma;
    let mut k: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / denom).exp()
        })
        .collect();
    let sum: f32 = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Convolve `stride`-interleaved rows horizontally and then vertically.
fn separable(
    src: &[f32],
    width: usize,
    height: usize,
    stride: usize,
    kernel: &[f32],
) -> Vec<f32> {
    let radius = kernel.len() / 2;
    let row_len = width * stride;
    let mut tmp = vec![0.0f32; src.len()];

    for y in 0..height {
        let in_row = &src[y * row_len..(y + 1) * row_len];
        let out_row = &mut tmp[y * row_len..(y + 1) * row_len];
        for x in 0..width {
            for c in 0..stride {
                let mut acc = 0.0f32;
                for (k, &w) in kernel.iter().enumerate() {
                    let sx = (x + k).saturating_sub(radius).min(width - 1);
                    acc += w * in_row[sx * stride + c];
                }
                out_row[x * stride + c] = acc;
            }
        }
    }

    let mut out = vec![0.0f32; src.len()];
    for y in 0..height {
        let out_row = &mut out[y * row_len..(y + 1) * row_len];
        for (k, &w) in kernel.iter().enumerate() {
            let sy = (y + k).saturating_sub(radius).min(height - 1);
            let in_row = &tmp[sy * row_len..(sy + 1) * row_len];
            for (o, &v) in out_row.iter_mut().zip(in_row) {
                *o += w * v;
            }
        }
    }
    out
}

/// Gaussian blur of a single row-major plane. `sigma <= 0` returns a copy.
pub fn gaussian_blur_plane(src: &[f32], width: usize, height: usize, sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 || width == 0 || height == 0 {
        return src.to_vec();
    }
    separable(src, width, height, 1, &gaussian_kernel(sigma))
}

/// Gaussian blur of every channel of an interleaved image.
pub fn gaussian_blur(src: &ImageView<'_>, sigma: f32) -> Image {
    if sigma <= 0.0 {
        return src.to_image();
    }
    let data = separable(
        src.data,
        src.width,
        src.height,
        src.channels,
        &gaussian_kernel(sigma),
    );
    Image {
        width: src.width,
        height: src.height,
        channels: src.channels,
        data,
    }
}

fn box_downscale(src: &ImageView<'_>, factor: usize) -> Image {
    let w = (src.width / factor).max(1);
    let h = (src.height / factor).max(1);
    let c = src.channels;
    let mut out = Image::new(w, h, c);
    let norm = 1.0 / (factor * factor) as f32;

    for y in 0..h {
        for x in 0..w {
            let dst = out.pixel_mut(x, y);
            for sy in (y * factor)..((y + 1) * factor).min(src.height) {
                for sx in (x * factor)..((x + 1) * factor).min(src.width) {
                    for (d, &v) in dst.iter_mut().zip(src.pixel(sx, sy)) {
                        *d += v;
                    }
                }
            }
            for d in dst.iter_mut() {
                *d *= norm;
            }
        }
    }
    out
}

/// Reduce an image by `factor` with anti-aliasing.
///
/// Output pixel `x` covers source pixels centred at `factor * (x + 0.5) - 0.5`.
/// Integer factors average `factor × factor` blocks; fractional factors
/// prefilter with a Gaussian (`σ = ½·sqrt(f² − 1)`) and sample bilinearly.
/// Factors `<= 1` return a copy.
pub fn downscale(src: &ImageView<'_>, factor: f64) -> Image {
    if !(factor > 1.0) {
        return src.to_image();
    }
    let rounded = factor.round();
    if (factor - rounded).abs() < 1e-9 {
        return box_downscale(src, rounded as usize);
    }

    let sigma = 0.5 * (factor * factor - 1.0).sqrt();
    let blurred = gaussian_blur(src, sigma as f32);
    let w = ((src.width as f64 / factor).floor() as usize).max(1);
    let h = ((src.height as f64 / factor).floor() as usize).max(1);
    let mut out = Image::new(w, h, src.channels);
    let view = blurred.view();
    for y in 0..h {
        let sy = (factor * (y as f64 + 0.5) - 0.5) as f32;
        for x in 0..w {
            let sx = (factor * (x as f64 + 0.5) - 0.5) as f32;
            sample_bilinear(&view, sx, sy, Border::Replicate, out.pixel_mut(x, y));
        }
    }
    out
}
