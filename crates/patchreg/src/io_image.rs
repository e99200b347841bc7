//! Bridges between the `image` crate and [`Image`].

use crate::PatchregError;
use ::image::{DynamicImage, GrayImage, ImageReader, RgbImage};
use patchreg_align::DebugSink;
use patchreg_core::Image;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Convert a decoded image into a normalized `[0, 1]` buffer.
///
/// Colour images become 3 channels, everything else 1; alpha is dropped.
pub fn from_dynamic(img: &DynamicImage) -> Result<Image, PatchregError> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let out = if img.color().has_color() {
        Image::from_u8(w, h, 3, img.to_rgb8().as_raw())?
    } else {
        Image::from_u8(w, h, 1, img.to_luma8().as_raw())?
    };
    Ok(out)
}

/// Quantize a 1- or 3-channel buffer to 8 bits.
pub fn to_dynamic(img: &Image) -> Result<DynamicImage, PatchregError> {
    let (w, h) = (img.width as u32, img.height as u32);
    let raw = img.to_u8();
    let out = match img.channels {
        1 => GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
        c => return Err(PatchregError::UnsupportedChannels(c)),
    };
    out.ok_or(PatchregError::Buffer(patchreg_core::ImageError::BufferSize {
        expected: img.width * img.height * img.channels,
        got: img.data.len(),
    }))
}

pub fn load_image(path: impl AsRef<Path>) -> Result<Image, PatchregError> {
    let img = ImageReader::open(path)?.decode()?;
    from_dynamic(&img)
}

/// Write `img`; the format follows the file extension.
pub fn save_image(path: impl AsRef<Path>, img: &Image) -> Result<(), PatchregError> {
    to_dynamic(img)?.save(path)?;
    Ok(())
}

/// Stretch finite values to `[0, 1]` so raw costs remain visible.
fn stretch(img: &Image) -> Image {
    let (lo, hi) = img
        .data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    let mut out = img.clone();
    for v in &mut out.data {
        *v = if range > 0.0 && v.is_finite() {
            (*v - lo) / range
        } else {
            0.0
        };
    }
    out
}

/// Writes `level{L}_iter{I}_cost.png` and `level{L}_iter{I}_warped.png`
/// into a directory. Write failures are logged, never propagated.
#[derive(Debug)]
pub struct PngDebugSink {
    dir: PathBuf,
    written: usize,
}

impl PngDebugSink {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PatchregError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    fn write(&mut self, name: String, img: &Image) {
        let path = self.dir.join(name);
        match save_image(&path, img) {
            Ok(()) => self.written += 1,
            Err(err) => log::warn!("debug output {}: {err}", path.display()),
        }
    }
}

impl DebugSink for PngDebugSink {
    fn cost_surfaces(&mut self, level: usize, iteration: usize, mosaic: &Image) {
        self.write(
            format!("level{level}_iter{iteration}_cost.png"),
            &stretch(mosaic),
        );
    }

    fn warped(&mut self, level: usize, iteration: usize, image: &Image) {
        self.write(format!("level{level}_iter{iteration}_warped.png"), image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_round_trip_is_exact_on_u8_values() {
        let img = Image::from_fn(5, 3, |x, y| ((x * 40 + y * 7) as f32) / 255.0);
        let back = from_dynamic(&to_dynamic(&img).unwrap()).unwrap();
        assert_eq!(back.channels, 1);
        for (a, b) in img.data.iter().zip(&back.data) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn rgb_stays_three_channels() {
        let rgb = RgbImage::from_fn(4, 2, |x, _| ::image::Rgb([x as u8 * 60, 10, 200]));
        let img = from_dynamic(&DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!((img.width, img.height, img.channels), (4, 2, 3));
        assert_eq!(img.pixel(1, 0)[0], 60.0 / 255.0);
    }

    #[test]
    fn two_channel_buffers_are_rejected() {
        let img = Image::new(2, 2, 2);
        assert!(matches!(
            to_dynamic(&img),
            Err(PatchregError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn stretch_maps_extremes_to_unit_range() {
        let img = Image::from_fn(3, 1, |x, _| [5.0, 7.0, 9.0][x]);
        assert_eq!(stretch(&img).data, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn sink_writes_named_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngDebugSink::new(dir.path().join("debug")).unwrap();
        let img = Image::from_fn(8, 8, |x, y| (x + y) as f32);
        sink.cost_surfaces(1, 2, &img);
        sink.warped(1, 2, &Image::from_fn(8, 8, |_, _| 0.5));
        assert_eq!(sink.written(), 2);
        assert!(sink.dir().join("level1_iter2_cost.png").exists());
        assert!(sink.dir().join("level1_iter2_warped.png").exists());
    }
}
