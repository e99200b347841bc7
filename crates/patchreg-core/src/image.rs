/// Errors raised when wrapping raw pixel buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image buffer length (expected {expected} samples, got {got})")]
    BufferSize { expected: usize, got: usize },
    #[error("invalid image dimensions (width={width}, height={height}, channels={channels})")]
    Dimensions {
        width: usize,
        height: usize,
        channels: usize,
    },
}

fn checked_len(width: usize, height: usize, channels: usize) -> Result<usize, ImageError> {
    if width == 0 || height == 0 || channels == 0 {
        return Err(ImageError::Dimensions {
            width,
            height,
            channels,
        });
    }
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(ImageError::Dimensions {
            width,
            height,
            channels,
        })
}

/// Borrowed H×W×C image, row-major with interleaved channels.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [f32], // len = w*h*c
}

impl<'a> ImageView<'a> {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: &'a [f32],
    ) -> Result<Self, ImageError> {
        let expected = checked_len(width, height, channels)?;
        if data.len() != expected {
            return Err(ImageError::BufferSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &'a [f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    pub fn to_image(&self) -> Image {
        Image {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.to_vec(),
        }
    }
}

/// Owned H×W×C image, row-major with interleaved channels.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl Image {
    /// Zero-filled image.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    pub fn from_vec(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, ImageError> {
        ImageView::new(width, height, channels, &data)?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Build from 8-bit samples, mapping `0..=255` onto `0.0..=1.0`.
    pub fn from_u8(
        width: usize,
        height: usize,
        channels: usize,
        pixels: &[u8],
    ) -> Result<Self, ImageError> {
        let expected = checked_len(width, height, channels)?;
        if pixels.len() != expected {
            return Err(ImageError::BufferSize {
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data: pixels.iter().map(|&v| v as f32 / 255.0).collect(),
        })
    }

    /// Build a single-channel image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            channels: 1,
            data,
        }
    }

    #[inline]
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [f32] {
        let start = (y * self.width + x) * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Quantize back to 8 bits, clamping to `0.0..=1.0`.
    pub fn to_u8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }
}

/// Planar (channel-major) `f32` image. Each plane is row-major `w*h`.
#[derive(Clone, Debug, PartialEq)]
pub struct Planes {
    pub width: usize,
    pub height: usize,
    pub planes: Vec<Vec<f32>>,
}

impl Planes {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            planes: vec![vec![0.0; width * height]; channels],
        }
    }

    /// De-interleave an image view.
    pub fn from_view(src: &ImageView<'_>) -> Self {
        let mut out = Self::new(src.width, src.height, src.channels);
        for (i, px) in src.data.chunks_exact(src.channels).enumerate() {
            for (c, &v) in px.iter().enumerate() {
                out.planes[c][i] = v;
            }
        }
        out
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub fn plane(&self, c: usize) -> &[f32] {
        &self.planes[c]
    }

    /// Re-interleave into an [`Image`].
    pub fn to_image(&self) -> Image {
        let channels = self.channels();
        let mut out = Image::new(self.width, self.height, channels);
        for (c, plane) in self.planes.iter().enumerate() {
            for (i, &v) in plane.iter().enumerate() {
                out.data[i * channels + c] = v;
            }
        }
        out
    }
}

/// What a sampler returns for coordinates that fall outside the image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Border {
    /// Return a constant value.
    Constant(f32),
    /// Clamp the coordinate to the nearest edge pixel.
    Replicate,
}

/// Clamp `(x, y)` into the sampling domain, or `None` if the border mode says
/// the sample is outside.
#[inline]
fn resolve(x: f32, y: f32, width: usize, height: usize, border: Border) -> Option<(f32, f32)> {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    match border {
        Border::Constant(_) => {
            if !(x > -0.5 && y > -0.5 && x < max_x + 0.5 && y < max_y + 0.5) {
                return None;
            }
            Some((x.clamp(0.0, max_x), y.clamp(0.0, max_y)))
        }
        Border::Replicate => {
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            Some((x.clamp(0.0, max_x), y.clamp(0.0, max_y)))
        }
    }
}

/// Bilinear sample of all channels of an interleaved image into `out`.
#[inline]
pub fn sample_bilinear(src: &ImageView<'_>, x: f32, y: f32, border: Border, out: &mut [f32]) {
    let c = src.channels;
    let Some((x, y)) = resolve(x, y, src.width, src.height, border) else {
        let fill = match border {
            Border::Constant(v) => v,
            Border::Replicate => 0.0,
        };
        out[..c].fill(fill);
        return;
    };
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(src.width - 1);
    let y1 = (y0 + 1).min(src.height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.pixel(x0, y0);
    let p10 = src.pixel(x1, y0);
    let p01 = src.pixel(x0, y1);
    let p11 = src.pixel(x1, y1);
    for ch in 0..c {
        let a = p00[ch] + fx * (p10[ch] - p00[ch]);
        let b = p01[ch] + fx * (p11[ch] - p01[ch]);
        out[ch] = a + fy * (b - a);
    }
}
