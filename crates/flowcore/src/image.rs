use crate::Rect;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    #[error("Pixel buffer holds {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    SizeMismatch {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Images need 1, 3 or 4 channels, got {0}")]
    Channels(u8),

    #[error("Region {0:?} lies outside the image")]
    OutOfBounds(Rect),
}

/// Decoded, interleaved 8-bit image. Cloning shares the pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Arc<[u8]>,
}

impl ImageBuffer {
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, ImageError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(ImageError::Channels(channels));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(ImageError::SizeMismatch {
                width,
                height,
                channels,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels: pixels.into(),
        })
    }

    /// Builds a single-channel image from a per-pixel function.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            channels: 1,
            pixels: pixels.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Copies the pixels into a buffer not shared with any port.
    pub fn detached(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            channels: self.channels,
            pixels: self.pixels.to_vec().into(),
        }
    }

    pub fn map_pixels(&self, f: impl Fn(u8) -> u8) -> Self {
        Self {
            width: self.width,
            height: self.height,
            channels: self.channels,
            pixels: self.pixels.iter().map(|p| f(*p)).collect::<Vec<_>>().into(),
        }
    }

    pub fn crop(&self, region: Rect) -> Result<Self, ImageError> {
        let finite = [region.x, region.y, region.width, region.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || region.x < 0.0 || region.y < 0.0 || region.width < 1.0 || region.height < 1.0 {
            return Err(ImageError::OutOfBounds(region));
        }
        // Bounds are checked in u64; the casts saturate on huge values
        let fits = |start: f64, len: f64, limit: u32| {
            (start as u64)
                .checked_add(len as u64)
                .is_some_and(|end| end <= u64::from(limit))
        };
        if !fits(region.x, region.width, self.width) || !fits(region.y, region.height, self.height) {
            return Err(ImageError::OutOfBounds(region));
        }
        let (x0, y0) = (region.x as u32, region.y as u32);
        let (w, h) = (region.width as u32, region.height as u32);

        let c = self.channels as usize;
        let stride = self.width as usize * c;
        let mut pixels = Vec::with_capacity(w as usize * h as usize * c);
        for row in y0..y0 + h {
            let start = row as usize * stride + x0 as usize * c;
            pixels.extend_from_slice(&self.pixels[start..start + w as usize * c]);
        }
        Ok(Self {
            width: w,
            height: h,
            channels: self.channels,
            pixels: pixels.into(),
        })
    }

    /// Nearest-neighbour downscale so that neither edge exceeds `max_edge`.
    pub fn thumbnail(&self, max_edge: u32) -> Self {
        let longest = self.width.max(self.height);
        if longest <= max_edge || max_edge == 0 || self.width == 0 || self.height == 0 {
            return self.clone();
        }
        let scale = max_edge as f64 / longest as f64;
        let w = ((self.width as f64 * scale).round() as u32).max(1);
        let h = ((self.height as f64 * scale).round() as u32).max(1);

        let c = self.channels as usize;
        let mut pixels = Vec::with_capacity(w as usize * h as usize * c);
        for y in 0..h {
            let sy = ((y as f64 / scale) as u32).min(self.height - 1) as usize;
            for x in 0..w {
                let sx = ((x as f64 / scale) as u32).min(self.width - 1) as usize;
                let start = (sy * self.width as usize + sx) * c;
                pixels.extend_from_slice(&self.pixels[start..start + c]);
            }
        }
        Self {
            width: w,
            height: h,
            channels: self.channels,
            pixels: pixels.into(),
        }
    }

    /// Splits the pixel buffer into chunks of at most `chunk_size` bytes.
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = ImageChunk> + Send + 'static {
        let chunk_size = chunk_size.max(1);
        let pixels = self.pixels.clone();
        let (width, height, channels) = (self.width, self.height, self.channels);
        let total_len = pixels.len();

        (0..total_len).step_by(chunk_size).map(move |offset| {
            let end = (offset + chunk_size).min(total_len);
            ImageChunk {
                total_len,
                width,
                height,
                channels,
                offset,
                data: pixels[offset..end].to_vec(),
            }
        })
    }
}

/// One bounded slice of an exported image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageChunk {
    pub total_len: usize,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub offset: usize,
    pub data: Vec<u8>,
}

/// Resolution requested by an image export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportResolution {
    #[default]
    Full,
    Thumbnail,
}
