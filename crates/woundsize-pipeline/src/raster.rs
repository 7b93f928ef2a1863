//! Owned pixel buffers handed across the ingestion and display boundaries.
//!
//! A [`RasterBuffer`] is the only way pixel data enters the pipeline. The
//! constructor validates that the declared dimensions and channel count
//! match the byte length, so every later stage can index without checks.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, GrayImage, PipelineError, RgbaImage};

/// Number and meaning of the interleaved channels in a [`RasterBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channels {
    /// Single intensity channel.
    Gray,
    /// Red, green, blue.
    Rgb,
    /// Red, green, blue, alpha.
    Rgba,
}

impl Channels {
    /// Bytes per pixel.
    #[must_use]
    pub const fn count(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    /// Map a channel count to the matching variant.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] for counts other than 1, 3 or 4.
    pub fn from_count(count: usize) -> Result<Self, PipelineError> {
        match count {
            1 => Ok(Self::Gray),
            3 => Ok(Self::Rgb),
            4 => Ok(Self::Rgba),
            n => Err(PipelineError::InvalidInput(format!(
                "unsupported channel count {n} (expected 1, 3 or 4)"
            ))),
        }
    }
}

/// A decoded, row-major grid of 8-bit pixels.
///
/// Invariant: `data.len() == width * height * channels.count()` and both
/// dimensions are non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    width: u32,
    height: u32,
    channels: Channels,
    data: Vec<u8>,
}

impl RasterBuffer {
    /// Wrap decoded pixel bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateInput`] if either dimension is
    /// zero, and [`PipelineError::InvalidInput`] if the byte length does
    /// not match `width * height * channels`.
    pub fn new(
        width: u32,
        height: u32,
        channels: Channels,
        data: Vec<u8>,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::DegenerateInput(format!(
                "image has zero area ({width}x{height})"
            )));
        }
        let expected = usize::try_from(width)
            .ok()
            .zip(usize::try_from(height).ok())
            .and_then(|(w, h)| w.checked_mul(h))
            .and_then(|px| px.checked_mul(channels.count()))
            .ok_or_else(|| {
                PipelineError::InvalidInput(format!("image {width}x{height} is too large"))
            })?;
        if data.len() != expected {
            return Err(PipelineError::InvalidInput(format!(
                "buffer holds {} bytes but {width}x{height}x{} needs {expected}",
                data.len(),
                channels.count(),
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Wrap RGBA bytes, the format browsers and most decoders hand out.
    ///
    /// # Errors
    ///
    /// Same as [`RasterBuffer::new`].
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, PipelineError> {
        Self::new(width, height, Channels::Rgba, data)
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Width and height.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Channel layout.
    #[must_use]
    pub const fn channels(&self) -> Channels {
        self.channels
    }

    /// Raw interleaved bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return its bytes.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Iterate over pixels as channel slices in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.channels.count())
    }

    /// Expand to RGBA for display. Gray is replicated across R/G/B and
    /// missing alpha becomes opaque.
    #[must_use]
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = Vec::with_capacity(self.data.len() / self.channels.count() * 4);
        for px in self.pixels() {
            match self.channels {
                Channels::Gray => out.extend_from_slice(&[px[0], px[0], px[0], 255]),
                Channels::Rgb => out.extend_from_slice(&[px[0], px[1], px[2], 255]),
                Channels::Rgba => out.extend_from_slice(px),
            }
        }
        // Length matches by construction; the fallback is never taken.
        RgbaImage::from_raw(self.width, self.height, out)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

impl From<GrayImage> for RasterBuffer {
    fn from(image: GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            channels: Channels::Gray,
            data: image.into_raw(),
        }
    }
}

impl From<RgbaImage> for RasterBuffer {
    fn from(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            channels: Channels::Rgba,
            data: image.into_raw(),
        }
    }
}

/// Serde proxy: `(width, height, channels, bytes)`, re-validated on load.
#[derive(Serialize, Deserialize)]
struct RasterBufferProxy(u32, u32, Channels, Vec<u8>);

impl Serialize for RasterBuffer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RasterBufferProxy(self.width, self.height, self.channels, self.data.clone())
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RasterBuffer {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let RasterBufferProxy(width, height, channels, data) =
            RasterBufferProxy::deserialize(deserializer)?;
        Self::new(width, height, channels, data).map_err(serde::de::Error::custom)
    }
}
