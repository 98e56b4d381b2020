// THEORY:
// A `Frame` is one immutable snapshot of the scene: dimensions, a tightly packed
// RGBA buffer and the moment it was captured. The engine keeps at most two of them
// alive per session (reference and latest), and both are handed to the comparator,
// the screenshot store and observers. The buffer is therefore shared (`Arc<[u8]>`)
// so that cloning a frame never copies pixels.
//
// A frame validates its buffer length once, on construction. Everything downstream
// can index the buffer without re-checking bounds.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::{Result, SentinelError};

/// An immutable captured image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    /// Creates a frame from an RGBA buffer, stamped with the current time.
    ///
    /// Fails with `InvalidFrame` when the buffer length is not `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(SentinelError::InvalidFrame(format!(
                "{}x{} RGBA frame needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
            captured_at: Utc::now(),
        })
    }

    /// A frame where every pixel has the same color.
    pub fn solid(width: u32, height: u32, pixel: Pixel) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&pixel.to_bytes());
        }
        Self {
            width,
            height,
            pixels: pixels.into(),
            captured_at: Utc::now(),
        }
    }

    /// Replaces the capture timestamp.
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The raw RGBA buffer, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// The pixel at `(x, y)`. Callers must stay inside the frame.
    #[inline]
    pub fn pixel_at(&self, x: u32, y: u32) -> Pixel {
        let start = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Pixel::from(&self.pixels[start..start + CHANNELS])
    }

    /// Fails with `DimensionMismatch` unless both frames have the same size.
    pub fn ensure_same_dimensions(&self, current: &Frame) -> Result<()> {
        if self.dimensions() != current.dimensions() {
            return Err(SentinelError::DimensionMismatch {
                reference: self.dimensions(),
                current: current.dimensions(),
            });
        }
        Ok(())
    }

    /// Returns a copy with the given pixel overwritten. Intended for building test
    /// scenes and synthetic sources.
    pub fn with_pixel(&self, x: u32, y: u32, pixel: Pixel) -> Frame {
        let mut bytes = self.pixels.to_vec();
        let start = (y as usize * self.width as usize + x as usize) * CHANNELS;
        bytes[start..start + CHANNELS].copy_from_slice(&pixel.to_bytes());
        Frame {
            width: self.width,
            height: self.height,
            pixels: bytes.into(),
            captured_at: self.captured_at,
        }
    }
}
