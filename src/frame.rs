//! Decoded camera frames.
//!
//! A `Frame` is the unit that flows from a source through the archive and the
//! publisher. It owns an RGB pixel buffer and the wall-clock time it was
//! captured at; nothing about it outlives a single loop iteration.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// Encoder quality used for uploads and archived stills.
pub const JPEG_QUALITY: u8 = 95;

/// One decoded image captured from the camera stream.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Local::now(),
        }
    }

    /// Wrap a tightly packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    /// Decode a JPEG (or any format the image crate was built with).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        Ok(Self::new(image.into_rgb8()))
    }

    /// Load an archived still from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let image =
            image::open(path).with_context(|| format!("read image {}", path.display()))?;
        Ok(Self::new(image.into_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Serialize to JPEG at [`JPEG_QUALITY`].
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.image.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .encode_image(&self.image)
            .context("encode jpeg")?;
        Ok(out)
    }

    /// Shrink the frame so it is at most `max_width` wide, keeping the aspect
    /// ratio. Frames already within bounds are returned unchanged.
    pub fn limit_width(self, max_width: u32) -> Self {
        let (width, height) = self.dimensions();
        if width <= max_width || max_width == 0 {
            return self;
        }
        let new_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
        self.resized(max_width, new_height)
    }

    /// Resize to exact dimensions. No-op when the size already matches.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self;
        }
        Self {
            image: imageops::resize(&self.image, width, height, FilterType::Triangle),
            captured_at: self.captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(width, height, image::Rgb([40, 90, 200])))
    }

    #[test]
    fn limit_width_preserves_aspect_ratio() {
        let frame = solid(2560, 1440).limit_width(1920);
        assert_eq!(frame.dimensions(), (1920, 1080));
    }

    #[test]
    fn limit_width_leaves_small_frames_alone() {
        let frame = solid(1280, 720).limit_width(1920);
        assert_eq!(frame.dimensions(), (1280, 720));
    }

    #[test]
    fn jpeg_encoding_decodes_back_to_same_size() -> Result<()> {
        let frame = solid(64, 48);
        let jpeg = frame.encode_jpeg()?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = Frame::decode(&jpeg)?;
        assert_eq!(decoded.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn from_rgb_rejects_short_buffers() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2).is_ok());
    }
}
