//! Synthetic source (stub://) for tests and dry runs.

use anyhow::Result;
use image::{Rgb, RgbImage};

use super::StreamConfig;
use crate::frame::Frame;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

pub(super) struct SyntheticStream {
    config: StreamConfig,
    frame_count: u64,
}

impl SyntheticStream {
    pub(super) fn new(config: StreamConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Mirrors the real backends: "open", skip the buffered frames, keep one.
    pub(super) fn grab(&mut self) -> Result<Frame> {
        log::trace!("synthetic open {}", self.config.url);
        self.frame_count += self.config.discard_frames as u64;
        self.frame_count += 1;
        Ok(Frame::new(self.render()))
    }

    /// Diagonal gradient that drifts with the frame counter.
    fn render(&self) -> RgbImage {
        let shift = (self.frame_count % 256) as u32;
        RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let r = ((x + shift) % 256) as u8;
            let g = ((y + shift) % 256) as u8;
            let b = ((x + y) % 256) as u8;
            Rgb([r, g, b])
        })
    }
}
