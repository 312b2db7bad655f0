//! HTTP camera source.
//!
//! Handles cameras that expose either a still-image endpoint (one JPEG per
//! request) or a multipart MJPEG stream. The content type of the response
//! decides which.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

use super::mjpeg::{MjpegStream, MAX_JPEG_BYTES};
use super::StreamConfig;
use crate::frame::Frame;

pub(super) struct HttpSnapshot {
    config: StreamConfig,
}

impl HttpSnapshot {
    pub(super) fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub(super) fn grab(&mut self) -> Result<Frame> {
        // Fresh agent per capture: no pooled connection survives the call.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.config.timeout)
            .timeout_read(self.config.timeout)
            .max_idle_connections(0)
            .build();
        let response = agent
            .get(&self.config.url)
            .call()
            .context("open http camera stream")?;
        let content_type = response
            .header("Content-Type")
            .unwrap_or("")
            .to_ascii_lowercase();

        let jpeg = if content_type.contains("multipart") {
            let mut stream = MjpegStream::new(response.into_reader());
            for _ in 0..self.config.discard_frames {
                stream.read_next_jpeg().context("skip buffered mjpeg frame")?;
            }
            stream.read_next_jpeg()?
        } else {
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_JPEG_BYTES as u64)
                .read_to_end(&mut bytes)
                .context("read jpeg snapshot")?;
            if bytes.is_empty() {
                return Err(anyhow!("empty jpeg snapshot"));
            }
            bytes
        };

        Frame::decode(&jpeg)
    }
}
