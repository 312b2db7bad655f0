//! RTSP source using GStreamer.
//!
//! A pipeline is built, played, drained of stale samples and torn down for
//! every capture. The appsink keeps a small queue (`drop=false`) so the
//! discarded samples really are the ones the camera had buffered.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use super::StreamConfig;
use crate::frame::Frame;

pub(super) struct GstreamerStream {
    config: StreamConfig,
}

impl GstreamerStream {
    pub(super) fn new(config: StreamConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self { config })
    }

    pub(super) fn grab(&mut self) -> Result<Frame> {
        let session = Session::open(&self.config)?;
        for _ in 0..self.config.discard_frames {
            if session.pull(&self.config).is_err() {
                // Some cameras only ever emit a keyframe or two on connect.
                break;
            }
        }
        let sample = session.pull(&self.config)?;
        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Frame::from_rgb(pixels, width, height)
    }
}

/// A playing pipeline; dropping it stops the pipeline and closes the socket.
struct Session {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

impl Session {
    fn open(config: &StreamConfig) -> Result<Self> {
        let description = format!(
            "rtspsrc location=\"{}\" latency=0 protocols=tcp ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=appsink sync=false max-buffers={} drop=false",
            config.url,
            config.discard_frames + 1
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let session = Self { pipeline, appsink };
        session
            .pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        Ok(session)
    }

    fn pull(&self, config: &StreamConfig) -> Result<gstreamer::Sample> {
        let timeout = gstreamer::ClockTime::from_mseconds(config.timeout.as_millis() as u64);
        if let Some(err) = self.bus_error() {
            return Err(anyhow!(err));
        }
        self.appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| match self.bus_error() {
                Some(err) => anyhow!(err),
                None => anyhow!("RTSP stream produced no frame within {:?}", config.timeout),
            })
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("gstreamer reached EOS".to_string()),
                _ => {}
            }
        }
        None
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("failed to stop RTSP pipeline: {}", err);
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer shorter than frame")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
