//! RTSP source using FFmpeg.
//!
//! Opens the stream over TCP, decodes until `discard_frames + 1` pictures have
//! come out of the decoder, keeps the last one and drops the input context,
//! which closes the RTSP session.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::StreamConfig;
use crate::frame::Frame;

pub(super) struct FfmpegStream {
    config: StreamConfig,
}

impl FfmpegStream {
    pub(super) fn new(config: StreamConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        Ok(Self { config })
    }

    pub(super) fn grab(&mut self) -> Result<Frame> {
        let mut options = ffmpeg::Dictionary::new();
        options.set("rtsp_transport", "tcp");
        options.set(
            "timeout",
            &self.config.timeout.as_micros().to_string(),
        );
        let mut input = ffmpeg::format::input_with_dictionary(&self.config.url, options)
            .context("open RTSP stream with ffmpeg")?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("stream has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let mut decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let wanted = self.config.discard_frames + 1;
        let mut decoded_count = 0usize;
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();

        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;

            while decoder.receive_frame(&mut decoded).is_ok() {
                decoded_count += 1;
                if decoded_count < wanted {
                    continue;
                }
                scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                return Frame::from_rgb(pixels, width, height);
            }
        }

        Err(anyhow!(
            "RTSP stream ended after {} of {} frames",
            decoded_count,
            wanted
        ))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
