//! Multipart MJPEG framing.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

pub(super) const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Pulls whole JPEG images out of an MJPEG byte stream by scanning for
/// SOI/EOI markers, ignoring multipart boundaries and part headers.
pub(super) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(super) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(super) fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // Runaway part without an EOI marker: keep only the tail.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = find_end_of_image(buffer, start + 2)?;
    Some((start, end))
}

/// Walk the marker segments up to the first scan, so an EOI inside an APPn
/// payload (EXIF thumbnails) does not end the frame. Malformed headers fall
/// back to a plain marker scan.
fn find_end_of_image(buffer: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        if buffer.get(pos) != Some(&0xFF) {
            return scan_for_eoi(buffer, pos);
        }
        let mut marker_at = pos + 1;
        while buffer.get(marker_at) == Some(&0xFF) {
            marker_at += 1;
        }
        match *buffer.get(marker_at)? {
            EOI => return Some(marker_at + 1),
            0x01 | 0xD0..=0xD7 => pos = marker_at + 1,
            0x00 => return scan_for_eoi(buffer, pos),
            marker => {
                let len = buffer.get(marker_at + 1..marker_at + 3)?;
                let len = u16::from_be_bytes([len[0], len[1]]) as usize;
                if len < 2 {
                    return scan_for_eoi(buffer, pos);
                }
                let next = marker_at + 1 + len;
                if marker == SOS {
                    // Entropy-coded data stuffs 0xFF bytes, so the next
                    // FFD9 is the real end of image.
                    return scan_for_eoi(buffer, next);
                }
                pos = next;
            }
        }
    }
}

fn scan_for_eoi(buffer: &[u8], from: usize) -> Option<usize> {
    let offset = buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == [0xFF, EOI])?;
    Some(from + offset + 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finds_jpeg_between_part_headers() {
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        data.extend_from_slice(b"\r\n--frame\r\n");
        let (start, end) = find_jpeg_bounds(&data).expect("jpeg bounds");
        assert_eq!(&data[start..end], &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
    }

    fn jpeg_with_exif_thumbnail() -> Vec<u8> {
        let thumbnail = [0xFF, 0xD8, 9, 9, 0xFF, 0xD9];
        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&thumbnail);

        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE1];
        data.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
        data.extend_from_slice(&app1);
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0, 0, 0x3F, 0]);
        data.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn thumbnail_end_marker_does_not_cut_frame() {
        let jpeg = jpeg_with_exif_thumbnail();
        let mut data = b"--frame\r\n\r\n".to_vec();
        data.extend_from_slice(&jpeg);
        data.extend_from_slice(b"\r\n--frame\r\n");

        let (start, end) = find_jpeg_bounds(&data).expect("jpeg bounds");
        assert_eq!(&data[start..end], jpeg.as_slice());
    }

    #[test]
    fn truncated_frame_waits_for_more_data() {
        let jpeg = jpeg_with_exif_thumbnail();
        assert!(find_jpeg_bounds(&jpeg[..jpeg.len() - 2]).is_none());
    }

    #[test]
    fn real_encoder_output_is_framed_whole() -> Result<()> {
        let image = image::RgbImage::from_pixel(24, 16, image::Rgb([10, 200, 30]));
        let jpeg = crate::frame::Frame::new(image).encode_jpeg()?;
        let (start, end) = find_jpeg_bounds(&jpeg).expect("jpeg bounds");
        assert_eq!((start, end), (0, jpeg.len()));
        Ok(())
    }

    #[test]
    fn reads_consecutive_parts() -> Result<()> {
        let mut data = Vec::new();
        for marker in [7u8, 8, 9] {
            data.extend_from_slice(b"--frame\r\n\r\n");
            data.extend_from_slice(&[0xFF, 0xD8, marker, 0xFF, 0xD9]);
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(data)));
        assert_eq!(stream.read_next_jpeg()?[2], 7);
        assert_eq!(stream.read_next_jpeg()?[2], 8);
        assert_eq!(stream.read_next_jpeg()?[2], 9);
        assert!(stream.read_next_jpeg().is_err());
        Ok(())
    }
}
