//! Time-lapse video assembly.
//!
//! Stills are re-encoded as JPEG at a common size and piped into an `ffmpeg`
//! child process (`image2pipe`). Encoders differ between ffmpeg builds, so a
//! short probe picks the first codec in [`CODECS`] the local build can open
//! at the target size before any real frame is written.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use crate::frame::Frame;
use crate::ui::Ui;

/// A video has to have at least this many stills.
pub const MIN_FRAMES: usize = 2;

const FFMPEG_BIN: &str = "ffmpeg";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    /// ffmpeg encoder name.
    pub encoder: &'static str,
    /// Container extension for the output file.
    pub extension: &'static str,
}

/// Encoders in order of preference.
pub const CODECS: [Codec; 3] = [
    Codec {
        encoder: "mpeg4",
        extension: "mp4",
    },
    Codec {
        encoder: "libxvid",
        extension: "avi",
    },
    Codec {
        encoder: "mjpeg",
        extension: "avi",
    },
];

#[derive(Clone, Debug, PartialEq)]
pub enum CompileOutcome {
    /// Nothing was written; the archive had fewer than [`MIN_FRAMES`] stills.
    InsufficientFrames { found: usize },
    Created(VideoSummary),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoSummary {
    pub path: PathBuf,
    pub codec: &'static str,
    pub frames: usize,
    pub fps: u32,
    pub duration_secs: f64,
    pub bytes: u64,
}

/// Assemble `frames` (already in playback order) into a video under
/// `output_dir`, named after the current local time.
pub fn compile(frames: &[PathBuf], fps: u32, output_dir: &Path, ui: &Ui) -> Result<CompileOutcome> {
    if frames.len() < MIN_FRAMES {
        log::warn!(
            "not enough frames to create a timelapse (found: {})",
            frames.len()
        );
        return Ok(CompileOutcome::InsufficientFrames {
            found: frames.len(),
        });
    }
    if fps == 0 {
        return Err(anyhow!("timelapse fps must be greater than zero"));
    }

    log::info!("creating timelapse from {} frames", frames.len());
    let first = Frame::open(&frames[0]).context("cannot read first frame")?;
    let (width, height) = even_dimensions(first.dimensions());
    log::info!("frame size: {}x{}", width, height);

    let codec = {
        let _stage = ui.stage("Select video codec");
        select_codec(width, height)?
    };
    log::info!("using codec {}", codec.encoder);

    fs::create_dir_all(output_dir)
        .with_context(|| format!("create output directory {}", output_dir.display()))?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = output_dir.join(format!("timelapse_{}.{}", stamp, codec.extension));

    let mut child = spawn_encoder(codec, fps, &path)?;
    let stderr = child
        .stderr
        .take()
        .map(drain_in_background)
        .ok_or_else(|| anyhow!("ffmpeg stderr unavailable"))?;
    let written = match feed_frames(&mut child, frames, width, height, ui) {
        Ok(written) => written,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr.join();
            return Err(err);
        }
    };
    let status = child.wait().context("wait for ffmpeg")?;
    let stderr = stderr.join().unwrap_or_default();
    check_exit(status, &stderr, codec)?;

    let bytes = fs::metadata(&path)
        .with_context(|| format!("video file was not created: {}", path.display()))?
        .len();
    let summary = VideoSummary {
        path,
        codec: codec.encoder,
        frames: written,
        fps,
        duration_secs: written as f64 / fps as f64,
        bytes,
    };
    log::info!("timelapse created: {}", summary.path.display());
    log::info!(
        "duration: {:.1}s at {} FPS, file size: {:.1} MB",
        summary.duration_secs,
        fps,
        bytes as f64 / 1024.0 / 1024.0
    );
    Ok(CompileOutcome::Created(summary))
}

/// Most encoders reject odd frame sizes with yuv420p.
fn even_dimensions((width, height): (u32, u32)) -> (u32, u32) {
    ((width & !1).max(2), (height & !1).max(2))
}

fn select_codec(width: u32, height: u32) -> Result<Codec> {
    for codec in CODECS {
        match probe_codec(codec, width, height) {
            Ok(true) => return Ok(codec),
            Ok(false) => log::debug!("codec {} unavailable", codec.encoder),
            Err(err) => return Err(err),
        }
    }
    Err(anyhow!(
        "cannot configure a video encoder (tried {})",
        CODECS
            .iter()
            .map(|c| c.encoder)
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

/// Encode one black frame to the null muxer. `Ok(false)` means this build
/// cannot open the encoder; `Err` means ffmpeg itself is unusable.
fn probe_codec(codec: Codec, width: u32, height: u32) -> Result<bool> {
    let status = Command::new(FFMPEG_BIN)
        .args(["-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
        .arg(format!("color=c=black:s={}x{}:d=0.1", width, height))
        .args(["-frames:v", "1", "-c:v", codec.encoder, "-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(ffmpeg_spawn_error)?;
    Ok(status.success())
}

fn spawn_encoder(codec: Codec, fps: u32, path: &Path) -> Result<Child> {
    Command::new(FFMPEG_BIN)
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "image2pipe", "-c:v", "mjpeg", "-framerate"])
        .arg(fps.to_string())
        .args(["-i", "-", "-c:v", codec.encoder, "-q:v", "3"])
        .args(pixel_format_args(codec))
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ffmpeg_spawn_error)
}

fn pixel_format_args(codec: Codec) -> &'static [&'static str] {
    match codec.encoder {
        "mjpeg" => &["-pix_fmt", "yuvj420p"],
        _ => &["-pix_fmt", "yuv420p"],
    }
}

fn feed_frames(
    child: &mut Child,
    frames: &[PathBuf],
    width: u32,
    height: u32,
    ui: &Ui,
) -> Result<usize> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
    let mut progress = ui.progress(frames.len() as u64, "Writing frames");
    let mut written = 0;
    for path in frames {
        progress.inc();
        let frame = match Frame::open(path) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("skipping unreadable frame {}: {:#}", path.display(), err);
                continue;
            }
        };
        let jpeg = frame.resized(width, height).encode_jpeg()?;
        stdin
            .write_all(&jpeg)
            .context("ffmpeg closed its input early")?;
        written += 1;
    }
    // Closing stdin signals end of input.
    drop(stdin);
    if written == 0 {
        return Err(anyhow!("no archived frame could be read"));
    }
    Ok(written)
}

/// Read `reader` to the end on its own thread so a chatty encoder never
/// blocks on a full pipe while frames are still being written.
fn drain_in_background<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut raw = Vec::new();
        let _ = reader.read_to_end(&mut raw);
        String::from_utf8_lossy(&raw).into_owned()
    })
}

fn check_exit(status: ExitStatus, stderr: &str, codec: Codec) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(anyhow!(
        "ffmpeg ({}) exited with {}: {}",
        codec.encoder,
        status,
        stderr.trim()
    ))
}

fn ffmpeg_spawn_error(err: std::io::Error) -> anyhow::Error {
    if err.kind() == ErrorKind::NotFound {
        anyhow!("ffmpeg binary not found on PATH; it is required to compile timelapses")
    } else {
        anyhow!("failed to start ffmpeg: {}", err)
    }
}
