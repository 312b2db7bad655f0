//! Time-lapse archive.
//!
//! Stills are written to a flat directory as
//! `frame_{seq:06}_{YYYYmmdd_HHMMSS}.jpg`, so filename order is capture
//! order. The directory holds frames from the current run only: it is
//! emptied by [`Timelapse::prepare`] at startup. On shutdown the stills are
//! assembled into a video by [`Timelapse::compile_video`].

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::ui::Ui;

pub mod video;

pub use video::{CompileOutcome, VideoSummary};

pub const DEFAULT_TIMELAPSE_DIR: &str = "timelapse_frames";
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_FPS: u32 = 24;
pub const DEFAULT_MAX_FRAMES: usize = 100_000;
/// Archived stills wider than this are scaled down.
pub const MAX_FRAME_WIDTH: u32 = 1920;
/// Pruning runs after a save whenever the frame counter is a multiple of this.
pub const PRUNE_EVERY_FRAMES: u64 = 100;

const FRAME_EXTENSION: &str = "jpg";

#[derive(Clone, Debug)]
pub struct TimelapseConfig {
    /// Directory holding archived stills.
    pub dir: PathBuf,
    /// Minimum time between two archived stills.
    pub save_interval: Duration,
    /// Output video frame rate.
    pub fps: u32,
    /// Retention cap for archived stills.
    pub max_frames: usize,
    /// Directory the compiled video is written to.
    pub output_dir: PathBuf,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_TIMELAPSE_DIR),
            save_interval: DEFAULT_SAVE_INTERVAL,
            fps: DEFAULT_FPS,
            max_frames: DEFAULT_MAX_FRAMES,
            output_dir: PathBuf::from("."),
        }
    }
}

pub struct Timelapse {
    config: TimelapseConfig,
    last_saved: Option<Instant>,
}

impl Timelapse {
    pub fn new(config: TimelapseConfig) -> Self {
        Self {
            config,
            last_saved: None,
        }
    }

    pub fn config(&self) -> &TimelapseConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Create the archive directory and remove files left by an earlier run.
    /// Returns the number of files removed.
    pub fn prepare(&mut self) -> Result<usize> {
        if !self.config.dir.exists() {
            fs::create_dir_all(&self.config.dir).with_context(|| {
                format!("create timelapse directory {}", self.config.dir.display())
            })?;
            log::info!("created timelapse directory {}", self.config.dir.display());
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.config.dir)
            .with_context(|| format!("list {}", self.config.dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("remove stale frame {}", path.display()))?;
                removed += 1;
            }
        }
        log::info!(
            "cleared {} stale file(s) from {}",
            removed,
            self.config.dir.display()
        );
        self.last_saved = None;
        Ok(removed)
    }

    /// Whether a still should be archived at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_saved {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.config.save_interval,
        }
    }

    /// Write `frame` as still number `seq`. Only a successful write resets the
    /// save interval.
    pub fn save_frame(&mut self, frame: &Frame, seq: u64) -> Result<PathBuf> {
        let filename = frame_file_name(seq, frame);
        let path = self.config.dir.join(filename);
        let jpeg = frame.clone().limit_width(MAX_FRAME_WIDTH).encode_jpeg()?;
        write_atomic(&path, &jpeg)
            .with_context(|| format!("write timelapse frame {}", path.display()))?;
        self.last_saved = Some(Instant::now());
        log::debug!("saved timelapse frame {}", path.display());
        Ok(path)
    }

    /// Archived stills in capture order.
    pub fn list_frames(&self) -> Result<Vec<PathBuf>> {
        list_frames(&self.config.dir)
    }

    /// Keep only the newest `max_frames` stills. Returns how many were deleted.
    pub fn prune(&self, max_frames: usize) -> Result<usize> {
        let frames = self.list_frames()?;
        if frames.len() <= max_frames {
            return Ok(0);
        }
        let excess = frames.len() - max_frames;
        for path in &frames[..excess] {
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        log::info!("pruned {} old timelapse frame(s)", excess);
        Ok(excess)
    }

    /// [`Timelapse::prune`] against the configured cap.
    pub fn enforce_retention(&self) -> Result<usize> {
        self.prune(self.config.max_frames)
    }

    /// Assemble the archived stills into a video in the output directory.
    pub fn compile_video(&self, ui: &Ui) -> Result<CompileOutcome> {
        let frames = self.list_frames()?;
        video::compile(&frames, self.config.fps, &self.config.output_dir, ui)
    }
}

/// `.jpg` files in `dir`, sorted by name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_frame = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn frame_file_name(seq: u64, frame: &Frame) -> String {
    format!(
        "frame_{:06}_{}.{}",
        seq,
        frame.captured_at().format("%Y%m%d_%H%M%S"),
        FRAME_EXTENSION
    )
}

// Partial writes land under a non-.jpg name, so listings never see them.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(width, height, Rgb([10, 20, 30])))
    }

    fn timelapse_in(dir: &Path) -> Timelapse {
        Timelapse::new(TimelapseConfig {
            dir: dir.to_path_buf(),
            output_dir: dir.to_path_buf(),
            ..TimelapseConfig::default()
        })
    }

    #[test]
    fn prepare_clears_previous_run() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        fs::write(temp_dir.path().join("frame_000001_old.jpg"), b"x")?;
        fs::write(temp_dir.path().join("notes.txt"), b"x")?;
        let mut timelapse = timelapse_in(temp_dir.path());
        assert_eq!(timelapse.prepare()?, 2);
        assert!(timelapse.list_frames()?.is_empty());
        Ok(())
    }

    #[test]
    fn prepare_creates_missing_directory() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path().join("nested").join("frames");
        let mut timelapse = timelapse_in(&dir);
        assert_eq!(timelapse.prepare()?, 0);
        assert!(dir.is_dir());
        Ok(())
    }

    #[test]
    fn save_interval_gates_saves() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut timelapse = timelapse_in(temp_dir.path());
        assert!(timelapse.is_due(Instant::now()));
        timelapse.save_frame(&frame(32, 24), 0)?;
        assert!(!timelapse.is_due(Instant::now()));
        assert!(timelapse.is_due(Instant::now() + DEFAULT_SAVE_INTERVAL));
        Ok(())
    }

    #[test]
    fn saved_frames_are_named_and_downsized() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut timelapse = timelapse_in(temp_dir.path());
        let path = timelapse.save_frame(&frame(2400, 100), 7)?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("frame_000007_"), "{name}");
        assert!(name.ends_with(".jpg"));
        let stored = Frame::open(&path)?;
        assert_eq!(stored.dimensions(), (1920, 80));
        Ok(())
    }

    #[test]
    fn prune_keeps_newest_frames() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        for seq in 0..5 {
            fs::write(
                temp_dir.path().join(format!("frame_{:06}_20240101_000000.jpg", seq)),
                b"x",
            )?;
        }
        let timelapse = timelapse_in(temp_dir.path());
        assert_eq!(timelapse.prune(3)?, 2);
        let names: Vec<String> = timelapse
            .list_frames()?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        assert_eq!(
            names,
            vec![
                "frame_000002_20240101_000000.jpg",
                "frame_000003_20240101_000000.jpg",
                "frame_000004_20240101_000000.jpg",
            ]
        );
        assert_eq!(timelapse.prune(3)?, 0);
        Ok(())
    }
}
