//! The relay loop.
//!
//! One iteration: capture → optional time-lapse save → JPEG encode → upload.
//! Each iteration reports a [`Step`], and the step decides how long to wait
//! before the next one. Waiting happens on the shutdown channel, so an
//! interrupt cuts the sleep short and triggers the single cleanup step
//! (time-lapse compile) before the loop returns.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::ingest::CameraSource;
use crate::timelapse::{CompileOutcome, Timelapse, PRUNE_EVERY_FRAMES};
use crate::transport::{SnapshotPublisher, UploadReport, UploadVerdict};
use crate::ui::Ui;

pub const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(5);
pub const CAPTURE_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Extra intervals waited after a 429, on top of the regular one.
pub const RATE_LIMIT_BACKOFF_FACTOR: u32 = 2;

/// Something that yields one fresh frame per call.
pub trait Capture {
    fn capture(&mut self) -> Option<Frame>;
}

/// Something that delivers one encoded snapshot per call.
pub trait Publish {
    fn publish(&self, jpeg: &[u8]) -> UploadReport;
}

impl Capture for CameraSource {
    fn capture(&mut self) -> Option<Frame> {
        CameraSource::capture(self)
    }
}

impl Publish for SnapshotPublisher {
    fn publish(&self, jpeg: &[u8]) -> UploadReport {
        SnapshotPublisher::publish(self, jpeg)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RelaySettings {
    pub upload_interval: Duration,
    pub capture_retry_delay: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            upload_interval: DEFAULT_UPLOAD_INTERVAL,
            capture_retry_delay: CAPTURE_RETRY_DELAY,
        }
    }
}

/// What one iteration did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    CaptureFailed,
    EncodeFailed,
    Published(UploadReport),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub uploaded: u64,
    /// Set when the time-lapse archive was enabled and compiling ran without
    /// error.
    pub timelapse: Option<CompileOutcome>,
}

pub struct Relay<C, P> {
    source: C,
    publisher: P,
    timelapse: Option<Timelapse>,
    settings: RelaySettings,
    frames: u64,
    uploaded: u64,
}

impl<C: Capture, P: Publish> Relay<C, P> {
    pub fn new(source: C, publisher: P, settings: RelaySettings) -> Self {
        Self {
            source,
            publisher,
            timelapse: None,
            settings,
            frames: 0,
            uploaded: 0,
        }
    }

    /// Archive stills into `timelapse` while running.
    pub fn with_timelapse(mut self, timelapse: Timelapse) -> Self {
        self.timelapse = Some(timelapse);
        self
    }

    /// Frames pushed to the publisher so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Uploads the endpoint accepted with 200.
    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    /// Run one iteration.
    pub fn step(&mut self) -> Step {
        let Some(frame) = self.source.capture() else {
            log::warn!(
                "frame capture failed; retrying in {}s",
                self.settings.capture_retry_delay.as_secs()
            );
            return Step::CaptureFailed;
        };

        self.archive(&frame);

        let jpeg = match frame.encode_jpeg() {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::error!("failed to encode frame: {:#}", err);
                return Step::EncodeFailed;
            }
        };

        let report = self.publisher.publish(&jpeg);
        self.frames += 1;
        self.log_report(&report);
        Step::Published(report)
    }

    /// How long to wait after `step` before the next iteration.
    pub fn delay_after(&self, step: &Step) -> Duration {
        match step {
            Step::CaptureFailed => self.settings.capture_retry_delay,
            Step::Published(report) if report.verdict() == UploadVerdict::RateLimited => {
                self.settings
                    .upload_interval
                    .saturating_mul(RATE_LIMIT_BACKOFF_FACTOR + 1)
            }
            Step::Published(_) | Step::EncodeFailed => self.settings.upload_interval,
        }
    }

    /// Loop until `shutdown` fires (or its sender goes away), then run the
    /// cleanup step.
    pub fn run(mut self, shutdown: &Receiver<()>, ui: &Ui) -> RunSummary {
        loop {
            let step = self.step();
            let delay = self.delay_after(&step);
            match shutdown.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("stopped by user");
        self.finish(ui)
    }

    /// One iteration followed by the cleanup step.
    pub fn run_once(mut self, ui: &Ui) -> RunSummary {
        self.step();
        self.finish(ui)
    }

    fn finish(self, ui: &Ui) -> RunSummary {
        let timelapse = self.timelapse.as_ref().and_then(|timelapse| {
            log::info!("creating final timelapse");
            match timelapse.compile_video(ui) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    log::error!("error creating timelapse: {:#}", err);
                    None
                }
            }
        });
        log::info!(
            "work completed: {}/{} frames uploaded",
            self.uploaded,
            self.frames
        );
        RunSummary {
            frames: self.frames,
            uploaded: self.uploaded,
            timelapse,
        }
    }

    fn archive(&mut self, frame: &Frame) {
        let Some(timelapse) = self.timelapse.as_mut() else {
            return;
        };
        if !timelapse.is_due(Instant::now()) {
            return;
        }
        match timelapse.save_frame(frame, self.frames) {
            Ok(_) => {
                if self.frames % PRUNE_EVERY_FRAMES == 0 {
                    if let Err(err) = timelapse.enforce_retention() {
                        log::error!("error cleaning up timelapse frames: {:#}", err);
                    }
                }
            }
            Err(err) => log::error!("error saving timelapse frame: {:#}", err),
        }
    }

    fn log_report(&mut self, report: &UploadReport) {
        match report.verdict() {
            UploadVerdict::Accepted => {
                self.uploaded += 1;
                log::info!(
                    "frame #{} sent. size: {} bytes. success: {}/{}",
                    self.frames,
                    report.bytes,
                    self.uploaded,
                    self.frames
                );
            }
            UploadVerdict::RateLimited => {
                log::warn!(
                    "rate limit exceeded; increase UPLOAD_INTERVAL (current: {}s)",
                    self.settings.upload_interval.as_secs()
                );
            }
            verdict => {
                log::warn!(
                    "upload error #{}: {} - {}",
                    self.frames,
                    report.status,
                    report.body
                );
                if let Some(hint) = verdict.hint() {
                    log::warn!("hint: {}", hint);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timelapse::TimelapseConfig;
    use image::{Rgb, RgbImage};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::mpsc;

    struct ScriptedSource {
        script: VecDeque<bool>,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Self {
            Self {
                script: script.iter().copied().collect(),
            }
        }
    }

    impl Capture for ScriptedSource {
        fn capture(&mut self) -> Option<Frame> {
            if self.script.pop_front().unwrap_or(true) {
                Some(Frame::new(RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]))))
            } else {
                None
            }
        }
    }

    struct ScriptedPublisher {
        statuses: RefCell<VecDeque<u16>>,
        payloads: RefCell<Vec<usize>>,
    }

    impl ScriptedPublisher {
        fn new(statuses: &[u16]) -> Self {
            Self {
                statuses: RefCell::new(statuses.iter().copied().collect()),
                payloads: RefCell::new(Vec::new()),
            }
        }
    }

    impl Publish for ScriptedPublisher {
        fn publish(&self, jpeg: &[u8]) -> UploadReport {
            self.payloads.borrow_mut().push(jpeg.len());
            let status = self.statuses.borrow_mut().pop_front().unwrap_or(200);
            UploadReport {
                delivered: status != 0,
                status,
                body: String::new(),
                bytes: jpeg.len(),
            }
        }
    }

    fn settings() -> RelaySettings {
        RelaySettings {
            upload_interval: Duration::from_secs(5),
            capture_retry_delay: Duration::from_secs(5),
        }
    }

    #[test]
    fn rate_limit_backs_off_longer_than_interval() {
        let mut relay = Relay::new(
            ScriptedSource::new(&[true]),
            ScriptedPublisher::new(&[429]),
            settings(),
        );
        let step = relay.step();
        let delay = relay.delay_after(&step);
        assert!(delay > settings().upload_interval);
        assert_eq!(delay, Duration::from_secs(15));
        assert_eq!(relay.uploaded(), 0);
        assert_eq!(relay.frames(), 1);
    }

    #[test]
    fn rate_limit_backoff_saturates_on_huge_interval() {
        let mut relay = Relay::new(
            ScriptedSource::new(&[true]),
            ScriptedPublisher::new(&[429]),
            RelaySettings {
                upload_interval: Duration::from_secs(u64::MAX / 2),
                ..settings()
            },
        );
        let step = relay.step();
        assert_eq!(relay.delay_after(&step), Duration::MAX);
    }

    #[test]
    fn accepted_upload_waits_one_interval() {
        let mut relay = Relay::new(
            ScriptedSource::new(&[true]),
            ScriptedPublisher::new(&[200]),
            settings(),
        );
        let step = relay.step();
        assert_eq!(relay.delay_after(&step), Duration::from_secs(5));
        assert_eq!(relay.uploaded(), 1);
    }

    #[test]
    fn capture_failure_skips_upload() {
        let publisher = ScriptedPublisher::new(&[]);
        let mut relay = Relay::new(ScriptedSource::new(&[false]), publisher, settings());
        let step = relay.step();
        assert_eq!(step, Step::CaptureFailed);
        assert_eq!(relay.delay_after(&step), CAPTURE_RETRY_DELAY);
        assert_eq!(relay.frames(), 0);
        assert!(relay.publisher.payloads.borrow().is_empty());
    }

    #[test]
    fn reported_bytes_match_payload() {
        let mut relay = Relay::new(
            ScriptedSource::new(&[true]),
            ScriptedPublisher::new(&[200]),
            settings(),
        );
        let Step::Published(report) = relay.step() else {
            panic!("expected an upload");
        };
        assert_eq!(report.bytes, relay.publisher.payloads.borrow()[0]);
    }

    #[test]
    fn run_stops_on_shutdown_and_compiles_timelapse() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut timelapse = Timelapse::new(TimelapseConfig {
            dir: temp_dir.path().join("frames"),
            output_dir: temp_dir.path().to_path_buf(),
            ..TimelapseConfig::default()
        });
        timelapse.prepare()?;

        let relay = Relay::new(
            ScriptedSource::new(&[true]),
            ScriptedPublisher::new(&[200]),
            settings(),
        )
        .with_timelapse(timelapse);

        let (tx, rx) = mpsc::channel();
        tx.send(())?;
        let summary = relay.run(&rx, &Ui::plain());

        assert_eq!(summary.frames, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(
            summary.timelapse,
            Some(CompileOutcome::InsufficientFrames { found: 1 })
        );
        Ok(())
    }

    #[test]
    fn run_once_without_timelapse() {
        let relay = Relay::new(
            ScriptedSource::new(&[true]),
            ScriptedPublisher::new(&[401]),
            settings(),
        );
        let summary = relay.run_once(&Ui::plain());
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.uploaded, 0);
        assert_eq!(summary.timelapse, None);
    }
}
