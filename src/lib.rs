//! Camera snapshot relay.
//!
//! Periodically pulls one frame from a network camera, optionally keeps a
//! still every few seconds for a time-lapse, and pushes the latest frame to
//! the Prusa Connect snapshot endpoint.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames, JPEG encoding, downscaling
//! - `ingest`: camera sources (RTSP, HTTP snapshot/MJPEG, synthetic)
//! - `timelapse`: still archive, retention and video assembly
//! - `transport`: the snapshot upload
//! - `relay`: the capture → archive → upload loop
//! - `config`: file + environment configuration
//! - `ui`: stderr progress for long-running steps
//!
//! Everything runs on one thread with blocking I/O. Per-iteration failures
//! are logged and retried; only configuration errors and a failed startup
//! capture are fatal.

pub mod config;
pub mod frame;
pub mod ingest;
pub mod relay;
pub mod timelapse;
pub mod transport;
pub mod ui;

pub use config::{FingerprintKind, RelayConfig};
pub use frame::Frame;
pub use ingest::{CameraSource, SourceStats, StreamConfig};
pub use relay::{Capture, Publish, Relay, RelaySettings, RunSummary, Step};
pub use timelapse::{CompileOutcome, Timelapse, TimelapseConfig, VideoSummary};
pub use transport::{PublisherConfig, SnapshotPublisher, UploadReport, UploadVerdict};
