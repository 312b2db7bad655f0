//! Outbound transports.

pub mod prusa;

pub use prusa::{
    PublisherConfig, SnapshotPublisher, UploadReport, UploadVerdict, DEFAULT_SNAPSHOT_URL,
};
