//! Prusa Connect snapshot upload.
//!
//! The snapshot endpoint takes one raw JPEG per `PUT`, authenticated by a
//! static token/fingerprint pair sent as headers. It misbehaves with reused
//! keep-alive connections and with chunked bodies, so every upload builds its
//! own agent, declares an explicit `content-length` and asks the server to
//! close the connection afterwards.

use std::fmt;
use std::time::Duration;

/// Default snapshot endpoint.
pub const DEFAULT_SNAPSHOT_URL: &str = "https://webcam.connect.prusa3d.com/c/snapshot";
/// Content type the endpoint expects (sic).
pub const SNAPSHOT_CONTENT_TYPE: &str = "image/jpg";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body kept in an [`UploadReport`].
const MAX_REPORTED_BODY: usize = 512;

#[derive(Clone)]
pub struct PublisherConfig {
    pub endpoint: String,
    pub token: String,
    pub fingerprint: String,
    pub timeout: Duration,
}

impl fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("fingerprint", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Result of one upload attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    /// An HTTP response came back (any status).
    pub delivered: bool,
    /// HTTP status, or 0 when no response arrived.
    pub status: u16,
    /// Response body, or the transport error text.
    pub body: String,
    /// Payload length sent as `content-length`.
    pub bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadVerdict {
    Accepted,
    RateLimited,
    Unauthorized,
    BadRequest,
    Rejected(u16),
    Unreachable,
}

impl UploadReport {
    pub fn verdict(&self) -> UploadVerdict {
        if !self.delivered {
            return UploadVerdict::Unreachable;
        }
        match self.status {
            200 => UploadVerdict::Accepted,
            429 => UploadVerdict::RateLimited,
            401 => UploadVerdict::Unauthorized,
            400 => UploadVerdict::BadRequest,
            other => UploadVerdict::Rejected(other),
        }
    }
}

impl UploadVerdict {
    /// Operator hint for failures with a usual suspect.
    pub fn hint(self) -> Option<&'static str> {
        match self {
            UploadVerdict::Unauthorized => Some("check that TOKEN and FINGERPRINT are correct"),
            UploadVerdict::BadRequest => {
                Some("check the payload format; a missing content-length is the usual cause")
            }
            UploadVerdict::Unreachable => Some("connection error; check network connectivity"),
            _ => None,
        }
    }
}

/// Uploads JPEG snapshots, one connection per call.
pub struct SnapshotPublisher {
    config: PublisherConfig,
}

impl SnapshotPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// PUT one JPEG. Never retries and never returns an error; failures are
    /// described by the report.
    pub fn publish(&self, jpeg: &[u8]) -> UploadReport {
        let agent = ureq::AgentBuilder::new()
            .timeout(self.config.timeout)
            .max_idle_connections(0)
            .max_idle_connections_per_host(0)
            .build();

        let result = agent
            .put(&self.config.endpoint)
            .set("content-type", SNAPSHOT_CONTENT_TYPE)
            .set("content-length", &jpeg.len().to_string())
            .set("fingerprint", &self.config.fingerprint)
            .set("token", &self.config.token)
            .set("connection", "close")
            .send_bytes(jpeg);

        match result {
            Ok(response) => {
                let status = response.status();
                UploadReport {
                    delivered: true,
                    status,
                    body: read_body(response),
                    bytes: jpeg.len(),
                }
            }
            Err(ureq::Error::Status(status, response)) => UploadReport {
                delivered: true,
                status,
                body: read_body(response),
                bytes: jpeg.len(),
            },
            Err(ureq::Error::Transport(err)) => UploadReport {
                delivered: false,
                status: 0,
                body: err.to_string(),
                bytes: jpeg.len(),
            },
        }
    }
}

fn read_body(response: ureq::Response) -> String {
    let mut body = response.into_string().unwrap_or_default();
    if body.len() > MAX_REPORTED_BODY {
        let mut cut = MAX_REPORTED_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body.trim().to_string()
}
