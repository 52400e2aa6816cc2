//! Fetch side of the liveview pipeline: slicing JPEG payloads out of the
//! camera's HTTP stream and feeding them into the frame queue.

pub mod fetch;
pub mod mjpeg;
pub mod slicer;

use std::time::Duration;

pub use fetch::{FetchLoop, FetchSummary};
pub use mjpeg::{HttpConnector, HttpSlicer, MultipartParser};
pub use slicer::{Connector, PayloadSlicer};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid stream URL {0}")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("no response headers received within {0:?}")]
    ResponseTimeout(Duration),
    #[error("no stream data received within {0:?}")]
    ReadTimeout(Duration),
    #[error("stream ended")]
    EndOfStream,
    #[error("slicer is closed")]
    Closed,
}
