use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One encoded JPEG frame cut out of the camera stream.
///
/// Payloads are immutable; the bytes are reference counted so handing one
/// from the fetch task to the render task never copies image data.
#[derive(Debug, Clone)]
pub struct Payload {
    pub jpeg_data: Bytes,
    /// Unix millis at which the slicer finished reading the part.
    pub received_at_ms: i64,
    /// Process-wide sequence number, strictly increasing in arrival order.
    pub seq: u64,
}

impl Payload {
    /// Stamp freshly sliced JPEG bytes with the next sequence number and the current time.
    pub fn new(jpeg_data: impl Into<Bytes>) -> Self {
        Self {
            jpeg_data: jpeg_data.into(),
            received_at_ms: Utc::now().timestamp_millis(),
            seq: SEQ_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.jpeg_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg_data.is_empty()
    }

    /// True when the bytes open with the JPEG SOI marker.
    pub fn looks_like_jpeg(&self) -> bool {
        self.jpeg_data.starts_with(&[0xFF, 0xD8])
    }
}

/// Width and height of a decoded frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
