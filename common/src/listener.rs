use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Why a stream run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorReason {
    /// Reading the stream failed after it was opened.
    IoError,
    /// The stream URL was missing or the connection could not be opened.
    OpenError,
}

impl fmt::Display for StreamErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamErrorReason::IoError => f.write_str("io error"),
            StreamErrorReason::OpenError => f.write_str("open error"),
        }
    }
}

/// Receives fatal stream errors. Called from background tasks.
pub trait StreamErrorListener: Send + Sync {
    fn on_error(&self, reason: StreamErrorReason);
}

impl<F> StreamErrorListener for F
where
    F: Fn(StreamErrorReason) + Send + Sync,
{
    fn on_error(&self, reason: StreamErrorReason) {
        self(reason)
    }
}

/// Wraps a listener so that one run reports at most one error.
pub struct ErrorReporter {
    listener: Arc<dyn StreamErrorListener>,
    fired: AtomicBool,
}

impl ErrorReporter {
    pub fn new(listener: Arc<dyn StreamErrorListener>) -> Self {
        Self {
            listener,
            fired: AtomicBool::new(false),
        }
    }

    /// Forward `reason` unless this run already reported. Returns whether it was delivered.
    pub fn report(&self, reason: StreamErrorReason) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            debug!(%reason, "error already reported for this run, suppressing");
            return false;
        }
        self.listener.on_error(reason);
        true
    }

    pub fn has_reported(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
