use std::future::Future;

use liveview_common::Payload;

use crate::FetchError;

/// An open liveview connection that yields one JPEG payload at a time.
pub trait PayloadSlicer: Send + 'static {
    /// Read the next payload.
    ///
    /// `Ok(None)` is a part that carried no image data; callers skip it.
    /// Any `Err` means the connection is no longer usable.
    fn next_payload(&mut self) -> impl Future<Output = Result<Option<Payload>, FetchError>> + Send;

    /// Tear down the underlying connection. Calling it twice is harmless.
    fn close(&mut self);
}

/// Opens slicers for stream URLs.
pub trait Connector: Send + Sync + 'static {
    type Slicer: PayloadSlicer;

    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Slicer, FetchError>> + Send;
}
