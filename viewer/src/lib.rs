//! Liveview orchestration: the stream controller that owns the fetch/render
//! task pair, and the HTTP control API served by the `liveview` binary.

pub mod api;
pub mod controller;

pub use api::{router, AppState, StatusResponse};
pub use controller::{RunReport, StreamController};
