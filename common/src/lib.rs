//! Types shared by the fetch and render sides of the liveview pipeline.

pub mod config;
pub mod frame;
pub mod listener;
pub mod queue;
pub mod state;

pub use frame::{FrameSize, Payload};
pub use listener::{ErrorReporter, StreamErrorListener, StreamErrorReason};
pub use queue::FrameQueue;
pub use state::{RenderInterrupt, StateCell, StreamState};
