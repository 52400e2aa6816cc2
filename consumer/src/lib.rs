//! Render side of the liveview pipeline: decoding queued JPEG payloads and
//! drawing them onto a surface.

pub mod decode;
pub mod render;
pub mod surface;

pub use decode::{DecodeError, DecodeOptions, DecodedFrame, FrameDecoder};
pub use render::{RenderLoop, RenderStats};
pub use surface::{fit_rect, FrameBufferSurface, Rect, Surface};
