use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use liveview_common::FrameSize;
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// A drawing target the render loop posts frames to.
pub trait Surface: Send + Sync {
    /// Lock the surface, run `draw` on its canvas, then post the result.
    ///
    /// Returns `false` without calling `draw` when the surface cannot be locked,
    /// e.g. while it is being torn down.
    fn with_canvas(&self, draw: &mut dyn FnMut(&mut RgbaImage)) -> bool;
}

/// Destination rectangle on the surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale `frame` uniformly to fit inside `surface` and center it.
///
/// Returns `None` when either side has no area.
pub fn fit_rect(frame: FrameSize, surface: FrameSize) -> Option<Rect> {
    if frame.is_empty() || surface.is_empty() {
        return None;
    }
    let scale = f32::min(
        surface.width as f32 / frame.width as f32,
        surface.height as f32 / frame.height as f32,
    );
    let scaled_w = (frame.width as f32 * scale) as u32;
    let scaled_h = (frame.height as f32 * scale) as u32;
    let x = surface.width.saturating_sub(scaled_w) / 2;
    let y = surface.height.saturating_sub(scaled_h) / 2;
    Some(Rect {
        x,
        y,
        width: surface.width - 2 * x,
        height: surface.height - 2 * y,
    })
}

/// In-memory surface backed by an RGBA canvas.
///
/// Stands in for a window surface: it can be created, destroyed and
/// re-created at a different size, and the last posted canvas can be read
/// back as an image or PNG.
pub struct FrameBufferSurface {
    canvas: Mutex<Option<RgbaImage>>,
    posted: AtomicU64,
}

impl FrameBufferSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: Mutex::new(Some(RgbaImage::from_pixel(width, height, BLACK))),
            posted: AtomicU64::new(0),
        }
    }

    /// A surface that has not been created yet; every draw is skipped.
    pub fn detached() -> Self {
        Self {
            canvas: Mutex::new(None),
            posted: AtomicU64::new(0),
        }
    }

    pub fn create(&self, width: u32, height: u32) {
        info!(width, height, "surface created");
        *self.canvas.lock() = Some(RgbaImage::from_pixel(width, height, BLACK));
    }

    pub fn destroy(&self) {
        if self.canvas.lock().take().is_some() {
            info!("surface destroyed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.canvas.lock().is_some()
    }

    pub fn size(&self) -> Option<FrameSize> {
        self.canvas
            .lock()
            .as_ref()
            .map(|c| FrameSize::new(c.width(), c.height()))
    }

    /// Number of canvases posted since construction.
    pub fn posted_frames(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Copy of the canvas as last posted, `None` before the first post or
    /// while the surface is destroyed.
    pub fn snapshot(&self) -> Option<RgbaImage> {
        if self.posted_frames() == 0 {
            return None;
        }
        self.canvas.lock().clone()
    }

    pub fn snapshot_png(&self) -> Result<Option<Vec<u8>>, image::ImageError> {
        let Some(canvas) = self.snapshot() else {
            return Ok(None);
        };
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;
        Ok(Some(out.into_inner()))
    }
}

impl Surface for FrameBufferSurface {
    fn with_canvas(&self, draw: &mut dyn FnMut(&mut RgbaImage)) -> bool {
        // Held by a snapshot or a concurrent create/destroy: skip this frame.
        let Some(mut guard) = self.canvas.try_lock() else {
            return false;
        };
        let Some(canvas) = guard.as_mut() else {
            return false;
        };
        draw(canvas);
        self.posted.fetch_add(1, Ordering::Relaxed);
        true
    }
}
