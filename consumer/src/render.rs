use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use liveview_common::{FrameQueue, FrameSize, RenderInterrupt, StateCell};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::decode::{DecodeError, DecodeOptions, DecodedFrame, FrameDecoder};
use crate::surface::{fit_rect, Surface, BLACK};

/// Black frames drawn after a size change, enough to flush a triple-buffered surface.
pub const FLUSH_FRAMES: usize = 3;

/// Counters for one render run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered: u64,
    pub black_frames: u64,
    pub size_changes: u64,
    pub decode_failures: u64,
    pub stale_buffers: u64,
    pub skipped_draws: u64,
}

/// Consumer task: takes payloads off the frame queue, decodes them and
/// draws them aspect-fit onto the surface.
pub struct RenderLoop<S: Surface + ?Sized> {
    surface: Arc<S>,
    queue: Arc<FrameQueue>,
    state: Arc<StateCell>,
    interrupt: Arc<RenderInterrupt>,
    decoder: FrameDecoder,
    previous_size: FrameSize,
    stats: RenderStats,
}

impl<S: Surface + ?Sized> RenderLoop<S> {
    pub fn new(
        surface: Arc<S>,
        queue: Arc<FrameQueue>,
        state: Arc<StateCell>,
        interrupt: Arc<RenderInterrupt>,
        options: DecodeOptions,
    ) -> Self {
        Self {
            surface,
            queue,
            state,
            interrupt,
            decoder: FrameDecoder::new(options),
            previous_size: FrameSize::default(),
            stats: RenderStats::default(),
        }
    }

    pub async fn run(mut self) -> RenderStats {
        info!(options = ?self.decoder.options(), "starting to draw liveview frames");

        while self.state.is_fetching() {
            let payload = tokio::select! {
                biased;
                _ = self.interrupt.interrupted() => {
                    info!("render loop interrupted");
                    break;
                }
                payload = self.queue.take() => payload,
            };

            if !payload.looks_like_jpeg() {
                warn!(seq = payload.seq, bytes = payload.len(), "payload is not a JPEG, skipping");
                self.stats.decode_failures += 1;
                continue;
            }

            let frame = match self.decoder.decode(&payload.jpeg_data) {
                Ok(frame) => frame,
                Err(DecodeError::InvalidReuseBuffer { buffer, needed }) => {
                    debug!(
                        seq = payload.seq,
                        buffer,
                        needed,
                        "stale reusable buffer, dropping frame"
                    );
                    self.decoder.discard_reusable();
                    self.stats.stale_buffers += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        seq = payload.seq,
                        bytes = payload.len(),
                        error = %e,
                        "failed to decode payload, skipping"
                    );
                    self.stats.decode_failures += 1;
                    continue;
                }
            };

            self.draw_frame(&frame);
            self.decoder.recycle(frame);

            if self.stats.rendered > 0 && self.stats.rendered % 100 == 0 {
                debug!(rendered = self.stats.rendered, "frames rendered");
            }
        }

        self.decoder.discard_reusable();
        self.state.stop();
        info!(
            rendered = self.stats.rendered,
            size_changes = self.stats.size_changes,
            decode_failures = self.stats.decode_failures,
            skipped = self.stats.skipped_draws,
            "render loop finished"
        );
        self.stats
    }

    fn draw_frame(&mut self, frame: &DecodedFrame) {
        let size = frame.size();
        if size != self.previous_size {
            self.on_frame_size_changed(size);
            return;
        }

        let image = frame.image();
        let drawn = self
            .surface
            .with_canvas(&mut |canvas: &mut RgbaImage| blit_aspect_fit(canvas, image));
        if drawn {
            self.stats.rendered += 1;
        } else {
            self.stats.skipped_draws += 1;
        }
    }

    fn on_frame_size_changed(&mut self, size: FrameSize) {
        debug!(
            old_width = self.previous_size.width,
            old_height = self.previous_size.height,
            width = size.width,
            height = size.height,
            "change of frame size detected"
        );
        self.previous_size = size;
        self.stats.size_changes += 1;
        for _ in 0..FLUSH_FRAMES {
            self.draw_black_frame();
        }
    }

    fn draw_black_frame(&mut self) {
        let drawn = self.surface.with_canvas(&mut |canvas: &mut RgbaImage| {
            for pixel in canvas.pixels_mut() {
                *pixel = BLACK;
            }
        });
        if drawn {
            self.stats.black_frames += 1;
        } else {
            self.stats.skipped_draws += 1;
        }
    }
}

/// Draw `image` scaled to fit and centered; the surrounding canvas is left as is.
fn blit_aspect_fit(canvas: &mut RgbaImage, image: &DynamicImage) {
    let frame = FrameSize::new(image.width(), image.height());
    let surface = FrameSize::new(canvas.width(), canvas.height());
    let Some(dst) = fit_rect(frame, surface) else {
        return;
    };

    let scaled = if dst.width == frame.width && dst.height == frame.height {
        image.to_rgba8()
    } else {
        image
            .resize_exact(dst.width, dst.height, FilterType::Triangle)
            .to_rgba8()
    };
    imageops::replace(canvas, &scaled, i64::from(dst.x), i64::from(dst.y));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::{patch_dimensions, solid_jpeg};
    use liveview_common::{Payload, StreamState};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Drawn {
        Black,
        Image,
    }

    struct RecordingSurface {
        canvas: Mutex<RgbaImage>,
        events: Mutex<Vec<Drawn>>,
        available: AtomicBool,
    }

    impl RecordingSurface {
        fn new(width: u32, height: u32) -> Self {
            Self {
                canvas: Mutex::new(RgbaImage::new(width, height)),
                events: Mutex::new(Vec::new()),
                available: AtomicBool::new(true),
            }
        }

        fn events(&self) -> Vec<Drawn> {
            self.events.lock().clone()
        }
    }

    impl Surface for RecordingSurface {
        fn with_canvas(&self, draw: &mut dyn FnMut(&mut RgbaImage)) -> bool {
            if !self.available.load(Ordering::SeqCst) {
                return false;
            }
            let mut canvas = self.canvas.lock();
            draw(&mut *canvas);
            let black = canvas.pixels().all(|p| p.0[..3] == [0, 0, 0]);
            self.events
                .lock()
                .push(if black { Drawn::Black } else { Drawn::Image });
            true
        }
    }

    struct Harness {
        surface: Arc<RecordingSurface>,
        queue: Arc<FrameQueue>,
        state: Arc<StateCell>,
        interrupt: Arc<RenderInterrupt>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                surface: Arc::new(RecordingSurface::new(80, 60)),
                queue: Arc::new(FrameQueue::new(16)),
                state: Arc::new(StateCell::new(StreamState::Fetching)),
                interrupt: Arc::new(RenderInterrupt::new()),
            }
        }

        fn push(&self, width: u32, height: u32, color: [u8; 3]) {
            self.queue.push(Payload::new(solid_jpeg(width, height, color)));
        }

        fn spawn(&self, options: DecodeOptions) -> tokio::task::JoinHandle<RenderStats> {
            let render = RenderLoop::new(
                Arc::clone(&self.surface),
                Arc::clone(&self.queue),
                Arc::clone(&self.state),
                Arc::clone(&self.interrupt),
                options,
            );
            tokio::spawn(render.run())
        }

        async fn wait_for_events(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.surface.events().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("surface did not receive enough draws");
        }

        async fn finish(&self, task: tokio::task::JoinHandle<RenderStats>) -> RenderStats {
            self.interrupt.interrupt();
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("render loop should exit")
                .unwrap()
        }
    }

    const NO_REUSE: DecodeOptions = DecodeOptions {
        sample_size: 1,
        reuse_buffers: false,
    };

    #[tokio::test]
    async fn size_change_flushes_three_black_frames() {
        let harness = Harness::new();
        harness.push(64, 48, [220, 20, 20]);
        harness.push(64, 48, [220, 20, 20]);
        harness.push(32, 32, [20, 20, 220]);
        harness.push(32, 32, [20, 20, 220]);

        let task = harness.spawn(NO_REUSE);
        harness.wait_for_events(8).await;
        let stats = harness.finish(task).await;

        use Drawn::{Black, Image};
        assert_eq!(
            harness.surface.events(),
            vec![Black, Black, Black, Image, Black, Black, Black, Image]
        );
        assert_eq!(stats.size_changes, 2);
        assert_eq!(stats.black_frames, 6);
        assert_eq!(stats.rendered, 2);
    }

    #[tokio::test]
    async fn stale_reuse_buffer_costs_one_frame() {
        let harness = Harness::new();
        harness.push(64, 48, [220, 20, 20]);
        harness.push(64, 48, [220, 20, 20]);
        // First frame of the new size hits the pooled 64x48 buffer.
        harness.push(32, 32, [20, 20, 220]);
        harness.push(32, 32, [20, 20, 220]);
        harness.push(32, 32, [20, 20, 220]);

        let task = harness.spawn(DecodeOptions::default());
        harness.wait_for_events(8).await;
        let stats = harness.finish(task).await;

        assert_eq!(stats.stale_buffers, 1);
        assert_eq!(stats.size_changes, 2);
        assert_eq!(stats.rendered, 2);
        assert_eq!(stats.decode_failures, 0);
    }

    #[tokio::test]
    async fn undecodable_payload_is_skipped() {
        let harness = Harness::new();
        harness.queue.push(Payload::new(b"not a jpeg".to_vec()));
        let mut oversized = solid_jpeg(8, 8, [20, 200, 20]);
        patch_dimensions(&mut oversized, 60000, 60000);
        harness.queue.push(Payload::new(oversized));
        harness.push(40, 30, [20, 200, 20]);
        harness.push(40, 30, [20, 200, 20]);

        let task = harness.spawn(NO_REUSE);
        harness.wait_for_events(4).await;
        let stats = harness.finish(task).await;

        assert_eq!(stats.decode_failures, 2);
        assert_eq!(stats.rendered, 1);
    }

    #[tokio::test]
    async fn unavailable_surface_skips_draws() {
        let harness = Harness::new();
        harness.surface.available.store(false, Ordering::SeqCst);
        harness.push(40, 30, [20, 200, 20]);
        harness.push(40, 30, [20, 200, 20]);

        let task = harness.spawn(NO_REUSE);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !harness.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = harness.finish(task).await;

        assert!(harness.surface.events().is_empty());
        assert_eq!(stats.skipped_draws, 4);
        assert_eq!(stats.rendered, 0);
    }

    #[tokio::test]
    async fn interrupt_while_waiting_exits_and_stops() {
        let harness = Harness::new();
        let task = harness.spawn(DecodeOptions::default());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        let stats = harness.finish(task).await;
        assert_eq!(stats, RenderStats::default());
        assert_eq!(harness.state.get(), StreamState::Stopped);
    }

    #[test]
    fn blit_centers_frame() {
        let mut canvas = RgbaImage::from_pixel(100, 50, BLACK);
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            10,
            10,
            image::Rgba([255, 255, 255, 255]),
        ));
        blit_aspect_fit(&mut canvas, &image);

        let white = |x, y| canvas.get_pixel(x, y).0[0] > 250;
        assert!(white(50, 25));
        assert!(white(25, 0));
        assert!(white(74, 49));
        assert_eq!(canvas.get_pixel(10, 25), &BLACK);
        assert_eq!(canvas.get_pixel(24, 25), &BLACK);
        assert_eq!(canvas.get_pixel(75, 25), &BLACK);
    }
}
