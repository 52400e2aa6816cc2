use image::codecs::jpeg::JpegDecoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageBuffer, ImageDecoder, Limits};
use liveview_common::config::RenderConfig;
use liveview_common::FrameSize;
use std::io::Cursor;
use tracing::debug;

/// Largest frame the decoder will allocate for, in pixels (7680x4320).
pub const MAX_FRAME_PIXELS: u64 = 7680 * 4320;
const MAX_FRAME_SIDE: u32 = 16384;

/// How payloads are turned into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Downscale factor applied after decoding. 1 keeps the full size.
    pub sample_size: u32,
    /// Decode into the pixel buffer of the previous frame instead of allocating.
    pub reuse_buffers: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            sample_size: 1,
            reuse_buffers: true,
        }
    }
}

impl From<&RenderConfig> for DecodeOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            sample_size: config.sample_size.max(1),
            reuse_buffers: config.reuse_buffers,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The pooled buffer was sized for a different frame.
    #[error("reusable buffer holds {buffer} bytes but the frame needs {needed}")]
    InvalidReuseBuffer { buffer: usize, needed: usize },
    #[error("failed to decode JPEG: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported color type {0:?}")]
    UnsupportedColor(ColorType),
    /// The JPEG header announces a frame too large to allocate.
    #[error("frame of {width}x{height} exceeds the decode limit")]
    FrameTooLarge { width: u32, height: u32 },
}

/// A decoded frame, alive for one draw.
pub struct DecodedFrame {
    image: DynamicImage,
}

impl DecodedFrame {
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }
}

/// JPEG decoder with a one-slot frame-buffer pool.
pub struct FrameDecoder {
    options: DecodeOptions,
    reusable: Option<Vec<u8>>,
}

impl FrameDecoder {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            reusable: None,
        }
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    /// Decode one JPEG payload.
    ///
    /// With buffer reuse on, a pooled buffer of the wrong size fails with
    /// [`DecodeError::InvalidReuseBuffer`] and stays pooled; the caller decides
    /// whether to [`discard_reusable`](Self::discard_reusable).
    pub fn decode(&mut self, jpeg_data: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let mut decoder = JpegDecoder::new(Cursor::new(jpeg_data))?;
        let (width, height) = decoder.dimensions();
        // Dimensions come from the stream; check them before allocating anything.
        if width > MAX_FRAME_SIDE
            || height > MAX_FRAME_SIDE
            || u64::from(width) * u64::from(height) > MAX_FRAME_PIXELS
        {
            return Err(DecodeError::FrameTooLarge { width, height });
        }
        decoder.set_limits(frame_limits())?;
        let color = decoder.color_type();
        let needed = decoder.total_bytes() as usize;

        let mut buf = match self.reusable.take() {
            Some(buf) if self.options.reuse_buffers => {
                if buf.len() != needed {
                    let buffer = buf.len();
                    self.reusable = Some(buf);
                    return Err(DecodeError::InvalidReuseBuffer { buffer, needed });
                }
                buf
            }
            _ => vec![0; needed],
        };
        decoder.read_image(&mut buf)?;

        let decoded = match color {
            ColorType::Rgb8 => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgb8)
            }
            ColorType::L8 => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
            }
            ColorType::Rgba8 => {
                ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            other => return Err(DecodeError::UnsupportedColor(other)),
        };
        // read_image filled exactly `total_bytes`, which is what from_raw expects.
        let Some(decoded) = decoded else {
            return Err(DecodeError::UnsupportedColor(color));
        };

        let sample = self.options.sample_size;
        if sample <= 1 {
            return Ok(DecodedFrame { image: decoded });
        }

        let scaled = decoded.resize_exact(
            (width / sample).max(1),
            (height / sample).max(1),
            FilterType::Nearest,
        );
        if self.options.reuse_buffers {
            self.reusable = Some(decoded.into_bytes());
        }
        Ok(DecodedFrame { image: scaled })
    }

    /// Hand a drawn frame's pixels back for the next decode.
    pub fn recycle(&mut self, frame: DecodedFrame) {
        if self.options.reuse_buffers && self.options.sample_size <= 1 {
            self.reusable = Some(frame.image.into_bytes());
        }
    }

    pub fn discard_reusable(&mut self) {
        if let Some(buf) = self.reusable.take() {
            debug!(bytes = buf.len(), "discarded reusable frame buffer");
        }
    }

    pub fn has_reusable(&self) -> bool {
        self.reusable.is_some()
    }
}

fn frame_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_FRAME_SIDE);
    limits.max_image_height = Some(MAX_FRAME_SIDE);
    // Output buffer plus decoder scratch space.
    limits.max_alloc = Some(MAX_FRAME_PIXELS * 4 * 2);
    limits
}
