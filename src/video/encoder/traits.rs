//! Codec trait and common types

use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;
use crate::video::format::{FrameLayout, PixelFormat, Resolution};
use crate::video::frame::Frame;

/// Codec configuration, fixed between `prepare` calls
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    /// Input resolution
    pub resolution: Resolution,
    /// Input Y-plane stride
    pub stride: u32,
    /// Input pixel format
    pub input_format: PixelFormat,
    /// Output quality (1-100 for JPEG)
    pub quality: u32,
    /// Frame rate
    pub fps: u32,
    /// Key frame interval in frames
    pub gop_size: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::WATCHDOG,
            stride: Resolution::WATCHDOG.width,
            input_format: PixelFormat::Yuv420,
            quality: 80,
            fps: 15,
            gop_size: 30,
        }
    }
}

impl CodecConfig {
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.resolution, self.stride)
    }
}

/// Compressed output of the codec
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Encoded data
    pub data: Bytes,
    /// Presentation time, from the frame index and frame rate
    pub pts: Duration,
    /// Whether a decoder can start from this chunk
    pub key_frame: bool,
    /// Extended frame index the chunk came from
    pub sequence: u64,
}

impl EncodedChunk {
    pub fn new(data: Bytes, pts: Duration, key_frame: bool, sequence: u64) -> Self {
        Self {
            data,
            pts,
            key_frame,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Presentation time of frame `index` at `fps`
pub fn pts_for_index(index: u64, fps: u32) -> Duration {
    let fps = fps.max(1) as u128;
    Duration::from_nanos((index as u128 * 1_000_000_000 / fps) as u64)
}

/// Video compression backend
///
/// Not `Sync`: a codec lives on the encode thread while running and is only
/// touched by the owning [`VideoEncoder`](crate::video::VideoEncoder)
/// otherwise.
pub trait VideoCodec: Send {
    /// Codec name for logs
    fn name(&self) -> &str;

    /// Store the configuration and allocate buffers; does not start encoding
    fn prepare(&mut self, config: &CodecConfig) -> Result<()>;

    /// Make the codec ready to accept frames
    ///
    /// Fails with `CodecFailure` when the prepared configuration cannot be
    /// encoded.
    fn start(&mut self) -> Result<()>;

    /// Encode one frame, consuming it
    ///
    /// May return zero or more chunks.
    fn encode(&mut self, frame: Frame, index: u64, pts: Duration) -> Result<Vec<EncodedChunk>>;

    /// Drop any in-flight state so the next `start` begins a fresh stream
    fn reset(&mut self) {}

    /// Release codec resources; `prepare` must be called again before use
    fn release(&mut self) {}
}
