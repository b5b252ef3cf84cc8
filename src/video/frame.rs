//! Captured frame

use bytes::Bytes;
use std::time::{Duration, Instant};

use super::format::{FrameLayout, PixelFormat, Resolution};

/// A single captured image
///
/// Ownership moves from the capture thread through the queue to the encoder.
/// Not `Clone`: exactly one stage holds a frame and dropping it releases it.
#[derive(Debug)]
pub struct Frame {
    /// Raw pixel data (Y plane, then U, then V)
    data: Bytes,
    /// Capture sequence number, wraps at `u32::MAX`
    pub sequence: u32,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Y-plane row pitch in bytes
    pub stride: u32,
    /// When the camera handed the frame over
    pub capture_ts: Instant,
}

impl Frame {
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u32,
    ) -> Self {
        Self {
            data,
            sequence,
            resolution,
            format,
            stride,
            capture_ts: Instant::now(),
        }
    }

    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u32,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, stride, sequence)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Give up the frame, keeping only its pixel buffer
    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.resolution, self.stride)
    }

    /// Time since capture
    pub fn age(&self) -> Duration {
        self.capture_ts.elapsed()
    }

    /// Whether the buffer is large enough for the declared geometry
    pub fn is_complete(&self) -> bool {
        let layout = self.layout();
        layout.is_consistent() && self.data.len() >= self.format.frame_size(&layout)
    }

    /// Y, U and V planes, or `None` if the buffer is short
    pub fn planes(&self) -> Option<(&[u8], &[u8], &[u8])> {
        if !self.is_complete() {
            return None;
        }
        let layout = self.layout();
        let (y, rest) = self.data.split_at(layout.y_size());
        let (u, rest) = rest.split_at(layout.chroma_size());
        let v = &rest[..layout.chroma_size()];
        Some((y, u, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_frame(width: u32, height: u32, stride: u32, len: usize) -> Frame {
        Frame::from_vec(
            vec![0u8; len],
            Resolution::new(width, height),
            PixelFormat::Yuv420,
            stride,
            7,
        )
    }

    #[test]
    fn test_planes_split_on_stride() {
        let mut data = vec![1u8; 64 * 4];
        data.extend(vec![2u8; 32 * 2]);
        data.extend(vec![3u8; 32 * 2]);
        let frame = Frame::from_vec(data, Resolution::new(60, 4), PixelFormat::Yuv420, 64, 1);

        let (y, u, v) = frame.planes().unwrap();
        assert_eq!(y.len(), 256);
        assert!(u.iter().all(|&b| b == 2));
        assert!(v.iter().all(|&b| b == 3));
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn test_short_buffer_incomplete() {
        let frame = layout_frame(64, 4, 64, 64 * 4 + 10);
        assert!(!frame.is_complete());
        assert!(frame.planes().is_none());
    }

    #[test]
    fn test_into_data_keeps_buffer() {
        let frame = layout_frame(64, 4, 64, 384);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.into_data().len(), 384);
    }
}
