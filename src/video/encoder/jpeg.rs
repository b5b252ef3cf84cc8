//! MJPEG codec
//!
//! Compresses each YUV 4:2:0 frame directly with turbojpeg's YUV encoder,
//! skipping colour conversion. Every output chunk is a key frame.

use bytes::Bytes;
use std::time::Duration;

use super::traits::{CodecConfig, EncodedChunk, VideoCodec};
use crate::error::{PipelineError, Result};
use crate::video::format::{FrameLayout, PixelFormat};
use crate::video::frame::Frame;

/// JPEG-per-frame codec using turbojpeg
///
/// Note: turbojpeg handles are not thread-safe; the codec is only used from
/// the encode thread.
pub struct MjpegCodec {
    config: Option<CodecConfig>,
    compressor: Option<turbojpeg::Compressor>,
    /// Tight I420 buffer (camera frames carry row padding)
    i420_buffer: Vec<u8>,
}

impl MjpegCodec {
    pub fn new() -> Self {
        Self {
            config: None,
            compressor: None,
            i420_buffer: Vec::new(),
        }
    }

    /// Copy the padded planes of `frame` into the tight I420 buffer
    fn repack(&mut self, frame: &Frame) -> Result<()> {
        let (y, u, v) = frame.planes().ok_or_else(|| {
            PipelineError::CodecFailure(format!(
                "Frame {} too small: {} bytes for {} stride {}",
                frame.sequence,
                frame.len(),
                frame.resolution,
                frame.stride
            ))
        })?;

        let src = frame.layout();
        let dst = FrameLayout::tight(frame.resolution);
        let width = dst.resolution.width as usize;
        let height = dst.resolution.height as usize;
        let chroma_width = dst.chroma_width() as usize;
        let chroma_height = dst.chroma_height() as usize;

        let (y_out, rest) = self.i420_buffer.split_at_mut(width * height);
        let (u_out, v_out) = rest.split_at_mut(chroma_width * chroma_height);

        copy_plane(y, src.stride as usize, y_out, width, height);
        copy_plane(u, src.chroma_stride() as usize, u_out, chroma_width, chroma_height);
        copy_plane(v, src.chroma_stride() as usize, v_out, chroma_width, chroma_height);
        Ok(())
    }
}

impl Default for MjpegCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_plane(src: &[u8], src_stride: usize, dst: &mut [u8], width: usize, rows: usize) {
    if src_stride == width {
        dst[..width * rows].copy_from_slice(&src[..width * rows]);
        return;
    }
    for (row_out, row_in) in dst
        .chunks_exact_mut(width)
        .zip(src.chunks(src_stride))
        .take(rows)
    {
        row_out.copy_from_slice(&row_in[..width]);
    }
}

impl VideoCodec for MjpegCodec {
    fn name(&self) -> &str {
        "MJPEG (turbojpeg)"
    }

    fn prepare(&mut self, config: &CodecConfig) -> Result<()> {
        let tight = FrameLayout::tight(config.resolution);
        self.i420_buffer = vec![0u8; config.input_format.frame_size(&tight)];
        self.config = Some(config.clone());
        self.compressor = None;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| PipelineError::NotInitialised("MJPEG codec not prepared".to_string()))?;

        if config.input_format != PixelFormat::Yuv420 {
            return Err(PipelineError::CodecFailure(format!(
                "Unsupported input format for JPEG: {}",
                config.input_format
            )));
        }
        if !config.resolution.is_valid() || !config.layout().is_consistent() {
            return Err(PipelineError::CodecFailure(format!(
                "Unsupported geometry {} stride {}",
                config.resolution, config.stride
            )));
        }

        let mut compressor = turbojpeg::Compressor::new().map_err(|e| {
            PipelineError::CodecFailure(format!("Failed to create turbojpeg compressor: {}", e))
        })?;
        compressor
            .set_quality(config.quality.clamp(1, 100) as i32)
            .map_err(|e| PipelineError::CodecFailure(format!("Failed to set JPEG quality: {}", e)))?;

        self.compressor = Some(compressor);
        Ok(())
    }

    fn encode(&mut self, frame: Frame, index: u64, pts: Duration) -> Result<Vec<EncodedChunk>> {
        let resolution = match &self.config {
            Some(config) if self.compressor.is_some() => {
                if frame.resolution != config.resolution {
                    return Err(PipelineError::CodecFailure(format!(
                        "Frame is {}, codec expects {}",
                        frame.resolution, config.resolution
                    )));
                }
                config.resolution
            }
            _ => {
                return Err(PipelineError::NotInitialised(
                    "MJPEG codec not started".to_string(),
                ))
            }
        };

        self.repack(&frame)?;
        drop(frame);

        let yuv_image = turbojpeg::YuvImage {
            pixels: self.i420_buffer.as_slice(),
            width: resolution.width as usize,
            height: resolution.height as usize,
            align: 1,
            subsamp: turbojpeg::Subsamp::Sub2x2,
        };

        let compressor = self
            .compressor
            .as_mut()
            .ok_or_else(|| PipelineError::NotInitialised("MJPEG codec not started".to_string()))?;
        let jpeg = compressor
            .compress_yuv_to_vec(yuv_image)
            .map_err(|e| PipelineError::CodecFailure(format!("JPEG compression failed: {}", e)))?;

        Ok(vec![EncodedChunk::new(Bytes::from(jpeg), pts, true, index)])
    }

    fn release(&mut self) {
        self.compressor = None;
        self.config = None;
        self.i420_buffer = Vec::new();
    }
}
