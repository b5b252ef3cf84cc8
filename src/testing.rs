//! Test doubles shared by the unit tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{StreamConfig, VideoConfig};
use crate::error::{PipelineError, Result};
use crate::source::{FrameSink, FrameSource};
use crate::video::encoder::{CodecConfig, EncodedChunk, VideoCodec};
use crate::video::format::{FrameLayout, PixelFormat, Resolution};
use crate::video::frame::Frame;

/// Small geometry at the default rate and segment duration
pub fn test_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.video = VideoConfig {
        width: 16,
        height: 16,
        fps: 15,
        stride_align: 32,
        ..Default::default()
    };
    config
}

/// A frame matching [`test_config`]
pub fn test_frame(sequence: u32) -> Frame {
    let layout = FrameLayout::new(Resolution::new(16, 16), 32);
    let size = PixelFormat::Yuv420.frame_size(&layout);
    Frame::from_vec(
        vec![0x80; size],
        layout.resolution,
        PixelFormat::Yuv420,
        32,
        sequence,
    )
}

/// Scripted codec: one 188-byte chunk per frame, key frame every GOP
pub struct FakeCodec {
    config: Option<CodecConfig>,
    started: bool,
    fail_start: bool,
    fail_on: Option<u64>,
    delay: Duration,
    frames_since_start: u64,
    encoded: Arc<Mutex<Vec<u64>>>,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self {
            config: None,
            started: false,
            fail_start: false,
            fail_on: None,
            delay: Duration::ZERO,
            frames_since_start: 0,
            encoded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Reject the frame with this extended index
    pub fn failing_on(mut self, index: u64) -> Self {
        self.fail_on = Some(index);
        self
    }

    /// Slow down every encode (and a failing start)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Indexes of successfully encoded frames
    pub fn encoded(&self) -> Arc<Mutex<Vec<u64>>> {
        self.encoded.clone()
    }
}

impl VideoCodec for FakeCodec {
    fn name(&self) -> &str {
        "fake"
    }

    fn prepare(&mut self, config: &CodecConfig) -> Result<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_start && !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_start || self.config.is_none() {
            return Err(PipelineError::CodecFailure("refusing to start".to_string()));
        }
        self.started = true;
        self.frames_since_start = 0;
        Ok(())
    }

    fn encode(&mut self, frame: Frame, index: u64, pts: Duration) -> Result<Vec<EncodedChunk>> {
        if !self.started {
            return Err(PipelineError::NotInitialised("fake codec idle".to_string()));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        drop(frame);
        if self.fail_on == Some(index) {
            return Err(PipelineError::CodecFailure(format!("frame {} rejected", index)));
        }

        let gop = self.config.as_ref().map(|c| c.gop_size.max(1)).unwrap_or(1) as u64;
        let key_frame = self.frames_since_start % gop == 0;
        self.frames_since_start += 1;
        self.encoded.lock().push(index);
        Ok(vec![EncodedChunk::new(
            Bytes::from(vec![0x47u8; 188]),
            pts,
            key_frame,
            index,
        )])
    }

    fn reset(&mut self) {
        self.started = false;
    }

    fn release(&mut self) {
        self.started = false;
        self.config = None;
    }
}

/// Source driven by hand from the test thread
pub struct ManualSource {
    configured: bool,
    running: AtomicBool,
    fail_init: bool,
    sink: Mutex<Option<FrameSink>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    delivered: Mutex<u64>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self {
            configured: false,
            running: AtomicBool::new(false),
            fail_init: false,
            sink: Mutex::new(None),
            calls: Arc::new(Mutex::new(Vec::new())),
            delivered: Mutex::new(0),
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Lifecycle calls seen so far
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Hand a frame to the sink as the capture thread would
    ///
    /// Returns the backlog, or `None` if not running or no sink.
    pub fn push(&self, sequence: u32) -> Option<usize> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        let sink = self.sink.lock();
        let depth = sink.as_ref()?.deliver(test_frame(sequence));
        *self.delivered.lock() += 1;
        Some(depth)
    }

    pub fn has_sink(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl FrameSource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn init(&mut self, _config: &VideoConfig) -> Result<()> {
        self.calls.lock().push("init");
        if self.fail_init {
            return Err(PipelineError::ResourceUnavailable("no camera".to_string()));
        }
        self.configured = true;
        Ok(())
    }

    fn register(&mut self, sink: FrameSink) {
        self.calls.lock().push("register");
        *self.sink.lock() = Some(sink);
    }

    fn unregister(&mut self) {
        *self.sink.lock() = None;
    }

    fn start(&mut self) -> Result<()> {
        self.calls.lock().push("start");
        if !self.configured {
            return Err(PipelineError::NotInitialised("manual source".to_string()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyActive("manual source".to_string()));
        }
        *self.delivered.lock() = 0;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.calls.lock().push("stop");
        }
    }

    fn deinit(&mut self) {
        self.stop();
        self.calls.lock().push("deinit");
        self.unregister();
        self.configured = false;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn frame_count(&self) -> u64 {
        if self.is_running() {
            *self.delivered.lock()
        } else {
            0
        }
    }
}
