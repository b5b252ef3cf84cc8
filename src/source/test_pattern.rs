//! Synthetic camera
//!
//! Produces YUV 4:2:0 frames with a moving vertical luma bar at the
//! configured rate, padded to the configured stride the way the real camera
//! pads its rows.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{FrameSink, FrameSource};
use crate::config::VideoConfig;
use crate::error::{PipelineError, Result};
use crate::video::format::FrameLayout;
use crate::video::frame::Frame;

/// Width of the moving bar in pixels
const BAR_WIDTH: usize = 32;
/// Horizontal movement per frame in pixels
const BAR_STEP: usize = 8;

/// Wakes the capture thread early when it is told to stop
struct StopWait {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl StopWait {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Sleep until `deadline` unless `running` is, or becomes, false
    fn wait_until(&self, deadline: Instant, running: &AtomicBool) {
        let mut guard = self.lock.lock();
        if running.load(Ordering::Acquire) {
            let _ = self.condvar.wait_until(&mut guard, deadline);
        }
    }

    fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

/// Software camera implementing [`FrameSource`]
pub struct TestPatternSource {
    name: String,
    config: Option<VideoConfig>,
    sink: Arc<Mutex<Option<FrameSink>>>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    /// Carries on across stop/start; never reset while the source exists
    next_sequence: Arc<AtomicU32>,
    stop_wait: Arc<StopWait>,
    handle: Option<JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self::with_first_sequence(0)
    }

    /// Start numbering frames at `sequence` (handy for exercising wrap)
    pub fn with_first_sequence(sequence: u32) -> Self {
        Self {
            name: "test-pattern".to_string(),
            config: None,
            sink: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            frame_count: Arc::new(AtomicU64::new(0)),
            next_sequence: Arc::new(AtomicU32::new(sequence)),
            stop_wait: Arc::new(StopWait::new()),
            handle: None,
        }
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill a padded YUV 4:2:0 buffer for frame `sequence`
fn render_frame(layout: &FrameLayout, sequence: u32) -> Vec<u8> {
    let width = layout.resolution.width as usize;
    let height = layout.resolution.height as usize;
    let stride = layout.stride as usize;
    let mut data = vec![0u8; layout.y_size() + 2 * layout.chroma_size()];

    let bar_start = (sequence as usize * BAR_STEP) % width.max(1);
    let (y_plane, chroma) = data.split_at_mut(layout.y_size());
    for (row, line) in y_plane.chunks_exact_mut(stride).enumerate().take(height) {
        let shade = 16 + ((row * 200) / height.max(1)) as u8;
        for (x, px) in line[..width].iter_mut().enumerate() {
            let in_bar = (x + width - bar_start) % width < BAR_WIDTH;
            *px = if in_bar { 235 } else { shade };
        }
    }

    let chroma_width = layout.chroma_width() as usize;
    let chroma_stride = layout.chroma_stride() as usize;
    for line in chroma.chunks_exact_mut(chroma_stride) {
        line[..chroma_width].fill(128);
    }
    data
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: &VideoConfig) -> Result<()> {
        if self.is_running() {
            return Err(PipelineError::AlreadyActive(format!(
                "{} is capturing",
                self.name
            )));
        }
        let layout = FrameLayout::new(config.resolution(), config.stride());
        if !layout.is_consistent() {
            return Err(PipelineError::InvalidConfig(format!(
                "Stride {} too small for {}",
                config.stride(),
                config.resolution()
            )));
        }
        debug!(
            "{} configured for {} stride {} at {} fps",
            self.name,
            config.resolution(),
            config.stride(),
            config.fps
        );
        self.config = Some(config.clone());
        Ok(())
    }

    fn register(&mut self, sink: FrameSink) {
        *self.sink.lock() = Some(sink);
    }

    fn unregister(&mut self) {
        *self.sink.lock() = None;
    }

    fn start(&mut self) -> Result<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| PipelineError::NotInitialised(format!("{} not initialised", self.name)))?;
        if self.is_running() {
            return Err(PipelineError::AlreadyActive(format!(
                "{} already capturing",
                self.name
            )));
        }

        let layout = FrameLayout::new(config.resolution(), config.stride());
        let interval = config.frame_interval();
        let format = config.format;
        let sink = self.sink.clone();
        let running = self.running.clone();
        let frame_count = self.frame_count.clone();
        let next_sequence = self.next_sequence.clone();
        let stop_wait = self.stop_wait.clone();

        self.frame_count.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("video-capture".to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                while running.load(Ordering::Acquire) {
                    let sequence = next_sequence.fetch_add(1, Ordering::Relaxed);
                    let frame = Frame::from_vec(
                        render_frame(&layout, sequence),
                        layout.resolution,
                        format,
                        layout.stride,
                        sequence,
                    );
                    frame_count.fetch_add(1, Ordering::Relaxed);

                    // Unregistered sink: the frame is simply released
                    if let Some(sink) = sink.lock().as_ref() {
                        sink.deliver(frame);
                    }

                    deadline += interval;
                    let now = Instant::now();
                    if deadline < now {
                        // Fell behind; do not try to catch up with a burst
                        deadline = now;
                    }
                    stop_wait.wait_until(deadline, &running);
                }
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                info!(
                    "{} capturing {} at {} fps",
                    self.name,
                    layout.resolution,
                    config.fps
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(PipelineError::ResourceUnavailable(format!(
                    "Cannot spawn capture thread: {}",
                    e
                )))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.stop_wait.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} capture thread panicked", self.name);
            }
            info!(
                "{} stopped after {} frames",
                self.name,
                self.frame_count.load(Ordering::Relaxed)
            );
        }
    }

    fn deinit(&mut self) {
        self.stop();
        self.unregister();
        self.config = None;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn frame_count(&self) -> u64 {
        if self.is_running() {
            self.frame_count.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::video::format::Resolution;
    use crate::video::queue::FrameQueue;

    fn video_config(fps: u32) -> VideoConfig {
        VideoConfig {
            width: 64,
            height: 48,
            fps,
            stride_align: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_respects_stride() {
        let layout = FrameLayout::new(Resolution::new(64, 4), 128);
        let data = render_frame(&layout, 0);
        assert_eq!(data.len(), 128 * 4 + 2 * 64 * 2);
        // Bar at the left edge, padding untouched
        assert_eq!(data[0], 235);
        assert_eq!(data[100], 0);
        assert_eq!(data[128 * 4], 128);
        assert_eq!(data[128 * 4 + 40], 0);
    }

    #[test]
    fn test_bar_moves() {
        let layout = FrameLayout::tight(Resolution::new(64, 2));
        let first = render_frame(&layout, 0);
        let second = render_frame(&layout, 1);
        assert_ne!(first[..64], second[..64]);
        assert_eq!(second[BAR_STEP], 235);
    }

    #[test]
    fn test_start_requires_init() {
        let mut source = TestPatternSource::new();
        assert!(matches!(
            source.start(),
            Err(PipelineError::NotInitialised(_))
        ));
    }

    #[test]
    fn test_frames_reach_sink_in_sequence() {
        let queue = Arc::new(FrameQueue::new(100, OverflowPolicy::DropOldest));
        let mut source = TestPatternSource::with_first_sequence(u32::MAX - 2);
        source.init(&video_config(100)).unwrap();
        source.register(FrameSink::new(queue.clone()));
        source.start().unwrap();
        assert!(matches!(source.start(), Err(PipelineError::AlreadyActive(_))));

        thread::sleep(Duration::from_millis(100));
        assert!(source.frame_count() > 0);
        source.stop();
        assert_eq!(source.frame_count(), 0);

        // Nothing arrives after stop has returned
        let depth = queue.depth();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.depth(), depth);

        let mut sequences = Vec::new();
        while let Some(frame) = queue.dequeue(Duration::ZERO) {
            assert!(frame.is_complete());
            assert_eq!(frame.stride, 128);
            sequences.push(frame.sequence);
        }
        assert!(sequences.len() >= 4);
        assert_eq!(&sequences[..4], &[u32::MAX - 2, u32::MAX - 1, u32::MAX, 0]);
    }

    #[test]
    fn test_stop_is_prompt_at_low_rate() {
        let mut source = TestPatternSource::new();
        source.init(&video_config(1)).unwrap();
        source.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        source.stop();
        assert!(start.elapsed() < Duration::from_millis(500));
        source.deinit();
        source.deinit();
    }
}
