//! Frame sources
//!
//! A source is the camera side of the pipeline. It pushes every captured
//! frame into the one registered [`FrameSink`] from its own capture thread.

pub mod test_pattern;

pub use test_pattern::TestPatternSource;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::VideoConfig;
use crate::error::Result;
use crate::video::frame::Frame;
use crate::video::queue::FrameQueue;

/// Minimum spacing between backlog log lines
const BACKLOG_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Camera-side lifecycle
///
/// `init` -> `register` -> `start` -> `stop` -> `deinit`. `stop` is
/// synchronous: once it returns no further frame reaches the sink.
/// `deinit` stops first if needed and is safe to call at any time.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Configure geometry, format and rate
    fn init(&mut self, config: &VideoConfig) -> Result<()>;

    /// Install the sink, replacing any previous one
    fn register(&mut self, sink: FrameSink);

    /// Remove the sink; captured frames are released unseen
    fn unregister(&mut self);

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn deinit(&mut self);

    fn is_running(&self) -> bool;

    /// Frames captured since the last start, zero when not running
    fn frame_count(&self) -> u64;
}

struct BacklogLog {
    last_logged: Option<Instant>,
    last_depth: usize,
}

/// Hand-off from the capture thread into the frame queue
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct FrameSink {
    queue: Arc<FrameQueue>,
    backlog: Arc<Mutex<BacklogLog>>,
}

impl FrameSink {
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self {
            queue,
            backlog: Arc::new(Mutex::new(BacklogLog {
                last_logged: None,
                last_depth: 0,
            })),
        }
    }

    /// Take ownership of a frame, returning the backlog after enqueueing it
    pub fn deliver(&self, frame: Frame) -> usize {
        let depth = self.queue.enqueue(frame);
        self.report_backlog(depth);
        depth
    }

    fn report_backlog(&self, depth: usize) {
        let now = Instant::now();
        let mut log = self.backlog.lock();
        let due = log
            .last_logged
            .map_or(true, |t| now.duration_since(t) >= BACKLOG_LOG_INTERVAL);
        if due && depth != log.last_depth {
            debug!("Video encode backlog {} frame(s)", depth);
            log.last_logged = Some(now);
            log.last_depth = depth;
        }
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }
}
