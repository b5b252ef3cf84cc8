//! Encoder lifecycle and the encode thread
//!
//! ```text
//! FrameQueue ──dequeue──> SequenceTracker ──> VideoCodec ──chunks──> SegmentWriter
//! ```
//!
//! The encoder owns the queue, the codec and the segment writer. While
//! running, codec and writer live on the `video-encode` thread and come back
//! when it is joined.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace};

use super::encoder::{pts_for_index, CodecConfig, VideoCodec};
use super::queue::{FrameQueue, QueueStats};
use super::sequence::{SequenceCheck, SequenceTracker};
use crate::config::StreamConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::hls::{SegmentHistory, SegmentWriter, WriterStats};
use crate::source::FrameSink;
use crate::utils::{LogThrottler, TimingMonitor, TimingSummary};
use crate::{error_throttled, warn_throttled};

/// How long the encode thread waits on an empty queue before rechecking stop
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Encoder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Uninitialised,
    /// Initialised, queue accepting frames, not encoding
    Ready,
    Running,
}

impl std::fmt::Display for EncoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderState::Uninitialised => write!(f, "uninitialised"),
            EncoderState::Ready => write!(f, "ready"),
            EncoderState::Running => write!(f, "running"),
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    /// Frames taken off the queue
    pub frames_received: u64,
    /// Frames the codec accepted
    pub frames_encoded: u64,
    /// Frames missing from the sequence (dropped upstream or evicted)
    pub frames_missed: u64,
    /// Frames discarded for not being newer than their predecessor
    pub frames_out_of_order: u64,
    pub codec_errors: u64,
    pub write_errors: u64,
    pub chunks: u64,
    pub key_frames: u64,
    pub bytes_encoded: u64,
    /// Inter-frame gaps seen by the encode thread
    pub timing: TimingSummary,
    pub queue: QueueStats,
    pub writer: WriterStats,
}

/// Everything the encode thread needs exclusive access to
struct EncodeParts {
    codec: Box<dyn VideoCodec>,
    writer: SegmentWriter,
}

struct EncodeContext {
    queue: Arc<FrameQueue>,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<Mutex<EncoderStats>>,
    events: Arc<EventBus>,
    fps: u32,
}

/// Frame consumer: queue, codec and segment output
pub struct VideoEncoder {
    config: StreamConfig,
    events: Arc<EventBus>,
    state: EncoderState,
    queue: Option<Arc<FrameQueue>>,
    codec: Option<Box<dyn VideoCodec>>,
    writer: Option<SegmentWriter>,
    /// First index for the next segment writer; never goes backwards
    next_segment_index: u64,
    /// Segments left by the last writer, keyed by its playlist path
    history: Option<(PathBuf, SegmentHistory)>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<Option<EncodeParts>>>,
    stats: Arc<Mutex<EncoderStats>>,
}

impl VideoEncoder {
    pub fn new(config: StreamConfig, codec: Box<dyn VideoCodec>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            events,
            state: EncoderState::Uninitialised,
            queue: None,
            codec: Some(codec),
            writer: None,
            next_segment_index: 0,
            history: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
            stats: Arc::new(Mutex::new(EncoderStats::default())),
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EncoderState::Running
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Sink feeding this encoder's queue
    pub fn sink(&self) -> Result<FrameSink> {
        self.queue
            .as_ref()
            .map(|q| FrameSink::new(q.clone()))
            .ok_or_else(|| PipelineError::NotInitialised("Encoder not initialised".to_string()))
    }

    /// Frames waiting in the queue
    pub fn backlog(&self) -> usize {
        self.queue.as_ref().map(|q| q.depth()).unwrap_or(0)
    }

    pub fn stats(&self) -> EncoderStats {
        let mut stats = self.stats.lock().clone();
        if let Some(queue) = &self.queue {
            stats.queue = queue.stats();
        }
        if let Some(writer) = &self.writer {
            stats.writer = writer.stats();
        }
        stats
    }

    fn codec_config(&self) -> CodecConfig {
        let video = &self.config.video;
        CodecConfig {
            resolution: video.resolution(),
            stride: video.stride(),
            input_format: video.format,
            quality: self.config.encoder.quality,
            fps: video.fps,
            gop_size: self.config.gop_size(),
        }
    }

    fn set_state(&mut self, state: EncoderState) {
        self.state = state;
        self.events
            .publish(PipelineEvent::state_changed("encoder", state));
    }

    /// Segment writer for the current configuration
    ///
    /// Picks up the previous writer's segments when it wrote the same
    /// playlist, so they keep ageing out of the window instead of being
    /// orphaned on disk.
    fn create_writer(&mut self) -> SegmentWriter {
        let hls = &self.config.hls;
        let frame_interval = self.config.video.frame_interval();
        match self.history.take() {
            Some((playlist, history)) if playlist == hls.playlist_path() => {
                debug!(
                    "Resuming {} with {} listed segment(s)",
                    playlist.display(),
                    history.index.len()
                );
                SegmentWriter::with_history(
                    hls,
                    frame_interval,
                    self.next_segment_index,
                    self.events.clone(),
                    history,
                )
            }
            previous => {
                if let Some((playlist, _)) = previous {
                    debug!("Leaving segments of {} in place", playlist.display());
                }
                SegmentWriter::new(
                    hls,
                    frame_interval,
                    self.next_segment_index,
                    self.events.clone(),
                )
            }
        }
    }

    /// Prepare queue, codec and segment writer for `output_dir`
    ///
    /// The directory must already exist. Calling `init` again while
    /// initialised does nothing.
    pub fn init(&mut self, output_dir: &Path, file_name_root: &str) -> Result<()> {
        if self.state != EncoderState::Uninitialised {
            debug!("Encoder already initialised ({})", self.state);
            return Ok(());
        }

        let mut config = self.config.clone();
        config.hls.output_dir = output_dir.to_path_buf();
        config.hls.file_name_root = file_name_root.to_string();
        config.validate()?;

        if !output_dir.is_dir() {
            return Err(PipelineError::ResourceUnavailable(format!(
                "Output directory {} does not exist",
                output_dir.display()
            )));
        }
        self.config = config;

        let codec_config = self.codec_config();
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| PipelineError::ResourceUnavailable("Codec lost".to_string()))?;
        if let Err(e) = codec.prepare(&codec_config) {
            codec.release();
            return Err(e);
        }
        let codec_name = codec.name().to_string();

        self.queue = Some(Arc::new(FrameQueue::new(
            self.config.queue.capacity,
            self.config.queue.overflow,
        )));
        self.writer = Some(self.create_writer());

        info!(
            "Encoder initialised: {} {} @ {} fps, GOP {}, queue {} ({}), output {}",
            codec_name,
            codec_config.resolution,
            codec_config.fps,
            codec_config.gop_size,
            self.config.queue.capacity,
            self.config.queue.overflow,
            self.config.hls.playlist_path().display()
        );
        self.set_state(EncoderState::Ready);
        Ok(())
    }

    /// Start the encode thread
    ///
    /// On failure the encoder stays `Ready`.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            EncoderState::Uninitialised => {
                return Err(PipelineError::NotInitialised(
                    "Encoder not initialised".to_string(),
                ))
            }
            EncoderState::Running => {
                return Err(PipelineError::AlreadyActive(
                    "Encoder already running".to_string(),
                ))
            }
            EncoderState::Ready => {}
        }

        let (Some(queue), Some(mut codec), Some(mut writer)) =
            (self.queue.clone(), self.codec.take(), self.writer.take())
        else {
            return Err(PipelineError::NotInitialised(
                "Encoder resources missing".to_string(),
            ));
        };

        if let Err(e) = codec.start() {
            error!("Codec {} failed to start: {}", codec.name(), e);
            self.codec = Some(codec);
            self.writer = Some(writer);
            return Err(match e {
                PipelineError::CodecFailure(_) => e,
                other => PipelineError::CodecFailure(other.to_string()),
            });
        }

        if let Err(e) = writer.start() {
            codec.reset();
            self.codec = Some(codec);
            self.writer = Some(writer);
            return Err(e);
        }

        queue.reopen();
        self.stop_flag.store(false, Ordering::SeqCst);

        let ctx = EncodeContext {
            queue,
            stop_flag: self.stop_flag.clone(),
            stats: self.stats.clone(),
            events: self.events.clone(),
            fps: self.config.video.fps,
        };
        let slot = Arc::new(Mutex::new(Some(EncodeParts { codec, writer })));
        let thread_slot = slot.clone();

        let spawned = thread::Builder::new()
            .name("video-encode".to_string())
            .spawn(move || {
                let parts = thread_slot.lock().take()?;
                Some(run_encode_loop(parts, ctx))
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.set_state(EncoderState::Running);
                info!("Encoder started");
                Ok(())
            }
            Err(e) => {
                if let Some(mut parts) = slot.lock().take() {
                    if let Err(stop_err) = parts.writer.stop() {
                        debug!("Writer stop after failed spawn: {}", stop_err);
                    }
                    parts.codec.reset();
                    self.codec = Some(parts.codec);
                    self.writer = Some(parts.writer);
                }
                Err(PipelineError::ResourceUnavailable(format!(
                    "Cannot spawn encode thread: {}",
                    e
                )))
            }
        }
    }

    /// Stop encoding; queued frames are discarded
    ///
    /// Idempotent and safe when not started.
    pub fn stop(&mut self) {
        if self.state != EncoderState::Running {
            return;
        }

        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(queue) = &self.queue {
            queue.close();
        }

        let parts = match self.handle.take().map(|h| h.join()) {
            Some(Ok(parts)) => parts,
            Some(Err(_)) => {
                error!("Encode thread panicked");
                None
            }
            None => None,
        };

        match parts {
            Some(EncodeParts {
                mut codec,
                mut writer,
            }) => {
                if let Err(e) = writer.stop() {
                    error!("Failed to finalise segment output: {}", e);
                }
                self.next_segment_index = writer.next_index();
                codec.reset();
                self.codec = Some(codec);
                self.writer = Some(writer);
            }
            None => {
                // Codec and writer went down with the thread
                self.codec = None;
                self.writer = None;
            }
        }

        if let Some(queue) = &self.queue {
            let released = queue.clear();
            if released > 0 {
                debug!("Released {} queued frame(s) on stop", released);
            }
            queue.reopen();
        }

        info!("Encoder stopped");
        self.set_state(EncoderState::Ready);
    }

    /// Stop if needed and release queue and codec
    ///
    /// Safe to call repeatedly and after a failed `init`.
    pub fn deinit(&mut self) {
        self.stop();

        if let Some(mut writer) = self.writer.take() {
            self.next_segment_index = self.next_segment_index.max(writer.next_index());
            self.history = Some((writer.playlist_path(), writer.take_history()));
        }
        if let Some(queue) = self.queue.take() {
            queue.close();
            queue.clear();
        }
        if let Some(codec) = self.codec.as_mut() {
            codec.release();
        }

        if self.state != EncoderState::Uninitialised {
            info!("Encoder deinitialised");
            self.set_state(EncoderState::Uninitialised);
        }
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn run_encode_loop(mut parts: EncodeParts, ctx: EncodeContext) -> EncodeParts {
    let mut tracker = SequenceTracker::new();
    let mut timing = TimingMonitor::new();
    let throttler = LogThrottler::with_secs(5);

    debug!("Encode thread running ({})", parts.codec.name());

    while !ctx.stop_flag.load(Ordering::Acquire) {
        let Some(frame) = ctx.queue.dequeue(QUEUE_POLL_INTERVAL) else {
            continue;
        };
        timing.tick();

        let check = tracker.observe(frame.sequence);
        let index = match check {
            SequenceCheck::Stale => {
                warn_throttled!(
                    throttler,
                    "out_of_order",
                    "Out-of-order frame {} discarded",
                    frame.sequence
                );
                let mut stats = ctx.stats.lock();
                stats.frames_received += 1;
                stats.frames_out_of_order += 1;
                continue;
            }
            SequenceCheck::Gap { index, missed } => {
                warn_throttled!(
                    throttler,
                    "sequence_gap",
                    "Missed {} frame(s) before frame {}",
                    missed,
                    frame.sequence
                );
                ctx.events.publish(PipelineEvent::FramesDropped {
                    missed,
                    total: tracker.missed_total(),
                });
                index
            }
            SequenceCheck::First { index } | SequenceCheck::InOrder { index } => index,
        };

        let pts = pts_for_index(index, ctx.fps);
        let result = parts.codec.encode(frame, index, pts);

        let mut stats = ctx.stats.lock();
        stats.frames_received += 1;
        stats.frames_missed = tracker.missed_total();
        stats.timing = timing.summary();

        let chunks = match result {
            Ok(chunks) => chunks,
            Err(e) => {
                stats.codec_errors += 1;
                drop(stats);
                error_throttled!(throttler, "codec_error", "Encoding frame {} failed: {}", index, e);
                ctx.events.publish(PipelineEvent::CodecError {
                    sequence: index,
                    message: e.to_string(),
                });
                continue;
            }
        };
        stats.frames_encoded += 1;
        drop(stats);

        for chunk in chunks {
            trace!(
                "Chunk {} pts {:?} {} bytes{}",
                chunk.sequence,
                chunk.pts,
                chunk.len(),
                if chunk.key_frame { " (key)" } else { "" }
            );
            let written = parts.writer.write_chunk(&chunk);

            let mut stats = ctx.stats.lock();
            stats.chunks += 1;
            stats.bytes_encoded += chunk.len() as u64;
            if chunk.key_frame {
                stats.key_frames += 1;
            }
            stats.writer = parts.writer.stats();
            if let Err(e) = written {
                stats.write_errors += 1;
                drop(stats);
                error_throttled!(throttler, "segment_write", "Segment write failed: {}", e);
            }
        }
    }

    let summary = timing.summary();
    debug!(
        "Encode thread exiting: largest gap {:?}, average {:?} over {} frames",
        summary.largest, summary.average, summary.samples
    );
    parts
}
