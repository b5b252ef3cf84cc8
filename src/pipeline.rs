//! Capture-to-HLS pipeline
//!
//! Wires a [`FrameSource`] into a [`VideoEncoder`] and owns their combined
//! lifecycle. Start runs top-down (source, then encoder); stop runs
//! bottom-up from the camera side (source, then encoder).

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::source::FrameSource;
use crate::video::encode_session::{EncoderStats, VideoEncoder};
use crate::video::encoder::VideoCodec;

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialised,
    Initialised,
    Running,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Uninitialised => write!(f, "uninitialised"),
            PipelineState::Initialised => write!(f, "initialised"),
            PipelineState::Running => write!(f, "running"),
        }
    }
}

/// Snapshot of the whole pipeline
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub state: PipelineState,
    /// Frames the source captured since it last started
    pub frames_captured: u64,
    /// Frames waiting for the encoder
    pub backlog: usize,
    pub encoder: EncoderStats,
}

/// The only component the application talks to
pub struct Pipeline<S: FrameSource> {
    config: StreamConfig,
    source: S,
    encoder: VideoEncoder,
    events: Arc<EventBus>,
    state: PipelineState,
}

impl<S: FrameSource> Pipeline<S> {
    pub fn new(config: StreamConfig, source: S, codec: Box<dyn VideoCodec>) -> Self {
        Self::with_events(config, source, codec, Arc::new(EventBus::new()))
    }

    pub fn with_events(
        config: StreamConfig,
        source: S,
        codec: Box<dyn VideoCodec>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            encoder: VideoEncoder::new(config.clone(), codec, events.clone()),
            config,
            source,
            events,
            state: PipelineState::Uninitialised,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn encoder(&self) -> &VideoEncoder {
        &self.encoder
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state,
            frames_captured: self.source.frame_count(),
            backlog: self.encoder.backlog(),
            encoder: self.encoder.stats(),
        }
    }

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.events
            .publish(PipelineEvent::state_changed("pipeline", state));
    }

    /// Encoder init, then source init, then sink registration
    ///
    /// A failure part-way undoes what was done. Idempotent.
    pub fn init(&mut self) -> Result<()> {
        if self.state != PipelineState::Uninitialised {
            return Ok(());
        }
        self.config.validate()?;

        let hls = &self.config.hls;
        self.encoder.init(&hls.output_dir, &hls.file_name_root)?;

        if let Err(e) = self.source.init(&self.config.video) {
            warn!("{} init failed: {}", self.source.name(), e);
            self.encoder.deinit();
            return Err(e);
        }

        match self.encoder.sink() {
            Ok(sink) => self.source.register(sink),
            Err(e) => {
                self.source.deinit();
                self.encoder.deinit();
                return Err(e);
            }
        }

        info!(
            "Pipeline initialised: {} -> {}",
            self.source.name(),
            self.config.hls.playlist_path().display()
        );
        self.set_state(PipelineState::Initialised);
        Ok(())
    }

    /// Source start, then encoder start
    ///
    /// Frames captured before the encoder is up wait in the queue. If the
    /// encoder cannot start the source is stopped again.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Uninitialised => {
                return Err(PipelineError::NotInitialised(
                    "Pipeline not initialised".to_string(),
                ))
            }
            PipelineState::Running => {
                return Err(PipelineError::AlreadyActive(
                    "Pipeline already running".to_string(),
                ))
            }
            PipelineState::Initialised => {}
        }

        self.source.start()?;

        if let Err(e) = self.encoder.start() {
            warn!("Encoder start failed, stopping {}: {}", self.source.name(), e);
            // A producer blocked on a full queue must be released before stop can join it
            let sink = self.encoder.sink().ok();
            if let Some(sink) = &sink {
                sink.queue().close();
            }
            self.source.stop();
            if let Some(sink) = &sink {
                sink.queue().reopen();
            }
            return Err(e);
        }

        info!("Pipeline running");
        self.set_state(PipelineState::Running);
        Ok(())
    }

    /// Source stop, then encoder stop; idempotent
    pub fn stop(&mut self) {
        if self.state != PipelineState::Running {
            return;
        }
        self.source.stop();
        self.encoder.stop();
        info!("Pipeline stopped");
        self.set_state(PipelineState::Initialised);
    }

    /// Reverse-order teardown; safe in any state
    pub fn deinit(&mut self) {
        self.stop();
        self.source.deinit();
        self.encoder.deinit();
        if self.state != PipelineState::Uninitialised {
            info!("Pipeline deinitialised");
            self.set_state(PipelineState::Uninitialised);
        }
    }
}

impl<S: FrameSource> Drop for Pipeline<S> {
    fn drop(&mut self) {
        self.deinit();
    }
}
