//! Watchdog stream - capture-to-HLS frame pipeline
//!
//! A camera-side [`source::FrameSource`] hands frames to a bounded queue; the
//! [`video::VideoEncoder`] drains it on its own thread, encodes each frame and
//! writes rotating HLS segments plus a sliding-window playlist.

pub mod config;
pub mod error;
pub mod events;
pub mod hls;
pub mod pipeline;
pub mod source;
pub mod utils;
pub mod video;

#[cfg(test)]
mod testing;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineState, PipelineStats};
