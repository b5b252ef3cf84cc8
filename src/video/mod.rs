//! Video frames, the capture-to-encode queue and the encoder

pub mod encode_session;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod queue;
pub mod sequence;

pub use encode_session::{EncoderState, EncoderStats, VideoEncoder};
pub use encoder::{CodecConfig, EncodedChunk, MjpegCodec, VideoCodec};
pub use format::{FrameLayout, PixelFormat, Resolution};
pub use frame::Frame;
pub use queue::{FrameQueue, QueueStats};
pub use sequence::{SequenceCheck, SequenceNumber, SequenceTracker};
