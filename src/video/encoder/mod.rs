//! Codec implementations
//!
//! The encode loop talks to codecs through [`VideoCodec`]; the crate ships
//! an MJPEG codec, and other codecs plug in by implementing the trait.

pub mod jpeg;
pub mod traits;

pub use jpeg::MjpegCodec;
pub use traits::{pts_for_index, CodecConfig, EncodedChunk, VideoCodec};
