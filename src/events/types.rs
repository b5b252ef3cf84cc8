//! Pipeline event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline event enumeration
///
/// Serialized as `{ "event": "<name>", "data": { ... } }`, e.g.
/// ```json
/// {
///   "event": "hls.segment_created",
///   "data": { "index": 4, "path": "./watchdog-4.ts" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum PipelineEvent {
    /// A lifecycle state changed
    #[serde(rename = "pipeline.state_changed")]
    StateChanged {
        /// "source", "encoder" or "pipeline"
        component: String,
        /// "uninitialised", "ready", "running", "stopped"
        state: String,
    },

    /// A new segment file was opened
    #[serde(rename = "hls.segment_created")]
    SegmentCreated { index: u64, path: String },

    /// A segment was closed and added to the playlist
    #[serde(rename = "hls.segment_completed")]
    SegmentCompleted {
        index: u64,
        duration_secs: f64,
        bytes: u64,
        created_at: DateTime<Utc>,
    },

    /// A segment left the window and its file was deleted
    #[serde(rename = "hls.segment_removed")]
    SegmentRemoved { index: u64, path: String },

    /// The playlist was rewritten
    #[serde(rename = "hls.playlist_written")]
    PlaylistWritten {
        media_sequence: u64,
        segments: usize,
        ended: bool,
    },

    /// The encoder saw a sequence gap
    #[serde(rename = "encoder.frames_dropped")]
    FramesDropped {
        /// Frames missing in this gap
        missed: u32,
        /// Frames missing since the encoder was created
        total: u64,
    },

    /// The codec rejected a frame
    #[serde(rename = "encoder.codec_error")]
    CodecError { sequence: u64, message: String },
}

impl PipelineEvent {
    /// Get the event name (for filtering)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "pipeline.state_changed",
            Self::SegmentCreated { .. } => "hls.segment_created",
            Self::SegmentCompleted { .. } => "hls.segment_completed",
            Self::SegmentRemoved { .. } => "hls.segment_removed",
            Self::PlaylistWritten { .. } => "hls.playlist_written",
            Self::FramesDropped { .. } => "encoder.frames_dropped",
            Self::CodecError { .. } => "encoder.codec_error",
        }
    }

    pub fn state_changed(component: &str, state: impl std::fmt::Display) -> Self {
        Self::StateChanged {
            component: component.to_string(),
            state: state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let event = PipelineEvent::SegmentRemoved {
            index: 3,
            path: "./watchdog-3.ts".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "hls.segment_removed");
        assert_eq!(json["data"]["index"], 3);
        assert_eq!(event.event_name(), "hls.segment_removed");
    }
}
