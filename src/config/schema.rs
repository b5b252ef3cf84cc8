use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// Main pipeline configuration
///
/// Fixed for one `init` -> `deinit` cycle; changing any field requires a full
/// teardown and re-init of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StreamConfig {
    /// Camera geometry and rate
    pub video: VideoConfig,
    /// Frame queue between capture and encode
    pub queue: QueueConfig,
    /// Encoder settings
    pub encoder: EncoderSettings,
    /// HLS output settings
    pub hls: HlsConfig,
}

impl StreamConfig {
    /// Check every section, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.queue.validate()?;
        self.encoder.validate()?;
        self.hls.validate()?;
        Ok(())
    }

    /// Group-of-pictures length that puts a key frame at every segment start
    pub fn gop_size(&self) -> u32 {
        self.hls.segment_duration_secs * self.video.fps
    }
}

/// Video capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Frame rate
    pub fps: u32,
    /// Pixel format delivered by the camera
    pub format: PixelFormat,
    /// Row alignment (bytes) the camera pads the Y stride to
    pub stride_align: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 950,
            height: 540,
            fps: 15,
            format: PixelFormat::Yuv420,
            stride_align: 64,
        }
    }
}

impl VideoConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Y-plane stride after alignment padding
    pub fn stride(&self) -> u32 {
        let align = self.stride_align.max(1);
        self.width.div_ceil(align) * align
    }

    /// Duration of one frame at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps.max(1) as u64)
    }

    fn validate(&self) -> Result<()> {
        if !self.resolution().is_valid() {
            return Err(PipelineError::InvalidConfig(format!(
                "Unsupported resolution {}",
                self.resolution()
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "4:2:0 geometry must be even, got {}",
                self.resolution()
            )));
        }
        if self.stride() % 2 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "Stride alignment {} gives an odd stride",
                self.stride_align
            )));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(PipelineError::InvalidConfig(format!(
                "Frame rate must be 1-120, got {}",
                self.fps
            )));
        }
        Ok(())
    }
}

/// What to do with a new frame when the queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame (favours a fresh live feed)
    #[default]
    DropOldest,
    /// Discard the incoming frame
    DropNewest,
    /// Make the producer wait for room
    Block,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
            OverflowPolicy::DropNewest => write!(f, "drop-newest"),
            OverflowPolicy::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "drop-oldest" | "oldest" => Ok(OverflowPolicy::DropOldest),
            "drop-newest" | "newest" => Ok(OverflowPolicy::DropNewest),
            "block" => Ok(OverflowPolicy::Block),
            _ => Err(format!("Unknown overflow policy: {}", s)),
        }
    }
}

/// Frame queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of frames waiting for the encoder
    pub capacity: usize,
    /// Behaviour once `capacity` is reached
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            // Lots of room: the encoder can stall for a while on a busy Pi
            capacity: 1000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "Queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderSettings {
    /// JPEG quality (1-100) for the built-in MJPEG codec
    pub quality: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

impl EncoderSettings {
    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(PipelineError::InvalidConfig(format!(
                "Quality must be 1-100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

/// HLS output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HlsConfig {
    /// Output directory (no trailing slash)
    pub output_dir: PathBuf,
    /// Root name for the playlist and segment files
    pub file_name_root: String,
    /// Playlist file extension
    pub playlist_extension: String,
    /// Segment file extension
    pub segment_extension: String,
    /// Target segment duration
    pub segment_duration_secs: u32,
    /// Number of segments kept in the playlist
    pub list_size: usize,
    /// URL prefix written in front of every segment name (no trailing slash)
    pub base_url: Option<String>,
    /// Emit `#EXT-X-PROGRAM-DATE-TIME` for every segment
    pub program_date_time: bool,
    /// Value of `#EXT-X-ALLOW-CACHE`
    pub allow_cache: bool,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_name_root: "watchdog".to_string(),
            playlist_extension: ".m3u8".to_string(),
            segment_extension: ".ts".to_string(),
            segment_duration_secs: 2,
            list_size: 15,
            base_url: None,
            program_date_time: true,
            allow_cache: false,
        }
    }
}

impl HlsConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs as u64)
    }

    /// Path of the playlist file
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", self.file_name_root, self.playlist_extension))
    }

    fn validate(&self) -> Result<()> {
        if self.file_name_root.is_empty() || self.file_name_root.contains('/') {
            return Err(PipelineError::InvalidConfig(format!(
                "Invalid file name root: {:?}",
                self.file_name_root
            )));
        }
        if self.segment_duration_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Segment duration must be at least 1 second".to_string(),
            ));
        }
        if self.list_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "Playlist must retain at least one segment".to_string(),
            ));
        }
        if self.playlist_extension == self.segment_extension {
            return Err(PipelineError::InvalidConfig(
                "Playlist and segment extensions must differ".to_string(),
            ));
        }
        if let Some(url) = &self.base_url {
            if url.ends_with('/') {
                return Err(PipelineError::InvalidConfig(
                    "Base URL must not end with '/'".to_string(),
                ));
            }
        }
        Ok(())
    }
}
