//! Sliding-window HLS playlist

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::HlsConfig;

/// One closed segment listed in the playlist
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    /// Monotonic segment number
    pub index: u64,
    /// File name relative to the output directory
    pub file_name: String,
    /// Full path of the segment file
    pub path: PathBuf,
    /// Measured duration
    pub duration: Duration,
    /// Wall-clock time the segment was opened
    pub created_at: DateTime<Utc>,
    /// Bytes written
    pub bytes: u64,
}

/// Rendering options taken from [`HlsConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistOptions {
    pub target_duration: Duration,
    pub allow_cache: bool,
    pub program_date_time: bool,
    pub base_url: Option<String>,
}

impl From<&HlsConfig> for PlaylistOptions {
    fn from(config: &HlsConfig) -> Self {
        Self {
            target_duration: config.segment_duration(),
            allow_cache: config.allow_cache,
            program_date_time: config.program_date_time,
            base_url: config.base_url.clone(),
        }
    }
}

/// Ordered list of playable segments, oldest first
///
/// Never holds more than `capacity` entries; pushing past that evicts from
/// the front and hands the evicted entries back so the caller can delete
/// their files once the rewritten playlist is on disk.
#[derive(Debug, Clone)]
pub struct PlaylistIndex {
    entries: VecDeque<SegmentEntry>,
    capacity: usize,
    ended: bool,
    /// Longest segment ever pushed, evicted ones included
    longest: Duration,
}

impl PlaylistIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            ended: false,
            longest: Duration::ZERO,
        }
    }

    /// Append a segment, returning whatever fell out of the window
    pub fn push(&mut self, entry: SegmentEntry) -> Vec<SegmentEntry> {
        self.longest = self.longest.max(entry.duration);
        self.entries.push_back(entry);
        self.evict_overflow()
    }

    /// Change the window size, returning entries that no longer fit
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<SegmentEntry> {
        self.capacity = capacity.max(1);
        self.evict_overflow()
    }

    fn evict_overflow(&mut self) -> Vec<SegmentEntry> {
        let excess = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..excess).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SegmentEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the first listed segment (0 when empty)
    pub fn media_sequence(&self) -> u64 {
        self.entries.front().map(|e| e.index).unwrap_or(0)
    }

    pub fn contains(&self, index: u64) -> bool {
        self.entries.iter().any(|e| e.index == index)
    }

    /// Mark the stream finished (`#EXT-X-ENDLIST`) or live again
    pub fn set_ended(&mut self, ended: bool) {
        self.ended = ended;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// `#EXT-X-TARGETDURATION` value
    ///
    /// Covers the configured duration and every segment this index has held,
    /// so it only grows if a segment overran, and never shrinks as long
    /// segments leave the window.
    pub fn target_duration_secs(&self, configured: Duration) -> u64 {
        ceil_secs(configured.max(self.longest)).max(1)
    }

    /// Render the playlist text
    pub fn render(&self, options: &PlaylistOptions) -> String {
        let mut out = String::with_capacity(128 + self.entries.len() * 96);
        let _ = writeln!(out, "#EXTM3U");
        let _ = writeln!(out, "#EXT-X-VERSION:3");
        let _ = writeln!(
            out,
            "#EXT-X-ALLOW-CACHE:{}",
            if options.allow_cache { "YES" } else { "NO" }
        );
        let _ = writeln!(
            out,
            "#EXT-X-TARGETDURATION:{}",
            self.target_duration_secs(options.target_duration)
        );
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence());

        for entry in &self.entries {
            if options.program_date_time {
                let _ = writeln!(
                    out,
                    "#EXT-X-PROGRAM-DATE-TIME:{}",
                    entry.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                );
            }
            let _ = writeln!(out, "#EXTINF:{:.6},", entry.duration.as_secs_f64());
            match &options.base_url {
                Some(base) => {
                    let _ = writeln!(out, "{}/{}", base, entry.file_name);
                }
                None => {
                    let _ = writeln!(out, "{}", entry.file_name);
                }
            }
        }

        if self.ended {
            let _ = writeln!(out, "#EXT-X-ENDLIST");
        }
        out
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Replace `path` with `contents` via a temporary sibling and rename
///
/// A reader sees either the previous playlist or the new one, never a mix.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_data()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
