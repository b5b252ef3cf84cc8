//! Segment rotation
//!
//! ```text
//! Idle ──start──> Writing(N) ──rotate──> Writing(N+1) ── ... ──stop──> Stopped
//!                                                                        │
//!                      Writing(next unused N) <──────────start───────────┘
//! ```

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::playlist::{write_atomic, PlaylistIndex, PlaylistOptions, SegmentEntry};
use crate::config::HlsConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::utils::LogThrottler;
use crate::video::encoder::EncodedChunk;
use crate::{error_throttled, warn_throttled};

/// Writer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Created, nothing written yet
    Idle,
    /// Appending to segment N
    Writing(u64),
    /// Final playlist written
    Stopped,
}

impl std::fmt::Display for WriterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterState::Idle => write!(f, "idle"),
            WriterState::Writing(n) => write!(f, "writing({})", n),
            WriterState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Writer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub segments_completed: u64,
    pub segments_removed: u64,
    pub playlist_writes: u64,
    pub playlist_failures: u64,
    pub write_failures: u64,
}

/// Segments a writer leaves behind for the next one to manage
#[derive(Debug, Clone)]
pub struct SegmentHistory {
    /// Playlist as last written
    pub index: PlaylistIndex,
    /// Evicted segments whose files are still on disk
    pub pending_removal: Vec<SegmentEntry>,
}

struct OpenSegment {
    index: u64,
    file_name: String,
    path: PathBuf,
    file: BufWriter<File>,
    created_at: DateTime<Utc>,
    first_pts: Option<Duration>,
    last_pts: Duration,
    bytes: u64,
}

/// Turns encoded chunks into rotating segment files plus a playlist
pub struct SegmentWriter {
    config: HlsConfig,
    options: PlaylistOptions,
    /// Duration credited to the last chunk of a segment on stop
    frame_interval: Duration,
    state: WriterState,
    index: PlaylistIndex,
    next_index: u64,
    current: Option<OpenSegment>,
    /// Evicted segments whose files are waiting for a successful playlist write
    pending_removal: Vec<SegmentEntry>,
    events: Arc<EventBus>,
    throttler: LogThrottler,
    stats: WriterStats,
}

impl SegmentWriter {
    /// Create an idle writer whose first segment will be `first_index`
    pub fn new(
        config: &HlsConfig,
        frame_interval: Duration,
        first_index: u64,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            options: PlaylistOptions::from(config),
            config: config.clone(),
            frame_interval,
            state: WriterState::Idle,
            index: PlaylistIndex::new(config.list_size),
            next_index: first_index,
            current: None,
            pending_removal: Vec::new(),
            events,
            throttler: LogThrottler::with_secs(5),
            stats: WriterStats::default(),
        }
    }

    /// Create an idle writer that carries on from an earlier writer's output
    ///
    /// Listed entries stay listed and age out through normal eviction, so
    /// files from the earlier run are deleted like any other. Entries beyond
    /// the configured list size, and files the earlier writer could not yet
    /// delete, go after the next successful playlist write.
    pub fn with_history(
        config: &HlsConfig,
        frame_interval: Duration,
        first_index: u64,
        events: Arc<EventBus>,
        history: SegmentHistory,
    ) -> Self {
        let mut writer = Self::new(config, frame_interval, first_index, events);
        let mut index = history.index;
        if let Some(last) = index.entries().last() {
            writer.next_index = writer.next_index.max(last.index + 1);
        }
        writer.pending_removal = history.pending_removal;
        writer.pending_removal.extend(index.set_capacity(config.list_size));
        writer.index = index;
        writer
    }

    /// Hand listed and pending segments over to a successor writer
    ///
    /// Leaves this writer with an empty playlist; only call once stopped.
    pub fn take_history(&mut self) -> SegmentHistory {
        let capacity = self.index.capacity();
        SegmentHistory {
            index: std::mem::replace(&mut self.index, PlaylistIndex::new(capacity)),
            pending_removal: std::mem::take(&mut self.pending_removal),
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Index the next opened segment will get
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn playlist(&self) -> &PlaylistIndex {
        &self.index
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.config.playlist_path()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn segment_file_name(&self, index: u64) -> String {
        format!(
            "{}-{}{}",
            self.config.file_name_root, index, self.config.segment_extension
        )
    }

    /// Open the first segment
    ///
    /// Allowed from `Idle` and `Stopped`; numbering carries on from the last
    /// segment this writer opened. On failure the state is unchanged.
    pub fn start(&mut self) -> Result<()> {
        if let WriterState::Writing(n) = self.state {
            return Err(PipelineError::AlreadyActive(format!(
                "Segment writer already writing segment {}",
                n
            )));
        }

        let segment = self.open_segment(self.next_index)?;
        self.state = WriterState::Writing(segment.index);
        self.current = Some(segment);
        self.index.set_ended(false);
        info!(
            "Segment writer started at {} ({} segments of {}s)",
            self.state,
            self.config.list_size,
            self.config.segment_duration_secs
        );
        Ok(())
    }

    /// Append one chunk, rotating first if it starts a new segment
    pub fn write_chunk(&mut self, chunk: &EncodedChunk) -> Result<()> {
        if !matches!(self.state, WriterState::Writing(_)) {
            return Err(PipelineError::NotInitialised(format!(
                "Segment writer is {}",
                self.state
            )));
        }

        if self.rotation_due(chunk) {
            self.rotate(chunk.pts)?;
        }

        if self.current.is_none() {
            // Previous rotation could not open its file; try again
            let segment = self.open_segment(self.next_index)?;
            self.state = WriterState::Writing(segment.index);
            self.current = Some(segment);
        }

        let Some(segment) = self.current.as_mut() else {
            return Ok(());
        };

        if let Err(e) = segment.file.write_all(&chunk.data) {
            self.stats.write_failures += 1;
            return Err(e.into());
        }
        if segment.first_pts.is_none() {
            segment.first_pts = Some(chunk.pts);
        }
        segment.last_pts = chunk.pts;
        segment.bytes += chunk.data.len() as u64;
        self.stats.chunks_written += 1;
        self.stats.bytes_written += chunk.data.len() as u64;
        Ok(())
    }

    /// Close the open segment and write the final playlist
    ///
    /// Retained segments stay on disk. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if !matches!(self.state, WriterState::Writing(_)) {
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(segment) = self.current.take() {
            let end = segment.last_pts + self.frame_interval;
            if let Err(e) = self.close_segment(segment, end) {
                result = Err(e);
            }
        }

        self.index.set_ended(true);
        self.publish_playlist();
        self.state = WriterState::Stopped;

        info!(
            "Segment writer stopped, {} segments listed, next index {}",
            self.index.len(),
            self.next_index
        );
        result
    }

    fn rotation_due(&self, chunk: &EncodedChunk) -> bool {
        if !chunk.key_frame {
            return false;
        }
        match self.current.as_ref().and_then(|s| s.first_pts) {
            Some(first) => chunk.pts.saturating_sub(first) >= self.config.segment_duration(),
            None => false,
        }
    }

    fn rotate(&mut self, boundary: Duration) -> Result<()> {
        if let Some(segment) = self.current.take() {
            debug!("Rotating segment {} at {:?}", segment.index, boundary);
            self.close_segment(segment, boundary)?;
            self.publish_playlist();
        }

        let segment = self.open_segment(self.next_index)?;
        self.state = WriterState::Writing(segment.index);
        self.current = Some(segment);
        Ok(())
    }

    fn open_segment(&mut self, index: u64) -> Result<OpenSegment> {
        let file_name = self.segment_file_name(index);
        let path = self.config.output_dir.join(&file_name);
        let file = File::create(&path).map_err(|e| {
            PipelineError::ResourceUnavailable(format!(
                "Cannot open segment {}: {}",
                path.display(),
                e
            ))
        })?;

        self.next_index = index + 1;
        debug!("Opened segment {}", path.display());
        self.events.publish(PipelineEvent::SegmentCreated {
            index,
            path: path.display().to_string(),
        });

        Ok(OpenSegment {
            index,
            file_name,
            path,
            file: BufWriter::new(file),
            created_at: Utc::now(),
            first_pts: None,
            last_pts: Duration::ZERO,
            bytes: 0,
        })
    }

    /// Flush and list a segment, or delete it if it never received data
    fn close_segment(&mut self, mut segment: OpenSegment, end: Duration) -> Result<()> {
        let flushed = segment.file.flush();

        let Some(first) = segment.first_pts else {
            drop(segment.file);
            remove_file_if_present(&segment.path)?;
            debug!("Removed empty segment {}", segment.path.display());
            return Ok(());
        };

        if let Err(e) = flushed {
            self.stats.write_failures += 1;
            warn!("Failed to flush segment {}: {}", segment.path.display(), e);
        }
        drop(segment.file);

        let entry = SegmentEntry {
            index: segment.index,
            file_name: segment.file_name,
            path: segment.path,
            duration: end.saturating_sub(first),
            created_at: segment.created_at,
            bytes: segment.bytes,
        };
        self.stats.segments_completed += 1;
        self.events.publish(PipelineEvent::SegmentCompleted {
            index: entry.index,
            duration_secs: entry.duration.as_secs_f64(),
            bytes: entry.bytes,
            created_at: entry.created_at,
        });

        let evicted = self.index.push(entry);
        self.pending_removal.extend(evicted);
        Ok(())
    }

    /// Rewrite the playlist; delete evicted files only once it is on disk
    fn publish_playlist(&mut self) {
        let path = self.config.playlist_path();
        let text = self.index.render(&self.options);

        if let Err(e) = write_atomic(&path, &text) {
            self.stats.playlist_failures += 1;
            error_throttled!(
                self.throttler,
                "playlist_write",
                "Failed to write playlist {}: {} ({} removals deferred)",
                path.display(),
                e,
                self.pending_removal.len()
            );
            return;
        }
        self.throttler.clear("playlist_write");
        self.stats.playlist_writes += 1;
        self.events.publish(PipelineEvent::PlaylistWritten {
            media_sequence: self.index.media_sequence(),
            segments: self.index.len(),
            ended: self.index.is_ended(),
        });

        let mut still_pending = Vec::new();
        for entry in self.pending_removal.drain(..) {
            match remove_file_if_present(&entry.path) {
                Ok(()) => {
                    self.stats.segments_removed += 1;
                    debug!("Removed segment {}", entry.path.display());
                    self.events.publish(PipelineEvent::SegmentRemoved {
                        index: entry.index,
                        path: entry.path.display().to_string(),
                    });
                }
                Err(e) => {
                    warn_throttled!(
                        self.throttler,
                        "segment_remove",
                        "Failed to remove segment {}: {}",
                        entry.path.display(),
                        e
                    );
                    still_pending.push(entry);
                }
            }
        }
        self.pending_removal = still_pending;
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Writing(_)) {
            if let Err(e) = self.stop() {
                warn!("Segment writer stop on drop failed: {}", e);
            }
        }
    }
}

fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    const FPS: u64 = 15;

    fn hls_config(dir: &Path) -> HlsConfig {
        HlsConfig {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn writer(config: &HlsConfig) -> SegmentWriter {
        SegmentWriter::new(
            config,
            Duration::from_nanos(1_000_000_000 / FPS),
            0,
            Arc::new(EventBus::new()),
        )
    }

    fn chunk(frame: u64) -> EncodedChunk {
        EncodedChunk::new(
            Bytes::from(vec![0x47u8; 188]),
            Duration::from_nanos(frame * 1_000_000_000 / FPS),
            true,
            frame,
        )
    }

    fn segment_files(dir: &Path) -> Vec<u64> {
        let mut indexes: Vec<u64> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| {
                let name = e.unwrap().file_name().into_string().unwrap();
                name.strip_prefix("watchdog-")?
                    .strip_suffix(".ts")?
                    .parse()
                    .ok()
            })
            .collect();
        indexes.sort_unstable();
        indexes
    }

    #[test]
    fn test_forty_seconds_keeps_fifteen() {
        let dir = tempdir().unwrap();
        let config = hls_config(dir.path());
        let mut writer = writer(&config);
        let mut events = writer.events.subscribe();

        writer.start().unwrap();
        for frame in 0..40 * FPS {
            writer.write_chunk(&chunk(frame)).unwrap();
        }

        // 20 segments opened, 19 closed by rotation, 4 evicted so far
        assert_eq!(writer.state(), WriterState::Writing(19));
        assert_eq!(writer.playlist().len(), 15);
        assert_eq!(writer.playlist().media_sequence(), 4);
        assert_eq!(segment_files(dir.path()), (4..20).collect::<Vec<_>>());

        writer.stop().unwrap();
        assert_eq!(writer.state(), WriterState::Stopped);
        assert_eq!(writer.playlist().len(), 15);
        assert_eq!(writer.playlist().media_sequence(), 5);
        assert_eq!(segment_files(dir.path()), (5..20).collect::<Vec<_>>());
        assert_eq!(writer.stats().segments_removed, 5);

        let text = fs::read_to_string(config.playlist_path()).unwrap();
        assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:5\n"));
        assert_eq!(text.matches("#EXTINF:2.000000,").count(), 15);
        assert!(text.ends_with("#EXT-X-ENDLIST\n"));

        let mut removed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::SegmentRemoved { index, .. } = event {
                removed.push(index);
            }
        }
        assert_eq!(removed, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_playlist_never_references_missing_file() {
        let dir = tempdir().unwrap();
        let config = HlsConfig {
            list_size: 3,
            ..hls_config(dir.path())
        };
        let mut writer = writer(&config);
        writer.start().unwrap();

        for frame in 0..20 * FPS {
            writer.write_chunk(&chunk(frame)).unwrap();
            for entry in writer.playlist().entries() {
                assert!(entry.path.exists(), "segment {} missing", entry.index);
            }
            assert!(writer.playlist().len() <= 3);
        }
        writer.stop().unwrap();
    }

    #[test]
    fn test_rotation_waits_for_key_frame() {
        let dir = tempdir().unwrap();
        let mut writer = writer(&hls_config(dir.path()));
        writer.start().unwrap();

        for frame in 0..40 {
            let mut c = chunk(frame);
            // Key frames only every 40 frames
            c.key_frame = frame % 40 == 0;
            writer.write_chunk(&c).unwrap();
        }
        assert_eq!(writer.state(), WriterState::Writing(0));

        writer.write_chunk(&chunk(40)).unwrap();
        assert_eq!(writer.state(), WriterState::Writing(1));
        let first = writer.playlist().entries().next().unwrap();
        assert_eq!(first.duration, Duration::from_nanos(40 * 1_000_000_000 / FPS));
    }

    #[test]
    fn test_start_twice_is_already_active() {
        let dir = tempdir().unwrap();
        let mut writer = writer(&hls_config(dir.path()));
        writer.start().unwrap();
        assert!(matches!(writer.start(), Err(PipelineError::AlreadyActive(_))));
        assert_eq!(writer.state(), WriterState::Writing(0));
    }

    #[test]
    fn test_start_fails_without_directory() {
        let dir = tempdir().unwrap();
        let config = hls_config(&dir.path().join("missing"));
        let mut writer = writer(&config);
        assert!(matches!(
            writer.start(),
            Err(PipelineError::ResourceUnavailable(_))
        ));
        assert_eq!(writer.state(), WriterState::Idle);
        assert_eq!(writer.next_index(), 0);
    }

    #[test]
    fn test_empty_segment_removed_on_stop() {
        let dir = tempdir().unwrap();
        let config = hls_config(dir.path());
        let mut writer = writer(&config);
        writer.start().unwrap();
        assert!(dir.path().join("watchdog-0.ts").exists());

        writer.stop().unwrap();
        assert!(!dir.path().join("watchdog-0.ts").exists());
        assert!(writer.playlist().is_empty());
        let text = fs::read_to_string(config.playlist_path()).unwrap();
        assert!(text.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn test_restart_continues_numbering() {
        let dir = tempdir().unwrap();
        let config = hls_config(dir.path());
        let mut writer = writer(&config);

        writer.start().unwrap();
        for frame in 0..5 * FPS {
            writer.write_chunk(&chunk(frame)).unwrap();
        }
        writer.stop().unwrap();
        writer.stop().unwrap();
        let after_first_run = writer.next_index();
        assert_eq!(after_first_run, 3);

        writer.start().unwrap();
        assert_eq!(writer.state(), WriterState::Writing(3));
        assert!(!writer.playlist().is_ended());
        for frame in 100..100 + FPS {
            writer.write_chunk(&chunk(frame)).unwrap();
        }
        writer.stop().unwrap();

        let indexes: Vec<u64> = writer.playlist().entries().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_failed_playlist_write_defers_removal() {
        let dir = tempdir().unwrap();
        let config = HlsConfig {
            list_size: 1,
            ..hls_config(dir.path())
        };
        let mut writer = writer(&config);
        writer.start().unwrap();

        // A directory in the playlist's place makes the rename fail
        fs::create_dir(config.playlist_path()).unwrap();
        for frame in 0..4 * FPS + 1 {
            writer.write_chunk(&chunk(frame)).unwrap();
        }
        assert!(writer.stats().playlist_failures >= 1);
        assert!(dir.path().join("watchdog-0.ts").exists());

        fs::remove_dir(config.playlist_path()).unwrap();
        for frame in 4 * FPS + 1..6 * FPS + 1 {
            writer.write_chunk(&chunk(frame)).unwrap();
        }
        assert!(!dir.path().join("watchdog-0.ts").exists());
        assert!(!dir.path().join("watchdog-1.ts").exists());
        assert_eq!(writer.playlist().media_sequence(), 2);
    }

    #[test]
    fn test_write_before_start_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = writer(&hls_config(dir.path()));
        assert!(matches!(
            writer.write_chunk(&chunk(0)),
            Err(PipelineError::NotInitialised(_))
        ));
    }
}
