//! HLS output: rotating segment files and the playlist that lists them

pub mod playlist;
pub mod segment;

pub use playlist::{write_atomic, PlaylistIndex, PlaylistOptions, SegmentEntry};
pub use segment::{SegmentHistory, SegmentWriter, WriterState, WriterStats};

use std::fs;
use std::io;
use std::path::Path;

use crate::config::HlsConfig;

/// Remove playlist and segment files left by a previous run
///
/// Only files named `<root>-<N><segment-ext>` and the playlist itself (plus
/// its temporary sibling) are touched; another stream sharing the root as a
/// prefix (`watchdog-cam2-0.ts`) is left alone. Returns how many files were removed.
pub fn remove_stale_output(config: &HlsConfig) -> io::Result<usize> {
    let dir = &config.output_dir;
    if !dir.is_dir() {
        return Ok(0);
    }

    let playlist = format!("{}{}", config.file_name_root, config.playlist_extension);
    let playlist_tmp = format!("{}.tmp", playlist);
    let segment_prefix = format!("{}-", config.file_name_root);

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let is_segment = name
            .strip_prefix(&segment_prefix)
            .and_then(|rest| rest.strip_suffix(config.segment_extension.as_str()))
            .is_some_and(|index| index.parse::<u64>().is_ok());
        if name == playlist || name == playlist_tmp || is_segment {
            remove_stale_file(&entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn remove_stale_file(path: &Path) -> io::Result<()> {
    tracing::debug!("Removing stale {}", path.display());
    fs::remove_file(path)
}
