use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watchdog_stream::config::{ConfigStore, OverflowPolicy, StreamConfig};
use watchdog_stream::events::{EventBus, PipelineEvent};
use watchdog_stream::hls::remove_stale_output;
use watchdog_stream::source::TestPatternSource;
use watchdog_stream::video::MjpegCodec;
use watchdog_stream::{Pipeline, PipelineStats};

const MJPEG_SEGMENT_NOTE: &str = "\
Segments hold concatenated JPEG frames from the built-in MJPEG codec, not \
MPEG-TS: HLS players cannot play them even though the playlist is valid \
HLS. Set --segment-extension (e.g. .mjpeg) to name them for what they are.";

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Watchdog streaming command line arguments
#[derive(Parser, Debug)]
#[command(name = "watchdog-stream")]
#[command(version, about = "Capture frames and stream them as rotating HLS segments", long_about = None)]
#[command(after_help = MJPEG_SEGMENT_NOTE)]
struct CliArgs {
    /// Directory for streaming output (overrides config file)
    #[arg(short = 'd', long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// File name root for the playlist and segment files (overrides config file)
    #[arg(short = 'f', long, value_name = "NAME")]
    file_name: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", default_value = "watchdog.json")]
    config: PathBuf,

    /// Capture width in pixels
    #[arg(long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Capture height in pixels
    #[arg(long, value_name = "PIXELS")]
    height: Option<u32>,

    /// Frame rate
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Number of segments kept in the playlist
    #[arg(long, value_name = "COUNT")]
    list_size: Option<usize>,

    /// Segment duration in seconds
    #[arg(long, value_name = "SECONDS")]
    segment_duration: Option<u32>,

    /// Segment file extension, including the dot (overrides config file)
    #[arg(long, value_name = "EXT")]
    segment_extension: Option<String>,

    /// JPEG quality (1-100)
    #[arg(long, value_name = "QUALITY")]
    quality: Option<u32>,

    /// Queue overflow policy (drop-oldest, drop-newest, block)
    #[arg(long, value_name = "POLICY")]
    overflow: Option<OverflowPolicy>,

    /// Seconds between statistics log lines (0 disables)
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    stats_interval: u64,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!("Starting watchdog-stream v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::new(&args.config).await?;
    tracing::info!("Configuration file: {}", config_store.path().display());

    let mut config = (*config_store.get()).clone();
    apply_overrides(&mut config, &args);
    config.validate()?;

    tracing::info!(
        "Output to {}, files named {}{} and {}-N{}",
        config.hls.output_dir.display(),
        config.hls.file_name_root,
        config.hls.playlist_extension,
        config.hls.file_name_root,
        config.hls.segment_extension
    );

    if config.hls.segment_extension == ".ts" {
        tracing::warn!(
            "Segments are MJPEG, not MPEG-TS, despite the .ts extension; \
             HLS players will not play them"
        );
    }

    // Clean start: output directory exists and holds nothing from a previous run
    tokio::fs::create_dir_all(&config.hls.output_dir).await?;
    let removed = remove_stale_output(&config.hls)?;
    if removed > 0 {
        tracing::info!("Removed {} file(s) left by a previous run", removed);
    }

    let events = std::sync::Arc::new(EventBus::new());
    let event_logger = tokio::spawn(log_events(events.subscribe()));

    let codec = Box::new(MjpegCodec::new());
    let mut pipeline =
        Pipeline::with_events(config, TestPatternSource::new(), codec, events.clone());

    let started = pipeline.init().and_then(|_| pipeline.start());
    if let Err(e) = started {
        tracing::error!("Initialisation failure ({}): {}", e.code(), e);
        pipeline.deinit();
        event_logger.abort();
        return Err(e.into());
    }

    tracing::info!("Running, press CTRL-C to stop");

    let stats_period = Duration::from_secs(args.stats_interval);
    let mut stats_timer = tokio::time::interval(stats_period.max(Duration::from_secs(1)));
    stats_timer.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for CTRL-C: {}", e);
                }
                break;
            }
            _ = stats_timer.tick(), if !stats_period.is_zero() => {
                log_stats(&pipeline.stats());
            }
        }
    }

    tracing::info!("Stopping");
    pipeline.stop();
    log_stats(&pipeline.stats());
    pipeline.deinit();

    // Let the logger drain what teardown published
    drop(pipeline);
    drop(events);
    match tokio::time::timeout(Duration::from_secs(1), event_logger).await {
        Ok(Err(e)) => tracing::warn!("Event logger ended abnormally: {}", e),
        Ok(Ok(())) => {}
        Err(_) => tracing::debug!("Event logger still busy at exit"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Command line values take precedence over the configuration file
fn apply_overrides(config: &mut StreamConfig, args: &CliArgs) {
    if let Some(dir) = &args.output_dir {
        config.hls.output_dir = dir.clone();
    }
    if let Some(name) = &args.file_name {
        config.hls.file_name_root = name.clone();
    }
    if let Some(width) = args.width {
        config.video.width = width;
    }
    if let Some(height) = args.height {
        config.video.height = height;
    }
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if let Some(list_size) = args.list_size {
        config.hls.list_size = list_size;
    }
    if let Some(secs) = args.segment_duration {
        config.hls.segment_duration_secs = secs;
    }
    if let Some(extension) = &args.segment_extension {
        config.hls.segment_extension = extension.clone();
    }
    if let Some(quality) = args.quality {
        config.encoder.quality = quality;
    }
    if let Some(overflow) = args.overflow {
        config.queue.overflow = overflow;
    }
}

async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::FramesDropped { missed, total }) => {
                tracing::warn!("{} frame(s) dropped ({} in total)", missed, total);
            }
            Ok(PipelineEvent::CodecError { sequence, message }) => {
                tracing::warn!("Codec error on frame {}: {}", sequence, message);
            }
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!("Event: {}", json),
                Err(_) => tracing::debug!("Event: {}", event.event_name()),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("Event logger lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_stats(stats: &PipelineStats) {
    let encoder = &stats.encoder;
    tracing::info!(
        "{}: captured {}, encoded {}, missed {}, backlog {}, segments {}, largest gap {:?}",
        stats.state,
        stats.frames_captured,
        encoder.frames_encoded,
        encoder.frames_missed,
        stats.backlog,
        encoder.writer.segments_completed,
        encoder.timing.largest
    );
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "watchdog_stream=error",
        LogLevel::Warn => "watchdog_stream=warn",
        LogLevel::Info => "watchdog_stream=info",
        LogLevel::Verbose => "watchdog_stream=debug",
        LogLevel::Debug => "watchdog_stream=debug,tokio=debug",
        LogLevel::Trace => "watchdog_stream=trace,tokio=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_help_states_segment_format() {
        let help = CliArgs::command().render_help().to_string();
        assert!(help.contains("not MPEG-TS"));
        assert!(help.contains("--segment-extension"));
    }

    #[test]
    fn test_overrides_apply_over_config() {
        let args = CliArgs::try_parse_from([
            "watchdog-stream",
            "-d",
            "/tmp/stream",
            "-f",
            "cam",
            "--segment-extension",
            ".mjpeg",
            "--overflow",
            "block",
        ])
        .unwrap();

        let mut config = StreamConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.hls.output_dir, PathBuf::from("/tmp/stream"));
        assert_eq!(config.hls.file_name_root, "cam");
        assert_eq!(config.hls.segment_extension, ".mjpeg");
        assert_eq!(config.queue.overflow, OverflowPolicy::Block);
        config.validate().unwrap();
    }
}
