//! Log throttling
//!
//! Keeps a repeating condition (sequence gaps, codec errors, failed playlist
//! writes) from flooding the log while the pipeline keeps running. Messages
//! swallowed in between are counted and reported with the next one let
//! through.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often a message with the same key is logged
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use watchdog_stream::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert_eq!(throttler.check("sequence_gap"), Some(0));
/// assert_eq!(throttler.check("sequence_gap"), None);
/// ```
pub struct LogThrottler {
    keys: Mutex<HashMap<&'static str, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// `Some(n)` if `key` may be logged now, `n` being how many occurrences
    /// were swallowed since it last was; `None` while throttled
    pub fn check(&self, key: &'static str) -> Option<u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &'static str, now: Instant) -> Option<u64> {
        let mut keys = self.keys.lock();
        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = std::mem::take(&mut state.suppressed);
                state.last_logged = now;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key,
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key` once its condition has cleared, so a recurrence is
    /// logged immediately
    pub fn clear(&self, key: &'static str) {
        self.keys.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`, tagged with a `suppressed` count when
/// earlier occurrences were swallowed
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        match $throttler.check($key) {
            Some(0) => tracing::warn!($($arg)*),
            Some(suppressed) => tracing::warn!(suppressed, $($arg)*),
            None => {}
        }
    };
}

/// Throttled `tracing::error!`, see [`warn_throttled!`]
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        match $throttler.check($key) {
            Some(0) => tracing::error!($($arg)*),
            Some(suppressed) => tracing::error!(suppressed, $($arg)*),
            None => {}
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppressed_count_reported_on_next_log() {
        let throttler = LogThrottler::with_secs(5);
        let start = Instant::now();

        assert_eq!(throttler.check_at("codec_error", start), Some(0));
        for ms in [10, 20, 30] {
            assert_eq!(
                throttler.check_at("codec_error", start + Duration::from_millis(ms)),
                None
            );
        }
        assert_eq!(
            throttler.check_at("codec_error", start + Duration::from_secs(6)),
            Some(3)
        );
        // Count starts over after being reported
        assert_eq!(
            throttler.check_at("codec_error", start + Duration::from_secs(12)),
            Some(0)
        );
    }

    #[test]
    fn test_keys_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert_eq!(throttler.check("sequence_gap"), Some(0));
        assert_eq!(throttler.check("playlist_write"), Some(0));
        assert_eq!(throttler.check("sequence_gap"), None);
        assert_eq!(throttler.check("playlist_write"), None);
    }

    #[test]
    fn test_clear_after_recovery() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.check("playlist_write").is_some());
        assert!(throttler.check("playlist_write").is_none());

        throttler.clear("playlist_write");
        assert_eq!(throttler.check("playlist_write"), Some(0));
    }

    #[test]
    fn test_macros_consume_throttle() {
        let throttler = LogThrottler::with_secs(10);
        warn_throttled!(throttler, "segment_remove", "first {}", 1);
        error_throttled!(throttler, "segment_remove", "second {}", 2);
        assert_eq!(throttler.check("segment_remove"), None);
    }
}
