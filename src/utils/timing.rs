//! Rolling inter-arrival timing for the encode loop

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of gaps kept for the rolling average
pub const TIMING_WINDOW: usize = 1000;

/// Snapshot of a [`TimingMonitor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingSummary {
    /// Largest gap seen since the monitor was created or reset
    pub largest: Duration,
    /// Mean gap over the rolling window
    pub average: Duration,
    /// Gaps currently in the window
    pub samples: usize,
}

/// Tracks the gap between successive ticks
///
/// The largest gap is kept for the lifetime of the monitor; the average
/// covers the most recent [`TIMING_WINDOW`] gaps.
#[derive(Debug)]
pub struct TimingMonitor {
    previous: Option<Instant>,
    gaps: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
    largest: Duration,
}

impl TimingMonitor {
    pub fn new() -> Self {
        Self::with_capacity(TIMING_WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            previous: None,
            gaps: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
            largest: Duration::ZERO,
        }
    }

    /// Record a tick now
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record a tick at `now`; the first tick only sets the reference point
    pub fn tick_at(&mut self, now: Instant) {
        if let Some(previous) = self.previous {
            let gap = now.saturating_duration_since(previous);
            if gap > self.largest {
                self.largest = gap;
            }
            if self.gaps.len() == self.capacity {
                if let Some(oldest) = self.gaps.pop_front() {
                    self.total -= oldest;
                }
            }
            self.gaps.push_back(gap);
            self.total += gap;
        }
        self.previous = Some(now);
    }

    pub fn summary(&self) -> TimingSummary {
        let average = if self.gaps.is_empty() {
            Duration::ZERO
        } else {
            self.total / self.gaps.len() as u32
        };
        TimingSummary {
            largest: self.largest,
            average,
            samples: self.gaps.len(),
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.gaps.clear();
        self.total = Duration::ZERO;
        self.largest = Duration::ZERO;
    }
}

impl Default for TimingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_records_no_gap() {
        let mut monitor = TimingMonitor::new();
        monitor.tick_at(Instant::now());
        assert_eq!(monitor.summary(), TimingSummary::default());
    }

    #[test]
    fn test_largest_and_average() {
        let mut monitor = TimingMonitor::new();
        let start = Instant::now();
        monitor.tick_at(start);
        monitor.tick_at(start + Duration::from_millis(60));
        monitor.tick_at(start + Duration::from_millis(100));
        monitor.tick_at(start + Duration::from_millis(200));

        let summary = monitor.summary();
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.largest, Duration::from_millis(100));
        assert_eq!(summary.average, Duration::from_nanos(200_000_000 / 3));
    }

    #[test]
    fn test_window_rolls_but_largest_sticks() {
        let mut monitor = TimingMonitor::with_capacity(2);
        let start = Instant::now();
        monitor.tick_at(start);
        monitor.tick_at(start + Duration::from_millis(500));
        monitor.tick_at(start + Duration::from_millis(510));
        monitor.tick_at(start + Duration::from_millis(520));

        let summary = monitor.summary();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.average, Duration::from_millis(10));
        assert_eq!(summary.largest, Duration::from_millis(500));

        monitor.reset();
        assert_eq!(monitor.summary().samples, 0);
    }
}
