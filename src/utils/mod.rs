//! Shared helpers for the capture and encode threads

pub mod throttle;
pub mod timing;

pub use throttle::LogThrottler;
pub use timing::{TimingMonitor, TimingSummary};
