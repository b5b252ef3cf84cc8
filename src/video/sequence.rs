//! Frame sequence numbers and wrap-aware tracking

/// Capture sequence number; wraps at the numeric range boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Forward distance from `earlier` to `self`, or `None` if `self` is not
    /// newer (equal, or more than half the range behind)
    pub fn distance_from(self, earlier: SequenceNumber) -> Option<u32> {
        let delta = self.0.wrapping_sub(earlier.0);
        if delta == 0 || delta > u32::MAX / 2 {
            None
        } else {
            Some(delta)
        }
    }
}

/// Outcome of observing one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First frame seen; `index` is the extended frame index
    First { index: u64 },
    /// Exactly one after the previous frame
    InOrder { index: u64 },
    /// Newer than expected; `missed` frames were dropped upstream
    Gap { index: u64, missed: u32 },
    /// Not newer than the previous frame
    Stale,
}

impl SequenceCheck {
    /// Extended index of an accepted frame
    pub fn index(&self) -> Option<u64> {
        match *self {
            SequenceCheck::First { index }
            | SequenceCheck::InOrder { index }
            | SequenceCheck::Gap { index, .. } => Some(index),
            SequenceCheck::Stale => None,
        }
    }
}

/// Extends wrapping `u32` sequence numbers into a monotonic `u64` index
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<(SequenceNumber, u64)>,
    missed_total: u64,
    stale_total: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sequence: u32) -> SequenceCheck {
        let sequence = SequenceNumber::new(sequence);
        let Some((last, last_index)) = self.last else {
            let index = sequence.value() as u64;
            self.last = Some((sequence, index));
            return SequenceCheck::First { index };
        };

        match sequence.distance_from(last) {
            None => {
                self.stale_total += 1;
                SequenceCheck::Stale
            }
            Some(delta) => {
                let index = last_index + delta as u64;
                self.last = Some((sequence, index));
                if delta == 1 {
                    SequenceCheck::InOrder { index }
                } else {
                    let missed = delta - 1;
                    self.missed_total += missed as u64;
                    SequenceCheck::Gap { index, missed }
                }
            }
        }
    }

    /// Frames missing from the observed sequence so far
    pub fn missed_total(&self) -> u64 {
        self.missed_total
    }

    /// Frames rejected as not newer than their predecessor
    pub fn stale_total(&self) -> u64 {
        self.stale_total
    }

    /// Forget the last observed frame; counters are kept
    pub fn reset(&mut self) {
        self.last = None;
    }
}
