//! Bounded frame queue between the capture and encode threads

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::frame::Frame;
use crate::config::OverflowPolicy;

/// Counters kept by a [`FrameQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames accepted into the queue
    pub enqueued: u64,
    /// Frames handed to the consumer
    pub dequeued: u64,
    /// Queued frames evicted to make room for a newer one
    pub evicted: u64,
    /// Incoming frames discarded (queue full or closed)
    pub rejected: u64,
    /// Frames released by `clear`
    pub cleared: u64,
    /// Deepest the queue has been
    pub peak_depth: usize,
}

impl QueueStats {
    /// Frames that entered the queue but will never reach the consumer
    pub fn lost(&self) -> u64 {
        self.evicted + self.rejected + self.cleared
    }
}

struct Inner {
    frames: VecDeque<Frame>,
    closed: bool,
    stats: QueueStats,
}

/// Bounded FIFO of pending frames
///
/// Depth never exceeds the capacity; what happens to a frame arriving at a
/// full queue is decided by the [`OverflowPolicy`]. Frames leave the queue by
/// being dequeued, evicted, rejected or cleared; in every case ownership
/// leaves with them.
pub struct FrameQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
                stats: QueueStats::default(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Add a frame, returning the depth after the operation
    pub fn enqueue(&self, frame: Frame) -> usize {
        let mut inner = self.inner.lock();

        if inner.frames.len() >= self.capacity && !inner.closed {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    // Evicted frame is released as soon as it goes out of scope
                    inner.frames.pop_front();
                    inner.stats.evicted += 1;
                }
                OverflowPolicy::DropNewest => {
                    inner.stats.rejected += 1;
                    return inner.frames.len();
                }
                OverflowPolicy::Block => {
                    while inner.frames.len() >= self.capacity && !inner.closed {
                        self.not_full.wait(&mut inner);
                    }
                }
            }
        }

        if inner.closed {
            inner.stats.rejected += 1;
            return inner.frames.len();
        }

        inner.frames.push_back(frame);
        inner.stats.enqueued += 1;
        let depth = inner.frames.len();
        if depth > inner.stats.peak_depth {
            inner.stats.peak_depth = depth;
        }
        drop(inner);

        self.not_empty.notify_one();
        depth
    }

    /// Remove the oldest frame, waiting at most `timeout` for one to arrive
    ///
    /// Returns `None` on timeout or once the queue is closed.
    pub fn dequeue(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return None;
            }
            if let Some(frame) = inner.frames.pop_front() {
                inner.stats.dequeued += 1;
                drop(inner);
                self.not_full.notify_one();
                return Some(frame);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                // One last look in case a frame raced the timeout
                if inner.closed {
                    return None;
                }
                let frame = inner.frames.pop_front();
                if frame.is_some() {
                    inner.stats.dequeued += 1;
                    drop(inner);
                    self.not_full.notify_one();
                }
                return frame;
            }
        }
    }

    /// Current backlog
    pub fn depth(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Wake every waiter; dequeue returns `None` and new frames are rejected
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Accept frames again after `close`
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Release every pending frame, returning how many there were
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let released = inner.frames.len();
        inner.frames.clear();
        inner.stats.cleared += released as u64;
        drop(inner);

        self.not_full.notify_all();
        released
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::{PixelFormat, Resolution};
    use std::sync::Arc;
    use std::thread;

    fn frame(sequence: u32) -> Frame {
        Frame::from_vec(
            vec![0u8; 24],
            Resolution::new(4, 4),
            PixelFormat::Yuv420,
            4,
            sequence,
        )
    }

    fn drain(queue: &FrameQueue) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(f) = queue.dequeue(Duration::ZERO) {
            out.push(f.sequence);
        }
        out
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let queue = FrameQueue::new(3, OverflowPolicy::DropOldest);
        let depths: Vec<usize> = (1..=5).map(|i| queue.enqueue(frame(i))).collect();

        assert_eq!(depths, vec![1, 2, 3, 3, 3]);
        assert_eq!(drain(&queue), vec![3, 4, 5]);

        let stats = queue.stats();
        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.peak_depth, 3);
        assert_eq!(stats.dequeued, 3);
    }

    #[test]
    fn test_drop_newest_keeps_earliest() {
        let queue = FrameQueue::new(3, OverflowPolicy::DropNewest);
        for i in 1..=5 {
            assert!(queue.enqueue(frame(i)) <= 3);
        }
        assert_eq!(drain(&queue), vec![1, 2, 3]);
        assert_eq!(queue.stats().rejected, 2);
    }

    #[test]
    fn test_depth_never_exceeds_capacity() {
        let queue = FrameQueue::new(7, OverflowPolicy::DropOldest);
        for i in 0..1000 {
            assert!(queue.enqueue(frame(i)) <= 7);
        }
        assert_eq!(queue.depth(), 7);
        assert_eq!(queue.stats().enqueued, 1000);
        assert_eq!(queue.stats().lost(), 993);
    }

    #[test]
    fn test_dequeue_times_out_when_empty() {
        let queue = FrameQueue::new(2, OverflowPolicy::DropOldest);
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_close_wakes_consumer() {
        let queue = Arc::new(FrameQueue::new(2, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        queue.close();
        assert!(consumer.join().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(5));

        // Closed queue rejects, reopened queue accepts
        assert_eq!(queue.enqueue(frame(1)), 0);
        assert_eq!(queue.stats().rejected, 1);
        queue.reopen();
        assert_eq!(queue.enqueue(frame(2)), 1);
    }

    #[test]
    fn test_block_waits_for_room() {
        let queue = Arc::new(FrameQueue::new(1, OverflowPolicy::Block));
        queue.enqueue(frame(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(frame(2)))
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.dequeue(Duration::ZERO).map(|f| f.sequence), Some(1));

        assert_eq!(producer.join().unwrap(), 1);
        assert_eq!(drain(&queue), vec![2]);
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let queue = Arc::new(FrameQueue::new(1, OverflowPolicy::Block));
        queue.enqueue(frame(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(frame(2)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(producer.join().unwrap(), 1);
        assert_eq!(queue.stats().rejected, 1);
    }

    #[test]
    fn test_clear_releases_everything() {
        let queue = FrameQueue::new(10, OverflowPolicy::DropOldest);
        for i in 0..4 {
            queue.enqueue(frame(i));
        }
        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().cleared, 4);
    }
}
