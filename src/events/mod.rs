//! Event bus for pipeline notifications
//!
//! Segment rotation, playlist writes, dropped frames and lifecycle changes
//! are published here for anything that wants to watch the pipeline.

pub mod types;

pub use types::PipelineEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for [`PipelineEvent`]s
///
/// Publishing never blocks and works from plain threads; the capture and
/// encode threads publish without a runtime.
///
/// ```no_run
/// use watchdog_stream::events::{EventBus, PipelineEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
/// bus.publish(PipelineEvent::state_changed("encoder", "running"));
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    ///
    /// A subscriber that falls more than the channel capacity behind gets a
    /// `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::state_changed("encoder", "running"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, PipelineEvent::state_changed("encoder", "running"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(PipelineEvent::FramesDropped { missed: 2, total: 2 });

        assert!(matches!(rx1.recv().await.unwrap(), PipelineEvent::FramesDropped { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), PipelineEvent::FramesDropped { .. }));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(PipelineEvent::state_changed("pipeline", "stopped"));
    }

    #[test]
    fn test_publish_from_plain_thread() {
        let bus = std::sync::Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let publisher = {
            let bus = bus.clone();
            std::thread::spawn(move || bus.publish(PipelineEvent::state_changed("source", "running")))
        };
        publisher.join().unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
