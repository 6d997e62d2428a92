//! Monitor Events
//!
//! Fire-and-forget notifications for the real-time push transport. The
//! transport itself lives outside this crate; [`BroadcastEventSink`] hands
//! events to it over a `tokio::sync::broadcast` channel.

use brokerwatch_metadata::HotMessage;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::throughput::TopicThroughput;

/// Default buffer of [`BroadcastEventSink`].
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event published to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A record was persisted to hot storage
    NewMessage { topic_id: i64, message: HotMessage },

    /// A topic's counters or last-message timestamp moved
    TopicUpdated { topic_id: i64, last_message_at: i64 },

    /// Periodic throughput snapshot
    Throughput(TopicThroughput),
}

/// Receives monitor events. Publishing never fails and never blocks.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: MonitorEvent);
}

/// Fans events out to every subscribed receiver.
///
/// Slow receivers lag and drop old events rather than slowing publishers.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<MonitorEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: MonitorEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers, dropping event");
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: MonitorEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.receiver_count(), 1);

        sink.publish(MonitorEvent::TopicUpdated {
            topic_id: 3,
            last_message_at: 1_000,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            MonitorEvent::TopicUpdated {
                topic_id: 3,
                last_message_at: 1_000
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let sink = BroadcastEventSink::default();
        sink.publish(MonitorEvent::TopicUpdated {
            topic_id: 1,
            last_message_at: 0,
        });
        NoopEventSink.publish(MonitorEvent::TopicUpdated {
            topic_id: 1,
            last_message_at: 0,
        });
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(MonitorEvent::TopicUpdated {
            topic_id: 5,
            last_message_at: 10,
        })
        .unwrap();
        assert_eq!(json["type"], "topic_updated");
        assert_eq!(json["topic_id"], 5);
    }
}
