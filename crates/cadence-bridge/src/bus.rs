use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::protocol::TelemetryEvent;

/// The single seam between producers and the transport. An implementation
/// may be this in-process broker, a Redis pub/sub, or a message bus.
pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, event: &TelemetryEvent);
}

/// Channel-keyed broadcast bus built on flume.
///
/// Each [`subscribe`](InMemoryBus::subscribe) creates a receiver for one
/// channel; publishes to a channel only reach that channel's subscribers.
/// Publishes to channels with no subscribers are dropped silently.
/// Cheap to clone (wraps its table in an `Arc`).
#[derive(Clone)]
pub struct InMemoryBus {
    channels: Arc<Mutex<HashMap<String, Vec<flume::Sender<TelemetryEvent>>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a subscriber on a channel and return its receiving end.
    pub fn subscribe(&self, channel: &str) -> flume::Receiver<TelemetryEvent> {
        let (tx, rx) = flume::unbounded();
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels.entry(channel.to_string()).or_default().push(tx);
        rx
    }

    /// Active subscriber count for a channel (disconnected receivers are
    /// pruned lazily on publish).
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().expect("bus lock poisoned");
        channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for InMemoryBus {
    fn publish(&self, channel: &str, event: &TelemetryEvent) {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        if let Some(senders) = channels.get_mut(channel) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                channels.remove(channel);
            }
        }
    }
}

/// Publisher that drops everything (tests, fire-and-forget jobs).
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _channel: &str, _event: &TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProgressStatus;
    use uuid::Uuid;

    fn progress(pct: u8) -> TelemetryEvent {
        TelemetryEvent::SyncProgress {
            source_id: Uuid::nil(),
            project_id: None,
            progress: pct,
            message: format!("{pct}%"),
            status: ProgressStatus::InProgress,
            stats: None,
        }
    }

    #[test]
    fn channels_isolate_tenants() {
        let bus = InMemoryBus::new();
        let rx_x = bus.subscribe("telemetry_tenant-x");
        let rx_y = bus.subscribe("telemetry_tenant-y");

        for pct in [5, 20, 100] {
            bus.publish("telemetry_tenant-x", &progress(pct));
        }

        let received: Vec<TelemetryEvent> = rx_x.drain().collect();
        assert_eq!(received.len(), 3);
        assert_eq!(rx_y.drain().count(), 0, "tenant Y must receive nothing");
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = InMemoryBus::new();
        bus.publish("telemetry_nobody", &progress(50));
        assert_eq!(bus.subscriber_count("telemetry_nobody"), 0);
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let bus = InMemoryBus::new();
        let rx = bus.subscribe("c");
        assert_eq!(bus.subscriber_count("c"), 1);
        drop(rx);
        bus.publish("c", &progress(10));
        assert_eq!(bus.subscriber_count("c"), 0);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let bus = InMemoryBus::new();
        let rx = bus.subscribe("c");
        for pct in [5, 20, 45, 90, 100] {
            bus.publish("c", &progress(pct));
        }
        let percents: Vec<u8> = rx
            .drain()
            .map(|e| match e {
                TelemetryEvent::SyncProgress { progress, .. } => progress,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(percents, vec![5, 20, 45, 90, 100]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }
}
