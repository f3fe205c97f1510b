// SPDX-License-Identifier: GPL-3.0-or-later
use curarr_domain::DomainEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Publish-only bus to realtime subscribers. The engine never depends on
/// anyone listening; publishing into the void is a no-op.
pub trait RealtimeHub: Send + Sync {
    fn publish(&self, event: DomainEvent);

    /// Generic escape hatch for events without a typed constructor.
    fn broadcast(&self, event_type: &str, data: serde_json::Value) {
        self.publish(DomainEvent::new(event_type, data));
    }
}

pub struct NoopHub;

impl RealtimeHub for NoopHub {
    fn publish(&self, event: DomainEvent) {
        trace!(target: "realtime", event_type = %event.event_type, "noop publish");
    }
}

/// Fan-out hub over a tokio broadcast channel. The WebSocket layer holds a
/// receiver per connection and forwards serialized frames verbatim.
pub struct BroadcastHub {
    tx: broadcast::Sender<String>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl RealtimeHub for BroadcastHub {
    fn publish(&self, event: DomainEvent) {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(target: "realtime", error = %err, "dropping unserializable event");
                return;
            }
        };
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.tx.send(frame);
    }
}

/// Captures events for assertions in tests.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    inner: Arc<Mutex<Vec<DomainEvent>>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("hub lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve and clear all captured events.
    pub fn drain(&self) -> Vec<DomainEvent> {
        let mut guard = self.inner.lock().expect("hub lock");
        std::mem::take(&mut *guard)
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.inner
            .lock()
            .expect("hub lock")
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl RealtimeHub for InMemoryHub {
    fn publish(&self, event: DomainEvent) {
        self.inner.lock().expect("hub lock").push(event);
    }
}
