//! Mesh event bus
//!
//! Catalog, registry and breaker changes are published on a broadcast channel.
//! Subscribers either consume the raw receiver or register a handler for a
//! closed set of event kinds.

use crate::resilience::CircuitState;
use crate::service::ServiceStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Observable mesh event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum MeshEvent {
    /// Agent registered with the registry
    Registered { agent_id: String, agent_type: String },
    /// Agent removed from the registry
    Unregistered { agent_id: String, reason: UnregisterReason },
    /// Registry agent status changed
    StatusChanged {
        agent_id: String,
        previous: ServiceStatus,
        current: ServiceStatus,
    },
    ServicesAdded { service_ids: Vec<String> },
    ServicesRemoved { service_ids: Vec<String> },
    ServicesUpdated { service_ids: Vec<String> },
    /// A discovery refresh failed; the catalog was left untouched
    DiscoveryError { backend: String, message: String },
    CircuitStateChanged {
        service_id: String,
        previous: CircuitState,
        current: CircuitState,
    },
}

/// Why an agent left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnregisterReason {
    Requested,
    HeartbeatTimeout,
}

/// Discriminant of [`MeshEvent`] used for handler filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Registered,
    Unregistered,
    StatusChanged,
    ServicesAdded,
    ServicesRemoved,
    ServicesUpdated,
    DiscoveryError,
    CircuitStateChanged,
}

impl MeshEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MeshEvent::Registered { .. } => EventKind::Registered,
            MeshEvent::Unregistered { .. } => EventKind::Unregistered,
            MeshEvent::StatusChanged { .. } => EventKind::StatusChanged,
            MeshEvent::ServicesAdded { .. } => EventKind::ServicesAdded,
            MeshEvent::ServicesRemoved { .. } => EventKind::ServicesRemoved,
            MeshEvent::ServicesUpdated { .. } => EventKind::ServicesUpdated,
            MeshEvent::DiscoveryError { .. } => EventKind::DiscoveryError,
            MeshEvent::CircuitStateChanged { .. } => EventKind::CircuitStateChanged,
        }
    }
}

/// Broadcast publish/subscribe bus shared by the mesh components
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MeshEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: MeshEvent) {
        debug!(kind = ?event.kind(), "Publishing mesh event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Spawn a task invoking `handler` for every event whose kind is in `kinds`.
    ///
    /// The task ends when the bus is dropped or the returned handle is aborted.
    /// Lagging handlers skip the missed events and keep going.
    pub fn spawn_handler<F>(&self, kinds: &[EventKind], mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(MeshEvent) + Send + 'static,
    {
        let kinds: HashSet<EventKind> = kinds.iter().copied().collect();
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if kinds.contains(&event.kind()) {
                            handler(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event handler lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();

        bus.publish(MeshEvent::ServicesAdded {
            service_ids: vec!["svc-1".to_string()],
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::ServicesAdded);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(MeshEvent::DiscoveryError {
            backend: "consul".to_string(),
            message: "down".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_filters_by_kind() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = bus.spawn_handler(&[EventKind::Unregistered], move |event| {
            sink.lock().unwrap().push(event);
        });

        bus.publish(MeshEvent::Registered {
            agent_id: "a".to_string(),
            agent_type: "t".to_string(),
        });
        bus.publish(MeshEvent::Unregistered {
            agent_id: "a".to_string(),
            reason: UnregisterReason::Requested,
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), EventKind::Unregistered);
    }

    #[test]
    fn test_event_serialization_uses_camel_case_tag() {
        let event = MeshEvent::StatusChanged {
            agent_id: "a".to_string(),
            previous: ServiceStatus::Healthy,
            current: ServiceStatus::Degraded,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "statusChanged");
        assert_eq!(json["current"], "degraded");
    }
}
