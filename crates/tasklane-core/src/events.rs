//! Engine event types, envelope, and broadcast bus.
//!
//! Every step of the optimistic protocol (apply, commit, rollback, batch
//! flush) is announced on a single broadcast channel. Hosts use it for
//! telemetry and devtools; tests use it to wait for background flushes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::EntityKind;
use crate::uuid_utils::{extract_timestamp, new_v7};

// ============================================================================
// Event Envelope
// ============================================================================

/// Envelope wrapping an [`EngineEvent`] with an id and a timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Dot-namespaced event type (e.g., `"mutation.committed"`).
    pub event_type: &'static str,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Domain-specific event data.
    pub payload: EngineEvent,
}

impl EventEnvelope {
    /// The timestamp is the one embedded in the v7 id, so ordering by id and
    /// by time always agree.
    pub fn new(event: EngineEvent) -> Self {
        let event_id = new_v7();
        Self {
            event_id,
            event_type: event.event_type(),
            occurred_at: extract_timestamp(&event_id).unwrap_or_else(Utc::now),
            payload: event,
        }
    }
}

// ============================================================================
// Engine Event (domain payloads)
// ============================================================================

/// One step of the optimistic mutation protocol.
///
/// Serialized as JSON with a `type` tag field, e.g.
/// `{"type":"Committed","mutation_id":"...","cache_key":"tasks","duration_ms":12}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// An optimistic patch was written to the cache.
    Applied {
        mutation_id: Uuid,
        cache_key: String,
        entity_kind: EntityKind,
        op: &'static str,
    },
    /// The remote call succeeded and the cache was reconciled.
    Committed {
        mutation_id: Uuid,
        cache_key: String,
        entity_kind: EntityKind,
        duration_ms: u64,
    },
    /// The remote call failed and the mutation's delta was removed.
    RolledBack {
        mutation_id: Uuid,
        cache_key: String,
        entity_kind: EntityKind,
        error: String,
    },
    /// A collection was replaced by an authoritative fetch.
    Replaced {
        cache_key: String,
        entity_kind: EntityKind,
        count: usize,
    },
    /// A coalescing buffer received a new payload and its timer restarted.
    BatchScheduled {
        buffer_key: String,
        entry_count: usize,
    },
    /// A buffered batch was written (or found to need no write).
    BatchFlushed {
        buffer_key: String,
        entry_count: usize,
    },
    /// A buffered batch write failed and was rolled back.
    BatchFailed { buffer_key: String, error: String },
    /// A buffered batch was discarded before its timer fired.
    BatchCancelled { buffer_key: String },
}

impl EngineEvent {
    /// Returns the namespaced event type (e.g., `"mutation.applied"`).
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::Applied { .. } => "mutation.applied",
            EngineEvent::Committed { .. } => "mutation.committed",
            EngineEvent::RolledBack { .. } => "mutation.rolled_back",
            EngineEvent::Replaced { .. } => "cache.replaced",
            EngineEvent::BatchScheduled { .. } => "batch.scheduled",
            EngineEvent::BatchFlushed { .. } => "batch.flushed",
            EngineEvent::BatchFailed { .. } => "batch.failed",
            EngineEvent::BatchCancelled { .. } => "batch.cancelled",
        }
    }

    /// Returns the mutation this event relates to, if any.
    pub fn mutation_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::Applied { mutation_id, .. }
            | EngineEvent::Committed { mutation_id, .. }
            | EngineEvent::RolledBack { mutation_id, .. } => Some(*mutation_id),
            _ => None,
        }
    }

    /// Returns the buffer key for batch events.
    pub fn buffer_key(&self) -> Option<&str> {
        match self {
            EngineEvent::BatchScheduled { buffer_key, .. }
            | EngineEvent::BatchFlushed { buffer_key, .. }
            | EngineEvent::BatchFailed { buffer_key, .. }
            | EngineEvent::BatchCancelled { buffer_key } => Some(buffer_key),
            _ => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based bus distributing engine events to any number of consumers.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events;
/// emission never blocks the engine.
#[derive(Clone)]
pub struct EngineEventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EngineEventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped when nobody listens.
    pub fn emit(&self, event: EngineEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(
            event_type = envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EngineEventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EngineEventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EngineEventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::BatchScheduled {
            buffer_key: "reorder:tasks".to_string(),
            entry_count: 3,
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "batch.scheduled");
        assert_eq!(envelope.payload.buffer_key(), Some("reorder:tasks"));
        assert!(envelope.payload.mutation_id().is_none());
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EngineEventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let id = Uuid::nil();

        bus.emit(EngineEvent::Committed {
            mutation_id: id,
            cache_key: "tasks".to_string(),
            entity_kind: EntityKind::Task,
            duration_ms: 4,
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.payload, e2.payload);
        assert_eq!(e1.payload.mutation_id(), Some(id));
    }

    #[test]
    fn test_envelope_time_matches_event_id() {
        let envelope = EventEnvelope::new(EngineEvent::BatchCancelled {
            buffer_key: "reorder:lists".to_string(),
        });
        assert_eq!(envelope.event_type, "batch.cancelled");
        assert_eq!(
            Some(envelope.occurred_at),
            extract_timestamp(&envelope.event_id)
        );
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EngineEventBus::new(4);
        bus.emit(EngineEvent::BatchCancelled {
            buffer_key: "k".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::RolledBack {
            mutation_id: Uuid::nil(),
            cache_key: "tags".to_string(),
            entity_kind: EntityKind::Tag,
            error: "offline".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RolledBack");
        assert_eq!(json["entity_kind"], "tag");
    }
}
