//! Lifecycle events emitted by the store.
//!
//! The store only produces these; persisting or forwarding them belongs to
//! whatever [`AuditSink`] the caller injects.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEvent {
    pub id: EventId,
    pub metadata_collection_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl StoreEvent {
    pub fn new(metadata_collection_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            metadata_collection_id: metadata_collection_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    /// The store was bootstrapped for the first time.
    StoreCreated { created: DateTime<Utc> },
    /// An existing store was opened by its owning collection.
    StoreOpened {
        created: Option<DateTime<Utc>>,
        last_opened: Option<DateTime<Utc>>,
    },
    /// The store belongs to a different metadata collection.
    IdentityMismatch {
        stored_collection_id: String,
        requested_collection_id: String,
    },
}

/// Receives lifecycle events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: StoreEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: StoreEvent) {
        match &event.payload {
            EventPayload::IdentityMismatch {
                stored_collection_id,
                requested_collection_id,
            } => tracing::error!(
                event_id = %event.id.0,
                stored = %stored_collection_id,
                requested = %requested_collection_id,
                "Metadata collection identity mismatch"
            ),
            payload => tracing::info!(
                event_id = %event.id.0,
                collection = %event.metadata_collection_id,
                ?payload,
                "Store lifecycle event"
            ),
        }
    }
}

/// Keeps events in memory; useful for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<StoreEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }
}
