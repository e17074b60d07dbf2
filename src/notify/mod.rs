//! Notification Emitter.
//!
//! Emits `{event_type, artifact_snapshot, actor, timestamp}` on every
//! lifecycle transition. Best-effort: a failed emission is logged (via
//! `tracing`, same as the rest of the crate) and never fails the
//! request that triggered it. Backed by an unbounded `tokio::mpsc`
//! channel so publishing never blocks the caller; a single channel
//! gives FIFO ordering overall, which subsumes per-artifact FIFO.
//! Stands in for the external bus the same way
//! `storage::memory` stands in for a network database: the interface is
//! real, the sink is in-process.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

use crate::store::ArtifactRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Activated,
    Deactivated,
    Published,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub artifact_id: Uuid,
    pub artifact_snapshot: JsonValue,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

/// A best-effort publisher. Cloning shares the same underlying channel,
/// so every handle's sends interleave into one FIFO stream.
#[derive(Clone)]
pub struct NotificationEmitter {
    sender: UnboundedSender<Event>,
}

impl NotificationEmitter {
    /// Builds a connected emitter/sink pair. The sink is a plain
    /// receiver here; a real deployment would forward it onto the
    /// external bus a real deployment would forward onto.
    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event_type: EventType, record: &ArtifactRecord, actor: &str, timestamp: DateTime<Utc>) {
        let event = Event {
            event_type,
            artifact_id: record.id,
            artifact_snapshot: snapshot_json(record),
            actor: actor.to_string(),
            timestamp,
        };
        if self.sender.send(event).is_err() {
            tracing::warn!(artifact_id = %record.id, ?event_type, "notification sink is gone, dropping event");
        }
    }
}

fn snapshot_json(record: &ArtifactRecord) -> JsonValue {
    serde_json::json!({
        "id": record.id,
        "type_name": record.type_name,
        "name": record.name,
        "version": record.version,
        "owner": record.owner,
        "visibility": record.visibility.as_str(),
        "status": record.status.as_str(),
        "updated_at": record.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Status, Visibility};
    use std::collections::{BTreeMap, BTreeSet};

    fn record() -> ArtifactRecord {
        let now = Utc::now();
        ArtifactRecord {
            id: Uuid::new_v4(),
            type_name: "sample_artifact".to_string(),
            name: Some("n".to_string()),
            version: Some("1.0".to_string()),
            owner: "tenant-a".to_string(),
            visibility: Visibility::Private,
            status: Status::Queued,
            created_at: now,
            updated_at: now,
            activated_at: None,
            description: None,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            icon: None,
            properties: BTreeMap::new(),
            version_token: 1,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_fifo_order() {
        let (emitter, mut sink) = NotificationEmitter::channel();
        let record = record();
        emitter.emit(EventType::Created, &record, "tenant-a", Utc::now());
        emitter.emit(EventType::Activated, &record, "tenant-a", Utc::now());

        let first = sink.recv().await.unwrap();
        let second = sink.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::Created);
        assert_eq!(second.event_type, EventType::Activated);
    }
}
