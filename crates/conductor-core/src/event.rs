use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable record of a state transition inside an agent run.
///
/// `event_type` is dot-namespaced (`node.created`, `worker.spawned`,
/// `tool.called`, ...). Within one event bus timestamps are strictly
/// increasing, so `(event_type, timestamp)` identifies an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-namespaced event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The agent run that produced the event.
    pub agent_id: Uuid,
    /// Structured event data.
    pub payload: serde_json::Value,
    /// UTC time the event was published.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Returns the namespace part of the type (`node` for `node.created`).
    pub fn namespace(&self) -> &str {
        self.event_type
            .split_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or(&self.event_type)
    }

    /// Key consumers use to merge a replayed history with a live stream.
    pub fn dedup_key(&self) -> (String, DateTime<Utc>) {
        (self.event_type.clone(), self.timestamp)
    }
}
