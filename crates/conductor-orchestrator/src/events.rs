use chrono::{DateTime, Duration, Utc};
use conductor_core::Event;
use conductor_session::JournalHandle;
use futures_util::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

const BROADCAST_CAPACITY: usize = 1024;

/// Live stream of events from one bus.
pub type EventStream = BoxStream<'static, Event>;

struct History {
    events: Vec<Event>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Append-only event log with live fan-out.
///
/// Every published event is stored in memory, mirrored to the JSONL journal
/// when one is attached, and broadcast to current subscribers. Timestamps are
/// strictly increasing per bus, so `(type, timestamp)` is a stable dedup key.
pub struct EventBus {
    agent_id: Uuid,
    history: Mutex<History>,
    sender: broadcast::Sender<Event>,
    journal: Option<JournalHandle<Event>>,
}

impl EventBus {
    /// An in-memory bus.
    pub fn new(agent_id: Uuid) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            agent_id,
            history: Mutex::new(History {
                events: Vec::new(),
                last_timestamp: None,
            }),
            sender,
            journal: None,
        }
    }

    /// A bus that also appends every event to `journal`.
    pub fn with_journal(agent_id: Uuid, journal: JournalHandle<Event>) -> Self {
        let mut bus = Self::new(agent_id);
        bus.journal = Some(journal);
        bus
    }

    /// Run this bus belongs to.
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// Records and broadcasts a new event.
    pub fn publish(&self, event_type: &str, payload: serde_json::Value) -> Event {
        let mut history = self.history.lock();

        let mut timestamp = Utc::now();
        if let Some(last) = history.last_timestamp {
            if timestamp <= last {
                timestamp = last + Duration::microseconds(1);
            }
        }
        history.last_timestamp = Some(timestamp);

        let event = Event {
            event_type: event_type.to_string(),
            agent_id: self.agent_id,
            payload,
            timestamp,
        };
        history.events.push(event.clone());

        if let Some(journal) = &self.journal {
            journal.append(event.clone());
        }
        // No receivers is fine.
        let _ = self.sender.send(event.clone());
        debug!(agent_id = %self.agent_id, event_type, "Event published");
        event
    }

    /// Live events published after this call.
    pub fn subscribe(&self) -> EventStream {
        let receiver = self.sender.subscribe();
        Self::into_stream(self.agent_id, receiver)
    }

    /// The most recent `limit` events plus a live stream that continues
    /// exactly where the history ends.
    pub fn subscribe_with_history(&self, limit: Option<usize>) -> (Vec<Event>, EventStream) {
        let history = self.history.lock();
        let receiver = self.sender.subscribe();
        let past = tail(&history.events, limit);
        drop(history);
        (past, Self::into_stream(self.agent_id, receiver))
    }

    /// Stored events, oldest first; with `limit`, only the most recent ones.
    pub fn history(&self, limit: Option<usize>) -> Vec<Event> {
        tail(&self.history.lock().events, limit)
    }

    /// Loads previously persisted events without broadcasting or journaling
    /// them again.
    pub fn replay(&self, events: Vec<Event>) {
        let mut history = self.history.lock();
        for event in events {
            if history.last_timestamp.map_or(true, |last| event.timestamp > last) {
                history.last_timestamp = Some(event.timestamp);
            }
            history.events.push(event);
        }
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.history.lock().events.len()
    }

    /// True when nothing has been published or replayed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until the journal has written everything published so far.
    pub async fn flush(&self) {
        if let Some(journal) = &self.journal {
            journal.flush().await;
        }
    }

    fn into_stream(agent_id: Uuid, receiver: broadcast::Receiver<Event>) -> EventStream {
        BroadcastStream::new(receiver)
            .filter_map(move |item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(%agent_id, error = %e, "Event subscriber lagged");
                        None
                    }
                }
            })
            .boxed()
    }
}

fn tail(events: &[Event], limit: Option<usize>) -> Vec<Event> {
    let start = limit.map_or(0, |n| events.len().saturating_sub(n));
    events[start..].to_vec()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamps_strictly_increase() {
        let bus = EventBus::new(Uuid::new_v4());
        for i in 0..200 {
            bus.publish("node.created", json!({"i": i}));
        }
        let events = bus.history(None);
        assert_eq!(events.len(), 200);
        assert!(events.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_history_limit() {
        let bus = EventBus::new(Uuid::new_v4());
        bus.publish("a.one", json!({}));
        bus.publish("a.two", json!({}));
        bus.publish("a.three", json!({}));

        let last_two = bus.history(Some(2));
        assert_eq!(last_two[0].event_type, "a.two");
        assert_eq!(last_two[1].event_type, "a.three");
        assert_eq!(bus.history(Some(10)).len(), 3);
    }

    #[tokio::test]
    async fn test_subscribers_see_live_events() {
        let bus = EventBus::new(Uuid::new_v4());
        bus.publish("before", json!({}));
        let mut stream = bus.subscribe();
        bus.publish("after", json!({"x": 1}));

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, "after");
        assert_eq!(event.payload["x"], 1);
    }

    #[tokio::test]
    async fn test_subscribe_with_history_has_no_gap() {
        let bus = EventBus::new(Uuid::new_v4());
        bus.publish("one", json!({}));
        let (past, mut live) = bus.subscribe_with_history(None);
        bus.publish("two", json!({}));

        assert_eq!(past.len(), 1);
        assert_eq!(live.next().await.unwrap().event_type, "two");
    }

    #[test]
    fn test_replay_keeps_order_monotonic() {
        let source = EventBus::new(Uuid::new_v4());
        source.publish("x.a", json!({}));
        let last = source.publish("x.b", json!({}));

        let restored = EventBus::new(source.agent_id());
        restored.replay(source.history(None));
        let next = restored.publish("x.c", json!({}));
        assert_eq!(restored.len(), 3);
        assert!(next.timestamp > last.timestamp);
    }
}
