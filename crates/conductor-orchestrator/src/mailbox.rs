use chrono::{DateTime, Utc};
use conductor_session::JournalHandle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Mailbox address of the coordinator; the default recipient.
pub const COORDINATOR: &str = "coordinator";
/// Sender name used for messages typed by the human.
pub const HUMAN: &str = "human";

/// A directed message between entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender name.
    pub from: String,
    /// Recipient name.
    pub to: String,
    /// Message text.
    pub body: String,
    /// Time sent.
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Mailboxes {
    queues: HashMap<String, VecDeque<Envelope>>,
    watchers: HashMap<String, Arc<Notify>>,
}

/// Per-entity FIFO mailboxes.
///
/// Sending never blocks. Draining is the only read and removes everything
/// queued for the entity at that instant, in send order.
#[derive(Default)]
pub struct MessageBus {
    inner: Mutex<Mailboxes>,
    journal: Option<JournalHandle<Envelope>>,
}

impl MessageBus {
    /// An in-memory bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that also appends every envelope to `journal`.
    pub fn with_journal(journal: JournalHandle<Envelope>) -> Self {
        Self {
            inner: Mutex::new(Mailboxes::default()),
            journal: Some(journal),
        }
    }

    /// Signals `notify` whenever a message is delivered to `entity`.
    pub fn watch(&self, entity: &str, notify: Arc<Notify>) {
        let mut inner = self.inner.lock();
        inner.queues.entry(entity.to_string()).or_default();
        inner.watchers.insert(entity.to_string(), notify);
    }

    /// Queues `body` for `to` (the coordinator when `None`).
    pub fn send(&self, from: &str, to: Option<&str>, body: impl Into<String>) -> Envelope {
        let envelope = Envelope {
            from: from.to_string(),
            to: to.unwrap_or(COORDINATOR).to_string(),
            body: body.into(),
            timestamp: Utc::now(),
        };

        let watcher = {
            let mut inner = self.inner.lock();
            inner
                .queues
                .entry(envelope.to.clone())
                .or_default()
                .push_back(envelope.clone());
            inner.watchers.get(&envelope.to).cloned()
        };

        if let Some(journal) = &self.journal {
            journal.append(envelope.clone());
        }
        // notify_one stores a permit, so a waiter that arrives late still wakes.
        if let Some(notify) = watcher {
            notify.notify_one();
        }
        debug!(from = %envelope.from, to = %envelope.to, "Message queued");
        envelope
    }

    /// Removes and returns everything queued for `entity`.
    pub fn drain(&self, entity: &str) -> Vec<Envelope> {
        self.inner
            .lock()
            .queues
            .get_mut(entity)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// True if anything is queued for `entity`.
    pub fn has_messages(&self, entity: &str) -> bool {
        self.pending_count(entity) > 0
    }

    /// True if `entity` has a queued message from `sender`.
    pub fn has_messages_from(&self, entity: &str, sender: &str) -> bool {
        self.inner
            .lock()
            .queues
            .get(entity)
            .is_some_and(|queue| queue.iter().any(|e| e.from == sender))
    }

    /// Number of messages queued for `entity`.
    pub fn pending_count(&self, entity: &str) -> usize {
        self.inner.lock().queues.get(entity).map_or(0, VecDeque::len)
    }

    /// Waits until the journal has written every envelope sent so far.
    pub async fn flush(&self) {
        if let Some(journal) = &self.journal {
            journal.flush().await;
        }
    }
}
