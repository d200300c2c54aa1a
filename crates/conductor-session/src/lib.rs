//! Durable run state: the append-only conversation log, JSONL journals and
//! JSON snapshot stores.

/// Conversation turn log with an optional compaction hook.
pub mod conversation;
/// Append-only JSONL journals.
pub mod journal;
/// Keyed JSON snapshot storage.
pub mod store;

pub use conversation::{CompactionPolicy, Compactor, Conversation};
pub use journal::{Journal, JournalHandle};
pub use store::{FileSnapshotStore, SnapshotStore};
