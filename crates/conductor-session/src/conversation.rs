use async_trait::async_trait;
use conductor_core::{ConductorResult, Message};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Summarization hook that shrinks a conversation once it grows too large.
#[async_trait]
pub trait Compactor: Send + Sync {
    /// Returns the turns that replace `turns`.
    async fn compact(&self, turns: Vec<Message>) -> ConductorResult<Vec<Message>>;
}

/// Thresholds that trigger compaction; either one is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Turn count threshold.
    pub max_turns: usize,
    /// Estimated token threshold.
    pub max_tokens: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            max_turns: 400,
            max_tokens: 150_000,
        }
    }
}

/// Ordered, append-only log of turns exchanged with an inference backend.
///
/// Without a [`Compactor`] the log grows without bound.
#[derive(Clone, Default)]
pub struct Conversation {
    turns: Vec<Message>,
    compactor: Option<Arc<dyn Compactor>>,
    policy: CompactionPolicy,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("turns", &self.turns.len())
            .field("compactor", &self.compactor.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Conversation {
    /// An empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a conversation from persisted turns.
    pub fn from_turns(turns: Vec<Message>) -> Self {
        Self {
            turns,
            ..Self::default()
        }
    }

    /// Installs a compaction hook.
    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>, policy: CompactionPolicy) -> Self {
        self.compactor = Some(compactor);
        self.policy = policy;
        self
    }

    /// Appends one turn.
    pub fn push(&mut self, message: Message) {
        self.turns.push(message);
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when no turn has been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Rough token estimate (four characters per token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns
            .iter()
            .map(|m| {
                let calls: usize = m
                    .tool_calls
                    .iter()
                    .map(|c| c.name.len() + c.arguments.to_string().len())
                    .sum();
                m.content.len() + calls
            })
            .sum::<usize>()
            / 4
    }

    /// Whether a compactor is installed and a threshold has been crossed.
    pub fn needs_compaction(&self) -> bool {
        self.compactor.is_some()
            && (self.turns.len() > self.policy.max_turns
                || self.estimated_tokens() > self.policy.max_tokens)
    }

    /// Runs the compactor if a threshold has been crossed.
    ///
    /// Returns whether the turns were replaced.
    pub async fn maybe_compact(&mut self) -> ConductorResult<bool> {
        if !self.needs_compaction() {
            return Ok(false);
        }
        let Some(compactor) = self.compactor.clone() else {
            return Ok(false);
        };

        let before = self.turns.len();
        let turns = std::mem::take(&mut self.turns);
        match compactor.compact(turns.clone()).await {
            Ok(compacted) => {
                self.turns = compacted;
                info!(before, after = self.turns.len(), "Conversation compacted");
                Ok(true)
            }
            Err(e) => {
                self.turns = turns;
                Err(e)
            }
        }
    }
}
