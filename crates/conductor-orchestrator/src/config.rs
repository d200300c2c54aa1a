use conductor_agent::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether a run works toward an end or keeps going.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Work until the goal is achieved, then finish.
    #[default]
    Finite,
    /// An ongoing mission that never concludes on its own.
    Infinite,
}

impl AgentMode {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Finite => "finite",
            AgentMode::Infinite => "infinite",
        }
    }
}

/// Limits and timing for one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on coordinator planning turns.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Backstop poll interval while waiting for activity.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Plan/act iterations a harnessed worker gets per node.
    #[serde(default = "default_worker_max_iterations")]
    pub worker_max_iterations: u32,
    /// Maximum number of simultaneously busy workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Run mode.
    #[serde(default)]
    pub mode: AgentMode,
    /// Retry policy for inference calls.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_turns() -> u32 {
    200
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_worker_max_iterations() -> u32 {
    20
}

fn default_max_workers() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            poll_interval_ms: default_poll_interval_ms(),
            worker_max_iterations: default_worker_max_iterations(),
            max_workers: default_max_workers(),
            mode: AgentMode::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
