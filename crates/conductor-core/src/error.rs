use uuid::Uuid;

/// Top-level error type for the Conductor engine.
///
/// String variants correspond to a subsystem; the structured variants are the
/// board's validation errors, which callers match on.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// An error originating from an agent or worker execution loop.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from an outbound HTTP request (e.g. LLM API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error related to persisted run state.
    #[error("Session error: {0}")]
    Session(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by a skill during invocation.
    #[error("Skill error: {0}")]
    Skill(String),

    /// An error from an external autonomous executor process.
    #[error("Executor error: {0}")]
    Executor(String),

    /// An error from the orchestration engine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// Adding the dependency would close a cycle in the task graph.
    #[error("Dependency cycle: node {node} cannot depend on {dependency}")]
    Cycle {
        /// The node receiving the dependency.
        node: Uuid,
        /// The dependency that would close the cycle.
        dependency: Uuid,
    },

    /// A node status change that the lifecycle does not allow.
    #[error("Invalid transition for node {node}: {from} -> {to}")]
    InvalidTransition {
        /// The node being transitioned.
        node: Uuid,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The referenced node does not exist on the board.
    #[error("Unknown node: {0}")]
    UnknownNode(Uuid),

    /// The referenced worker does not exist in the pool.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// The caller is not the worker assigned to the node.
    #[error("Worker {worker} is not assigned to node {node}")]
    NotAssignee {
        /// The node being reported on.
        node: Uuid,
        /// The worker that attempted the report.
        worker: Uuid,
    },

    /// The operation was cancelled by a stop request.
    #[error("Cancelled")]
    Cancelled,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;
