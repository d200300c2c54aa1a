use crate::config::AgentMode;
use crate::types::{Node, WorkerInfo};
use chrono::Utc;
use conductor_core::{Message, Role};
use std::fmt::Write;
use std::path::Path;
use uuid::Uuid;

const SECTION_BREAK: &str = "\n\n---\n\n";
/// Longest worker memory inlined into its system prompt, in characters.
pub const MAX_MEMORY_INLINE: usize = 20_000;

const COORDINATOR_IDENTITY: &str = "# You Are The Coordinator

You have been given a goal. Your job is to get it done well, completely and efficiently.

Use create_work_node to define tasks and assign_worker to put a named worker on a node.
Workers execute and publish results; you are woken whenever one finishes or fails.
Use check_board to see progress at any time.";

const COORDINATOR_RULES: &str = "## Operating Rules

You are the COORDINATOR, a responsive manager and not a worker.

### Responsiveness
- Always answer human messages promptly with context-aware replies.
- Never do heavy work yourself. Delegate to workers.
- When the human asks a question, answer it from your existing context.
- When the human gives a new task, create work nodes and assign workers.

### Delegation
- Any task that needs reading files, writing, searching or analysis belongs on a work node.
- Give workers clear, specific tasks. Not 'look into this' but 'produce a 500-word analysis of X'.
- A node only becomes ready once all of its dependencies have completed.
- Use add_dependency to make a node that has not started wait on another one.
- Workers on a node can read the files its dependencies published.
- Failed nodes stay failed. To retry, create a new node.

### Communication
- Keep the human informed. Plain text replies are shown to the human.
- Use send_message to reach a worker while it is running.";

const WORKER_RULES: &str = "## Operating Rules

- Write important findings to files in scratch/. Your conversation may be compacted.
- Read files published by the nodes you depend on with read_upstream.
- Call publish() with a summary of your result when your work is done. This copies scratch/ to published/.
- Be specific in outputs. Quality over speed.
- If stuck after 3 attempts, message the coordinator with send_message.";

/// Truncates to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

fn mode_section(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Finite => {
            "## Mode: Finite Game\n\nWork until the goal is fully achieved, then call finish()."
        }
        AgentMode::Infinite => {
            "## Mode: Infinite Game\n\nThis is an ongoing mission. Work in cycles. Checkpoint between them. Never conclude, keep going."
        }
    }
}

/// System prompt for a coordinator planning turn.
pub fn coordinator_system_prompt(
    goal: &str,
    mode: AgentMode,
    nodes: &[Node],
    workers: &[WorkerInfo],
) -> String {
    let sections = [
        COORDINATOR_IDENTITY.to_string(),
        format!("## Goal\n\n{goal}"),
        format!("Today is {}", Utc::now().format("%Y-%m-%d")),
        mode_section(mode).to_string(),
        format!("## Work Board\n\n{}", board_view(nodes)),
        format!("## Team\n\n{}", roster_view(workers)),
        COORDINATOR_RULES.to_string(),
    ];
    sections.join(SECTION_BREAK)
}

/// One line per node, with result previews. Also the `check_board` output.
pub fn board_view(nodes: &[Node]) -> String {
    if nodes.is_empty() {
        return "(no work nodes yet)".into();
    }
    let mut out = String::new();
    for node in nodes {
        let _ = write!(
            out,
            "  [{}] {} ({}): {} :: {}",
            node.status.icon(),
            node.id,
            node.name,
            truncate_chars(&node.description, 80),
            node.status
        );
        if !node.dependencies.is_empty() {
            let deps: Vec<String> = node.dependencies.iter().map(Uuid::to_string).collect();
            let _ = write!(out, "\n      Depends on: {}", deps.join(", "));
        }
        if let Some(result) = &node.result {
            let _ = write!(out, "\n      Result: {}", truncate_chars(result, 300));
        }
        if let Some(error) = &node.error {
            let _ = write!(out, "\n      Error: {}", truncate_chars(error, 300));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// One line per worker.
pub fn roster_view(workers: &[WorkerInfo]) -> String {
    if workers.is_empty() {
        return "(no workers yet)".into();
    }
    workers
        .iter()
        .map(|w| {
            format!(
                "  - {} ({}, {}) {}",
                w.name,
                w.role,
                w.kind.as_str(),
                w.status.as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The synthetic turn injected when the human stops the run.
pub fn stop_summary(nodes: &[Node], workers: &[WorkerInfo]) -> String {
    let mut parts = vec![
        "[System] The user stopped execution. All workers have been halted.".to_string(),
        "Here is the current state of work. Use it to answer questions or continue.\n".to_string(),
    ];
    if !nodes.is_empty() {
        parts.push("## Work Board".into());
        parts.push(board_view(nodes));
    }
    if !workers.is_empty() {
        parts.push("\n## Team".into());
        parts.push(roster_view(workers));
    }
    parts.push(
        "\nThe user may now give further instructions. Respond helpfully with full context of what was accomplished and what remains."
            .into(),
    );
    parts.join("\n")
}

/// System prompt for a harnessed worker, with its memory of past nodes.
pub fn worker_system_prompt(worker: &WorkerInfo, memory: Option<&str>) -> String {
    let identity = format!(
        "# Worker: {}\n\nYou are {}, working as: {}. You execute one task on a shared work board \
         and report back to the coordinator.",
        worker.name, worker.name, worker.role
    );
    let mut sections = vec![identity];
    if let Some(memory) = memory.filter(|m| !m.trim().is_empty()) {
        sections.push(format!(
            "## Your Memory (From Past Work)\n\n{}",
            truncate_chars(memory, MAX_MEMORY_INLINE)
        ));
    }
    sections.push(WORKER_RULES.to_string());
    sections.join(SECTION_BREAK)
}

/// First user turn of a worker run: the task plus upstream results and
/// where each upstream node's published files live under `nodes_dir`.
pub fn worker_assignment(node: &Node, upstream: &[Node], nodes_dir: &Path) -> String {
    let mut parts = vec![format!("## Your Assignment\n\n{}", node.description)];
    let finished: Vec<&Node> = upstream.iter().filter(|n| n.result.is_some()).collect();
    if !finished.is_empty() {
        let mut section = String::from("## Upstream Results");
        for dep in finished {
            let result = dep.result.as_deref().unwrap_or_default();
            let published = nodes_dir.join(dep.id.to_string()).join("published");
            let _ = write!(
                section,
                "\n\n### {} ({})\n\n{}\n\nPublished files: {} (read_upstream node \"{}\")",
                dep.name,
                dep.id,
                truncate_chars(result, 5000),
                published.display(),
                dep.name
            );
        }
        parts.push(section);
    }
    parts.push(format!(
        "## Workspace\n\n- Node: {}\n- Scratch dir: scratch/ (write your files here)",
        node.id
    ));
    parts.join("\n\n")
}

/// System prompt for an external executor run.
pub fn external_system_prompt(worker: &WorkerInfo) -> String {
    [
        format!("# Worker: {}", worker.name),
        "You are a worker executing a specific task. Work in the current directory.".to_string(),
        "Write your output files here. When done, create a _result.md summarizing your work."
            .to_string(),
    ]
    .join("\n\n")
}

/// Durable failure artifact: error details plus the worker transcript.
pub fn failure_notes(worker: &str, node: &Node, error: &str, transcript: &[Message]) -> String {
    let mut notes = format!(
        "# Failure Report: {worker}\n\n**Node**: {}\n**Task**: {}\n**Error**: {error}\n\n## Conversation ({} messages)\n",
        node.id,
        node.description,
        transcript.len()
    );
    for message in transcript {
        let role = role_name(message.role);
        if !message.content.is_empty() {
            let _ = write!(
                notes,
                "\n**[{role}]** {}\n",
                truncate_chars(&message.content, 500)
            );
        }
        for call in &message.tool_calls {
            let args = call.arguments.to_string();
            let _ = write!(
                notes,
                "\n**[{role}:tool_call]** {}({})\n",
                call.name,
                truncate_chars(&args, 200)
            );
        }
    }
    notes
}

/// The single mailbox notification a failing worker sends.
pub fn worker_failed_message(worker: &str, node: &Node, error: &str, notes: &str) -> String {
    format!(
        "[WORKER FAILED] {worker} failed on node [{}].\nTask: {}\nError: {error}\nWorker notes:\n{}",
        node.id,
        truncate_chars(&node.description, 200),
        truncate_chars(notes, 1500)
    )
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{NodeStatus, WorkerKind, WorkerStatus};
    use conductor_core::ToolCall;

    fn node(description: &str, status: NodeStatus) -> Node {
        Node {
            id: Uuid::new_v4(),
            name: "research".into(),
            description: description.into(),
            dependencies: vec![],
            status,
            assigned_worker: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn worker() -> WorkerInfo {
        WorkerInfo {
            id: Uuid::new_v4(),
            name: "Alice".into(),
            role: "researcher".into(),
            kind: WorkerKind::Harnessed,
            model: None,
            status: WorkerStatus::Idle,
            current_node: None,
            tool_calls: 0,
            nodes_completed: 0,
            nodes_failed: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_board_view_truncates_and_marks() {
        let mut done = node(&"x".repeat(200), NodeStatus::Completed);
        done.result = Some("y".repeat(1000));
        let view = board_view(&[done]);
        assert!(view.starts_with("  [+]"));
        assert!(view.contains(&"x".repeat(80)));
        assert!(!view.contains(&"x".repeat(81)));
        assert!(view.contains(&format!("Result: {}", "y".repeat(300))));
        assert!(!view.contains(&"y".repeat(301)));
    }

    #[test]
    fn test_stop_summary_sections() {
        let summary = stop_summary(&[node("write", NodeStatus::Running)], &[worker()]);
        assert!(summary.starts_with("[System] The user stopped execution."));
        assert!(summary.contains("## Work Board"));
        assert!(summary.contains("[~]"));
        assert!(summary.contains("- Alice (researcher, harnessed) idle"));
        assert!(summary.trim_end().ends_with("what remains."));
    }

    #[test]
    fn test_mode_wording() {
        let finite = coordinator_system_prompt("g", AgentMode::Finite, &[], &[]);
        let infinite = coordinator_system_prompt("g", AgentMode::Infinite, &[], &[]);
        assert!(finite.contains("Finite Game"));
        assert!(infinite.contains("Never conclude"));
        assert!(finite.contains("## Goal\n\ng"));
    }

    #[test]
    fn test_assignment_includes_upstream_results() {
        let mut upstream = node("collect", NodeStatus::Completed);
        upstream.result = Some("z".repeat(6000));
        let published = Path::new("/run/nodes").join(upstream.id.to_string()).join("published");
        let text = worker_assignment(
            &node("summarize", NodeStatus::Ready),
            &[upstream],
            Path::new("/run/nodes"),
        );
        assert!(text.starts_with("## Your Assignment\n\nsummarize"));
        assert!(text.contains(&"z".repeat(5000)));
        assert!(!text.contains(&"z".repeat(5001)));
        assert!(text.contains(&format!(
            "Published files: {} (read_upstream node \"research\")",
            published.display()
        )));
    }

    #[test]
    fn test_worker_prompt_inlines_memory() {
        let bare = worker_system_prompt(&worker(), None);
        assert!(!bare.contains("Your Memory"));
        let long = "m".repeat(MAX_MEMORY_INLINE + 5);
        let with_memory = worker_system_prompt(&worker(), Some(&long));
        assert!(with_memory.contains("## Your Memory (From Past Work)"));
        assert!(with_memory.contains(&"m".repeat(MAX_MEMORY_INLINE)));
        assert!(!with_memory.contains(&"m".repeat(MAX_MEMORY_INLINE + 1)));
        assert!(with_memory.ends_with(WORKER_RULES));
    }

    #[test]
    fn test_failure_notes_and_message() {
        let n = node("do it", NodeStatus::Running);
        let transcript = vec![
            Message::user("## Your Assignment\n\ndo it"),
            Message::assistant_with_tools(
                None,
                vec![ToolCall {
                    id: "c1".into(),
                    name: "read_file".into(),
                    arguments: serde_json::json!({"path": "a.txt"}),
                }],
            ),
        ];
        let notes = failure_notes("Alice", &n, "HTTP error: 503", &transcript);
        assert!(notes.starts_with("# Failure Report: Alice"));
        assert!(notes.contains("## Conversation (2 messages)"));
        assert!(notes.contains("**[assistant:tool_call]** read_file("));

        let mail = worker_failed_message("Alice", &n, "HTTP error: 503", &notes);
        assert!(mail.starts_with(&format!("[WORKER FAILED] Alice failed on node [{}]", n.id)));
        assert!(mail.contains("Worker notes:\n# Failure Report"));
    }
}
