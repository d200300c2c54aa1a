use crate::config::AgentMode;
use conductor_agent::LlmResponse;
use conductor_core::ToolCall;
use conductor_skills::SkillDescriptor;
use serde_json::{json, Value};

/// Everything the coordinator can do in a planning turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Add a node to the board.
    CreateNode {
        /// Optional short name; derived from the task when absent.
        name: Option<String>,
        /// Task text for the worker.
        description: String,
        /// Node ids or names the node waits on.
        dependencies: Vec<String>,
    },
    /// Make an existing node wait on more nodes.
    AddDependency {
        /// Node id or name.
        node: String,
        /// Node ids or names it should wait on.
        dependencies: Vec<String>,
    },
    /// Put a named worker on a node.
    AssignWorker {
        /// Node id or name.
        node: String,
        /// Worker name.
        worker: String,
        /// Role description for a new worker.
        role: Option<String>,
        /// Model override.
        model: Option<String>,
    },
    /// Message a worker or the human.
    SendMessage {
        /// Recipient name.
        to: String,
        /// Message text.
        content: String,
    },
    /// Ask for a textual board view.
    CheckBoard,
    /// Plain text addressed to the human.
    Respond {
        /// The text.
        text: String,
    },
    /// Declare the goal achieved.
    Finish {
        /// Closing summary.
        summary: String,
    },
}

/// One interpreted piece of a backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    /// Tool call this came from; `None` for plain text.
    pub call_id: Option<String>,
    /// Name of the tool called, for event payloads.
    pub tool: Option<String>,
    /// The action, or why the call could not be understood.
    pub action: Result<CoordinatorAction, String>,
}

/// Maps backend responses onto [`CoordinatorAction`]s.
pub struct ActionInterpreter;

impl ActionInterpreter {
    /// Interprets a response. Text becomes [`CoordinatorAction::Respond`]; each
    /// tool call becomes one planned action in call order.
    pub fn interpret(response: &LlmResponse) -> Vec<PlannedAction> {
        match response {
            LlmResponse::Text(text) | LlmResponse::Done(text) => Self::respond(text),
            LlmResponse::ToolUse {
                content,
                tool_calls,
            } => {
                let mut planned = content.as_deref().map(Self::respond).unwrap_or_default();
                planned.extend(tool_calls.iter().map(|call| PlannedAction {
                    call_id: Some(call.id.clone()),
                    tool: Some(call.name.clone()),
                    action: Self::from_call(call),
                }));
                planned
            }
        }
    }

    fn respond(text: &str) -> Vec<PlannedAction> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        vec![PlannedAction {
            call_id: None,
            tool: None,
            action: Ok(CoordinatorAction::Respond {
                text: text.trim().to_string(),
            }),
        }]
    }

    /// Resolves a single tool call.
    pub fn from_call(call: &ToolCall) -> Result<CoordinatorAction, String> {
        let args = &call.arguments;
        if !args.is_object() {
            return Err(format!(
                "Malformed arguments for '{}': expected a JSON object",
                call.name
            ));
        }

        match call.name.as_str() {
            "create_work_node" => Ok(CoordinatorAction::CreateNode {
                name: optional(args, "name"),
                description: required(args, "task", &call.name)?,
                dependencies: string_list(args, "dependencies"),
            }),
            "add_dependency" => {
                let dependencies = string_list(args, "dependencies");
                if dependencies.is_empty() {
                    return Err(format!(
                        "Missing required argument 'dependencies' for '{}'",
                        call.name
                    ));
                }
                Ok(CoordinatorAction::AddDependency {
                    node: required(args, "node_id", &call.name)?,
                    dependencies,
                })
            }
            "assign_worker" => Ok(CoordinatorAction::AssignWorker {
                node: required(args, "node_id", &call.name)?,
                worker: required(args, "worker", &call.name)?,
                role: optional(args, "role"),
                model: optional(args, "model"),
            }),
            "send_message" => Ok(CoordinatorAction::SendMessage {
                to: required(args, "to", &call.name)?,
                content: required(args, "content", &call.name)?,
            }),
            "check_board" => Ok(CoordinatorAction::CheckBoard),
            "finish" => Ok(CoordinatorAction::Finish {
                summary: optional(args, "summary").unwrap_or_default(),
            }),
            other => Err(format!("Unknown tool: {other}")),
        }
    }
}

fn optional(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required(args: &Value, key: &str, tool: &str) -> Result<String, String> {
    optional(args, key).ok_or_else(|| format!("Missing required argument '{key}' for '{tool}'"))
}

fn string_list(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Tools offered to the coordinator. `finish` only exists in finite mode.
pub fn coordinator_tools(mode: AgentMode) -> Vec<SkillDescriptor> {
    let mut tools = vec![
        SkillDescriptor {
            name: "create_work_node".into(),
            description: "Create a sub-task on the work board. It becomes ready once its dependencies complete.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Task description for the worker"},
                    "name": {"type": "string", "description": "Short node name"},
                    "dependencies": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Ids or names of nodes that must complete first"
                    }
                },
                "required": ["task"]
            }),
        },
        SkillDescriptor {
            name: "add_dependency".into(),
            description: "Make a node that has not started wait on more nodes. Edges that would close a cycle are rejected.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "node_id": {"type": "string", "description": "Node id or name"},
                    "dependencies": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Ids or names of nodes it must wait on"
                    }
                },
                "required": ["node_id", "dependencies"]
            }),
        },
        SkillDescriptor {
            name: "assign_worker".into(),
            description: "Assign a named worker to a work node. Idle workers with the same name are reused. A model of 'claude-code' or 'claude-code/<model>' delegates to an external executor.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "node_id": {"type": "string", "description": "Node id or name"},
                    "worker": {"type": "string", "description": "Worker name (e.g. 'Alice')"},
                    "role": {"type": "string", "description": "Worker role description"},
                    "model": {"type": "string", "description": "Optional model override"}
                },
                "required": ["node_id", "worker"]
            }),
        },
        SkillDescriptor {
            name: "send_message".into(),
            description: "Send a message to a worker or to the human by name.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Recipient name (a worker, or 'human')"},
                    "content": {"type": "string", "description": "Message content"}
                },
                "required": ["to", "content"]
            }),
        },
        SkillDescriptor {
            name: "check_board".into(),
            description: "View all work nodes and their current status.".into(),
            parameters_schema: json!({"type": "object", "properties": {}}),
        },
    ];
    if mode == AgentMode::Finite {
        tools.push(SkillDescriptor {
            name: "finish".into(),
            description: "Goal achieved. Wrap up and stop the agent.".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Final summary of what was accomplished"}
                },
                "required": ["summary"]
            }),
        });
    }
    tools
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn test_text_becomes_respond() {
        let planned = ActionInterpreter::interpret(&LlmResponse::Done("All set.".into()));
        assert_eq!(planned.len(), 1);
        assert_eq!(
            planned[0].action,
            Ok(CoordinatorAction::Respond {
                text: "All set.".into()
            })
        );
        assert!(ActionInterpreter::interpret(&LlmResponse::Text("  ".into())).is_empty());
    }

    #[test]
    fn test_tool_calls_in_order() {
        let response = LlmResponse::ToolUse {
            content: Some("Planning.".into()),
            tool_calls: vec![
                call(
                    "create_work_node",
                    json!({"task": "Research", "name": "research", "dependencies": ["setup"]}),
                ),
                call("assign_worker", json!({"node_id": "research", "worker": "Alice"})),
                call("check_board", json!({})),
            ],
        };
        let planned = ActionInterpreter::interpret(&response);
        assert_eq!(planned.len(), 4);
        assert!(planned[0].call_id.is_none());
        assert_eq!(
            planned[1].action,
            Ok(CoordinatorAction::CreateNode {
                name: Some("research".into()),
                description: "Research".into(),
                dependencies: vec!["setup".into()],
            })
        );
        assert_eq!(planned[2].call_id.as_deref(), Some("call_assign_worker"));
        assert_eq!(planned[3].action, Ok(CoordinatorAction::CheckBoard));
    }

    #[test]
    fn test_bad_calls_are_errors_not_panics() {
        assert!(ActionInterpreter::from_call(&call("assign_worker", json!({"worker": "A"})))
            .unwrap_err()
            .contains("node_id"));
        assert!(ActionInterpreter::from_call(&call("teleport", json!({})))
            .unwrap_err()
            .contains("Unknown tool"));
        assert!(ActionInterpreter::from_call(&call("check_board", json!("nope"))).is_err());
        assert!(ActionInterpreter::from_call(&call("add_dependency", json!({"node_id": "b"})))
            .unwrap_err()
            .contains("dependencies"));
    }

    #[test]
    fn test_add_dependency_accepts_single_reference() {
        assert_eq!(
            ActionInterpreter::from_call(&call(
                "add_dependency",
                json!({"node_id": "review", "dependencies": "draft"})
            )),
            Ok(CoordinatorAction::AddDependency {
                node: "review".into(),
                dependencies: vec!["draft".into()],
            })
        );
        assert!(coordinator_tools(AgentMode::Infinite)
            .iter()
            .any(|t| t.name == "add_dependency"));
    }

    #[test]
    fn test_finish_only_in_finite_mode() {
        let finite = coordinator_tools(AgentMode::Finite);
        let infinite = coordinator_tools(AgentMode::Infinite);
        assert!(finite.iter().any(|t| t.name == "finish"));
        assert!(!infinite.iter().any(|t| t.name == "finish"));
    }
}
