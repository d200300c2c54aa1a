#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Workspace skills exercised through the registry, the way workers call them.

use conductor_builtins::{register_builtins, NodeWorkspace};
use conductor_core::ToolCall;
use conductor_skills::{SkillContext, SkillRegistry};
use tempfile::TempDir;
use uuid::Uuid;

fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments,
    }
}

async fn setup() -> (TempDir, SkillRegistry, SkillContext) {
    let tmp = TempDir::new().unwrap();
    let ws = NodeWorkspace::create(tmp.path(), Uuid::new_v4()).await.unwrap();
    let mut registry = SkillRegistry::new();
    register_builtins(&mut registry);
    let ctx = SkillContext::new(ws.scratch(), "worker-1");
    (tmp, registry, ctx)
}

#[tokio::test]
async fn test_registers_builtin_skills() {
    let (_tmp, registry, _ctx) = setup().await;
    let names: Vec<_> = registry
        .list_descriptors()
        .iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(
        names,
        vec!["bash", "list_files", "read_file", "read_upstream", "write_file"]
    );
}

#[tokio::test]
async fn test_write_then_read_and_list() {
    let (_tmp, registry, ctx) = setup().await;

    let written = registry
        .execute(
            call(
                "write_file",
                serde_json::json!({"path": "notes/plan.md", "content": "step one"}),
            ),
            &ctx,
        )
        .await
        .unwrap();
    assert!(!written.is_error, "{}", written.content);

    let read = registry
        .execute(call("read_file", serde_json::json!({"path": "notes/plan.md"})), &ctx)
        .await
        .unwrap();
    assert_eq!(read.content, "step one");

    let listed = registry
        .execute(call("list_files", serde_json::json!({})), &ctx)
        .await
        .unwrap();
    assert_eq!(listed.content, "notes/");

    let nested = registry
        .execute(call("list_files", serde_json::json!({"path": "notes"})), &ctx)
        .await
        .unwrap();
    assert_eq!(nested.content, "plan.md");
}

#[tokio::test]
async fn test_escape_attempts_are_tool_errors() {
    let (_tmp, registry, ctx) = setup().await;

    let read = registry
        .execute(call("read_file", serde_json::json!({"path": "../../secret"})), &ctx)
        .await
        .unwrap();
    assert!(read.is_error);
    assert!(read.content.contains("escapes"));

    let write = registry
        .execute(
            call(
                "write_file",
                serde_json::json!({"path": "/tmp/x", "content": "nope"}),
            ),
            &ctx,
        )
        .await
        .unwrap();
    assert!(write.is_error);
}

#[tokio::test]
async fn test_read_missing_file_is_tool_error() {
    let (_tmp, registry, ctx) = setup().await;
    let read = registry
        .execute(call("read_file", serde_json::json!({"path": "absent.txt"})), &ctx)
        .await
        .unwrap();
    assert!(read.is_error);
    assert!(read.content.contains("absent.txt"));
}

#[tokio::test]
async fn test_empty_scratch_lists_placeholder() {
    let (_tmp, registry, ctx) = setup().await;
    let listed = registry
        .execute(call("list_files", serde_json::json!({"path": "."})), &ctx)
        .await
        .unwrap();
    assert_eq!(listed.content, "(empty)");
}

#[tokio::test]
async fn test_downstream_reads_published_upstream_files() {
    let tmp = TempDir::new().unwrap();
    let mut registry = SkillRegistry::new();
    register_builtins(&mut registry);

    let upstream_id = Uuid::new_v4();
    let upstream = NodeWorkspace::create(tmp.path(), upstream_id).await.unwrap();
    let writer = SkillContext::new(upstream.scratch(), "Alice");
    registry
        .execute(
            call("bash", serde_json::json!({"command": "printf hello > hello.txt"})),
            &writer,
        )
        .await
        .unwrap();
    upstream.publish().await.unwrap();

    let downstream = NodeWorkspace::create(tmp.path(), Uuid::new_v4()).await.unwrap();
    let reader = SkillContext::new(downstream.scratch(), "Bob")
        .with_upstream("greeting", upstream.published())
        .with_upstream(upstream_id.to_string(), upstream.published());

    for key in ["greeting".to_string(), upstream_id.to_string()] {
        let read = registry
            .execute(
                call("read_upstream", serde_json::json!({"node": key, "path": "hello.txt"})),
                &reader,
            )
            .await
            .unwrap();
        assert!(!read.is_error, "{}", read.content);
        assert_eq!(read.content, "hello");
    }

    // Own file tools stay scoped to the downstream scratch area.
    let own = registry
        .execute(call("read_file", serde_json::json!({"path": "hello.txt"})), &reader)
        .await
        .unwrap();
    assert!(own.is_error);
}
