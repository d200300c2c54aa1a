#![allow(clippy::unwrap_used, clippy::expect_used)]
#![cfg(unix)]

use conductor_agent::{ClaudeCodeExecutor, ExecutorEvent, ExecutorRequest, ExternalExecutor};
use conductor_core::ConductorError;
use tokio::sync::mpsc;

/// Builds an executor that runs `script` through `sh`, standing in for the CLI.
fn scripted(dir: &std::path::Path, script: &str) -> ClaudeCodeExecutor {
    let path = dir.join("fake-claude.sh");
    std::fs::write(&path, script).unwrap();
    ClaudeCodeExecutor::with_command(
        "sh",
        vec![
            path.display().to_string(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
        ],
    )
    .unwrap()
}

fn request(dir: &std::path::Path) -> ExecutorRequest {
    ExecutorRequest {
        prompt: "write the report".into(),
        system_prompt: None,
        working_dir: dir.to_path_buf(),
        model: Some("sonnet".into()),
    }
}

#[tokio::test]
async fn test_child_process_stream_is_translated() {
    let dir = tempfile::tempdir().unwrap();
    let executor = scripted(
        dir.path(),
        r#"
echo '{"type":"system","subtype":"init","session_id":"abc","model":"sonnet","tools":["Write"]}'
echo '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Write","input":{"file_path":"report.md"}}]}}'
echo 'partial' > report.md
echo '{"type":"result","result":"Report written","is_error":false,"total_cost_usd":0.01,"duration_ms":10,"num_turns":1}'
"#,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = executor.execute(request(dir.path()), tx).await.unwrap();
    assert_eq!(outcome.result, "Report written");
    assert!(!outcome.is_error);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], ExecutorEvent::Init { session_id, .. } if session_id == "abc"));

    // The child ran inside the requested working directory.
    assert!(dir.path().join("report.md").exists());
}

#[tokio::test]
async fn test_child_without_result_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let executor = scripted(dir.path(), "echo 'plain text only'\nexit 0\n");

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = executor.execute(request(dir.path()), tx).await.unwrap_err();
    assert!(matches!(err, ConductorError::Executor(_)));
}

#[tokio::test]
async fn test_missing_program_is_an_executor_error() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ClaudeCodeExecutor::with_command(
        "definitely-not-a-real-binary-for-conductor",
        vec!["stream-json".into(), "--verbose".into()],
    )
    .unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = executor.execute(request(dir.path()), tx).await.unwrap_err();
    assert!(err.to_string().contains("Failed to spawn"));
}
