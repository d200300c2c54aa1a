use conductor_core::Event;
use conductor_orchestrator::prompts::{board_view, roster_view};
use conductor_orchestrator::{Agent, CoordinatorState, HUMAN};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Shown once at startup and on `/help`.
pub const HELP: &str = "Commands: /stop, /finish [summary], /board, /workers, \
/to <worker> <text>, /help, /quit. Anything else is sent to the coordinator.";

const QUIT_GRACE: Duration = Duration::from_secs(10);

/// One parsed line of human input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    /// Blank line.
    Empty,
    /// Text for the coordinator, or for a worker when `to` is set.
    Message {
        /// Worker name.
        to: Option<String>,
        /// Text.
        body: String,
    },
    /// Pause the run.
    Stop,
    /// Declare the run finished.
    Finish(Option<String>),
    /// Print the board.
    Board,
    /// Print the roster.
    Workers,
    /// Print the command list.
    Help,
    /// Leave the console; the run stays resumable.
    Quit,
    /// A slash command nobody knows.
    Unknown(String),
}

/// Parses a line typed at the console.
pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message {
            to: None,
            body: line.to_string(),
        };
    };
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "stop" => Input::Stop,
        "finish" => Input::Finish((!rest.is_empty()).then(|| rest.to_string())),
        "board" => Input::Board,
        "workers" => Input::Workers,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        "to" => match rest.split_once(char::is_whitespace) {
            Some((to, body)) if !body.trim().is_empty() => Input::Message {
                to: Some(to.to_string()),
                body: body.trim().to_string(),
            },
            _ => Input::Unknown(line.to_string()),
        },
        _ => Input::Unknown(line.to_string()),
    }
}

/// Console line for an event, if it is worth showing.
pub fn render_event(event: &Event) -> Option<String> {
    let field = |key: &str| event.payload.get(key).and_then(|v| v.as_str());
    match event.event_type.as_str() {
        "chat.message" => {
            let role = field("role")?;
            if role == HUMAN {
                return None;
            }
            let content = field("content").unwrap_or_default();
            Some(match field("to") {
                Some(to) if to != HUMAN => format!("[{role} -> {to}] {content}"),
                _ => format!("[{role}] {content}"),
            })
        }
        "node.completed" => Some(format!("* node '{}' completed", field("name")?)),
        "node.failed" => Some(format!(
            "! node '{}' failed: {}",
            field("name")?,
            one_line(field("error").unwrap_or_default(), 120)
        )),
        "coordinator.stopped" => Some("(run stopped; send a message to resume)".into()),
        "coordinator.resumed" => Some("(run resumed)".into()),
        _ => None,
    }
}

/// First line of `text`, cut to `max` characters.
pub fn one_line(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or_default();
    if first.chars().count() <= max {
        first.to_string()
    } else {
        let cut: String = first.chars().take(max).collect();
        format!("{cut}...")
    }
}

/// Runs the interactive console until the run ends or the human quits.
/// Returns the coordinator state at exit.
pub async fn interact(agent: Arc<Agent>) -> anyhow::Result<CoordinatorState> {
    let mut events = agent.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Some(line) = render_event(&event) {
                println!("{line}");
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let state = loop {
        let line = tokio::select! {
            state = agent.wait() => break state,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break leave(&agent).await;
        };
        match parse_input(&line) {
            Input::Empty => {}
            Input::Message { to, body } => {
                agent.send_message(body, to.as_deref());
            }
            Input::Stop => agent.stop(),
            Input::Finish(summary) => {
                if let Err(e) = agent.finish(summary) {
                    println!("{e}");
                }
            }
            Input::Board => println!("{}", board_view(&agent.board())),
            Input::Workers => println!("{}", roster_view(&agent.workers().await)),
            Input::Help => println!("{HELP}"),
            Input::Quit => break leave(&agent).await,
            Input::Unknown(line) => println!("Unknown command: {line}\n{HELP}"),
        }
    };

    // Let the final chat lines reach the printer before it goes away.
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();
    Ok(state)
}

/// Stops the run so its last snapshot is a resumable one.
async fn leave(agent: &Agent) -> CoordinatorState {
    if agent.state().is_terminal() {
        return agent.state();
    }
    agent.stop();
    let settled = agent.wait_for(|state| {
        state == CoordinatorState::Stopped || state.is_terminal()
    });
    match tokio::time::timeout(QUIT_GRACE, settled).await {
        Ok(state) => state,
        Err(_) => {
            warn!(agent_id = %agent.id(), "Run did not settle before exit");
            agent.state()
        }
    }
}
