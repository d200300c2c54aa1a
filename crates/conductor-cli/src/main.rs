//! `conductor`: start, resume and list orchestration runs from a terminal.

mod config;
mod console;

use config::ConductorConfig;
use conductor_agent::{BackendFactory, ConfigBackendFactory, ExternalExecutor, LlmClient};
use conductor_orchestrator::{AgentBuilder, AgentMode, AgentRegistry, RunSnapshot};
use conductor_session::{FileSnapshotStore, SnapshotStore};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: coordinator/worker agent orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run toward a goal
    Run {
        /// What the coordinator should achieve
        goal: String,
        /// Run mode (overrides config)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Resume a persisted run
    Resume {
        /// Run id
        agent_id: Uuid,
    },
    /// List persisted runs
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Finite,
    Infinite,
}

impl From<ModeArg> for AgentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Finite => AgentMode::Finite,
            ModeArg::Infinite => AgentMode::Infinite,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConductorConfig::load(&cli.config).await?;
    let store: Arc<dyn SnapshotStore<RunSnapshot>> =
        Arc::new(FileSnapshotStore::<RunSnapshot>::new(config.runs_dir()).await?);

    match cli.command {
        Commands::Run { goal, mode } => {
            let mut orchestrator = config.orchestrator.clone();
            if let Some(mode) = mode {
                orchestrator.mode = mode.into();
            }
            let builder = agent_builder(&config, goal, store)?.config(orchestrator);
            drive(builder).await
        }
        Commands::Resume { agent_id } => {
            let snapshot = store
                .load(agent_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No persisted run with id {agent_id}"))?;
            if snapshot.summary.state.is_terminal() {
                anyhow::bail!(
                    "Run {agent_id} already ended ({}); nothing to resume",
                    snapshot.summary.state
                );
            }
            let goal = snapshot.summary.goal.clone();
            let builder = agent_builder(&config, goal, store)?
                .config(config.orchestrator.clone())
                .resume_from(snapshot);
            drive(builder).await
        }
        Commands::List => {
            let mut runs = Vec::new();
            for id in store.list().await? {
                if let Some(snapshot) = store.load(id).await? {
                    runs.push(snapshot.summary);
                }
            }
            runs.sort_by_key(|summary| summary.created_at);
            if runs.is_empty() {
                println!("No runs in {}", config.runs_dir().display());
            }
            for summary in runs {
                println!(
                    "{}  {:<22} {:<8} {}/{} nodes  {}",
                    summary.id,
                    summary.state.as_str(),
                    summary.mode.as_str(),
                    summary.nodes.completed,
                    summary.nodes.total(),
                    console::one_line(&summary.goal, 60)
                );
            }
            Ok(())
        }
    }
}

fn agent_builder(
    config: &ConductorConfig,
    goal: String,
    store: Arc<dyn SnapshotStore<RunSnapshot>>,
) -> anyhow::Result<AgentBuilder> {
    let backend = Arc::new(LlmClient::new(config.model.clone()));
    let worker_model = config
        .worker_model
        .clone()
        .unwrap_or_else(|| config.model.clone());
    let workers: Arc<dyn BackendFactory> = Arc::new(ConfigBackendFactory::new(worker_model));

    let mut builder = AgentBuilder::new(goal, backend)
        .worker_backends(workers)
        .data_dir(config.data_dir.clone())
        .store(store);
    if let Some(executor) = config.build_executor()? {
        let executor: Arc<dyn ExternalExecutor> = Arc::new(executor);
        builder = builder.executor(executor);
    }
    Ok(builder)
}

async fn drive(builder: AgentBuilder) -> anyhow::Result<()> {
    let registry = AgentRegistry::new();
    let agent = registry.insert(builder.start().await?);
    info!(agent_id = %agent.id(), mode = agent.mode().as_str(), "Run started");
    println!("Run {} ({})", agent.id(), agent.mode().as_str());
    println!("Goal: {}", agent.goal());
    println!("{}", console::HELP);

    let state = console::interact(agent.clone()).await?;

    let summary = agent.summary().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !state.is_terminal() {
        println!("Resume with: conductor resume {}", agent.id());
    }
    registry.remove(agent.id());
    Ok(())
}
