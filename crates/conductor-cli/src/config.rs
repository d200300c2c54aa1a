use conductor_agent::{ClaudeCodeExecutor, ModelConfig};
use conductor_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `conductor.toml`.
#[derive(Debug, Deserialize)]
pub struct ConductorConfig {
    /// Coordinator model.
    pub model: ModelConfig,
    /// Default worker model; the coordinator model when absent.
    #[serde(default)]
    pub worker_model: Option<ModelConfig>,
    /// Root for run directories and snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Run limits and mode.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// External executor settings.
    #[serde(default)]
    pub executor: ExecutorSettings,
}

/// How `claude-code` workers are launched.
#[derive(Debug, Deserialize)]
pub struct ExecutorSettings {
    /// Whether `claude-code` models may be assigned at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Program to run.
    #[serde(default)]
    pub program: Option<String>,
    /// Full argument list; must request structured streaming.
    #[serde(default)]
    pub args: Vec<String>,
    /// Pass `--dangerously-skip-permissions`.
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            program: None,
            args: Vec::new(),
            skip_permissions: default_true(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

impl ConductorConfig {
    /// Parses a config and fills empty API keys from the environment.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut config: ConductorConfig = toml::from_str(text)?;
        config.model = config.model.resolve_api_key();
        config.worker_model = config.worker_model.map(ModelConfig::resolve_api_key);
        Ok(config)
    }

    /// Reads and parses `path`.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::parse(&text)
    }

    /// Directory of run snapshots.
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    /// The configured executor, if enabled.
    pub fn build_executor(&self) -> anyhow::Result<Option<ClaudeCodeExecutor>> {
        if !self.executor.enabled {
            return Ok(None);
        }
        let executor = match &self.executor.program {
            Some(program) => ClaudeCodeExecutor::with_command(program, self.executor.args.clone())?,
            None => ClaudeCodeExecutor::new(),
        };
        Ok(Some(executor.skip_permissions(self.executor.skip_permissions)))
    }
}
