use conductor_core::ConductorResult;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// File holding a worker's notes from past nodes.
pub const MEMORY_FILE: &str = "memory.md";

/// A worker's memory: one section per node it completed, carried into the
/// system prompt of its later runs.
#[derive(Debug, Clone)]
pub struct WorkerMemory {
    path: PathBuf,
}

impl WorkerMemory {
    /// Memory stored in `dir/memory.md`.
    pub fn at(dir: &Path) -> Self {
        Self {
            path: dir.join(MEMORY_FILE),
        }
    }

    /// Path of the memory file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the summary of a completed node.
    pub async fn append(&self, node_id: Uuid, summary: &str) -> ConductorResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("\n## Node: {node_id}\n{summary}\n").as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    /// Trimmed memory contents; `None` when nothing was recorded.
    pub async fn read(&self) -> ConductorResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
