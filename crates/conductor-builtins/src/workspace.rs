use conductor_core::{ConductorError, ConductorResult};
use std::path::{Component, Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// File name of the durable artifact left by a failed node.
pub const FAILURE_NOTES_FILE: &str = "failure_notes.md";
/// File name of a completed node's result.
pub const RESULT_FILE: &str = "result.md";
const SCRATCH_DIR: &str = "scratch";
const PUBLISHED_DIR: &str = "published";

/// Resolves `relative` inside `root` without touching the filesystem.
///
/// Absolute paths and `..` components that would leave `root` are rejected.
/// An empty path resolves to `root` itself.
pub fn resolve_within(root: &Path, relative: &str) -> ConductorResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ConductorError::Skill(format!(
                        "Path '{relative}' escapes the workspace"
                    )));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConductorError::Skill(format!(
                    "Absolute path '{relative}' is not allowed; use a workspace-relative path"
                )));
            }
        }
    }

    Ok(resolved)
}

/// A node's private directory: `<base>/<node_id>/` with a `scratch/` area.
#[derive(Debug, Clone)]
pub struct NodeWorkspace {
    root: PathBuf,
}

impl NodeWorkspace {
    /// Creates (or reopens) the workspace for `node_id` under `base`.
    pub async fn create(base: &Path, node_id: Uuid) -> ConductorResult<Self> {
        let root = base.join(node_id.to_string());
        tokio::fs::create_dir_all(root.join(SCRATCH_DIR)).await?;
        Ok(Self { root })
    }

    /// Wraps an existing directory without creating anything.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working area handed to tools and external executors.
    pub fn scratch(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Read-only copy of `scratch/` made when the node completes. Downstream
    /// nodes read from here.
    pub fn published(&self) -> PathBuf {
        self.root.join(PUBLISHED_DIR)
    }

    /// Copies every entry of `scratch/` into `published/`, recursing into
    /// directories and overwriting existing files. Returns the number of
    /// files copied.
    pub async fn publish(&self) -> ConductorResult<usize> {
        let published = self.published();
        tokio::fs::create_dir_all(&published).await?;

        let mut copied = 0;
        let mut pending = vec![(self.scratch(), published.clone())];
        while let Some((from, to)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&from).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let target = to.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    tokio::fs::create_dir_all(&target).await?;
                    pending.push((entry.path(), target));
                } else {
                    tokio::fs::copy(entry.path(), &target).await?;
                    copied += 1;
                }
            }
        }

        info!(path = %published.display(), files = copied, "Published node workspace");
        Ok(copied)
    }

    /// Resolves a workspace-relative path.
    pub fn resolve(&self, relative: &str) -> ConductorResult<PathBuf> {
        resolve_within(&self.root, relative)
    }

    /// Writes the failure artifact and returns its path.
    pub async fn write_failure_notes(&self, notes: &str) -> ConductorResult<PathBuf> {
        let path = self.root.join(FAILURE_NOTES_FILE);
        tokio::fs::write(&path, notes).await?;
        info!(path = %path.display(), "Wrote failure notes");
        Ok(path)
    }

    /// Reads the failure artifact, if one was written.
    pub async fn read_failure_notes(&self) -> ConductorResult<Option<String>> {
        let path = self.root.join(FAILURE_NOTES_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(notes) => Ok(Some(notes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a completed node's result and returns its path.
    pub async fn write_result(&self, result: &str) -> ConductorResult<PathBuf> {
        let path = self.root.join(RESULT_FILE);
        tokio::fs::write(&path, result).await?;
        Ok(path)
    }
}
