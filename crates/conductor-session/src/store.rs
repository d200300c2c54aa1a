use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::PathBuf;
use uuid::Uuid;

/// Keyed storage for whole-run snapshots.
#[async_trait]
pub trait SnapshotStore<T>: Send + Sync {
    /// Writes (or replaces) the snapshot for `id`.
    async fn save(&self, id: Uuid, value: &T) -> ConductorResult<()>;
    /// Reads the snapshot for `id`, if any.
    async fn load(&self, id: Uuid) -> ConductorResult<Option<T>>;
    /// Removes the snapshot for `id`. Missing snapshots are not an error.
    async fn delete(&self, id: Uuid) -> ConductorResult<()>;
    /// Ids of every stored snapshot.
    async fn list(&self) -> ConductorResult<Vec<Uuid>>;
}

/// One pretty-printed JSON file per id under a directory.
pub struct FileSnapshotStore<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileSnapshotStore<T> {
    /// Opens the store, creating `dir` if needed.
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            _marker: PhantomData,
        })
    }

    fn snapshot_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl<T> SnapshotStore<T> for FileSnapshotStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn save(&self, id: Uuid, value: &T) -> ConductorResult<()> {
        let json = serde_json::to_string_pretty(value)?;
        // Write then rename so a crash never leaves a half-written snapshot.
        let tmp = self.dir.join(format!("{id}.json.tmp"));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.snapshot_path(id)).await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ConductorResult<Option<T>> {
        let data = match tokio::fs::read_to_string(self.snapshot_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&data)
            .map_err(|e| ConductorError::Session(format!("Failed to parse snapshot {id}: {e}")))?;
        Ok(Some(value))
    }

    async fn delete(&self, id: Uuid) -> ConductorResult<()> {
        match tokio::fs::remove_file(self.snapshot_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> ConductorResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
