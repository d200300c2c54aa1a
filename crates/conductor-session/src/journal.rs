use conductor_core::ConductorResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Append-only JSONL file, one serialized `T` per line.
#[derive(Debug)]
pub struct Journal<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Journal<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Journal<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// A journal backed by `path`. Nothing is created until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// File backing this journal.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, creating the file and its parent directory if
    /// needed.
    pub async fn append(&self, entry: &T) -> ConductorResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads every entry in append order.
    ///
    /// A missing file is an empty journal. Lines that fail to parse (a torn
    /// final write after a crash) are skipped with a warning.
    pub async fn read_all(&self) -> ConductorResult<Vec<T>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping unreadable journal line"
                ),
            }
        }
        Ok(entries)
    }

    /// Moves writes onto a background task so callers never wait on disk.
    ///
    /// Must be called inside a tokio runtime. Entries are written in the
    /// order they were submitted.
    pub fn into_background(self) -> JournalHandle<T> {
        let (tx, mut rx) = mpsc::unbounded_channel::<JournalCommand<T>>();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    JournalCommand::Append(entry) => {
                        if let Err(e) = self.append(&entry).await {
                            warn!(path = %self.path.display(), error = %e, "Journal write failed");
                        }
                    }
                    JournalCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        JournalHandle { tx }
    }
}

enum JournalCommand<T> {
    Append(T),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking writer for a [`Journal`] running on a background task.
pub struct JournalHandle<T> {
    tx: mpsc::UnboundedSender<JournalCommand<T>>,
}

impl<T> Clone for JournalHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for JournalHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> JournalHandle<T> {
    /// Queues an entry. Never blocks; entries queued after the writer task
    /// is gone are dropped.
    pub fn append(&self, entry: T) {
        let _ = self.tx.send(JournalCommand::Append(entry));
    }

    /// Waits until every entry queued before this call is on disk.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(JournalCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
