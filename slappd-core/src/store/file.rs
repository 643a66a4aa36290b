use super::{MarkMap, MarkStore, StoreError, advance};
use crate::entities::{AccountId, CheckinId, HighWaterMark};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Mark store persisted as a JSON object of `{"<account>": <last id>}`.
///
/// The file is read once by [`open`](FileMarkStore::open) and rewritten
/// atomically (temp file, then rename) after every commit that leaves it
/// out of date. Writes are serialized by the inner mutex, so concurrent
/// commits for different accounts never interleave on disk.
#[derive(Debug)]
pub struct FileMarkStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    marks: MarkMap,
    /// Set while the file lags behind `marks`, e.g. after a failed write.
    dirty: bool,
}

impl FileMarkStore {
    /// Load marks from `path`. A missing file starts an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let marks = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => MarkMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MarkMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), accounts = marks.len(), "Loaded high-water marks");

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                marks,
                dirty: false,
            }),
        })
    }

    async fn persist(&self, marks: &MarkMap) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(marks)?;

        let mut temp_path = self.path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), "Persisted high-water marks");
        Ok(())
    }
}

#[async_trait]
impl MarkStore for FileMarkStore {
    async fn get(&self, account: &AccountId) -> Result<HighWaterMark, StoreError> {
        Ok(self.state.lock().await.marks.get(account).copied())
    }

    /// The in-memory mark advances even if writing the file fails; the error
    /// is still returned so the caller can report it, and the write is
    /// attempted again on the next commit of any account.
    async fn commit(&self, account: &AccountId, mark: CheckinId) -> Result<CheckinId, StoreError> {
        let mut state = self.state.lock().await;
        let previous = state.marks.get(account).copied();
        let stored = advance(&mut state.marks, account, mark);
        if previous != Some(stored) {
            state.dirty = true;
        }
        if state.dirty {
            self.persist(&state.marks).await?;
            state.dirty = false;
        }
        Ok(stored)
    }

    async fn snapshot(&self) -> Result<MarkMap, StoreError> {
        Ok(self.state.lock().await.marks.clone())
    }
}
