use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::StateStore;
use trellis_core::types::State;

/// Stores each session as `<session_id>.json` in a directory.
pub struct FileStateStore {
    base: PathBuf,
}

impl FileStateStore {
    /// The directory is created lazily on first save.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty() {
            return Err(TrellisError::Store("session ID cannot be empty".into()));
        }
        if session_id.contains(['/', '\\']) || session_id.starts_with('.') {
            return Err(TrellisError::Store(format!(
                "session ID is not a valid file name: {}",
                session_id
            )));
        }
        Ok(self.base.join(format!("{}.json", session_id)))
    }
}

impl StateStore for FileStateStore {
    fn save<'a>(&'a self, session_id: &'a str, state: &'a State) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.path_for(session_id)?;
            tokio::fs::create_dir_all(&self.base).await.map_err(|e| {
                TrellisError::Store(format!("Failed to create session directory: {}", e))
            })?;
            let data = serde_json::to_vec_pretty(state)?;

            // Write-then-rename so a crash never leaves a torn file behind.
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, &data)
                .await
                .map_err(|e| TrellisError::Store(format!("Failed to write session file: {}", e)))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| TrellisError::Store(format!("Failed to write session file: {}", e)))?;

            debug!(session_id, path = %path.display(), "Session saved");
            Ok(())
        })
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<State>> {
        Box::pin(async move {
            let path = self.path_for(session_id)?;
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(TrellisError::SessionNotFound(session_id.to_string()))
                }
                Err(e) => {
                    return Err(TrellisError::Store(format!(
                        "Failed to read session file: {}",
                        e
                    )))
                }
            };
            serde_json::from_slice(&data).map_err(|e| {
                TrellisError::Store(format!("Failed to deserialize session state: {}", e))
            })
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.path_for(session_id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(TrellisError::Store(format!(
                    "Failed to delete session file: {}",
                    e
                ))),
            }
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.base).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
                Err(e) => {
                    return Err(TrellisError::Store(format!("Failed to list sessions: {}", e)))
                }
            };

            let mut ids = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(id) = name.strip_suffix(".json") {
                    ids.push(id.to_string());
                }
            }
            ids.sort();
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("sessions"));
        trellis_test_utils::run_state_store_contract(&store).await;
    }

    #[tokio::test]
    async fn test_list_without_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let state = State::new("x", "start");
        assert!(store.save("../escape", &state).await.is_err());
        assert!(store.save("", &state).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{oops").unwrap();
        let store = FileStateStore::new(dir.path());
        let err = store.load("bad").await.unwrap_err();
        assert!(matches!(err, TrellisError::Store(_)));
    }
}
