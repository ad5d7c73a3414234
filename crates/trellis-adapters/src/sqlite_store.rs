use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::StateStore;
use trellis_core::types::State;

/// Persistent state store backed by SQLite. One row per session.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open or create the session database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrellisError::Store(format!("Failed to create session directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TrellisError::Store(format!("Failed to open session store: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TrellisError::Store(format!("Failed to configure session store: {}", e)))?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TrellisError::Store(format!("Failed to open session store: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                 session_id TEXT PRIMARY KEY,
                 state_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(|e| TrellisError::Store(format!("Failed to initialize session schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TrellisError::Store(e.to_string()))?;
        f(&conn).map_err(|e| TrellisError::Store(e.to_string()))
    }
}

impl StateStore for SqliteStateStore {
    fn save<'a>(&'a self, session_id: &'a str, state: &'a State) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if session_id.is_empty() {
                return Err(TrellisError::Store("session ID cannot be empty".into()));
            }
            let json = serde_json::to_string(state)?;
            self.with_conn(|conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO sessions (session_id, state_json, updated_at)
                     VALUES (?1, ?2, ?3)",
                    params![session_id, json, Utc::now().to_rfc3339()],
                )
            })?;
            debug!(session_id, "Session saved");
            Ok(())
        })
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<State>> {
        Box::pin(async move {
            let json: Option<String> = self.with_conn(|conn| {
                conn.query_row(
                    "SELECT state_json FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()
            })?;
            let json = json.ok_or_else(|| TrellisError::SessionNotFound(session_id.to_string()))?;
            serde_json::from_str(&json).map_err(|e| {
                TrellisError::Store(format!("Failed to deserialize session state: {}", e))
            })
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.with_conn(|conn| {
                conn.execute(
                    "DELETE FROM sessions WHERE session_id = ?1",
                    params![session_id],
                )
            })?;
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            self.with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT session_id FROM sessions ORDER BY session_id")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_contract_in_memory() {
        let store = SqliteStateStore::in_memory().unwrap();
        trellis_test_utils::run_state_store_contract(&store).await;
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");

        let mut state = State::new("s1", "start");
        state.context.insert("plan".into(), json!("pro"));
        {
            let store = SqliteStateStore::open(&path).unwrap();
            store.save("s1", &state).await.unwrap();
        }

        let store = SqliteStateStore::open(&path).unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.list().await.unwrap(), vec!["s1"]);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = SqliteStateStore::in_memory().unwrap();
        let mut state = State::new("s1", "start");
        store.save("s1", &state).await.unwrap();
        state.current_node_id = "next".into();
        store.save("s1", &state).await.unwrap();

        assert_eq!(store.load("s1").await.unwrap().current_node_id, "next");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
