pub mod file_store;
pub mod loader;
pub mod parser;
pub mod sqlite_store;
pub mod store;

use std::sync::Arc;

use tracing::info;

use trellis_core::config::{StoreBackend, StoreConfig};
use trellis_core::error::Result;
use trellis_core::traits::StateStore;

pub use file_store::FileStateStore;
pub use loader::MemoryLoader;
pub use parser::JsonNodeParser;
pub use sqlite_store::SqliteStateStore;
pub use store::MemoryStateStore;

/// Build the state store selected by `[store]` in the config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStateStore::new()),
        StoreBackend::File => {
            let path = config.resolved_path();
            info!(path = %path.display(), "Using file state store");
            Arc::new(FileStateStore::new(path))
        }
        StoreBackend::Sqlite => {
            let path = config.resolved_path();
            info!(path = %path.display(), "Using SQLite state store");
            Arc::new(SqliteStateStore::open(&path)?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::State;

    #[tokio::test]
    async fn test_open_sqlite_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: Some(dir.path().join("s.db").display().to_string()),
        };
        let store = open_store(&config).unwrap();
        store.save("a", &State::new("a", "start")).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_open_memory_store_by_default() {
        let store = open_store(&StoreConfig::default()).unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
