use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::StateStore;
use trellis_core::types::State;

/// Process-local state store. Every save and load copies, so callers never
/// share a `State` with the store.
#[derive(Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, State>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn save<'a>(&'a self, session_id: &'a str, state: &'a State) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.data
                .write()
                .await
                .insert(session_id.to_string(), state.clone());
            Ok(())
        })
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<State>> {
        Box::pin(async move {
            self.data
                .read()
                .await
                .get(session_id)
                .cloned()
                .ok_or_else(|| TrellisError::SessionNotFound(session_id.to_string()))
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.data.write().await.remove(session_id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut ids: Vec<String> = self.data.read().await.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }
}
