use std::collections::BTreeMap;
use std::sync::RwLock;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::GraphLoader;
use trellis_core::types::Node;

/// In-memory graph loader holding raw node definitions.
///
/// Replacing or removing a node notifies watchers with its ID.
pub struct MemoryLoader {
    nodes: RwLock<BTreeMap<String, Vec<u8>>>,
    changes: broadcast::Sender<String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Build a loader from raw definitions keyed by node ID.
    pub fn from_raw<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let loader = Self::new();
        if let Ok(mut nodes) = loader.nodes.write() {
            for (k, v) in entries {
                nodes.insert(k.into(), v.into());
            }
        }
        loader
    }

    /// Build a loader from typed nodes, serializing each to JSON.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut entries = Vec::new();
        for node in nodes {
            if node.id.is_empty() {
                return Err(TrellisError::NodeParse("node missing ID".into()));
            }
            let raw = serde_json::to_vec(&node)?;
            entries.push((node.id, raw));
        }
        Ok(Self::from_raw(entries))
    }

    /// Insert or replace a node definition.
    pub fn upsert(&self, id: impl Into<String>, raw: impl Into<Vec<u8>>) -> Result<()> {
        let id = id.into();
        self.nodes
            .write()
            .map_err(|e| TrellisError::Loader(e.to_string()))?
            .insert(id.clone(), raw.into());
        self.notify(id);
        Ok(())
    }

    /// Insert or replace a typed node.
    pub fn upsert_node(&self, node: &Node) -> Result<()> {
        self.upsert(node.id.clone(), serde_json::to_vec(node)?)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self
            .nodes
            .write()
            .map_err(|e| TrellisError::Loader(e.to_string()))?
            .remove(id)
            .is_some();
        if removed {
            self.notify(id.to_string());
        }
        Ok(removed)
    }

    fn notify(&self, id: String) {
        debug!(node_id = %id, "Graph node changed");
        // No watchers is fine
        let _ = self.changes.send(id);
    }
}

impl Default for MemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphLoader for MemoryLoader {
    fn get_node(&self, id: &str) -> BoxFuture<'_, Result<Vec<u8>>> {
        let id = id.to_string();
        Box::pin(async move {
            let nodes = self
                .nodes
                .read()
                .map_err(|e| TrellisError::Loader(e.to_string()))?;
            nodes
                .get(&id)
                .cloned()
                .ok_or(TrellisError::NodeNotFound(id))
        })
    }

    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let nodes = self
                .nodes
                .read()
                .map_err(|e| TrellisError::Loader(e.to_string()))?;
            Ok(nodes.keys().cloned().collect())
        })
    }

    fn watch(&self) -> Option<BoxStream<'static, String>> {
        let rx = self.changes.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(id) => return Some((id, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Some(Box::pin(stream))
    }
}
