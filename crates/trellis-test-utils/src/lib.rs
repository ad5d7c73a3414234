//! Shared fixtures for Trellis crates: a state store contract suite and
//! recording/failing collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use trellis_core::error::{Result, TrellisError};
use trellis_core::hooks::LifecycleHooks;
use trellis_core::traits::{DistributedLocker, GraphLoader, StateStore};
use trellis_core::types::{EventType, NodeEvent, State, ToolEvent};

/// Behaviour every `StateStore` backend must share.
pub async fn run_state_store_contract<S: StateStore + ?Sized>(store: &S) {
    let id = format!("contract-{}", uuid::Uuid::new_v4());

    let mut state = State::new(id.clone(), "start");
    state.current_node_id = "checkout".into();
    state.context.insert("plan".into(), json!("pro"));
    state.context.insert("seats".into(), json!(3));
    store.save(&id, &state).await.expect("save");

    let loaded = store.load(&id).await.expect("load");
    assert_eq!(loaded.current_node_id, "checkout");
    assert_eq!(loaded.context.get("plan"), Some(&json!("pro")));
    assert_eq!(loaded.context.get("seats"), Some(&json!(3)));
    assert_eq!(loaded, state);

    let missing = store.load("contract-missing").await.unwrap_err();
    assert!(missing.is_not_found(), "expected not-found, got {missing}");

    let ids = store.list().await.expect("list");
    assert!(ids.contains(&id));

    store.delete(&id).await.expect("delete");
    assert!(store.load(&id).await.unwrap_err().is_not_found());
    store.delete("contract-never-existed").await.expect("delete unknown");
    assert!(!store.list().await.expect("list").contains(&id));
}

/// Hooks that remember every event in arrival order.
#[derive(Default)]
pub struct RecordingHooks {
    node_events: Mutex<Vec<NodeEvent>>,
    tool_events: Mutex<Vec<ToolEvent>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_events(&self) -> Vec<NodeEvent> {
        self.node_events.lock().unwrap().clone()
    }

    pub fn tool_events(&self) -> Vec<ToolEvent> {
        self.tool_events.lock().unwrap().clone()
    }

    /// `(event_type, node_id)` pairs of node events, for compact assertions.
    pub fn node_trace(&self) -> Vec<(EventType, String)> {
        self.node_events()
            .into_iter()
            .map(|e| (e.event_type, e.node_id))
            .collect()
    }

    pub fn clear(&self) {
        self.node_events.lock().unwrap().clear();
        self.tool_events.lock().unwrap().clear();
    }
}

impl LifecycleHooks for RecordingHooks {
    fn on_node_enter(&self, event: &NodeEvent) {
        self.node_events.lock().unwrap().push(event.clone());
    }

    fn on_node_leave(&self, event: &NodeEvent) {
        self.node_events.lock().unwrap().push(event.clone());
    }

    fn on_tool_call(&self, event: &ToolEvent) {
        self.tool_events.lock().unwrap().push(event.clone());
    }

    fn on_tool_return(&self, event: &ToolEvent) {
        self.tool_events.lock().unwrap().push(event.clone());
    }
}

/// A store whose every operation fails with `TrellisError::Store`.
#[derive(Default)]
pub struct FailingStore;

impl StateStore for FailingStore {
    fn save<'a>(&'a self, _session_id: &'a str, _state: &'a State) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(TrellisError::Store("disk on fire".into())) })
    }

    fn load<'a>(&'a self, _session_id: &'a str) -> BoxFuture<'a, Result<State>> {
        Box::pin(async { Err(TrellisError::Store("disk on fire".into())) })
    }

    fn delete<'a>(&'a self, _session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(TrellisError::Store("disk on fire".into())) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async { Err(TrellisError::Store("disk on fire".into())) })
    }
}

/// A loader that never answers, for exercising cancellation.
#[derive(Default)]
pub struct StalledLoader;

impl GraphLoader for StalledLoader {
    fn get_node(&self, _id: &str) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(futures::future::pending())
    }

    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(futures::future::pending())
    }
}

/// A loader that counts fetches and serves fixed raw definitions.
#[derive(Default)]
pub struct CountingLoader {
    nodes: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl CountingLoader {
    pub fn new(nodes: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl GraphLoader for CountingLoader {
    fn get_node(&self, id: &str) -> BoxFuture<'_, Result<Vec<u8>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let result = self
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| TrellisError::NodeNotFound(id.to_string()));
        Box::pin(async move { result })
    }

    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();
        Box::pin(async move { Ok(ids) })
    }
}

/// Distributed locker that records calls; optionally refuses to lock or unlock.
#[derive(Default)]
pub struct RecordingLocker {
    calls: Mutex<Vec<String>>,
    ttls: Mutex<Vec<Duration>>,
    fail_lock: bool,
    fail_unlock: bool,
}

impl RecordingLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_lock() -> Self {
        Self {
            fail_lock: true,
            ..Default::default()
        }
    }

    pub fn failing_unlock() -> Self {
        Self {
            fail_unlock: true,
            ..Default::default()
        }
    }

    /// Entries look like `lock:<key>` and `unlock:<key>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ttls(&self) -> Vec<Duration> {
        self.ttls.lock().unwrap().clone()
    }
}

impl DistributedLocker for RecordingLocker {
    fn lock<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("lock:{key}"));
            self.ttls.lock().unwrap().push(ttl);
            if self.fail_lock {
                return Err(TrellisError::Lock(format!("{key} is held elsewhere")));
            }
            Ok(())
        })
    }

    fn unlock<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("unlock:{key}"));
            if self.fail_unlock {
                return Err(TrellisError::Lock("lease already expired".into()));
            }
            Ok(())
        })
    }
}
