use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use trellis_core::config::SessionSection;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{DistributedLocker, StateStore};
use trellis_core::types::State;

struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    refs: usize,
}

/// Serializes access to each session's persisted state.
///
/// Locks are per session ID and reference counted: an entry exists only
/// while someone holds or waits for it, so the table does not grow with the
/// number of sessions ever seen.
pub struct SessionManager {
    store: Arc<dyn StateStore>,
    locks: Mutex<HashMap<String, LockEntry>>,
    locker: Option<Arc<dyn DistributedLocker>>,
    lock_ttl: Duration,
    default_start_node: String,
}

/// One reference on a lock entry; dropping it releases the reference.
struct LockTicket<'a> {
    manager: &'a SessionManager,
    session_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LockTicket<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.session_id);
    }
}

impl SessionManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::from_config(store, &SessionSection::default())
    }

    /// Apply the `[session]` section of a config file.
    pub fn from_config(store: Arc<dyn StateStore>, config: &SessionSection) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            locker: None,
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            default_start_node: config.default_start_node.clone(),
        }
    }

    /// Also take a cross-process lock for every operation.
    pub fn with_locker(mut self, locker: Arc<dyn DistributedLocker>) -> Self {
        self.locker = Some(locker);
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Number of lock entries currently alive.
    pub fn active_locks(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockEntry>> {
        // Entries are only counters; a panic elsewhere cannot leave them torn.
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self, session_id: &str) -> LockTicket<'_> {
        let mut table = self.table();
        let entry = table
            .entry(session_id.to_string())
            .or_insert_with(|| LockEntry {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                refs: 0,
            });
        entry.refs += 1;
        LockTicket {
            manager: self,
            session_id: session_id.to_string(),
            lock: entry.lock.clone(),
        }
    }

    fn release(&self, session_id: &str) {
        let mut table = self.table();
        if let Some(entry) = table.get_mut(session_id) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                table.remove(session_id);
            }
        }
    }

    /// Run `f` while holding the session's lock.
    ///
    /// With a distributed locker configured, its lock is taken inside the
    /// local one and released afterwards; a failed release is only logged.
    pub async fn with_lock<F, Fut, T>(&self, session_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ticket = self.acquire(session_id);
        let _guard = ticket.lock.clone().lock_owned().await;

        if let Some(locker) = &self.locker {
            locker.lock(session_id, self.lock_ttl).await.map_err(|e| {
                warn!(session_id, error = %e, "Failed to acquire distributed lock");
                match e {
                    TrellisError::Lock(_) => e,
                    other => TrellisError::Lock(other.to_string()),
                }
            })?;
        }

        let result = f().await;

        if let Some(locker) = &self.locker {
            if let Err(e) = locker.unlock(session_id).await {
                warn!(session_id, error = %e, "Failed to release distributed lock");
            }
        }
        result
    }

    pub async fn load(&self, session_id: &str) -> Result<State> {
        self.with_lock(session_id, || self.store.load(session_id))
            .await
    }

    pub async fn save(&self, session_id: &str, state: &State) -> Result<()> {
        self.with_lock(session_id, || self.store.save(session_id, state))
            .await
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.with_lock(session_id, || self.store.delete(session_id))
            .await
    }

    /// Not locked: listing is a snapshot of the store.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.store.list().await
    }

    /// Load the session, or create and persist a fresh one at `start_node`
    /// (the configured default when empty). Atomic per session ID.
    pub async fn load_or_start(&self, session_id: &str, start_node: &str) -> Result<State> {
        let start_node = if start_node.is_empty() {
            self.default_start_node.as_str()
        } else {
            start_node
        };

        self.with_lock(session_id, || async move {
            match self.store.load(session_id).await {
                Ok(state) => {
                    debug!(session_id, node_id = %state.current_node_id, "Session resumed");
                    Ok(state)
                }
                Err(TrellisError::SessionNotFound(_)) => {
                    let state = State::new(session_id, start_node);
                    self.store.save(session_id, &state).await.map_err(|e| {
                        TrellisError::Store(format!("failed to initialize session: {}", e))
                    })?;
                    info!(session_id, start_node, "Session created");
                    Ok(state)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }
}
