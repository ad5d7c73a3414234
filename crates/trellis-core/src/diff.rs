use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{State, Status};

/// Changes between two snapshots of the same session, for partial client updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<bool>,
    /// Added or modified keys; deleted keys map to `null`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, Value>,
    /// Node IDs appended to history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history_appended: Vec<String>,
}

impl StateDiff {
    /// Diff `new` against `old`; `None` when nothing changed.
    /// A missing `old` treats the whole of `new` as the delta.
    pub fn between(old: Option<&State>, new: &State) -> Option<Self> {
        let mut diff = StateDiff {
            session_id: new.session_id.clone(),
            ..Default::default()
        };

        match old {
            None => {
                diff.current_node_id = Some(new.current_node_id.clone());
                diff.status = Some(new.status);
                if new.is_terminated() {
                    diff.terminated = Some(true);
                }
                diff.context = new.context.clone();
                diff.history_appended = new.history.clone();
            }
            Some(old) => {
                if old.current_node_id != new.current_node_id {
                    diff.current_node_id = Some(new.current_node_id.clone());
                }
                if old.status != new.status {
                    diff.status = Some(new.status);
                }
                if old.is_terminated() != new.is_terminated() {
                    diff.terminated = Some(new.is_terminated());
                }
                for (k, v) in &new.context {
                    if old.context.get(k) != Some(v) {
                        diff.context.insert(k.clone(), v.clone());
                    }
                }
                for k in old.context.keys() {
                    if !new.context.contains_key(k) {
                        diff.context.insert(k.clone(), Value::Null);
                    }
                }
                // History is append-only outside rollback; shrinkage is reported via status.
                if new.history.len() > old.history.len() {
                    diff.history_appended = new.history[old.history.len()..].to_vec();
                }
            }
        }

        if diff.is_empty() {
            None
        } else {
            Some(diff)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_node_id.is_none()
            && self.status.is_none()
            && self.terminated.is_none()
            && self.context.is_empty()
            && self.history_appended.is_empty()
    }
}
