use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::Result;
use crate::types::{Node, State};

/// Graph loader: resolves node IDs to raw definitions.
pub trait GraphLoader: Send + Sync + 'static {
    /// Fetch the raw bytes of a node. Missing nodes yield `TrellisError::NodeNotFound`.
    fn get_node(&self, id: &str) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// List every node ID in the graph.
    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Stream of changed node IDs, if this loader can watch its source.
    fn watch(&self) -> Option<BoxStream<'static, String>> {
        None
    }
}

/// Node parser: turns raw bytes into a typed `Node`.
pub trait NodeParser: Send + Sync + 'static {
    /// Must reject a node without an ID.
    fn parse(&self, raw: &[u8]) -> Result<Node>;
}

/// State store: persistence backend behind the session manager.
pub trait StateStore: Send + Sync + 'static {
    fn save<'a>(&'a self, session_id: &'a str, state: &'a State) -> BoxFuture<'a, Result<()>>;

    /// Returns `TrellisError::SessionNotFound` for unknown IDs.
    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<State>>;

    /// Deleting an unknown ID is not an error.
    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Condition evaluator for transition expressions.
pub trait ConditionEvaluator: Send + Sync + 'static {
    fn evaluate(&self, expression: &str, input: &Value) -> Result<bool>;
}

/// Template interpolator for node content and tool arguments.
pub trait Interpolator: Send + Sync + 'static {
    /// `data` is the session context with SystemContext nested under `sys`.
    fn interpolate(&self, template: &str, data: &Value) -> Result<String>;
}

/// Cross-process lock, layered under the session manager's local lock.
pub trait DistributedLocker: Send + Sync + 'static {
    /// Block until the lock for `key` is held or the backend gives up.
    fn lock<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>>;

    fn unlock<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&str, &Value) -> Result<bool> + Send + Sync + 'static,
{
    fn evaluate(&self, expression: &str, input: &Value) -> Result<bool> {
        self(expression, input)
    }
}
