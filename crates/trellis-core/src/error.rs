use std::fmt;

use thiserror::Error;

/// A node requires context keys that are absent from both Context and SystemContext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Node '{node_id}' requires context keys that are missing: {missing_keys:?}")]
pub struct ContextValidationError {
    pub node_id: String,
    pub missing_keys: Vec<String>,
}

/// A single failed schema assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {:?}: {}", self.key, self.reason)
    }
}

/// Context values do not match the node's declared schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ContextTypeValidationError {
    pub node_id: String,
    pub violations: Vec<SchemaViolation>,
}

impl fmt::Display for ContextTypeValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node '{}' has invalid context types: ", self.node_id)?;
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// A tool failed and neither the node, a rollback, nor a global handler caught it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Tool '{tool_name}' (Node '{node_id}') failed with: '{cause}'. Execution halted because no \
     'on_error' handler is defined. Fix: add 'on_error: <node_id>' to node '{node_id}'."
)]
pub struct UnhandledToolError {
    pub node_id: String,
    pub tool_name: String,
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum TrellisError {
    // Graph errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Graph loader error: {0}")]
    Loader(String),

    #[error("Failed to parse node: {0}")]
    NodeParse(String),

    #[error("Node {node_id} violation: {reason}")]
    InvalidNode { node_id: String, reason: String },

    // Context errors
    #[error(transparent)]
    ContextValidation(#[from] ContextValidationError),

    #[error(transparent)]
    ContextTypeValidation(#[from] ContextTypeValidationError),

    #[error("Security violation: cannot save to reserved namespace 'sys' (key '{key}') in node {node_id}")]
    SecurityViolation { node_id: String, key: String },

    // Navigation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tool result ID {got} does not match pending call {expected}")]
    ToolResultMismatch { expected: String, got: String },

    #[error("Unexpected input while {status}: {message}")]
    UnexpectedInput { status: String, message: String },

    #[error("Session {0} has already terminated")]
    SessionTerminated(String),

    #[error(transparent)]
    UnhandledTool(#[from] UnhandledToolError),

    #[error("Unhandled signal: {0}")]
    UnhandledSignal(String),

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Operation cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrellisError {
    /// True for the "does not exist" family, which hosts treat as "create new".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TrellisError::SessionNotFound(_) | TrellisError::NodeNotFound(_)
        )
    }

    /// Whether retrying after the caller corrects its input can succeed.
    ///
    /// Security violations and unhandled tool failures halt the flow for
    /// operator intervention and are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrellisError::ContextValidation(_)
                | TrellisError::ContextTypeValidation(_)
                | TrellisError::InvalidInput(_)
                | TrellisError::UnhandledSignal(_)
                | TrellisError::NodeNotFound(_)
                | TrellisError::SessionNotFound(_)
                | TrellisError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_validation_message() {
        let err = ContextValidationError {
            node_id: "start".into(),
            missing_keys: vec!["api_key".into()],
        };
        assert_eq!(
            err.to_string(),
            r#"Node 'start' requires context keys that are missing: ["api_key"]"#
        );
    }

    #[test]
    fn test_unhandled_tool_message_names_fix() {
        let err = TrellisError::from(UnhandledToolError {
            node_id: "charge".into(),
            tool_name: "stripe".into(),
            cause: "card declined".into(),
        });
        let msg = err.to_string();
        assert!(msg.contains("Tool 'stripe' (Node 'charge')"));
        assert!(msg.contains("card declined"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_type_validation_lists_every_violation() {
        let err = ContextTypeValidationError {
            node_id: "n".into(),
            violations: vec![
                SchemaViolation {
                    key: "age".into(),
                    reason: "expected int, got string".into(),
                },
                SchemaViolation {
                    key: "name".into(),
                    reason: "required".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains(r#"field "age": expected int"#));
        assert!(msg.contains(r#"field "name": required"#));
    }

    #[test]
    fn test_retry_classification() {
        assert!(TrellisError::UnhandledSignal("timeout".into()).is_retryable());
        assert!(TrellisError::SessionNotFound("s".into()).is_not_found());
        assert!(!TrellisError::SecurityViolation {
            node_id: "n".into(),
            key: "sys".into()
        }
        .is_retryable());
    }
}
