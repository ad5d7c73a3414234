use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_core::error::{Result, TrellisError, UnhandledToolError};
use trellis_core::types::{InputType, Node, State, Status, ToolResult, KEY_ANSWER};

use crate::engine::{is_rollback_target, Engine};
use crate::validation;

const TRUTHY: [&str; 4] = ["y", "yes", "true", "1"];
const FALSY: [&str; 4] = ["n", "no", "false", "0"];

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_input(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Apply input defaults and confirm normalization.
///
/// Confirm nodes turn an empty input into their default (or `yes`) and map
/// every accepted spelling onto `"yes"` or `"no"`.
pub fn normalize_input(node: &Node, input: Value) -> Result<Value> {
    let empty = is_empty_input(&input);

    if node.input_type == Some(InputType::Confirm) {
        let raw = if empty {
            node.input_default
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "yes".to_string())
        } else {
            as_text(&input)
        };
        let clean = raw.trim().to_lowercase();
        if TRUTHY.contains(&clean.as_str()) {
            return Ok(Value::String("yes".into()));
        }
        if FALSY.contains(&clean.as_str()) {
            return Ok(Value::String("no".into()));
        }
        return Err(TrellisError::InvalidInput(format!(
            "invalid confirmation input: '{}' (expected y/n/yes/no)",
            raw
        )));
    }

    match &node.input_default {
        Some(default) if empty && !default.is_empty() => Ok(Value::String(default.clone())),
        _ => Ok(input),
    }
}

/// `false`, or one of `n`/`no`/`false`/`deny` in any case.
pub fn is_refusal(input: &Value) -> bool {
    match input {
        Value::Bool(b) => !b,
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "n" | "no" | "false" | "deny"
        ),
        _ => false,
    }
}

impl Engine {
    /// Pick the next node: matching condition, then `on_denied` for a
    /// refusal, then the first unconditional edge. `None` means stay put.
    pub(crate) fn resolve_next(&self, node: &Node, input: &Value) -> Option<String> {
        if let Some(evaluator) = &self.evaluator {
            for t in node.transitions.iter().filter(|t| t.is_conditional()) {
                match evaluator.evaluate(&t.condition, input) {
                    Ok(true) => return Some(t.to_node_id.clone()),
                    Ok(false) => {}
                    Err(e) => {
                        debug!(node_id = %node.id, condition = %t.condition, error = %e, "Condition evaluation failed");
                    }
                }
            }
        }

        if is_refusal(input) {
            if let Some(target) = &node.on_denied {
                return Some(target.clone());
            }
        }

        node.transitions
            .iter()
            .find(|t| !t.is_conditional())
            .map(|t| t.to_node_id.clone())
    }

    /// Copy the state and bind the input to `sys.ans` and `save_to`.
    pub(crate) fn apply_input(&self, state: State, node: &Node, input: &Value) -> Result<State> {
        if let Some(key) = &node.save_to {
            validation::check_save_target(node, key)?;
        }

        let mut next = state;
        next.system_context
            .insert(KEY_ANSWER.to_string(), input.clone());
        if let Some(key) = &node.save_to {
            next.context.insert(key.clone(), input.clone());
        }
        Ok(next)
    }

    /// Ordinary navigation from an active node.
    pub(crate) async fn navigate_active(
        &self,
        state: State,
        node: &Node,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let input = normalize_input(node, input)?;
        let mut next = self.apply_input(state, node, &input)?;

        match self.resolve_next(node, &input) {
            Some(target) => self.leave_for(next, node, &target, cancel).await,
            None if node.transitions.is_empty() => {
                info!(session_id = %next.session_id, node_id = %node.id, "Session reached a dead end and terminated");
                next.status = Status::Terminated;
                next.pending_tool_call = None;
                self.emit_node_leave(&next.session_id, node);
                Ok(next)
            }
            None => {
                debug!(session_id = %next.session_id, node_id = %node.id, "No transition matched; staying on node");
                Ok(next)
            }
        }
    }

    /// Outcome of the pending `do` call on `node`.
    pub(crate) async fn handle_tool_result(
        &self,
        state: &State,
        node: &Node,
        result: &ToolResult,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let tool_name = node
            .r#do
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| result.id.clone());

        if result.is_denied {
            debug!(session_id = %state.session_id, node_id = %node.id, tool = %tool_name, "Tool execution denied");
            self.emit_tool_return(&state.session_id, &node.id, &tool_name, &result.result, true);

            let target = node
                .on_denied
                .clone()
                .or_else(|| node.on_error.clone())
                .or_else(|| self.default_error_node.clone());

            let mut next = state.clone();
            next.status = Status::Active;
            next.pending_tool_call = None;

            return match target {
                Some(target) => self.leave_for(next, node, &target, cancel).await,
                None => {
                    info!(session_id = %next.session_id, node_id = %node.id, "Unhandled denial; terminating session");
                    next.status = Status::Terminated;
                    self.emit_node_leave(&next.session_id, node);
                    Ok(next)
                }
            };
        }

        if result.is_error {
            self.emit_tool_return(&state.session_id, &node.id, &tool_name, &result.result, true);

            // Failed output never reaches SaveTo.
            let target = node
                .on_error
                .clone()
                .or_else(|| self.default_error_node.clone());
            let Some(target) = target else {
                warn!(session_id = %state.session_id, node_id = %node.id, tool = %tool_name, "Unhandled tool error");
                return Err(UnhandledToolError {
                    node_id: node.id.clone(),
                    tool_name,
                    cause: result.cause(),
                }
                .into());
            };

            info!(session_id = %state.session_id, node_id = %node.id, tool = %tool_name, target = %target, "Tool failed; following error handler");
            let mut next = state.clone();
            next.status = Status::Active;
            next.pending_tool_call = None;
            return self.leave_for(next, node, &target, cancel).await;
        }

        self.emit_tool_return(&state.session_id, &node.id, &tool_name, &result.result, false);

        let mut resumed = state.clone();
        resumed.status = Status::Active;
        resumed.pending_tool_call = None;
        self.navigate_active(resumed, node, result.result.clone(), cancel)
            .await
    }

    /// Leave `from` for `target`, a node ID or the rollback keyword.
    ///
    /// The leave hook fires only once the move has succeeded, so a missing
    /// target reports nothing.
    pub(crate) async fn leave_for(
        &self,
        next: State,
        from: &Node,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<State> {
        if is_rollback_target(target) {
            let next = self.start_rollback(next, cancel).await?;
            self.emit_node_leave(&next.session_id, from);
            return Ok(next);
        }
        self.transition_to(next, from, target, cancel).await
    }

    /// Move `next` from `from` onto `target`, recording it in history.
    async fn transition_to(
        &self,
        mut next: State,
        from: &Node,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let node = self.fetch_node(target, cancel).await?;

        next.current_node_id = target.to_string();
        next.history.push(target.to_string());
        next.status = Status::Active;
        next.pending_tool_call = None;

        if let Some(call) = &node.r#do {
            next.status = Status::WaitingForTool;
            next.pending_tool_call = Some(call.correlation_id().to_string());
        }

        debug!(session_id = %next.session_id, node_id = target, status = %next.status, "Transitioned");
        self.warn_on_history_growth(&next);
        self.emit_node_leave(&next.session_id, from);
        self.emit_node_enter(&next.session_id, &node);
        Ok(next)
    }
}
