//! Compensation by unwinding history.
//!
//! History doubles as the undo log. Rolling back pops node IDs off its tail
//! and stops at every node that declares an `undo` call, which the host runs
//! like any other tool call. All progress lives in `State`, so a rollback can
//! be resumed after a restart.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trellis_core::error::{Result, UnhandledToolError};
use trellis_core::types::{State, Status, ToolResult};

use crate::engine::Engine;

impl Engine {
    /// Begin rolling back. The current node failed or was abandoned, so it
    /// has nothing to compensate and is popped first.
    pub(crate) async fn start_rollback(
        &self,
        state: State,
        cancel: &CancellationToken,
    ) -> Result<State> {
        info!(session_id = %state.session_id, node_id = %state.current_node_id, "Starting rollback");
        self.continue_rollback(state, true, cancel).await
    }

    /// Completion of the pending `undo` call.
    ///
    /// A failed or denied compensation halts the rollback where it is.
    pub(crate) async fn resume_rollback(
        &self,
        state: &State,
        result: &ToolResult,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let node = self.fetch_node(&state.current_node_id, cancel).await?;
        let tool_name = node
            .undo
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| result.id.clone());
        let failed = result.is_error || result.is_denied;
        self.emit_tool_return(&state.session_id, &node.id, &tool_name, &result.result, failed);

        if failed {
            warn!(session_id = %state.session_id, node_id = %node.id, tool = %tool_name, "Compensation failed; rollback halted");
            let cause = if result.is_denied && !result.is_error {
                "compensation denied".to_string()
            } else {
                result.cause()
            };
            return Err(UnhandledToolError {
                node_id: node.id.clone(),
                tool_name,
                cause,
            }
            .into());
        }

        self.continue_rollback(state.clone(), true, cancel).await
    }

    async fn continue_rollback(
        &self,
        mut state: State,
        pop_current: bool,
        cancel: &CancellationToken,
    ) -> Result<State> {
        state.status = Status::RollingBack;
        state.pending_tool_call = None;
        if pop_current {
            state.history.pop();
        }

        while let Some(top) = state.history.last().cloned() {
            let node = self.fetch_node(&top, cancel).await?;
            state.current_node_id = top;

            if let Some(undo) = &node.undo {
                info!(
                    session_id = %state.session_id,
                    node_id = %node.id,
                    tool = %undo.name,
                    remaining = state.history.len(),
                    "Awaiting compensation"
                );
                state.pending_tool_call = Some(undo.correlation_id().to_string());
                return Ok(state);
            }
            state.history.pop();
        }

        info!(session_id = %state.session_id, "Rollback complete; session terminated");
        state.status = Status::Terminated;
        state.current_node_id.clear();
        Ok(state)
    }
}
