use tracing::{debug, info, warn};

use crate::types::{NodeEvent, ToolEvent};

/// Host-supplied observers, fired synchronously by the engine.
/// Implementations must stay fast and non-blocking.
pub trait LifecycleHooks: Send + Sync + 'static {
    fn on_node_enter(&self, _event: &NodeEvent) {}

    fn on_node_leave(&self, _event: &NodeEvent) {}

    fn on_tool_call(&self, _event: &ToolEvent) {}

    fn on_tool_return(&self, _event: &ToolEvent) {}
}

/// Emits every lifecycle event as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

impl LifecycleHooks for TracingHooks {
    fn on_node_enter(&self, event: &NodeEvent) {
        debug!(
            session_id = %event.session_id,
            node_id = %event.node_id,
            node_type = %event.node_type,
            "Node entered"
        );
    }

    fn on_node_leave(&self, event: &NodeEvent) {
        debug!(
            session_id = %event.session_id,
            node_id = %event.node_id,
            node_type = %event.node_type,
            "Node left"
        );
    }

    fn on_tool_call(&self, event: &ToolEvent) {
        info!(
            session_id = %event.session_id,
            node_id = %event.node_id,
            tool = %event.tool_name,
            "Tool call requested"
        );
    }

    fn on_tool_return(&self, event: &ToolEvent) {
        if event.is_error {
            warn!(
                session_id = %event.session_id,
                node_id = %event.node_id,
                tool = %event.tool_name,
                "Tool returned an error"
            );
        } else {
            info!(
                session_id = %event.session_id,
                node_id = %event.node_id,
                tool = %event.tool_name,
                "Tool returned"
            );
        }
    }
}
