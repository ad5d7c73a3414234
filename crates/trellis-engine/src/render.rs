use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use trellis_core::error::Result;
use trellis_core::types::{
    parse_duration, InputRequest, Node, NodeType, State, Status, ToolCall, KEY_IDEMPOTENCY,
};

use crate::engine::Engine;

impl Engine {
    pub(crate) fn render_content(&self, node: &Node, state: &State) -> Result<Option<String>> {
        let textual = matches!(node.node_type, NodeType::Text | NodeType::Question);
        if node.content.is_empty() && !(textual && node.r#do.is_none()) {
            return Ok(None);
        }
        match &self.interpolator {
            Some(interpolator) => interpolator
                .interpolate(&node.content, &state.template_data())
                .map(Some),
            None => Ok(Some(node.content.clone())),
        }
    }

    pub(crate) fn render_input_request(&self, node: &Node) -> Option<InputRequest> {
        if !node.needs_input() {
            return None;
        }

        let timeout = node.timeout.as_deref().and_then(|raw| {
            let parsed = parse_duration(raw);
            if parsed.is_none() {
                warn!(node_id = %node.id, timeout = raw, "Ignoring unparseable node timeout");
            }
            parsed
        });

        Some(InputRequest {
            input_type: node.input_type.unwrap_or_default(),
            options: node.input_options.clone(),
            default: node.input_default.clone(),
            timeout,
        })
    }

    /// The `do` call normally, the `undo` call while rolling back.
    pub(crate) fn render_tool_call(&self, node: &Node, state: &State) -> Result<Option<ToolCall>> {
        let source = if state.status == Status::RollingBack {
            node.undo.as_ref()
        } else {
            node.r#do.as_ref()
        };
        let Some(source) = source else {
            return Ok(None);
        };

        let mut call = source.clone();
        call.metadata
            .extend(node.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

        let key = Engine::idempotency_key(state, &call.name);
        call.metadata.insert(KEY_IDEMPOTENCY.to_string(), key.clone());
        call.idempotency_key = key;

        if let Some(interpolator) = &self.interpolator {
            let data = state.template_data();
            let mut args = HashMap::with_capacity(call.args.len());
            for (name, value) in call.args {
                let value = match value {
                    Value::String(s) if s.contains("{{") => {
                        Value::String(interpolator.interpolate(&s, &data)?)
                    }
                    other => other,
                };
                args.insert(name, value);
            }
            call.args = args;
        }

        Ok(Some(call))
    }
}
