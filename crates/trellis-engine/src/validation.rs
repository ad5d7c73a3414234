use trellis_core::error::{
    ContextTypeValidationError, ContextValidationError, Result, TrellisError,
};
use trellis_core::schema::SchemaRegistry;
use trellis_core::types::{Node, NodeType, State, Status, SYSTEM_NAMESPACE};

/// Reject node definitions that cannot be executed as written.
pub fn validate_execution(node: &Node, status: Status) -> Result<()> {
    if node.r#do.is_some() && node.needs_input() {
        return Err(TrellisError::InvalidNode {
            node_id: node.id.clone(),
            reason: "cannot have both 'do' (tool) and 'wait/input' in the same node".into(),
        });
    }
    if node.node_type == NodeType::Tool && node.r#do.is_none() && status != Status::RollingBack {
        return Err(TrellisError::InvalidNode {
            node_id: node.id.clone(),
            reason: "node is type 'tool' but has no 'do' tool call".into(),
        });
    }
    Ok(())
}

/// Required keys first, then the typed schema. Never touches the state.
pub fn validate_context(node: &Node, state: &State, registry: &SchemaRegistry) -> Result<()> {
    let missing: Vec<String> = node
        .required_context
        .iter()
        .filter(|key| state.lookup(key).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ContextValidationError {
            node_id: node.id.clone(),
            missing_keys: missing,
        }
        .into());
    }

    if node.context_schema.is_empty() {
        return Ok(());
    }
    let violations = registry.check(&node.context_schema, |key| state.lookup(key));
    if !violations.is_empty() {
        return Err(ContextTypeValidationError {
            node_id: node.id.clone(),
            violations,
        }
        .into());
    }
    Ok(())
}

/// `SaveTo` may never write into the engine-owned namespace.
pub fn check_save_target(node: &Node, key: &str) -> Result<()> {
    let reserved = key == SYSTEM_NAMESPACE
        || key
            .strip_prefix(SYSTEM_NAMESPACE)
            .is_some_and(|rest| rest.starts_with('.'));
    if reserved {
        return Err(TrellisError::SecurityViolation {
            node_id: node.id.clone(),
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_core::types::{InputType, ToolCall};

    #[test]
    fn test_do_with_input_is_invalid() {
        let node = Node::new("bad")
            .with_do(ToolCall::new("t", "tool"))
            .with_input(InputType::Text);
        let err = validate_execution(&node, Status::Active).unwrap_err();
        assert!(matches!(err, TrellisError::InvalidNode { node_id, .. } if node_id == "bad"));

        let question = Node::new("q")
            .with_type(NodeType::Question)
            .with_do(ToolCall::new("t", "tool"));
        assert!(validate_execution(&question, Status::Active).is_err());
    }

    #[test]
    fn test_tool_node_needs_do_outside_rollback() {
        let node = Node::new("t").with_type(NodeType::Tool);
        assert!(validate_execution(&node, Status::Active).is_err());
        assert!(validate_execution(&node, Status::RollingBack).is_ok());
    }

    #[test]
    fn test_required_keys_union_lookup() {
        let node = Node::new("start")
            .with_required_context(vec!["api_key".into(), "region".into(), "ans".into()]);
        let mut state = State::new("s", "start");
        state.context.insert("region".into(), json!("eu"));
        state.system_context.insert("ans".into(), json!("y"));

        let err = validate_context(&node, &state, &SchemaRegistry::new()).unwrap_err();
        match err {
            TrellisError::ContextValidation(e) => {
                assert_eq!(e.node_id, "start");
                assert_eq!(e.missing_keys, vec!["api_key"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        state.context.insert("api_key".into(), json!("k"));
        assert!(validate_context(&node, &state, &SchemaRegistry::new()).is_ok());
    }

    #[test]
    fn test_schema_violations_are_enumerated() {
        let node = Node::new("n").with_schema("seats", "int").with_schema("tags", "[string]");
        let mut state = State::new("s", "n");
        state.context.insert("seats".into(), json!("three"));
        state.context.insert("tags".into(), json!(["a", 1]));

        let err = validate_context(&node, &state, &SchemaRegistry::new()).unwrap_err();
        match err {
            TrellisError::ContextTypeValidation(e) => {
                let keys: Vec<&str> = e.violations.iter().map(|v| v.key.as_str()).collect();
                assert_eq!(keys, vec!["seats", "tags"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reserved_save_targets() {
        let node = Node::new("n");
        assert!(check_save_target(&node, "sys").is_err());
        assert!(check_save_target(&node, "sys.ans").is_err());
        assert!(check_save_target(&node, "system").is_ok());
        assert!(check_save_target(&node, "answer").is_ok());
    }
}
