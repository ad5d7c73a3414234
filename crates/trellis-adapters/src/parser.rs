use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::NodeParser;
use trellis_core::types::Node;

/// Parses nodes stored as JSON documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonNodeParser;

impl NodeParser for JsonNodeParser {
    fn parse(&self, raw: &[u8]) -> Result<Node> {
        let node: Node =
            serde_json::from_slice(raw).map_err(|e| TrellisError::NodeParse(e.to_string()))?;
        if node.id.trim().is_empty() {
            return Err(TrellisError::NodeParse("node missing ID".into()));
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::NodeType;

    #[test]
    fn test_parse_tool_node() {
        let raw = br#"{
            "id": "fetch",
            "type": "tool",
            "do": {"id": "f1", "name": "http_get", "args": {"url": "https://example.com"}},
            "on_error": "rollback",
            "transitions": [{"to_node_id": "done"}]
        }"#;
        let node = JsonNodeParser.parse(raw).unwrap();
        assert_eq!(node.node_type, NodeType::Tool);
        assert_eq!(node.r#do.as_ref().unwrap().name, "http_get");
        assert_eq!(node.on_error.as_deref(), Some("rollback"));
    }

    #[test]
    fn test_rejects_missing_id() {
        let err = JsonNodeParser.parse(br#"{"content": "orphan"}"#).unwrap_err();
        assert!(err.to_string().contains("node missing ID"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            JsonNodeParser.parse(b"{not json"),
            Err(TrellisError::NodeParse(_))
        ));
    }
}
