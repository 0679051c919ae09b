//! Translation of handler results into `tools/call` results

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent};
use serde_json::{Map, Value};

/// Property of an object result that is lifted into `structuredContent`.
pub const STRUCTURED_CONTENT_PROPERTY: &str = "structuredContent";

const CONTENT_BLOCK_TYPES: &[&str] = &["text", "image", "audio", "resource", "resource_link"];

/// What a tool handler writes into its result slot.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Content(ContentBlock),
    ContentList(Vec<ContentBlock>),
    Value(Value),
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<ContentBlock> for ToolOutput {
    fn from(block: ContentBlock) -> Self {
        Self::Content(block)
    }
}

impl From<Vec<ContentBlock>> for ToolOutput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::ContentList(blocks)
    }
}

impl ToolOutput {
    /// Classifies a JSON result: a typed content block, an array made only of
    /// content blocks, or a plain value.
    pub fn from_json(value: Value) -> Self {
        if let Some(block) = as_content_block(&value) {
            return Self::Content(block);
        }

        if let Some(items) = value.as_array().filter(|items| !items.is_empty()) {
            let blocks = items.iter().map(as_content_block).collect::<Option<Vec<_>>>();
            if let Some(blocks) = blocks {
                return Self::ContentList(blocks);
            }
        }

        Self::Value(value)
    }

    pub fn into_call_tool_result(self) -> CallToolResult {
        match self {
            Self::Content(block) => tool_result(vec![block], None, None),
            Self::ContentList(blocks) => tool_result(blocks, None, None),
            Self::Value(value) => {
                let (value, structured) = split_structured_content(value);
                let text = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                tool_result(vec![text_block(text)], structured, None)
            }
        }
    }
}

pub fn error_result(message: impl Into<String>) -> CallToolResult {
    tool_result(vec![text_block(message.into())], None, Some(true))
}

fn tool_result(
    content: Vec<ContentBlock>,
    structured_content: Option<Map<String, Value>>,
    is_error: Option<bool>,
) -> CallToolResult {
    CallToolResult {
        content,
        is_error,
        meta: None,
        structured_content,
    }
}

fn text_block(text: String) -> ContentBlock {
    ContentBlock::from(TextContent::new(text, None, None))
}

fn as_content_block(value: &Value) -> Option<ContentBlock> {
    let kind = value.get("type").and_then(Value::as_str)?;
    if !CONTENT_BLOCK_TYPES.contains(&kind) {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

fn split_structured_content(value: Value) -> (Value, Option<Map<String, Value>>) {
    match value {
        Value::Object(mut object) => match object.remove(STRUCTURED_CONTENT_PROPERTY) {
            Some(Value::Object(structured)) => (Value::Object(object), Some(structured)),
            Some(other) => {
                object.insert(STRUCTURED_CONTENT_PROPERTY.to_string(), other);
                (Value::Object(object), None)
            }
            None => (Value::Object(object), None),
        },
        other => (other, None),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn render(output: ToolOutput) -> Value {
        serde_json::to_value(output.into_call_tool_result()).expect("serializes")
    }

    #[test]
    fn string_value_becomes_verbatim_text_block() {
        let result = render(ToolOutput::from("hi"));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hi");
        assert!(result.get("structuredContent").is_none());
    }

    #[test]
    fn object_value_is_rendered_as_json_text() {
        let result = render(ToolOutput::from(json!({"count": 2})));
        assert_eq!(result["content"][0]["text"], "{\"count\":2}");
    }

    #[test]
    fn structured_content_property_is_lifted() {
        let result = render(ToolOutput::from(json!({
            "summary": "2 units",
            "structuredContent": {"units": ["a", "b"]}
        })));

        assert_eq!(result["structuredContent"]["units"], json!(["a", "b"]));
        assert_eq!(result["content"][0]["text"], "{\"summary\":\"2 units\"}");
    }

    #[test]
    fn typed_json_block_is_passed_through() {
        let output = ToolOutput::from_json(json!({"type": "text", "text": "raw"}));
        assert!(matches!(output, ToolOutput::Content(_)));
        assert_eq!(render(output)["content"][0]["text"], "raw");
    }

    #[test]
    fn handler_json_is_classified_on_conversion() {
        let output = ToolOutput::from(json!({"type": "text", "text": "raw"}));
        assert!(matches!(output, ToolOutput::Content(_)));
        assert_eq!(render(output)["content"][0]["text"], "raw");

        let output = ToolOutput::from(json!({"type": "note", "text": "raw"}));
        assert!(matches!(output, ToolOutput::Value(_)));
    }

    #[test]
    fn array_of_blocks_becomes_content_list() {
        let output = ToolOutput::from_json(json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": "two"}
        ]));
        assert!(matches!(output, ToolOutput::ContentList(ref blocks) if blocks.len() == 2));
    }

    #[test]
    fn mixed_array_stays_a_value() {
        let output = ToolOutput::from_json(json!([{"type": "text", "text": "one"}, 2]));
        assert!(matches!(output, ToolOutput::Value(_)));
    }

    #[test]
    fn error_result_is_flagged() {
        let result = serde_json::to_value(error_result("boom")).expect("serializes");
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "boom");
    }
}
