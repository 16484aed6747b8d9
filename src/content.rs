//! Content block and session-update variant types (spec §3).
//!
//! Grounded on the tagged-enum style used for multi-provider message content
//! in the retrieval pack's unified LLM message types: a serde-tagged enum
//! per variant, each carrying its own optional `_meta`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        _meta: Option<Value>,
    },
    Image {
        data: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        _meta: Option<Value>,
    },
    Resource {
        uri: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        _meta: Option<Value>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        _meta: Option<Value>,
    },
    ToolResult {
        tool_call_id: String,
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        _meta: Option<Value>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            _meta: None,
        }
    }

    /// Concatenates the text of every `Text` block, ignoring other variants.
    /// Used by the Pi translator to flatten `params.prompt` into a single
    /// message string (spec §4.5).
    pub fn concat_text(blocks: &[ContentBlock]) -> String {
        blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Usage counters reported with a `usage` session update or a normalized
/// response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Streaming notification payload (spec §3: "session update").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    ContentChunk { block: ContentBlock },
    ThoughtChunk { text: String },
    ToolCall { id: String, name: String, input: Value },
    ToolResult { tool_call_id: String, content: Vec<ContentBlock>, is_error: bool },
    Usage { usage: Usage },
}

/// The canonical, backend-agnostic response shape a normalizer produces
/// (spec §4.5, Normalizer entry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_text_ignores_non_text_blocks() {
        let blocks = vec![
            ContentBlock::text("hello "),
            ContentBlock::ToolUse {
                id: "t1".into(),
                name: "search".into(),
                input: Value::Null,
                _meta: None,
            },
            ContentBlock::text("world"),
        ];
        assert_eq!(ContentBlock::concat_text(&blocks), "hello world");
    }

    #[test]
    fn normalized_response_round_trips() {
        let resp = NormalizedResponse {
            content: vec![ContentBlock::text("hi")],
            stop_reason: Some("end_turn".into()),
            usage: Some(Usage {
                input_tokens: Some(10),
                output_tokens: Some(3),
            }),
            backend: "anthropic".into(),
            model: Some("claude-sonnet-4".into()),
            id: None,
        };
        let v = serde_json::to_value(&resp).unwrap();
        let back: NormalizedResponse = serde_json::from_value(v).unwrap();
        assert_eq!(back, resp);
    }
}
