// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Canonical conversation types ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A tool invocation requested by the model.
///
/// `id` is the pairing key: the matching result must carry the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object
    pub arguments: Value,
}

/// A single content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// A completed tool result attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// Id of the tool call this result answers.
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl ToolResultBlock {
    /// Concatenated text of all content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| b.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One message in the canonical, provider-ready conversation.
///
/// This is the reconstruction output and the sole input shape any provider
/// driver consumes; per-provider wire formatting is a pure transformation
/// over it. Assistant messages may carry `tool_calls`; user messages may
/// carry `tool_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultBlock>,
    /// Prompt-cache marker. Drivers without cache controls ignore it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cacheable: bool,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            cacheable: false,
        }
    }

    /// Assistant message carrying the tool calls the model issued with it.
    pub fn assistant_with_tool_calls(
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, text)
        }
    }

    /// User message carrying completed tool results.
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            tool_results: results,
            ..Self::plain(Role::User, "")
        }
    }

    /// Approximate token count used for context management: 4 chars ≈ 1 token.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        for tc in &self.tool_calls {
            chars += tc.name.len() + tc.arguments.to_string().len();
        }
        for tr in &self.tool_results {
            chars += tr.text().len();
        }
        (chars / 4).max(1)
    }
}

// ─── Provider request/response types ──────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// A thinking/reasoning delta (extended thinking API)
    ThinkingDelta(String),
    /// The model wants to call a tool. Arguments may arrive across multiple
    /// deltas; `index` distinguishes interleaved parallel calls.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        cache_read_tokens: u32,
        cache_creation_tokens: u32,
    },
    /// The stream finished normally
    Done,
    /// A recoverable error (non-fatal warning)
    Error(String),
}

/// Token usage from one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Aggregated (non-streaming) provider response.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn user_message_has_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(m.tool_calls.is_empty());
        assert!(m.tool_results.is_empty());
    }

    #[test]
    fn assistant_with_tool_calls_attaches_calls() {
        let m = Message::assistant_with_tool_calls(
            "on it",
            vec![ToolCallRequest {
                id: "t1".into(),
                name: "file_list".into(),
                arguments: json!({"path": "."}),
            }],
        );
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.tool_calls.len(), 1);
        assert_eq!(m.tool_calls[0].name, "file_list");
    }

    #[test]
    fn tool_results_message_is_user_role() {
        let m = Message::tool_results(vec![ToolResultBlock {
            id: "t1".into(),
            content: vec![ContentBlock::text("ok")],
            is_error: false,
        }]);
        assert_eq!(m.role, Role::User);
        assert_eq!(m.tool_results[0].text(), "ok");
    }

    // ── Token approximation ───────────────────────────────────────────────────

    #[test]
    fn approx_tokens_divides_by_four() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_counts_tool_call_payloads() {
        let short = Message::assistant("x").approx_tokens();
        let with_call = Message::assistant_with_tool_calls(
            "x",
            vec![ToolCallRequest {
                id: "t1".into(),
                name: "a_long_tool_name".into(),
                arguments: json!({"key": "a somewhat longer argument value"}),
            }],
        )
        .approx_tokens();
        assert!(with_call > short);
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn plain_message_omits_empty_vectors() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_results"));
        assert!(!json.contains("cacheable"));
    }

    #[test]
    fn content_block_round_trip() {
        let b = ContentBlock::text("payload");
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains(r#""type":"text""#));
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn usage_total_is_prompt_plus_completion() {
        let u = Usage {
            prompt_tokens: 30,
            completion_tokens: 5,
            ..Default::default()
        };
        assert_eq!(u.total_tokens(), 35);
    }
}
