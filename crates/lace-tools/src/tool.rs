// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Opaque identifier from the model (forwarded verbatim); the pairing
    /// key between call and result.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub arguments: Value,
}

/// Behavioral hints a tool declares about itself.
///
/// The approval policy reads `read_only_hint`; the rest are forwarded to
/// UIs so they can render risk appropriately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub read_only_hint: bool,
    #[serde(default)]
    pub destructive_hint: bool,
    #[serde(default)]
    pub open_world_hint: bool,
}

/// Invocation context handed to every tool execution.
///
/// Tools receive this by reference and must not retain it; in particular it
/// carries no handle back to the agent.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub thread_id: String,
    pub parent_thread_id: Option<String>,
    pub working_directory: PathBuf,
    /// Derived from the current turn; fires when the turn aborts.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            parent_thread_id: None,
            working_directory: PathBuf::from("."),
            cancel: CancellationToken::new(),
        }
    }
}

/// A single content item in a tool outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// What a tool execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: Vec<ContentItem>,
    pub is_error: bool,
    pub metadata: Option<Value>,
}

impl ToolOutcome {
    /// Successful plain-text result.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
            metadata: None,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(msg)],
            is_error: true,
            metadata: None,
        }
    }

    /// Concatenated text of all content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ContentItem::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait that every tool must implement.
///
/// Concrete tool bodies (shell, file I/O, search) are external
/// collaborators; the engine only depends on this interface.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn schema(&self) -> Value;
    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::default()
    }
    /// Execute the tool. Failures should be reported via
    /// [`ToolOutcome::error`], not by panicking.
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> ToolOutcome;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok("done")
        }
    }

    #[test]
    fn default_annotations_are_all_false() {
        let a = MinimalTool.annotations();
        assert!(!a.read_only_hint);
        assert!(!a.destructive_hint);
        assert!(!a.open_world_hint);
        assert!(a.title.is_none());
    }

    #[test]
    fn outcome_ok_is_not_error() {
        let o = ToolOutcome::ok("fine");
        assert!(!o.is_error);
        assert_eq!(o.text(), "fine");
    }

    #[test]
    fn outcome_error_sets_flag() {
        let o = ToolOutcome::error("boom");
        assert!(o.is_error);
        assert_eq!(o.text(), "boom");
    }

    #[test]
    fn outcome_text_joins_items() {
        let o = ToolOutcome {
            content: vec![ContentItem::text("a"), ContentItem::text("b")],
            is_error: false,
            metadata: None,
        };
        assert_eq!(o.text(), "a\nb");
    }

    #[tokio::test]
    async fn tool_executes_with_context() {
        let ctx = ToolContext::new("thread-1");
        let out = MinimalTool.execute(json!({}), &ctx).await;
        assert_eq!(out.text(), "done");
    }
}
