// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::StorageError;

/// The kind of a persisted thread event.
///
/// The string forms are the stable persisted representation; renaming a
/// variant is a breaking change to every existing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SystemPrompt,
    UserSystemPrompt,
    UserMessage,
    AgentMessage,
    ToolCall,
    ToolResult,
    LocalSystemMessage,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemPrompt => "SYSTEM_PROMPT",
            Self::UserSystemPrompt => "USER_SYSTEM_PROMPT",
            Self::UserMessage => "USER_MESSAGE",
            Self::AgentMessage => "AGENT_MESSAGE",
            Self::ToolCall => "TOOL_CALL",
            Self::ToolResult => "TOOL_RESULT",
            Self::LocalSystemMessage => "LOCAL_SYSTEM_MESSAGE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "SYSTEM_PROMPT" => Ok(Self::SystemPrompt),
            "USER_SYSTEM_PROMPT" => Ok(Self::UserSystemPrompt),
            "USER_MESSAGE" => Ok(Self::UserMessage),
            "AGENT_MESSAGE" => Ok(Self::AgentMessage),
            "TOOL_CALL" => Ok(Self::ToolCall),
            "TOOL_RESULT" => Ok(Self::ToolResult),
            "LOCAL_SYSTEM_MESSAGE" => Ok(Self::LocalSystemMessage),
            other => Err(StorageError::Internal(format!(
                "unknown event type in store: {other}"
            ))),
        }
    }
}

/// The tool invocation recorded by a `TOOL_CALL` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Pairing key; the matching `TOOL_RESULT` carries the same id.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A single content item inside a `TOOL_RESULT` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultContent {
    Text { text: String },
}

impl ResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// The outcome recorded by a `TOOL_RESULT` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    /// Id of the `TOOL_CALL` this result answers.
    pub id: String,
    pub content: Vec<ResultContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResultRecord {
    /// Concatenated text of all content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ResultContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Typed payload of a thread event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Plain text. Used by every message-kind event.
    Text(String),
    ToolCall(ToolCallRecord),
    ToolResult(ToolResultRecord),
}

impl EventPayload {
    /// Serialize for the `data` column.
    pub fn to_json(&self) -> Result<String, StorageError> {
        let v = match self {
            Self::Text(t) => Value::String(t.clone()),
            Self::ToolCall(tc) => serde_json::to_value(tc)?,
            Self::ToolResult(tr) => serde_json::to_value(tr)?,
        };
        Ok(v.to_string())
    }

    /// Deserialize a `data` column according to the event type.
    ///
    /// Decoding is driven by the type column rather than payload shape so a
    /// degenerate payload can never be silently reinterpreted as a
    /// different kind.
    pub fn from_json(event_type: EventType, data: &str) -> Result<Self, StorageError> {
        match event_type {
            EventType::ToolCall => Ok(Self::ToolCall(serde_json::from_str(data)?)),
            EventType::ToolResult => Ok(Self::ToolResult(serde_json::from_str(data)?)),
            _ => {
                let v: Value = serde_json::from_str(data)?;
                match v {
                    Value::String(s) => Ok(Self::Text(s)),
                    other => Err(StorageError::Internal(format!(
                        "expected string payload for {}, got {other}",
                        event_type.as_str()
                    ))),
                }
            }
        }
    }

    /// The text of a message-kind payload, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallRecord> {
        match self {
            Self::ToolCall(tc) => Some(tc),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultRecord> {
        match self {
            Self::ToolResult(tr) => Some(tr),
            _ => None,
        }
    }
}

/// One persisted event – the sole unit of conversation persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEvent {
    /// Unique and monotonic within the thread (`e%06d`).
    pub id: String,
    pub thread_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
