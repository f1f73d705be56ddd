// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Conversation reconstruction: append-only events in, provider-ready
//! messages out.
//!
//! The output is the canonical input to any provider; per-provider wire
//! formatting is a pure transformation over it. The pairing discipline here
//! is what keeps providers from rejecting replayed history: every emitted
//! tool result references a tool call attached to the immediately preceding
//! assistant message, and nothing unpaired survives.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use lace_model::{ContentBlock, Message, ToolCallRequest, ToolResultBlock};
use lace_store::{EventPayload, EventType, ResultContent, ThreadEvent};

/// Build the provider-ready message list from an ordered event sequence.
///
/// Two passes:
/// - collect the set of tool-call ids and tool-result ids;
/// - emit messages, suppressing tool calls without results and dropping
///   results without a strictly earlier call.
///
/// Pure and deterministic: `build_conversation(s) == build_conversation(s)`.
pub fn build_conversation(events: &[ThreadEvent]) -> Vec<Message> {
    // Pass A: positions of every result id, so pass B can require a result
    // strictly later than the call it answers.
    let mut result_positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, e) in events.iter().enumerate() {
        if let EventPayload::ToolResult(tr) = &e.payload {
            result_positions.entry(tr.id.as_str()).or_default().push(i);
        }
    }

    // Pass B: emit.
    let mut out: Vec<Message> = Vec::new();

    // One combined system message at the head.
    let system_text: Vec<&str> = events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                EventType::SystemPrompt | EventType::UserSystemPrompt
            )
        })
        .filter_map(|e| e.payload.as_text())
        .collect();
    if !system_text.is_empty() {
        out.push(Message::system(system_text.join("\n\n")));
    }

    // Ids of calls attached so far; a result is emitted only when its call
    // was actually attached strictly earlier.
    let mut attached_calls: HashSet<String> = HashSet::new();
    // True while the last emitted message is an assistant message that tool
    // calls may still attach to (no other message emitted since).
    let mut assistant_open = false;

    for (i, e) in events.iter().enumerate() {
        match (&e.event_type, &e.payload) {
            (EventType::SystemPrompt | EventType::UserSystemPrompt, _) => {}
            (EventType::LocalSystemMessage, _) => {
                // Display-only; never enters the provider conversation.
            }
            (EventType::UserMessage, EventPayload::Text(text)) => {
                out.push(Message::user(text.clone()));
                assistant_open = false;
            }
            (EventType::AgentMessage, EventPayload::Text(text)) => {
                out.push(Message::assistant(text.clone()));
                assistant_open = true;
            }
            (EventType::ToolCall, EventPayload::ToolCall(tc)) => {
                let has_later_result = result_positions
                    .get(tc.id.as_str())
                    .is_some_and(|positions| positions.iter().any(|&ri| ri > i));
                if !has_later_result {
                    // Unmatched call (crash before the tool ran): suppress so
                    // the provider never sees a dangling tool_use.
                    debug!(tool_call_id = %tc.id, "suppressing tool call without result");
                    continue;
                }
                if !assistant_open {
                    // A call with no preceding assistant text still needs an
                    // assistant message to ride on.
                    out.push(Message::assistant(""));
                    assistant_open = true;
                }
                let msg = out.last_mut().unwrap();
                msg.tool_calls.push(ToolCallRequest {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                });
                attached_calls.insert(tc.id.clone());
            }
            (EventType::ToolResult, EventPayload::ToolResult(tr)) => {
                if !attached_calls.contains(tr.id.as_str()) {
                    // Orphan result: no strictly earlier matching call.
                    debug!(tool_result_id = %tr.id, "dropping orphan tool result");
                    continue;
                }
                let block = ToolResultBlock {
                    id: tr.id.clone(),
                    content: tr
                        .content
                        .iter()
                        .map(|c| match c {
                            ResultContent::Text { text } => ContentBlock::text(text.clone()),
                        })
                        .collect(),
                    is_error: tr.is_error,
                };
                // Consecutive results join one user message.
                match out.last_mut() {
                    Some(last) if !last.tool_results.is_empty() => {
                        last.tool_results.push(block);
                    }
                    _ => out.push(Message::tool_results(vec![block])),
                }
                assistant_open = false;
            }
            (event_type, _) => {
                // Payload kind not matching its event kind: storage-level
                // corruption that from_json should have rejected already.
                debug!(event_type = event_type.as_str(), "skipping malformed event");
            }
        }
    }

    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
