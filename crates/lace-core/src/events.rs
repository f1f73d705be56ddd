// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use lace_model::Usage;
use lace_store::ThreadEvent;
use lace_tools::ToolCall;

use crate::metrics::TurnMetrics;

/// Agent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Thinking,
    Streaming,
    ToolExecution,
    Aborted,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Streaming => "streaming",
            Self::ToolExecution => "tool_execution",
            Self::Aborted => "aborted",
        }
    }
}

/// Events published on the bus during agent operation.
///
/// The wire names returned by [`AgentEvent::name`] are part of the engine
/// contract; UIs and tests key on them.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A new turn began.
    TurnStart { turn_id: String },
    /// Periodic heartbeat while a turn is active (~1 s cadence).
    TurnProgress { metrics: TurnMetrics },
    /// The turn finished normally.
    TurnComplete { metrics: TurnMetrics },
    /// The turn was cancelled.
    TurnAborted { turn_id: String },
    /// The agent state machine moved.
    StateChange { from: AgentState, to: AgentState },
    /// The model started reasoning before responding.
    ThinkingStart,
    /// The accumulated reasoning block, once the model moves on.
    ThinkingComplete { text: String },
    /// A streamed response token.
    Token { delta: String },
    /// The full text of one model response.
    ResponseComplete { text: String },
    /// A tool call is about to execute.
    ToolCallStart { call: ToolCall },
    /// A tool call finished (successfully or not).
    ToolCallComplete {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// Token usage reported by the provider mid-turn.
    TokenUsageUpdate { usage: Usage },
    /// The input estimate crossed the warning fraction of the token budget.
    TokenBudgetWarning { used: u32, budget: u32 },
    /// The approval policy is about to prompt the user.
    ApprovalRequest {
        tool_name: String,
        request_id: String,
    },
    /// An event was appended to (or replayed from) the thread log.
    /// The single source of truth for UIs; nothing subscribes to the store.
    ThreadEventAdded { event: ThreadEvent },
    /// The agent yielded control back to the user.
    ConversationComplete { thread_id: String },
    /// A turn-fatal error.
    Error { message: String },
}

impl AgentEvent {
    /// Stable wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::TurnProgress { .. } => "turn_progress",
            Self::TurnComplete { .. } => "turn_complete",
            Self::TurnAborted { .. } => "turn_aborted",
            Self::StateChange { .. } => "state_change",
            Self::ThinkingStart => "agent_thinking_start",
            Self::ThinkingComplete { .. } => "agent_thinking_complete",
            Self::Token { .. } => "agent_token",
            Self::ResponseComplete { .. } => "agent_response_complete",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::TokenUsageUpdate { .. } => "token_usage_update",
            Self::TokenBudgetWarning { .. } => "token_budget_warning",
            Self::ApprovalRequest { .. } => "approval_request",
            Self::ThreadEventAdded { .. } => "thread_event_added",
            Self::ConversationComplete { .. } => "conversation_complete",
            Self::Error { .. } => "error",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
