// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Context management: keep the reconstructed conversation inside the
//! provider's input budget, and mark prompt-cache boundaries.
//!
//! Trimming is whole-message and oldest-first. System messages are never
//! dropped, and a tool-call/tool-result pair always leaves together –
//! dropping half of a pair would recreate exactly the orphaned history the
//! reconstruction pass works to prevent.

use tracing::debug;

use lace_config::CacheStrategy;
use lace_model::{Message, Role};

/// Approximate token total of a message list.
pub fn approx_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.approx_tokens()).sum()
}

/// Drop oldest non-system messages (in pair-preserving groups) until the
/// conversation fits `budget_tokens`.
pub fn fit_to_budget(messages: Vec<Message>, budget_tokens: usize) -> Vec<Message> {
    if approx_tokens(&messages) <= budget_tokens {
        return messages;
    }

    let mut system: Vec<Message> = Vec::new();
    let mut rest: Vec<Message> = Vec::new();
    for m in messages {
        if m.role == Role::System {
            system.push(m);
        } else {
            rest.push(m);
        }
    }

    let system_tokens = approx_tokens(&system);
    let mut rest_tokens = approx_tokens(&rest);
    let mut drop_from = 0usize;

    while drop_from < rest.len() && system_tokens + rest_tokens > budget_tokens {
        // One drop group: the message itself, plus – when it is an assistant
        // message carrying tool calls – every immediately following message
        // holding the matching results.
        let mut end = drop_from + 1;
        if !rest[drop_from].tool_calls.is_empty() {
            while end < rest.len() && !rest[end].tool_results.is_empty() {
                end += 1;
            }
        }
        for m in &rest[drop_from..end] {
            rest_tokens -= m.approx_tokens();
        }
        drop_from = end;
    }

    if drop_from > 0 {
        debug!(dropped = drop_from, "trimmed oldest messages to fit context budget");
    }
    system.extend(rest.into_iter().skip(drop_from));
    system
}

/// Mark historical messages cacheable according to the strategy.
///
/// `aggressive` leaves the last `fresh_count` messages unmarked;
/// `conservative` leaves one extra; `disabled` marks nothing. Providers
/// without cache controls ignore the flag.
pub fn mark_cacheable(messages: &mut [Message], strategy: CacheStrategy, fresh_count: usize) {
    let fresh = match strategy {
        CacheStrategy::Aggressive => fresh_count,
        CacheStrategy::Conservative => fresh_count + 1,
        CacheStrategy::Disabled => return,
    };
    let cutoff = messages.len().saturating_sub(fresh);
    for m in messages.iter_mut().take(cutoff) {
        m.cacheable = true;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lace_model::{ContentBlock, ToolCallRequest, ToolResultBlock};
    use serde_json::json;

    fn long_text(n: usize) -> String {
        "x".repeat(n)
    }

    #[test]
    fn under_budget_is_untouched() {
        let msgs = vec![Message::system("sys"), Message::user("hi")];
        let fitted = fit_to_budget(msgs.clone(), 1_000);
        assert_eq!(fitted.len(), 2);
    }

    #[test]
    fn oldest_non_system_dropped_first() {
        let msgs = vec![
            Message::system("sys"),
            Message::user(long_text(400)), // 100 tokens
            Message::assistant(long_text(400)),
            Message::user("latest"),
        ];
        let fitted = fit_to_budget(msgs, 120);
        assert_eq!(fitted[0].role, Role::System);
        assert!(fitted.iter().any(|m| m.content == "latest"));
        assert!(!fitted.iter().any(|m| m.content.len() == 400 && m.role == Role::User));
    }

    #[test]
    fn system_messages_are_never_dropped() {
        let msgs = vec![
            Message::system(long_text(4_000)), // larger than the whole budget
            Message::user("hi"),
        ];
        let fitted = fit_to_budget(msgs, 10);
        assert!(fitted.iter().any(|m| m.role == Role::System));
    }

    #[test]
    fn tool_pairs_are_dropped_together() {
        let call_msg = Message::assistant_with_tool_calls(
            long_text(400),
            vec![ToolCallRequest {
                id: "t1".into(),
                name: "tool".into(),
                arguments: json!({}),
            }],
        );
        let result_msg = Message::tool_results(vec![ToolResultBlock {
            id: "t1".into(),
            content: vec![ContentBlock::text(long_text(400))],
            is_error: false,
        }]);
        let msgs = vec![
            Message::system("sys"),
            call_msg,
            result_msg,
            Message::user("latest"),
        ];
        // Budget forces the call message out; its result must follow.
        let fitted = fit_to_budget(msgs, 50);
        assert!(fitted.iter().all(|m| m.tool_calls.is_empty()));
        assert!(fitted.iter().all(|m| m.tool_results.is_empty()));
        assert!(fitted.iter().any(|m| m.content == "latest"));
    }

    #[test]
    fn aggressive_marks_all_but_fresh() {
        let mut msgs = vec![
            Message::system("sys"),
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ];
        mark_cacheable(&mut msgs, CacheStrategy::Aggressive, 2);
        let flags: Vec<bool> = msgs.iter().map(|m| m.cacheable).collect();
        assert_eq!(flags, vec![true, true, false, false]);
    }

    #[test]
    fn conservative_keeps_one_extra_fresh() {
        let mut msgs = vec![
            Message::system("sys"),
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ];
        mark_cacheable(&mut msgs, CacheStrategy::Conservative, 2);
        let flags: Vec<bool> = msgs.iter().map(|m| m.cacheable).collect();
        assert_eq!(flags, vec![true, false, false, false]);
    }

    #[test]
    fn disabled_marks_nothing() {
        let mut msgs = vec![Message::user("a"), Message::assistant("b")];
        mark_cacheable(&mut msgs, CacheStrategy::Disabled, 0);
        assert!(msgs.iter().all(|m| !m.cacheable));
    }
}
