// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Slash-command layer: inputs handled locally, before (and instead of) the
//! agent loop. Output is surfaced as `LOCAL_SYSTEM_MESSAGE` events so UIs
//! render it through the same `thread_event_added` path as everything else.

use std::sync::Arc;

use lace_threads::ThreadManager;

use crate::{AgentEvent, EventBus, SessionTokenAccountant};

/// What became of one line of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A command ran; nothing goes to the agent.
    Handled,
    /// The user asked to quit.
    Exit,
    /// Not a command; send it to the agent.
    NotACommand,
}

const HELP_TEXT: &str = "Available commands:\n\
  /help    show this help\n\
  /status  show session token usage\n\
  /exit    quit lace";

/// Dispatch a line of input. Commands start with `/`; anything else is left
/// for the agent loop.
pub fn handle_command(
    input: &str,
    threads: &Arc<ThreadManager>,
    thread_id: &str,
    bus: &Arc<EventBus>,
    session: &SessionTokenAccountant,
) -> anyhow::Result<CommandOutcome> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return Ok(CommandOutcome::NotACommand);
    }

    match trimmed {
        "/exit" => Ok(CommandOutcome::Exit),
        "/help" => {
            announce(threads, thread_id, bus, HELP_TEXT)?;
            Ok(CommandOutcome::Handled)
        }
        "/status" => {
            let rate = session
                .cache_hit_rate()
                .map(|r| format!("{:.0}%", r * 100.0))
                .unwrap_or_else(|| "n/a".into());
            let text = format!(
                "Session: {} turns, {} tokens ({} prompt + {} completion), cache hit rate {}",
                session.messages,
                session.total_tokens(),
                session.prompt_tokens,
                session.completion_tokens,
                rate
            );
            announce(threads, thread_id, bus, &text)?;
            Ok(CommandOutcome::Handled)
        }
        other => {
            announce(
                threads,
                thread_id,
                bus,
                &format!("Unknown command: {other} (try /help)"),
            )?;
            Ok(CommandOutcome::Handled)
        }
    }
}

fn announce(
    threads: &Arc<ThreadManager>,
    thread_id: &str,
    bus: &Arc<EventBus>,
    text: &str,
) -> anyhow::Result<()> {
    let event = threads.add_local_system_message(thread_id, text)?;
    bus.publish(AgentEvent::ThreadEventAdded { event });
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lace_store::{EventType, MemoryStore};

    fn setup() -> (Arc<ThreadManager>, String, Arc<EventBus>) {
        let threads = Arc::new(ThreadManager::new(Arc::new(MemoryStore::new())));
        let tid = threads.create_thread().unwrap();
        (threads, tid, Arc::new(EventBus::new()))
    }

    #[test]
    fn help_appends_local_system_message_with_commands() {
        let (threads, tid, bus) = setup();
        let (_, mut rx) = bus.subscribe();
        let outcome = handle_command(
            "/help",
            &threads,
            &tid,
            &bus,
            &SessionTokenAccountant::new(),
        )
        .unwrap();
        assert_eq!(outcome, CommandOutcome::Handled);

        let events = threads.events(&tid).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::LocalSystemMessage);
        let text = events[0].payload.as_text().unwrap();
        assert!(text.contains("Available commands"));
        assert!(text.contains("/exit"));
        // UIs hear about it through the bus, not the store.
        assert!(matches!(
            rx.try_recv().unwrap(),
            AgentEvent::ThreadEventAdded { .. }
        ));
    }

    #[test]
    fn exit_requests_termination_without_events() {
        let (threads, tid, bus) = setup();
        let outcome = handle_command(
            "/exit",
            &threads,
            &tid,
            &bus,
            &SessionTokenAccountant::new(),
        )
        .unwrap();
        assert_eq!(outcome, CommandOutcome::Exit);
        assert!(threads.events(&tid).unwrap().is_empty());
    }

    #[test]
    fn plain_text_is_not_a_command() {
        let (threads, tid, bus) = setup();
        let outcome = handle_command(
            "hello there",
            &threads,
            &tid,
            &bus,
            &SessionTokenAccountant::new(),
        )
        .unwrap();
        assert_eq!(outcome, CommandOutcome::NotACommand);
    }

    #[test]
    fn unknown_command_reports_itself() {
        let (threads, tid, bus) = setup();
        handle_command(
            "/frobnicate",
            &threads,
            &tid,
            &bus,
            &SessionTokenAccountant::new(),
        )
        .unwrap();
        let events = threads.events(&tid).unwrap();
        assert!(events[0]
            .payload
            .as_text()
            .unwrap()
            .contains("Unknown command"));
    }

    #[test]
    fn status_reports_session_totals() {
        let (threads, tid, bus) = setup();
        let mut session = SessionTokenAccountant::new();
        session.record_turn(&lace_model::Usage {
            prompt_tokens: 50,
            completion_tokens: 10,
            ..Default::default()
        });
        handle_command("/status", &threads, &tid, &bus, &session).unwrap();
        let text = threads.events(&tid).unwrap()[0]
            .payload
            .as_text()
            .unwrap()
            .to_string();
        assert!(text.contains("60 tokens"));
    }
}
