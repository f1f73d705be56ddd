// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Hierarchical delegation: a tool that spawns a bounded sub-agent on a
//! child thread sharing the parent's event store.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use lace_config::Config;
use lace_model::ProviderRegistry;
use lace_store::EventType;
use lace_threads::ThreadManager;
use lace_tools::{ApprovalPolicy, Tool, ToolContext, ToolExecutor, ToolOutcome};

use crate::{Agent, EventBus, TokenBudget};

const DELEGATE_SYSTEM_PROMPT: &str = "You are a focused sub-agent. Complete exactly the task \
     you are given: stay within its scope, avoid side quests, and stop using tools once you \
     can answer. Reply with the answer in the requested form and nothing else.";

/// The `delegate` tool.
///
/// Holds weak references to the thread manager and the parent executor (set
/// at construction / bind time) so the tool can never keep the engine
/// alive, and never reaches the agent that invoked it. The restricted
/// registry handed to the child omits this tool, so delegates cannot nest.
pub struct DelegateTool {
    threads: Weak<ThreadManager>,
    parent_executor: Mutex<Weak<ToolExecutor>>,
    providers: Arc<ProviderRegistry>,
    bus: Arc<EventBus>,
    config: Arc<Config>,
}

impl DelegateTool {
    pub fn new(
        threads: &Arc<ThreadManager>,
        providers: Arc<ProviderRegistry>,
        bus: Arc<EventBus>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            threads: Arc::downgrade(threads),
            parent_executor: Mutex::new(Weak::new()),
            providers,
            bus,
            config,
        }
    }

    /// Late-bind the parent executor (it is built after the registry that
    /// contains this tool).
    pub fn bind_parent_executor(&self, executor: &Arc<ToolExecutor>) {
        *self
            .parent_executor
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Arc::downgrade(executor);
    }

    fn parent_executor(&self) -> Option<Arc<ToolExecutor>> {
        self.parent_executor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .upgrade()
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to a sub-agent and return its answer. The sub-agent runs \
         on its own conversation thread with a bounded token budget and the parent's tools \
         (minus delegation itself)."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short human-readable task name"
                },
                "prompt": {
                    "type": "string",
                    "description": "Complete instructions for the sub-agent"
                },
                "expected_response": {
                    "type": "string",
                    "description": "The form the answer should take, e.g. 'integer' or 'bullet list'"
                },
                "model": {
                    "type": "string",
                    "description": "Model spec as <provider>:<model>"
                }
            },
            "required": ["title", "prompt", "expected_response", "model"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> ToolOutcome {
        let get = |key: &str| -> Option<String> {
            arguments.get(key).and_then(|v| v.as_str()).map(String::from)
        };
        let (Some(title), Some(prompt), Some(expected), Some(model_spec)) = (
            get("title"),
            get("prompt"),
            get("expected_response"),
            get("model"),
        ) else {
            return ToolOutcome::error(
                "delegate requires 'title', 'prompt', 'expected_response', and 'model'",
            );
        };

        let Some(threads) = self.threads.upgrade() else {
            return ToolOutcome::error("thread manager is gone; cannot delegate");
        };
        let Some(parent_executor) = self.parent_executor() else {
            return ToolOutcome::error("parent executor is gone; cannot delegate");
        };

        let provider = match self.providers.create(&model_spec) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::error(format!("cannot create provider: {e:#}")),
        };

        let delegate_thread = match threads.generate_delegate_thread_id(&ctx.thread_id) {
            Ok(id) => id,
            Err(e) => return ToolOutcome::error(format!("cannot allocate delegate thread: {e}")),
        };
        debug!(thread_id = %delegate_thread, title = %title, "spawning delegate");

        // Parent's tools minus delegation itself; parent's approval channel
        // or default-deny when there is none.
        let restricted = Arc::new(parent_executor.registry().without(self.name()));
        let approvals = Arc::new(ApprovalPolicy::new(
            self.config.tools.clone(),
            parent_executor.approvals().callback(),
        ));
        let child_executor = Arc::new(ToolExecutor::new(restricted, approvals, &self.config));

        let delegation = &self.config.delegation;
        let budget = TokenBudget {
            max_tokens: delegation.max_tokens,
            warning_fraction: delegation.warning_fraction,
            reserve_tokens: delegation.reserve_tokens,
        };

        let mut child = Agent::new(
            provider,
            child_executor,
            Arc::clone(&threads),
            Arc::clone(&self.bus),
            Arc::clone(&self.config),
            delegate_thread.clone(),
        )
        .with_budget(budget)
        .with_system_prompt(format!(
            "{DELEGATE_SYSTEM_PROMPT}\n\nExpected response: {expected}"
        ))
        .with_parent_thread(ctx.thread_id.clone())
        .with_working_directory(ctx.working_directory.clone());

        let abort = child.abort_handle();
        let message = format!("Task: {title}\n\n{prompt}");
        let timeout = Duration::from_secs(delegation.timeout_secs);

        let mut run = Box::pin(child.send_message(&message));
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        let mut timed_out = false;
        let mut parent_aborted = false;
        let mut run_result: Option<anyhow::Result<()>> = None;
        tokio::select! {
            res = &mut run => run_result = Some(res),
            _ = &mut sleep => {
                timed_out = true;
                abort.abort();
            }
            _ = ctx.cancel.cancelled() => {
                parent_aborted = true;
                abort.abort();
            }
        }
        // After a cancellation, keep driving the child so it unwinds
        // through its own cancellation points, emits turn_aborted, and
        // leaves a consistent partial event trail.
        let run_result = match run_result {
            Some(res) => res,
            None => run.await,
        };

        if timed_out {
            return ToolOutcome::error(format!(
                "delegation timed out after {}s",
                delegation.timeout_secs
            ));
        }
        if parent_aborted {
            return ToolOutcome::error("delegation aborted");
        }
        if let Err(e) = run_result {
            return ToolOutcome::error(format!("sub-agent error: {e:#}"));
        }

        // The child's events stay in the shared store under the delegate
        // thread id; the tool result is the concatenation of its replies.
        let answer = match threads.events(&delegate_thread) {
            Ok(events) => events
                .iter()
                .filter(|e| e.event_type == EventType::AgentMessage)
                .filter_map(|e| e.payload.as_text())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => return ToolOutcome::error(format!("cannot read delegate thread: {e}")),
        };

        if answer.is_empty() {
            ToolOutcome::ok("(sub-agent produced no text output)")
        } else {
            ToolOutcome::ok(answer)
        }
    }
}
