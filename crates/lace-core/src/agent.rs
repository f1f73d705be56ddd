// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lace_config::Config;
use lace_model::{
    estimate_tokens, CompletionRequest, ModelProvider, ProviderError, ResponseEvent,
    ToolCallRequest, Usage,
};
use lace_store::{ResultContent, StorageError, ThreadEvent, ToolCallRecord, ToolResultRecord};
use lace_threads::ThreadManager;
use lace_tools::{ContentItem, ExecutionResult, ToolCall, ToolContext, ToolExecutor};

use crate::{
    context,
    events::{AgentEvent, AgentState},
    metrics::{SessionTokenAccountant, TokenBudget, TurnMetrics},
    EventBus,
};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Lace, an AI coding assistant. You help the user \
     by reading code, running tools, and explaining what you find. Use tools when they get \
     you facts; answer directly when you already know enough.";

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

/// Cancels the agent's current turn from outside the turn itself.
///
/// Cancellation is idempotent: the first `abort` returns `true`, any later
/// call (or a call while no turn is active) returns `false`.
#[derive(Clone)]
pub struct AbortHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl AbortHandle {
    pub fn abort(&self) -> bool {
        match self.slot.lock().unwrap_or_else(|p| p.into_inner()).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// How a turn ended, before the common epilogue runs.
enum TurnEnd {
    Completed,
    Aborted,
    Errored(String),
}

/// The core agent: owns one thread's turn loop and drives the
/// model ↔ tool cycle over the persistent event log.
///
/// All conversation state lives in the event store; the agent never carries
/// a message array between turns. Crash, restart, and `--continue` all
/// rebuild the same conversation from the log.
pub struct Agent {
    thread_id: String,
    threads: Arc<ThreadManager>,
    provider: Arc<dyn ModelProvider>,
    executor: Arc<ToolExecutor>,
    bus: Arc<EventBus>,
    config: Arc<Config>,
    state: AgentState,
    session: SessionTokenAccountant,
    budget: Option<TokenBudget>,
    system_prompt_override: Option<String>,
    working_directory: PathBuf,
    parent_thread_id: Option<String>,
    abort_slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        executor: Arc<ToolExecutor>,
        threads: Arc<ThreadManager>,
        bus: Arc<EventBus>,
        config: Arc<Config>,
        thread_id: String,
    ) -> Self {
        Self {
            thread_id,
            threads,
            provider,
            executor,
            bus,
            config,
            state: AgentState::Idle,
            session: SessionTokenAccountant::new(),
            budget: None,
            system_prompt_override: None,
            working_directory: PathBuf::from("."),
            parent_thread_id: None,
            abort_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Attach a token budget (used for delegated sub-agents).
    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Replace the default system prompt for this agent.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    pub fn with_parent_thread(mut self, parent: impl Into<String>) -> Self {
        self.parent_thread_id = Some(parent.into());
        self
    }

    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = dir;
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn session(&self) -> &SessionTokenAccountant {
        &self.session
    }

    /// Handle that cancels the current turn from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            slot: Arc::clone(&self.abort_slot),
        }
    }

    /// Re-emit every stored event of this thread as `thread_event_added`,
    /// in chronological order. Used when resuming a conversation so UIs can
    /// render history without touching the store.
    pub fn replay_session_events(&self) -> anyhow::Result<usize> {
        let events = self.threads.events(&self.thread_id)?;
        let count = events.len();
        for event in events {
            self.bus.publish(AgentEvent::ThreadEventAdded { event });
        }
        Ok(count)
    }

    /// Run one full turn: append the user message, loop model calls and
    /// tool batches until the model answers without tools (or a bound is
    /// hit), then yield back to the user.
    pub async fn send_message(&mut self, user_text: &str) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self
            .abort_slot
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(cancel.clone());

        let metrics = Arc::new(Mutex::new(TurnMetrics::begin()));
        let turn_id = metrics.lock().unwrap().turn_id.clone();
        self.bus.publish(AgentEvent::TurnStart {
            turn_id: turn_id.clone(),
        });

        // Progress ticker runs for the lifetime of the turn; the drop guard
        // stops it on every exit path.
        let ticker_stop = CancellationToken::new();
        let _ticker_guard = ticker_stop.clone().drop_guard();
        spawn_progress_ticker(
            Arc::clone(&self.bus),
            Arc::clone(&metrics),
            ticker_stop,
            self.config.agent.progress_interval_ms,
        );

        let end = self.run_turn(user_text, &cancel, &metrics).await;

        // The turn is over; further aborts have nothing to cancel.
        self.abort_slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        match end {
            Ok(TurnEnd::Completed) => {
                self.set_state(AgentState::Idle);
                self.bus.publish(AgentEvent::ConversationComplete {
                    thread_id: self.thread_id.clone(),
                });
                let snapshot = metrics.lock().unwrap().snapshot();
                self.bus
                    .publish(AgentEvent::TurnComplete { metrics: snapshot });
                Ok(())
            }
            Ok(TurnEnd::Aborted) => {
                self.set_state(AgentState::Aborted);
                self.bus.publish(AgentEvent::TurnAborted { turn_id });
                self.set_state(AgentState::Idle);
                Ok(())
            }
            Ok(TurnEnd::Errored(message)) => {
                self.bus.publish(AgentEvent::Error { message });
                self.set_state(AgentState::Idle);
                Ok(())
            }
            Err(e) => {
                // Storage failures are fatal; surface them to the caller.
                self.set_state(AgentState::Idle);
                Err(e)
            }
        }
    }

    async fn run_turn(
        &mut self,
        user_text: &str,
        cancel: &CancellationToken,
        metrics: &Arc<Mutex<TurnMetrics>>,
    ) -> anyhow::Result<TurnEnd> {
        // Seed the system prompt on the thread's first turn so replayed
        // conversations carry exactly the prompt they ran with.
        if self.threads.events(&self.thread_id)?.is_empty() {
            let prompt = self
                .system_prompt_override
                .clone()
                .or_else(|| self.config.agent.system_prompt.clone())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
            self.publish_appended(self.threads.add_system_prompt(&self.thread_id, prompt))?;
        }

        self.publish_appended(self.threads.add_user_message(&self.thread_id, user_text))?;

        let mut final_usage = Usage::default();
        let mut budget_warned = false;
        let mut iterations = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(TurnEnd::Aborted);
            }
            iterations += 1;
            if iterations > self.config.agent.max_iterations {
                self.publish_appended(
                    self.threads
                        .add_local_system_message(&self.thread_id, "Iteration limit reached"),
                )?;
                break;
            }

            self.set_state(AgentState::Thinking);
            self.bus.publish(AgentEvent::ThinkingStart);

            let request = self.build_request()?;
            let input_estimate = match self.provider.count_tokens(&request).await {
                Some(n) => n,
                None => estimate_tokens(&request),
            };
            metrics.lock().unwrap().tokens_in = input_estimate;
            if let Some(budget) = self.budget {
                if !budget_warned && budget.should_warn(input_estimate) {
                    self.bus.publish(AgentEvent::TokenBudgetWarning {
                        used: input_estimate,
                        budget: budget.max_tokens,
                    });
                    budget_warned = true;
                }
            }

            let (text, tool_calls, usage) =
                match self.stream_one_turn(request, cancel.clone()).await {
                    Ok(turn) => turn,
                    Err(e) if is_abort(&e) => return Ok(TurnEnd::Aborted),
                    Err(e) => {
                        let message = format!("Provider error: {e:#}");
                        self.publish_appended(
                            self.threads
                                .add_local_system_message(&self.thread_id, &message),
                        )?;
                        return Ok(TurnEnd::Errored(message));
                    }
                };

            if let Some(usage) = usage {
                // prompt_tokens already covers the full context; completions
                // accumulate across iterations.
                final_usage.prompt_tokens = usage.prompt_tokens;
                final_usage.completion_tokens += usage.completion_tokens;
                final_usage.cache_read_tokens += usage.cache_read_tokens;
                final_usage.cache_creation_tokens += usage.cache_creation_tokens;
                let mut m = metrics.lock().unwrap();
                m.tokens_in = usage.prompt_tokens;
                m.tokens_out += usage.completion_tokens;
            }

            if !text.is_empty() || !tool_calls.is_empty() {
                self.publish_appended(self.threads.add_agent_message(&self.thread_id, &text))?;
            }
            if !text.is_empty() {
                self.bus
                    .publish(AgentEvent::ResponseComplete { text: text.clone() });
            }

            if tool_calls.is_empty() {
                break;
            }

            match self.run_tool_batch(&tool_calls, cancel).await? {
                BatchEnd::Continue => {}
                BatchEnd::Aborted => return Ok(TurnEnd::Aborted),
                BatchEnd::Stopped => {
                    self.publish_appended(
                        self.threads
                            .add_local_system_message(&self.thread_id, "Execution stopped by user"),
                    )?;
                    break;
                }
            }
        }

        self.session.record_turn(&final_usage);
        Ok(TurnEnd::Completed)
    }

    /// Execute one batch of tool calls: record every `TOOL_CALL` before any
    /// execution, run the batch, record results in issue order.
    async fn run_tool_batch(
        &mut self,
        tool_calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> anyhow::Result<BatchEnd> {
        self.set_state(AgentState::ToolExecution);

        let calls: Vec<ToolCall> = tool_calls
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            })
            .collect();

        for call in &calls {
            self.publish_appended(self.threads.add_tool_call(
                &self.thread_id,
                ToolCallRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            ))?;
            self.bus
                .publish(AgentEvent::ToolCallStart { call: call.clone() });
        }

        let ctx = ToolContext {
            thread_id: self.thread_id.clone(),
            parent_thread_id: self.parent_thread_id.clone(),
            working_directory: self.working_directory.clone(),
            cancel: cancel.child_token(),
        };
        let results = self.executor.execute_batch(calls, &ctx).await;

        let mut stop_requested = false;
        for result in &results {
            self.publish_appended(
                self.threads
                    .add_tool_result(&self.thread_id, to_result_record(result)),
            )?;
            self.bus.publish(AgentEvent::ToolCallComplete {
                call_id: result.tool_call.id.clone(),
                tool_name: result.tool_call.name.clone(),
                output: result.outcome.text(),
                is_error: result.outcome.is_error,
            });
            if result.denied && result.should_stop {
                stop_requested = true;
            }
        }

        if cancel.is_cancelled() {
            Ok(BatchEnd::Aborted)
        } else if stop_requested {
            Ok(BatchEnd::Stopped)
        } else {
            Ok(BatchEnd::Continue)
        }
    }

    /// Reconstruct the conversation, apply context management, and attach
    /// tool schemas.
    fn build_request(&self) -> anyhow::Result<CompletionRequest> {
        let conversation = self.threads.reconstruct(&self.thread_id)?;

        let window = self
            .provider
            .context_window()
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);
        let mut input_budget =
            (window as f32 * self.config.agent.context_utilization) as usize;
        if let Some(budget) = self.budget {
            input_budget = input_budget.min(budget.effective() as usize);
        }
        let mut conversation = context::fit_to_budget(conversation, input_budget);
        context::mark_cacheable(
            &mut conversation,
            self.config.agent.cache_strategy,
            self.config.agent.fresh_message_count,
        );

        let tools = self
            .executor
            .registry()
            .schemas()
            .into_iter()
            .map(|s| lace_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        Ok(CompletionRequest {
            messages: conversation,
            tools,
            stream: self.provider.supports_streaming(),
        })
    }

    /// One provider call. Streams deltas and usage onto the bus and returns
    /// the aggregated text, tool calls, and usage.
    async fn stream_one_turn(
        &mut self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<(String, Vec<ToolCallRequest>, Option<Usage>)> {
        if !self.provider.supports_streaming() {
            let resp = self.provider.create_response(request, cancel).await?;
            return Ok((resp.content, resp.tool_calls, resp.usage));
        }

        let mut stream = self.provider.complete(request, cancel.clone()).await?;

        let mut full_text = String::new();
        let mut usage: Option<Usage> = None;
        let mut thinking_buf = String::new();
        // Keyed by the parallel-tool-call index from the provider. OpenAI
        // interleaves chunks for different calls by index; other providers
        // always use index 0.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Aborted.into()),
                ev = stream.next() => match ev {
                    Some(ev) => ev?,
                    None => break,
                },
            };
            match event {
                ResponseEvent::ThinkingDelta(delta) => {
                    thinking_buf.push_str(&delta);
                }
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    if !thinking_buf.is_empty() {
                        let text = std::mem::take(&mut thinking_buf);
                        self.bus.publish(AgentEvent::ThinkingComplete { text });
                    }
                    if self.state == AgentState::Thinking {
                        self.set_state(AgentState::Streaming);
                    }
                    full_text.push_str(&delta);
                    self.bus.publish(AgentEvent::Token { delta });
                }
                ResponseEvent::TextDelta(_) => {}
                ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let p = pending.entry(index).or_insert_with(PendingToolCall::empty);
                    if !id.is_empty() {
                        p.id = id;
                    }
                    if !name.is_empty() {
                        p.name = name;
                    }
                    p.args_buf.push_str(&arguments);
                }
                ResponseEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                    cache_read_tokens,
                    cache_creation_tokens,
                } => {
                    let u = Usage {
                        prompt_tokens,
                        completion_tokens,
                        cache_read_tokens,
                        cache_creation_tokens,
                    };
                    usage = Some(u);
                    self.bus.publish(AgentEvent::TokenUsageUpdate { usage: u });
                }
                ResponseEvent::Done => {
                    if !thinking_buf.is_empty() {
                        let text = std::mem::take(&mut thinking_buf);
                        self.bus.publish(AgentEvent::ThinkingComplete { text });
                    }
                    break;
                }
                ResponseEvent::Error(e) => {
                    warn!("model stream error: {e}");
                }
            }
        }

        // Flush accumulated parallel tool calls, ordered by index. Calls
        // with an empty name cannot be dispatched and are dropped; an empty
        // id gets a synthetic fallback so the pairing contract holds.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::with_capacity(sorted.len());
        for (i, (_, p)) in sorted.into_iter().enumerate() {
            if p.name.is_empty() {
                warn!(tool_call_id = %p.id, "dropping tool call with empty name from model");
                continue;
            }
            tool_calls.push(p.finish(i));
        }

        Ok((full_text, tool_calls, usage))
    }

    fn set_state(&mut self, to: AgentState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!(from = from.as_str(), to = to.as_str(), "agent state change");
        self.bus.publish(AgentEvent::StateChange { from, to });
    }

    /// Publish `thread_event_added` for an event the store just accepted.
    fn publish_appended(
        &self,
        appended: Result<ThreadEvent, StorageError>,
    ) -> anyhow::Result<ThreadEvent> {
        let event = appended?;
        self.bus.publish(AgentEvent::ThreadEventAdded {
            event: event.clone(),
        });
        Ok(event)
    }
}

enum BatchEnd {
    Continue,
    Aborted,
    Stopped,
}

struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    fn empty() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            args_buf: String::new(),
        }
    }

    fn finish(self, index: usize) -> ToolCallRequest {
        let arguments = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.args_buf).unwrap_or_else(|e| {
                warn!(
                    tool_name = %self.name,
                    error = %e,
                    "model sent tool call with invalid JSON arguments; substituting {{}}"
                );
                serde_json::Value::Object(Default::default())
            })
        };
        let id = if self.id.is_empty() {
            warn!(tool_name = %self.name, "tool call had empty id; generating synthetic id");
            format!("tc_synthetic_{index}")
        } else {
            self.id
        };
        ToolCallRequest {
            id,
            name: self.name,
            arguments,
        }
    }
}

fn to_result_record(result: &ExecutionResult) -> ToolResultRecord {
    ToolResultRecord {
        id: result.tool_call.id.clone(),
        content: result
            .outcome
            .content
            .iter()
            .map(|c| match c {
                ContentItem::Text { text } => ResultContent::text(text.clone()),
            })
            .collect(),
        is_error: result.outcome.is_error,
    }
}

fn is_abort(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<ProviderError>(), Some(ProviderError::Aborted))
}

fn spawn_progress_ticker(
    bus: Arc<EventBus>,
    metrics: Arc<Mutex<TurnMetrics>>,
    stop: CancellationToken,
    interval_ms: u64,
) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(interval_ms.max(10)));
        // The first tick fires immediately; the heartbeat starts one
        // interval in.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = metrics.lock().unwrap_or_else(|p| p.into_inner()).snapshot();
                    bus.publish(AgentEvent::TurnProgress { metrics: snapshot });
                }
            }
        }
    });
}
