// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Safety-gated tool execution.
//!
//! Every call runs through the same pipeline: approval gate → argument
//! validation → circuit breaker admission → execution with retry/backoff.
//! Batches fan out under a counting semaphore and results come back in
//! issue order regardless of completion order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use lace_config::{BreakerConfig, Config, RetryConfig};

use crate::{
    backoff_delay, is_retriable, validate_arguments, ApprovalPolicy, ApprovalVerdict,
    CircuitBreaker, ToolCall, ToolContext, ToolOutcome, ToolRegistry,
};

/// Normalized outcome of one tool call, persisted as a `TOOL_RESULT` event
/// by the agent.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub tool_call: ToolCall,
    pub success: bool,
    /// The approval policy refused the call.
    pub denied: bool,
    /// The approval policy admitted the call (false for denials and
    /// circuit-broken calls).
    pub approved: bool,
    /// The user's denial asked for the whole turn to stop.
    pub should_stop: bool,
    /// Short-circuited by the per-tool breaker; the tool body never ran.
    pub circuit_broken: bool,
    /// This result came from the sequential fallback pass.
    pub sequential_fallback: bool,
    /// The batch partially failed; this success survived alongside failures.
    pub graceful_degradation: bool,
    pub retry_attempts: u32,
    pub total_retry_delay: Duration,
    /// Human-actionable failure summary, when the call did not succeed.
    pub actionable_error: Option<String>,
    pub outcome: ToolOutcome,
}

impl ExecutionResult {
    fn base(call: &ToolCall, outcome: ToolOutcome) -> Self {
        Self {
            tool_call: call.clone(),
            success: !outcome.is_error,
            denied: false,
            approved: false,
            should_stop: false,
            circuit_broken: false,
            sequential_fallback: false,
            graceful_degradation: false,
            retry_attempts: 0,
            total_retry_delay: Duration::ZERO,
            actionable_error: None,
            outcome,
        }
    }

    fn denied(call: &ToolCall, reason: String, should_stop: bool) -> Self {
        Self {
            denied: true,
            should_stop,
            actionable_error: Some(reason.clone()),
            ..Self::base(call, ToolOutcome::error(reason))
        }
    }

    fn circuit_broken(call: &ToolCall) -> Self {
        let msg = format!("circuit breaker open for tool '{}'", call.name);
        Self {
            circuit_broken: true,
            actionable_error: Some(msg.clone()),
            ..Self::base(call, ToolOutcome::error(msg))
        }
    }

    fn aborted(call: &ToolCall) -> Self {
        Self {
            actionable_error: Some("aborted".into()),
            ..Self::base(call, ToolOutcome::error("tool call aborted"))
        }
    }
}

/// Executes tool batches with approval gating, retry, and circuit breaking.
///
/// One executor per agent: breaker state and the approval session cache are
/// never shared between a parent and its delegates.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    approvals: Arc<ApprovalPolicy>,
    retry: RetryConfig,
    breaker_cfg: BreakerConfig,
    semaphore: Arc<Semaphore>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    validate: bool,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, approvals: Arc<ApprovalPolicy>, config: &Config) -> Self {
        Self {
            registry,
            approvals,
            retry: config.retry.clone(),
            breaker_cfg: config.breaker.clone(),
            semaphore: Arc::new(Semaphore::new(config.agent.max_concurrent_tools.max(1))),
            breakers: Mutex::new(HashMap::new()),
            validate: !config.tools.disable_tool_guardrails,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn approvals(&self) -> &Arc<ApprovalPolicy> {
        &self.approvals
    }

    /// Execute a batch of tool calls.
    ///
    /// Calls run concurrently under the semaphore; failures never cancel
    /// peers; results preserve input order. When more than half of a batch
    /// fails and more than one failure is retriable, the failing subset is
    /// re-run sequentially (`sequential_fallback`), and surviving successes
    /// in a still partially-failed batch are marked `graceful_degradation`.
    pub async fn execute_batch(
        self: &Arc<Self>,
        calls: Vec<ToolCall>,
        ctx: &ToolContext,
    ) -> Vec<ExecutionResult> {
        let mut tasks = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            let exec = Arc::clone(self);
            let ctx = ctx.clone();
            let sem = Arc::clone(&self.semaphore);
            tasks.push(tokio::spawn(async move {
                // Closing the semaphore is not part of this executor's
                // lifecycle, so acquisition can only fail on shutdown races;
                // treat it like cancellation.
                let Ok(_permit) = sem.acquire_owned().await else {
                    return ExecutionResult::aborted(&call);
                };
                exec.execute_one(&call, &ctx).await
            }));
        }

        // Await in issue order so conversation reconstruction stays
        // deterministic even when calls complete out of order.
        let mut results = Vec::with_capacity(calls.len());
        for (i, task) in tasks.into_iter().enumerate() {
            let result = match task.await {
                Ok(r) => r,
                Err(e) => {
                    warn!(tool = %calls[i].name, "tool task panicked: {e}");
                    let mut r = ExecutionResult::base(
                        &calls[i],
                        ToolOutcome::error(format!("tool execution panicked: {e}")),
                    );
                    r.actionable_error = Some("tool panicked".into());
                    r
                }
            };
            results.push(result);
        }

        self.apply_sequential_fallback(&calls, &mut results, ctx).await;
        results
    }

    async fn apply_sequential_fallback(
        self: &Arc<Self>,
        calls: &[ToolCall],
        results: &mut [ExecutionResult],
        ctx: &ToolContext,
    ) {
        let n = results.len();
        if n < 2 {
            return;
        }
        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.success && !r.denied && !r.circuit_broken)
            .map(|(i, _)| i)
            .collect();
        let retriable_failures = failed
            .iter()
            .filter(|&&i| is_retriable(&results[i].outcome.text()))
            .count();
        if failed.len() * 2 <= n || retriable_failures <= 1 {
            return;
        }

        debug!(
            failed = failed.len(),
            total = n,
            "batch failure rate above 50%; retrying failing subset sequentially"
        );
        for i in failed {
            let mut replacement = self.execute_one(&calls[i], ctx).await;
            replacement.sequential_fallback = true;
            results[i] = replacement;
        }

        let any_failure = results.iter().any(|r| !r.success);
        if any_failure {
            for r in results.iter_mut().filter(|r| r.success) {
                r.graceful_degradation = true;
            }
        }
    }

    /// Run one call through the full pipeline.
    async fn execute_one(&self, call: &ToolCall, ctx: &ToolContext) -> ExecutionResult {
        if ctx.cancel.is_cancelled() {
            return ExecutionResult::aborted(call);
        }

        let Some(tool) = self.registry.get(&call.name) else {
            let msg = format!("unknown tool: {}", call.name);
            let mut r = ExecutionResult::base(call, ToolOutcome::error(msg.clone()));
            r.actionable_error = Some(msg);
            return r;
        };

        // 1. Approval gate.
        let verdict = self
            .approvals
            .evaluate(&call.name, &tool.annotations(), &call.arguments, &call.id)
            .await;
        if let ApprovalVerdict::Denied {
            reason,
            should_stop,
        } = verdict
        {
            debug!(tool = %call.name, %reason, "tool call denied");
            return ExecutionResult::denied(call, reason, should_stop);
        }

        // 2. Argument validation; a failing call never reaches the tool body
        //    and is never retried.
        if self.validate {
            if let Err(reason) = validate_arguments(&tool.schema(), &call.arguments) {
                let mut r = ExecutionResult::base(call, ToolOutcome::error(reason.clone()));
                r.approved = true;
                r.actionable_error = Some(reason);
                return r;
            }
        }

        // 3. Circuit breaker admission.
        if self.breaker_cfg.enabled && !self.admit(&call.name) {
            let mut r = ExecutionResult::circuit_broken(call);
            r.approved = true;
            return r;
        }

        // 4. Execution with retry + backoff.
        let mut retry_attempts = 0u32;
        let mut total_retry_delay = Duration::ZERO;
        let outcome = loop {
            let outcome = tool.execute(call.arguments.clone(), ctx).await;
            if !outcome.is_error {
                break outcome;
            }
            let message = outcome.text();
            if !is_retriable(&message) || retry_attempts >= self.retry.max_retries {
                break outcome;
            }
            let delay = backoff_delay(&self.retry, retry_attempts);
            debug!(
                tool = %call.name,
                attempt = retry_attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying tool call"
            );
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    // Interrupted mid-backoff: report what happened so far.
                    let mut r = ExecutionResult::aborted(call);
                    r.approved = true;
                    r.retry_attempts = retry_attempts;
                    r.total_retry_delay = total_retry_delay;
                    return r;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            retry_attempts += 1;
            total_retry_delay += delay;
        };

        // 5. Breaker bookkeeping on the final outcome.
        if self.breaker_cfg.enabled {
            if outcome.is_error {
                self.record_failure(&call.name);
            } else {
                self.record_success(&call.name);
            }
        }

        let mut result = ExecutionResult::base(call, outcome);
        result.approved = true;
        result.retry_attempts = retry_attempts;
        result.total_retry_delay = total_retry_delay;
        if !result.success {
            result.actionable_error = Some(format!(
                "tool '{}' failed after {} retries: {}",
                call.name,
                retry_attempts,
                result.outcome.text()
            ));
        }
        result
    }

    fn admit(&self, tool_name: &str) -> bool {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(&self.breaker_cfg))
            .admit(Instant::now())
    }

    fn record_success(&self, tool_name: &str) {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(b) = breakers.get_mut(tool_name) {
            b.record_success();
        }
    }

    fn record_failure(&self, tool_name: &str) {
        let mut breakers = self.breakers.lock().unwrap_or_else(|p| p.into_inner());
        breakers
            .entry(tool_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(&self.breaker_cfg))
            .record_failure(Instant::now());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ApprovalPolicy, Tool, ToolAnnotations};
    use async_trait::async_trait;
    use lace_config::ToolPolicyConfig;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    // ── Test tools ────────────────────────────────────────────────────────────

    /// Succeeds after a configurable number of failures.
    struct FlakyTool {
        name: &'static str,
        failures_before_success: u32,
        error_message: &'static str,
        invocations: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fails a few times, then succeeds"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> ToolOutcome {
            let n = self.invocations.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                ToolOutcome::error(self.error_message)
            } else {
                ToolOutcome::ok("recovered")
            }
        }
    }

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations {
                read_only_hint: true,
                ..Default::default()
            }
        }
        async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    /// Sleeps, then echoes; used for ordering and concurrency tests.
    struct SlowTool {
        name: &'static str,
        delay_ms: u64,
        running: Arc<AtomicU32>,
        max_running: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "slow echo"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> ToolOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ToolOutcome::ok(self.name)
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn auto_approve_config() -> Config {
        Config {
            tools: ToolPolicyConfig {
                allow_non_destructive_tools: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn executor_with(registry: ToolRegistry, config: Config) -> Arc<ToolExecutor> {
        let approvals = Arc::new(ApprovalPolicy::new(config.tools.clone(), None));
        Arc::new(ToolExecutor::new(Arc::new(registry), approvals, &config))
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("test-thread")
    }

    // ── Basic execution ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn successful_call_is_normalized() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["echo".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "echo", json!({"text": "hi"}))], &ctx())
            .await;
        let r = &results[0];
        assert!(r.success);
        assert!(r.approved);
        assert!(!r.denied && !r.circuit_broken);
        assert_eq!(r.retry_attempts, 0);
        assert_eq!(r.outcome.text(), "hi");
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let exec = executor_with(ToolRegistry::new(), auto_approve_config());
        let results = exec
            .execute_batch(vec![call("c1", "missing", json!({}))], &ctx())
            .await;
        assert!(!results[0].success);
        assert!(results[0].outcome.text().contains("unknown tool"));
    }

    #[tokio::test]
    async fn results_preserve_issue_order_despite_completion_order() {
        let mut reg = ToolRegistry::new();
        let running = Arc::new(AtomicU32::new(0));
        let max = Arc::new(AtomicU32::new(0));
        reg.register(SlowTool {
            name: "slow",
            delay_ms: 50,
            running: running.clone(),
            max_running: max.clone(),
        });
        reg.register(EchoTool { name: "echo" });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["slow".into(), "echo".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(
                vec![
                    call("a", "slow", json!({})),
                    call("b", "echo", json!({"text": "fast"})),
                ],
                &ctx(),
            )
            .await;
        // The fast call finishes first but must come second.
        assert_eq!(results[0].tool_call.id, "a");
        assert_eq!(results[1].tool_call.id, "b");
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_semaphore() {
        let mut reg = ToolRegistry::new();
        let running = Arc::new(AtomicU32::new(0));
        let max = Arc::new(AtomicU32::new(0));
        reg.register(SlowTool {
            name: "slow",
            delay_ms: 20,
            running: running.clone(),
            max_running: max.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.agent.max_concurrent_tools = 2;
        cfg.tools.auto_approve_tools = vec!["slow".into()];
        let exec = executor_with(reg, cfg);

        let calls: Vec<ToolCall> = (0..6).map(|i| call(&format!("c{i}"), "slow", json!({}))).collect();
        let results = exec.execute_batch(calls, &ctx()).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.success));
        assert!(
            max.load(Ordering::SeqCst) <= 2,
            "semaphore must cap concurrency at 2, saw {}",
            max.load(Ordering::SeqCst)
        );
    }

    // ── Approval & validation ─────────────────────────────────────────────────

    #[tokio::test]
    async fn denied_tool_is_never_invoked() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "net",
            failures_before_success: 0,
            error_message: "",
            invocations: invocations.clone(),
        });
        let mut cfg = Config::default();
        cfg.tools.disable_tools = vec!["net".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "net", json!({}))], &ctx())
            .await;
        assert!(results[0].denied);
        assert!(!results[0].should_stop, "policy denial must not stop the turn");
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_execution() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["echo".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "echo", json!({}))], &ctx())
            .await;
        let r = &results[0];
        assert!(!r.success);
        assert!(r.outcome.is_error);
        assert!(r.outcome.text().contains("validation failed"));
        assert_eq!(r.retry_attempts, 0, "validation failures are never retried");
    }

    #[tokio::test]
    async fn guardrails_off_skips_validation() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["echo".into()];
        cfg.tools.disable_tool_guardrails = true;
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "echo", json!({}))], &ctx())
            .await;
        assert!(results[0].success, "missing arg tolerated without guardrails");
    }

    // ── Retry ─────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "net",
            failures_before_success: 2,
            error_message: "timeout",
            invocations: invocations.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["net".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "net", json!({}))], &ctx())
            .await;
        let r = &results[0];
        assert!(r.success);
        assert_eq!(r.retry_attempts, 2);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        // base 100 + 200, each plus at most 10% jitter
        let ms = r.total_retry_delay.as_millis() as u64;
        assert!((200..=660).contains(&ms), "total retry delay {ms}ms out of range");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_failure_is_not_retried() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "net",
            failures_before_success: 10,
            error_message: "permission denied",
            invocations: invocations.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["net".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "net", json!({}))], &ctx())
            .await;
        assert!(!results[0].success);
        assert_eq!(results[0].retry_attempts, 0);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_max_and_report_actionable_error() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "net",
            failures_before_success: 10,
            error_message: "service unavailable",
            invocations: invocations.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["net".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(vec![call("c1", "net", json!({}))], &ctx())
            .await;
        let r = &results[0];
        assert!(!r.success);
        assert_eq!(r.retry_attempts, 3);
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert!(r.actionable_error.as_ref().unwrap().contains("after 3 retries"));
    }

    // ── Circuit breaker ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_short_circuits() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "flaky",
            failures_before_success: 100,
            error_message: "service unavailable",
            invocations: invocations.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["flaky".into()];
        cfg.retry.max_retries = 0; // one invocation per call
        let exec = executor_with(reg, cfg);

        for i in 0..5 {
            let results = exec
                .execute_batch(vec![call(&format!("c{i}"), "flaky", json!({}))], &ctx())
                .await;
            assert!(!results[0].success);
            assert!(!results[0].circuit_broken);
        }
        let body_calls = invocations.load(Ordering::SeqCst);
        assert_eq!(body_calls, 5);

        // Sixth call inside the open window: short-circuited, body untouched.
        let results = exec
            .execute_batch(vec![call("c6", "flaky", json!({}))], &ctx())
            .await;
        assert!(results[0].circuit_broken);
        assert!(!results[0].success);
        assert_eq!(invocations.load(Ordering::SeqCst), body_calls);
    }

    // ── Sequential fallback ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn majority_failure_triggers_sequential_fallback() {
        // Both tools fail their first invocation with a transient error and
        // succeed on the second. With max_retries 0 the parallel pass fails
        // outright, so the whole batch qualifies for the sequential pass,
        // which recovers both.
        let inv_a = Arc::new(AtomicU32::new(0));
        let inv_b = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "a",
            failures_before_success: 1,
            error_message: "connection reset",
            invocations: inv_a.clone(),
        });
        reg.register(FlakyTool {
            name: "b",
            failures_before_success: 1,
            error_message: "connection reset",
            invocations: inv_b.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["a".into(), "b".into()];
        cfg.retry.max_retries = 0;
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(
                vec![call("c1", "a", json!({})), call("c2", "b", json!({}))],
                &ctx(),
            )
            .await;
        assert!(results.iter().all(|r| r.sequential_fallback));
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn minority_failure_skips_fallback() {
        let inv = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        reg.register(FlakyTool {
            name: "bad",
            failures_before_success: 100,
            error_message: "permission denied",
            invocations: inv.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["echo".into(), "bad".into()];
        let exec = executor_with(reg, cfg);

        let results = exec
            .execute_batch(
                vec![
                    call("c1", "echo", json!({"text": "1"})),
                    call("c2", "echo", json!({"text": "2"})),
                    call("c3", "bad", json!({})),
                ],
                &ctx(),
            )
            .await;
        assert!(results.iter().all(|r| !r.sequential_fallback));
        assert_eq!(results.iter().filter(|r| r.success).count(), 2);
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancelled_context_prevents_execution() {
        let invocations = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(FlakyTool {
            name: "net",
            failures_before_success: 0,
            error_message: "",
            invocations: invocations.clone(),
        });
        let mut cfg = auto_approve_config();
        cfg.tools.auto_approve_tools = vec!["net".into()];
        let exec = executor_with(reg, cfg);

        let ctx = ctx();
        ctx.cancel.cancel();
        let results = exec
            .execute_batch(vec![call("c1", "net", json!({}))], &ctx)
            .await;
        assert!(!results[0].success);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }
}
