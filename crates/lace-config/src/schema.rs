// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper – returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

/// The complete engine configuration.
///
/// Captured once at startup (config files merged with CLI flags) and passed
/// into constructors; nothing in the engine reads configuration from global
/// state after this record is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolPolicyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub delegation: DelegationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Root directory for persistent state (the event store database).
    /// Defaults to `$LACE_DIR`, then `~/.lace`.
    #[serde(default)]
    pub lace_dir: Option<PathBuf>,
    /// When set, provider factories are asked to record HTTP traffic into
    /// this HAR file. Recording itself is performed by the provider driver.
    #[serde(default)]
    pub har_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "openai" | "lmstudio" | "ollama" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on provider-call iterations within a single turn.
    #[serde(default = "AgentConfig::default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum tool calls executing concurrently within one batch.
    #[serde(default = "AgentConfig::default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    /// Fraction of the model context window budgeted for input.
    #[serde(default = "AgentConfig::default_context_utilization")]
    pub context_utilization: f32,
    /// Prompt-cache marking strategy for providers that support cache controls.
    #[serde(default)]
    pub cache_strategy: CacheStrategy,
    /// Number of trailing messages left unmarked by the `aggressive` cache
    /// strategy. `conservative` keeps one extra.
    #[serde(default = "AgentConfig::default_fresh_message_count")]
    pub fresh_message_count: usize,
    /// Interval of the turn progress ticker, in milliseconds.
    #[serde(default = "AgentConfig::default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Optional system prompt override for the root agent.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AgentConfig {
    fn default_max_iterations() -> u32 {
        25
    }
    fn default_max_concurrent_tools() -> usize {
        10
    }
    fn default_context_utilization() -> f32 {
        0.70
    }
    fn default_fresh_message_count() -> usize {
        2
    }
    fn default_progress_interval_ms() -> u64 {
        1000
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::default_max_iterations(),
            max_concurrent_tools: Self::default_max_concurrent_tools(),
            context_utilization: Self::default_context_utilization(),
            cache_strategy: CacheStrategy::default(),
            fresh_message_count: Self::default_fresh_message_count(),
            progress_interval_ms: Self::default_progress_interval_ms(),
            system_prompt: None,
        }
    }
}

/// Prompt-cache marking strategy.
///
/// Opaque to providers without cache controls – the flags ride on the
/// canonical messages and drivers that cannot use them ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Mark all but the last `fresh_message_count` messages cacheable.
    #[default]
    Aggressive,
    /// Like `aggressive` but keeps one extra fresh message.
    Conservative,
    /// Mark nothing.
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    /// Deny every tool unconditionally.
    #[serde(default)]
    pub disable_all_tools: bool,
    /// Tools denied by name.
    #[serde(default)]
    pub disable_tools: Vec<String>,
    /// Tools approved without prompting.
    #[serde(default)]
    pub auto_approve_tools: Vec<String>,
    /// Auto-approve tools whose annotations mark them read-only.
    #[serde(default)]
    pub allow_non_destructive_tools: bool,
    /// Skip schema validation of tool arguments (guardrails off).
    #[serde(default)]
    pub disable_tool_guardrails: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RetryConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "RetryConfig::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_base_delay_ms() -> u64 {
        100
    }
    fn default_max_delay_ms() -> u64 {
        5_000
    }
    fn default_backoff_multiplier() -> f64 {
        2.0
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            backoff_multiplier: Self::default_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "BreakerConfig::default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before admitting a half-open probe.
    #[serde(default = "BreakerConfig::default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl BreakerConfig {
    fn default_failure_threshold() -> u32 {
        5
    }
    fn default_open_timeout_secs() -> u64 {
        30
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            open_timeout_secs: Self::default_open_timeout_secs(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Wall-clock cap on a delegated sub-agent, in seconds.
    #[serde(default = "DelegationConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Token ceiling handed to the sub-agent.
    #[serde(default = "DelegationConfig::default_max_tokens")]
    pub max_tokens: u32,
    /// Fraction of the sub-agent budget at which a warning is emitted.
    #[serde(default = "DelegationConfig::default_warning_fraction")]
    pub warning_fraction: f32,
    /// Tokens held back from the sub-agent budget for its final answer.
    #[serde(default = "DelegationConfig::default_reserve_tokens")]
    pub reserve_tokens: u32,
}

impl DelegationConfig {
    fn default_timeout_secs() -> u64 {
        300
    }
    fn default_max_tokens() -> u32 {
        50_000
    }
    fn default_warning_fraction() -> f32 {
        0.70
    }
    fn default_reserve_tokens() -> u32 {
        1_000
    }
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
            max_tokens: Self::default_max_tokens(),
            warning_fraction: Self::default_warning_fraction(),
            reserve_tokens: Self::default_reserve_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "lace_core=debug".
    #[serde(default)]
    pub level: Option<String>,
    /// When set, log output goes to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
