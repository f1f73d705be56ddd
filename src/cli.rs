// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lace",
    about = "An event-sourced agent orchestration engine for LLM coding assistants",
    version,
    long_about = None,
)]
pub struct Cli {
    /// Provider id: "anthropic" | "openai" | "lmstudio" | "ollama" | "mock"
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name forwarded to the provider
    #[arg(long)]
    pub model: Option<String>,

    /// Single-shot mode: run one turn with this prompt, then exit
    #[arg(long)]
    pub prompt: Option<String>,

    /// Resume a conversation: the latest thread, or a specific thread id
    #[arg(
        long = "continue",
        value_name = "THREAD_ID",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    pub continue_thread: Option<String>,

    /// Auto-approve tools whose annotations mark them read-only
    #[arg(long)]
    pub allow_non_destructive_tools: bool,

    /// Comma-separated tool names approved without prompting
    #[arg(long, value_delimiter = ',')]
    pub auto_approve_tools: Vec<String>,

    /// Comma-separated tool names denied unconditionally
    #[arg(long, value_delimiter = ',')]
    pub disable_tools: Vec<String>,

    /// Deny every tool
    #[arg(long)]
    pub disable_all_tools: bool,

    /// Skip schema validation of tool arguments
    #[arg(long)]
    pub disable_tool_guardrails: bool,

    /// Tracing filter, e.g. "info" or "lace_core=debug"
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Record provider HTTP traffic into this HAR file (driver-dependent)
    #[arg(long, value_name = "FILE")]
    pub har: Option<PathBuf>,

    /// Explicit config file (merged over the standard search path)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_invocation_parses() {
        let cli = Cli::parse_from(["lace"]);
        assert!(cli.prompt.is_none());
        assert!(cli.continue_thread.is_none());
        assert!(!cli.disable_all_tools);
    }

    #[test]
    fn continue_accepts_bare_flag_and_explicit_id() {
        let bare = Cli::parse_from(["lace", "--continue"]);
        assert_eq!(bare.continue_thread.as_deref(), Some(""));
        let named = Cli::parse_from(["lace", "--continue", "lace_20240101_abc123"]);
        assert_eq!(named.continue_thread.as_deref(), Some("lace_20240101_abc123"));
    }

    #[test]
    fn tool_lists_split_on_commas() {
        let cli = Cli::parse_from(["lace", "--auto-approve-tools", "file_list,file_read"]);
        assert_eq!(cli.auto_approve_tools, vec!["file_list", "file_read"]);
    }

    #[test]
    fn provider_and_model_flags_parse() {
        let cli = Cli::parse_from(["lace", "--provider", "mock", "--model", "mock-model"]);
        assert_eq!(cli.provider.as_deref(), Some("mock"));
        assert_eq!(cli.model.as_deref(), Some("mock-model"));
    }
}
