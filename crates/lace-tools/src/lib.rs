// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod approval;
pub mod breaker;
mod executor;
mod registry;
mod retry;
mod tool;
mod validate;

pub use approval::{
    ApprovalCallback, ApprovalDecision, ApprovalPolicy, ApprovalRequest, ApprovalVerdict,
};
pub use breaker::{BreakerState, CircuitBreaker};
pub use executor::{ExecutionResult, ToolExecutor};
pub use registry::{ToolRegistry, ToolSchema};
pub use retry::{backoff_delay, is_retriable};
pub use tool::{ContentItem, Tool, ToolAnnotations, ToolCall, ToolContext, ToolOutcome};
pub use validate::validate_arguments;
