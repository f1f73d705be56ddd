// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use rand::Rng;

use lace_config::RetryConfig;

/// Substrings that mark an error as transient.
const RETRIABLE_PATTERNS: &[&str] = &[
    "timeout",
    "network",
    "connection",
    "temporary",
    "unavailable",
    "overload",
    "rate limit",
    "too many requests",
    "service degraded",
    "concurrent",
];

/// Substrings that mark an error as permanent.
const NON_RETRIABLE_PATTERNS: &[&str] = &[
    "authentication",
    "authorization",
    "permission denied",
    "access denied",
    "invalid credentials",
    "forbidden",
    "not found",
    "bad request",
    "invalid input",
    "validation failed",
];

/// Classify a failure message.
///
/// Non-retriable patterns win over retriable ones; an unclassified message
/// is treated as retriable.
pub fn is_retriable(message: &str) -> bool {
    let lower = message.to_lowercase();
    if NON_RETRIABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    if RETRIABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }
    true
}

/// Delay before retry number `attempt` (0-based):
/// `min(max_delay, base * multiplier^attempt)` plus uniform jitter in
/// `[0, 10%)` of the capped delay.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let exp = cfg.base_delay_ms as f64 * cfg.backoff_multiplier.powi(attempt as i32);
    let capped = exp.min(cfg.max_delay_ms as f64);
    let jitter = rand::thread_rng().gen_range(0.0..capped * 0.10);
    Duration::from_millis((capped + jitter) as u64)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
