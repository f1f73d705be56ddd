// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;

use lace_model::Usage;

const TURN_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Per-turn metrics. Ephemeral: created on user input, discarded on turn
/// completion or abort, never persisted as a thread event.
#[derive(Debug, Clone)]
pub struct TurnMetrics {
    /// `turn_<unix_ms>_<rand6>`
    pub turn_id: String,
    pub started: Instant,
    pub elapsed: Duration,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl TurnMetrics {
    pub fn begin() -> Self {
        let millis = Utc::now().timestamp_millis();
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| TURN_SUFFIX_ALPHABET[rng.gen_range(0..TURN_SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self {
            turn_id: format!("turn_{millis}_{suffix}"),
            started: Instant::now(),
            elapsed: Duration::ZERO,
            tokens_in: 0,
            tokens_out: 0,
        }
    }

    /// A copy with `elapsed` refreshed; used by the progress ticker.
    pub fn snapshot(&self) -> Self {
        let mut copy = self.clone();
        copy.elapsed = self.started.elapsed();
        copy
    }
}

/// Token budget for an agent (used by delegation; optional for roots).
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    pub max_tokens: u32,
    pub warning_fraction: f32,
    pub reserve_tokens: u32,
}

impl TokenBudget {
    /// Tokens usable for input after the reserve is held back.
    pub fn effective(&self) -> u32 {
        self.max_tokens.saturating_sub(self.reserve_tokens)
    }

    pub fn should_warn(&self, used: u32) -> bool {
        used as f32 >= self.max_tokens as f32 * self.warning_fraction
    }
}

/// Session-wide token accounting.
///
/// The provider's `prompt_tokens` already covers the whole context, so it is
/// *set* each turn; completions are summed across turns.
#[derive(Debug, Clone)]
pub struct SessionTokenAccountant {
    pub messages: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cache_hits: u64,
    pub cache_creations: u64,
    pub session_start: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Default for SessionTokenAccountant {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            messages: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_hits: 0,
            cache_creations: 0,
            session_start: now,
            last_activity: now,
        }
    }
}

impl SessionTokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_turn(&mut self, usage: &Usage) {
        self.messages += 1;
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.cache_hits += usage.cache_read_tokens as u64;
        self.cache_creations += usage.cache_creation_tokens as u64;
        self.last_activity = Utc::now();
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// `hits / (hits + creations)`, when any cache traffic happened.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let denom = self.cache_hits + self.cache_creations;
        (denom > 0).then(|| self.cache_hits as f64 / denom as f64)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_ids_have_expected_shape() {
        let m = TurnMetrics::begin();
        let parts: Vec<&str> = m.turn_id.splitn(3, '_').collect();
        assert_eq!(parts[0], "turn");
        assert!(parts[1].parse::<i64>().is_ok(), "unix ms part: {}", parts[1]);
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn turn_ids_are_unique() {
        assert_ne!(TurnMetrics::begin().turn_id, TurnMetrics::begin().turn_id);
    }

    #[test]
    fn snapshot_refreshes_elapsed() {
        let m = TurnMetrics::begin();
        std::thread::sleep(Duration::from_millis(5));
        assert!(m.snapshot().elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn budget_effective_subtracts_reserve() {
        let b = TokenBudget {
            max_tokens: 50_000,
            warning_fraction: 0.70,
            reserve_tokens: 1_000,
        };
        assert_eq!(b.effective(), 49_000);
        assert!(!b.should_warn(30_000));
        assert!(b.should_warn(35_000));
    }

    #[test]
    fn accountant_sets_prompt_and_sums_completions() {
        let mut acc = SessionTokenAccountant::new();
        acc.record_turn(&Usage {
            prompt_tokens: 30,
            completion_tokens: 5,
            ..Default::default()
        });
        acc.record_turn(&Usage {
            prompt_tokens: 50,
            completion_tokens: 5,
            ..Default::default()
        });
        // Prompt reflects the latest full-context figure, completions add up.
        assert_eq!(acc.prompt_tokens, 50);
        assert_eq!(acc.completion_tokens, 10);
        assert_eq!(acc.total_tokens(), 60);
        assert_eq!(acc.messages, 2);
    }

    #[test]
    fn cache_hit_rate_requires_traffic() {
        let mut acc = SessionTokenAccountant::new();
        assert_eq!(acc.cache_hit_rate(), None);
        acc.record_turn(&Usage {
            cache_read_tokens: 300,
            cache_creation_tokens: 100,
            ..Default::default()
        });
        assert_eq!(acc.cache_hit_rate(), Some(0.75));
    }
}
