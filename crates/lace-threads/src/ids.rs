// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Utc;
use rand::Rng;

const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a fresh root thread id: `lace_YYYYMMDD_[a-z0-9]{6}`.
pub fn generate_thread_id() -> String {
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("lace_{date}_{suffix}")
}

/// True when `id` names a delegate thread (`<parent>.<n>`).
pub fn is_delegate_thread_id(id: &str) -> bool {
    delegate_index(id).is_some()
}

/// The parent of a delegate thread id, or `None` for roots.
pub fn parent_thread_id(id: &str) -> Option<&str> {
    let (parent, tail) = id.rsplit_once('.')?;
    tail.parse::<u32>().ok()?;
    Some(parent)
}

/// The 1-based delegate index of `id`, or `None` for roots.
pub fn delegate_index(id: &str) -> Option<u32> {
    let (_, tail) = id.rsplit_once('.')?;
    tail.parse::<u32>().ok().filter(|n| *n >= 1)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
