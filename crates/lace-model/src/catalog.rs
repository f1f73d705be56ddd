// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

/// Metadata for a single model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-sonnet-4-5")
    pub id: &'static str,
    /// Provider identifier: "anthropic" | "openai" | "lmstudio" | "ollama" | "mock"
    pub provider: &'static str,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    /// USD per million input tokens. Zero for local servers.
    pub input_cost_per_mtok: f64,
    /// USD per million output tokens. Zero for local servers.
    pub output_cost_per_mtok: f64,
}

/// The bundled static catalog.
pub static CATALOG: &[ModelCatalogEntry] = &[
    // ── Anthropic ─────────────────────────────────────────────────────────────
    ModelCatalogEntry {
        id: "claude-opus-4-6",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_cost_per_mtok: 15.0,
        output_cost_per_mtok: 75.0,
    },
    ModelCatalogEntry {
        id: "claude-sonnet-4-5",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 64_000,
        input_cost_per_mtok: 3.0,
        output_cost_per_mtok: 15.0,
    },
    ModelCatalogEntry {
        id: "claude-haiku-4-5",
        provider: "anthropic",
        context_window: 200_000,
        max_output_tokens: 32_000,
        input_cost_per_mtok: 0.80,
        output_cost_per_mtok: 4.0,
    },
    // ── OpenAI ────────────────────────────────────────────────────────────────
    ModelCatalogEntry {
        id: "gpt-4o",
        provider: "openai",
        context_window: 128_000,
        max_output_tokens: 16_384,
        input_cost_per_mtok: 2.50,
        output_cost_per_mtok: 10.0,
    },
    ModelCatalogEntry {
        id: "gpt-4o-mini",
        provider: "openai",
        context_window: 128_000,
        max_output_tokens: 16_384,
        input_cost_per_mtok: 0.15,
        output_cost_per_mtok: 0.60,
    },
    ModelCatalogEntry {
        id: "o3",
        provider: "openai",
        context_window: 200_000,
        max_output_tokens: 100_000,
        input_cost_per_mtok: 2.0,
        output_cost_per_mtok: 8.0,
    },
    // ── Local servers ─────────────────────────────────────────────────────────
    ModelCatalogEntry {
        id: "qwen2.5-coder-32b",
        provider: "lmstudio",
        context_window: 32_768,
        max_output_tokens: 8_192,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
    },
    ModelCatalogEntry {
        id: "llama3.1:8b",
        provider: "ollama",
        context_window: 131_072,
        max_output_tokens: 8_192,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
    },
    // ── Test providers ────────────────────────────────────────────────────────
    ModelCatalogEntry {
        id: "mock-model",
        provider: "mock",
        context_window: 128_000,
        max_output_tokens: 8_192,
        input_cost_per_mtok: 0.0,
        output_cost_per_mtok: 0.0,
    },
];

/// Look up a single model by provider and id.
/// Returns `None` if not found in the static catalog.
pub fn lookup(provider: &str, model_id: &str) -> Option<&'static ModelCatalogEntry> {
    CATALOG
        .iter()
        .find(|e| e.provider == provider && e.id == model_id)
}

/// Look up the context window for a model. Falls back to `default` if not in catalog.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id)
        .map(|e| e.context_window)
        .unwrap_or(default)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_non_empty() {
        assert!(!CATALOG.is_empty());
    }

    #[test]
    fn claude_sonnet_is_in_catalog() {
        let entry = lookup("anthropic", "claude-sonnet-4-5").unwrap();
        assert!(entry.context_window >= 200_000);
        assert!(entry.input_cost_per_mtok > 0.0);
    }

    #[test]
    fn lookup_unknown_model_returns_none() {
        assert!(lookup("openai", "nonexistent-model-xyz").is_none());
    }

    #[test]
    fn context_window_fallback_used_when_unknown() {
        assert_eq!(context_window("openai", "no-such-model", 4096), 4096);
    }

    #[test]
    fn all_entries_have_non_zero_windows() {
        for entry in CATALOG {
            assert!(entry.context_window > 0, "{} has zero context_window", entry.id);
            assert!(
                entry.max_output_tokens > 0,
                "{} has zero max_output_tokens",
                entry.id
            );
        }
    }

    #[test]
    fn local_models_are_free() {
        for entry in CATALOG
            .iter()
            .filter(|e| e.provider == "lmstudio" || e.provider == "ollama")
        {
            assert_eq!(entry.input_cost_per_mtok, 0.0);
            assert_eq!(entry.output_cost_per_mtok, 0.0);
        }
    }
}
