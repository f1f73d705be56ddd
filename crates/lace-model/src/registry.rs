// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: model-spec parsing and driver construction.
//!
//! Concrete HTTP drivers (Anthropic, OpenAI, LM Studio, Ollama) live outside
//! the engine; they register themselves here as factories. The `mock` driver
//! is built in so every test scenario runs without network access.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::{MockProvider, ModelProvider};

/// Metadata describing a known provider kind.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique provider id used in model specs (e.g. `"anthropic"`).
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Default environment variable that holds the API key.
    /// `None` for local servers that require no key.
    pub default_api_key_env: Option<&'static str>,
}

/// Provider kinds the engine knows how to address. Drivers for the non-mock
/// kinds are external collaborators registered at startup.
pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
    },
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT and o-series models",
        default_api_key_env: Some("OPENAI_API_KEY"),
    },
    DriverMeta {
        id: "lmstudio",
        name: "LM Studio",
        description: "LM Studio local server (OpenAI-compatible wire format)",
        default_api_key_env: None,
    },
    DriverMeta {
        id: "ollama",
        name: "Ollama",
        description: "Ollama local server",
        default_api_key_env: None,
    },
    DriverMeta {
        id: "mock",
        name: "Mock",
        description: "Deterministic in-process provider for tests",
        default_api_key_env: None,
    },
];

/// A parsed `<provider>:<model>` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(':')
            .with_context(|| format!("invalid model spec {s:?}: expected <provider>:<model>"))?;
        if provider.is_empty() || model.is_empty() {
            bail!("invalid model spec {s:?}: provider and model must be non-empty");
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

pub type ProviderFactory =
    Arc<dyn Fn(&ModelSpec) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>;

/// Maps provider ids to driver factories.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Registry with only the built-in `mock` driver.
    pub fn new() -> Self {
        let mut reg = Self {
            factories: HashMap::new(),
        };
        reg.register("mock", Arc::new(|_spec| Ok(Arc::new(MockProvider) as _)));
        reg
    }

    /// Register (or replace) a driver factory for a provider id.
    pub fn register(&mut self, provider: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(provider.into(), factory);
    }

    /// Construct a provider from a `<provider>:<model>` spec string.
    pub fn create(&self, spec: &str) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let spec: ModelSpec = spec.parse()?;
        let factory = self.factories.get(&spec.provider).with_context(|| {
            let known: Vec<&str> = DRIVERS.iter().map(|d| d.id).collect();
            format!(
                "no driver registered for provider {:?} (known kinds: {})",
                spec.provider,
                known.join(", ")
            )
        })?;
        factory(&spec)
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_parses_provider_and_model() {
        let spec: ModelSpec = "anthropic:claude-sonnet-4-5".parse().unwrap();
        assert_eq!(spec.provider, "anthropic");
        assert_eq!(spec.model, "claude-sonnet-4-5");
    }

    #[test]
    fn model_spec_allows_colons_in_model_name() {
        let spec: ModelSpec = "ollama:llama3.1:8b".parse().unwrap();
        assert_eq!(spec.provider, "ollama");
        assert_eq!(spec.model, "llama3.1:8b");
    }

    #[test]
    fn model_spec_rejects_missing_separator() {
        assert!("just-a-model".parse::<ModelSpec>().is_err());
    }

    #[test]
    fn model_spec_rejects_empty_parts() {
        assert!(":model".parse::<ModelSpec>().is_err());
        assert!("provider:".parse::<ModelSpec>().is_err());
    }

    #[test]
    fn registry_creates_builtin_mock() {
        let reg = ProviderRegistry::new();
        let p = reg.create("mock:mock-model").unwrap();
        assert_eq!(p.name(), "mock");
    }

    #[test]
    fn registry_rejects_unregistered_kind() {
        let reg = ProviderRegistry::new();
        let err = reg.create("anthropic:claude-sonnet-4-5").unwrap_err();
        assert!(err.to_string().contains("no driver registered"));
    }

    #[test]
    fn registered_factory_is_used() {
        let mut reg = ProviderRegistry::new();
        reg.register(
            "mock2",
            Arc::new(|_spec| Ok(Arc::new(MockProvider) as _)),
        );
        assert!(reg.create("mock2:anything").is_ok());
        assert!(reg.registered().contains(&"mock2".to_string()));
    }
}
