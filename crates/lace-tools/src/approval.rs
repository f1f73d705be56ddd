// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Approval policy: converts a tool invocation request into an allow/deny
//! decision, possibly asking the user through an external callback.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use lace_config::ToolPolicyConfig;

use crate::ToolAnnotations;

/// The answer an approval callback can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Run this one call.
    AllowOnce,
    /// Run this call and every later call of the same tool this session.
    AllowSession,
    /// Refuse the call.
    Deny,
}

/// What the external UI is asked to approve.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub is_read_only: bool,
    pub request_id: String,
}

/// External collaborator that prompts the user.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn request_approval(&self, req: ApprovalRequest) -> anyhow::Result<ApprovalDecision>;
}

/// Outcome of running the policy chain for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Approved,
    Denied {
        reason: String,
        /// Set when the user actively refused; the turn should terminate.
        /// Policy denials (disabled tools) leave the turn running.
        should_stop: bool,
    },
}

/// Policy engine evaluated before every tool execution.
///
/// Rules run first-match-wins:
/// 1. every tool disabled → deny
/// 2. tool on the disable list → deny
/// 3. tool on the auto-approve list → allow once
/// 4. read-only tool while non-destructive tools are allowed → allow once
/// 5. session cache holds an earlier allow-session answer → allow
/// 6. otherwise prompt the callback; no callback means deny
pub struct ApprovalPolicy {
    config: ToolPolicyConfig,
    callback: Option<Arc<dyn ApprovalCallback>>,
    /// Tools the user granted `AllowSession` for, per agent session.
    session_cache: Mutex<HashSet<String>>,
}

impl ApprovalPolicy {
    pub fn new(config: ToolPolicyConfig, callback: Option<Arc<dyn ApprovalCallback>>) -> Self {
        Self {
            config,
            callback,
            session_cache: Mutex::new(HashSet::new()),
        }
    }

    /// Policy that refuses everything not on an allow list and never prompts.
    /// Used as the delegation default when the parent has no callback.
    pub fn default_deny(config: ToolPolicyConfig) -> Self {
        Self::new(config, None)
    }

    pub fn callback(&self) -> Option<Arc<dyn ApprovalCallback>> {
        self.callback.clone()
    }

    /// Evaluate the rule chain for one call.
    pub async fn evaluate(
        &self,
        tool_name: &str,
        annotations: &ToolAnnotations,
        arguments: &Value,
        request_id: &str,
    ) -> ApprovalVerdict {
        if self.config.disable_all_tools {
            return ApprovalVerdict::Denied {
                reason: "all tools are disabled".into(),
                should_stop: false,
            };
        }
        if self.config.disable_tools.iter().any(|t| t == tool_name) {
            return ApprovalVerdict::Denied {
                reason: format!("tool '{tool_name}' is disabled"),
                should_stop: false,
            };
        }
        if self.config.auto_approve_tools.iter().any(|t| t == tool_name) {
            return ApprovalVerdict::Approved;
        }
        if self.config.allow_non_destructive_tools && annotations.read_only_hint {
            return ApprovalVerdict::Approved;
        }
        if self.cached(tool_name) {
            debug!(tool = tool_name, "approval served from session cache");
            return ApprovalVerdict::Approved;
        }

        let Some(callback) = &self.callback else {
            return ApprovalVerdict::Denied {
                reason: format!("no approval channel available for '{tool_name}'"),
                should_stop: false,
            };
        };

        let req = ApprovalRequest {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            is_read_only: annotations.read_only_hint,
            request_id: request_id.to_string(),
        };
        match callback.request_approval(req).await {
            Ok(ApprovalDecision::AllowOnce) => ApprovalVerdict::Approved,
            Ok(ApprovalDecision::AllowSession) => {
                self.session_cache
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(tool_name.to_string());
                ApprovalVerdict::Approved
            }
            Ok(ApprovalDecision::Deny) => ApprovalVerdict::Denied {
                reason: format!("user denied '{tool_name}'"),
                should_stop: true,
            },
            Err(e) => {
                warn!(tool = tool_name, error = %e, "approval callback failed; denying");
                ApprovalVerdict::Denied {
                    reason: format!("approval failed: {e}"),
                    should_stop: false,
                }
            }
        }
    }

    fn cached(&self, tool_name: &str) -> bool {
        self.session_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(tool_name)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedCallback {
        decision: ApprovalDecision,
        calls: AtomicU32,
    }

    impl FixedCallback {
        fn new(decision: ApprovalDecision) -> Arc<Self> {
            Arc::new(Self {
                decision,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ApprovalCallback for FixedCallback {
        async fn request_approval(
            &self,
            _req: ApprovalRequest,
        ) -> anyhow::Result<ApprovalDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision)
        }
    }

    struct FailingCallback;

    #[async_trait]
    impl ApprovalCallback for FailingCallback {
        async fn request_approval(
            &self,
            _req: ApprovalRequest,
        ) -> anyhow::Result<ApprovalDecision> {
            anyhow::bail!("ui went away")
        }
    }

    fn read_only() -> ToolAnnotations {
        ToolAnnotations {
            read_only_hint: true,
            ..Default::default()
        }
    }

    async fn verdict(policy: &ApprovalPolicy, tool: &str) -> ApprovalVerdict {
        policy
            .evaluate(tool, &ToolAnnotations::default(), &json!({}), "req-1")
            .await
    }

    #[tokio::test]
    async fn disable_all_wins_over_everything() {
        let policy = ApprovalPolicy::new(
            ToolPolicyConfig {
                disable_all_tools: true,
                auto_approve_tools: vec!["bash".into()],
                ..Default::default()
            },
            Some(FixedCallback::new(ApprovalDecision::AllowOnce)),
        );
        assert!(matches!(
            verdict(&policy, "bash").await,
            ApprovalVerdict::Denied { should_stop: false, .. }
        ));
    }

    #[tokio::test]
    async fn disable_list_beats_auto_approve() {
        let policy = ApprovalPolicy::new(
            ToolPolicyConfig {
                disable_tools: vec!["bash".into()],
                auto_approve_tools: vec!["bash".into()],
                ..Default::default()
            },
            None,
        );
        assert!(matches!(
            verdict(&policy, "bash").await,
            ApprovalVerdict::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn auto_approve_skips_callback() {
        let cb = FixedCallback::new(ApprovalDecision::Deny);
        let policy = ApprovalPolicy::new(
            ToolPolicyConfig {
                auto_approve_tools: vec!["file_list".into()],
                ..Default::default()
            },
            Some(cb.clone()),
        );
        assert_eq!(verdict(&policy, "file_list").await, ApprovalVerdict::Approved);
        assert_eq!(cb.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_only_auto_approved_when_enabled() {
        let policy = ApprovalPolicy::new(
            ToolPolicyConfig {
                allow_non_destructive_tools: true,
                ..Default::default()
            },
            None,
        );
        let v = policy
            .evaluate("file_read", &read_only(), &json!({}), "r")
            .await;
        assert_eq!(v, ApprovalVerdict::Approved);
    }

    #[tokio::test]
    async fn allow_session_fills_cache_and_skips_later_prompts() {
        let cb = FixedCallback::new(ApprovalDecision::AllowSession);
        let policy = ApprovalPolicy::new(ToolPolicyConfig::default(), Some(cb.clone()));
        assert_eq!(verdict(&policy, "bash").await, ApprovalVerdict::Approved);
        assert_eq!(verdict(&policy, "bash").await, ApprovalVerdict::Approved);
        assert_eq!(cb.calls.load(Ordering::SeqCst), 1, "second call must hit the cache");
    }

    #[tokio::test]
    async fn user_deny_requests_stop() {
        let policy = ApprovalPolicy::new(
            ToolPolicyConfig::default(),
            Some(FixedCallback::new(ApprovalDecision::Deny)),
        );
        assert!(matches!(
            verdict(&policy, "bash").await,
            ApprovalVerdict::Denied { should_stop: true, .. }
        ));
    }

    #[tokio::test]
    async fn missing_callback_is_default_deny() {
        let policy = ApprovalPolicy::default_deny(ToolPolicyConfig::default());
        assert!(matches!(
            verdict(&policy, "bash").await,
            ApprovalVerdict::Denied { should_stop: false, .. }
        ));
    }

    #[tokio::test]
    async fn callback_error_surfaces_as_denied() {
        let policy = ApprovalPolicy::new(ToolPolicyConfig::default(), Some(Arc::new(FailingCallback)));
        match verdict(&policy, "bash").await {
            ApprovalVerdict::Denied {
                reason,
                should_stop,
            } => {
                assert!(reason.contains("approval failed"));
                assert!(!should_stop);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
