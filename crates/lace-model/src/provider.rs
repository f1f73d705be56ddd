// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    catalog, CompletionRequest, ProviderResponse, ResponseEvent, ToolCallRequest, Usage,
};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Errors surfaced by provider drivers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The cancellation handle fired while the request was in flight.
    #[error("request aborted")]
    Aborted,
    /// The provider rejected the request (auth, bad request, unknown model).
    #[error("provider error: {0}")]
    Api(String),
}

impl std::fmt::Debug for dyn ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelProvider")
            .field("name", &self.name())
            .field("model_name", &self.model_name())
            .finish()
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier used in model specs ("anthropic", "openai", …).
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Whether this driver can stream. Non-streaming drivers are driven
    /// through [`create_response`] only and the agent skips its streaming
    /// state for them.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Send a completion request and return a streaming response.
    ///
    /// The driver must fail with [`ProviderError::Aborted`] once `cancel`
    /// fires; already-yielded events stay valid.
    async fn complete(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ResponseStream>;

    /// Non-streaming completion: drains the stream into an aggregate response.
    ///
    /// Drivers with a native non-streaming endpoint may override this.
    async fn create_response(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ProviderResponse> {
        let stream = self.complete(req, cancel.clone()).await?;
        drain_stream(stream, cancel).await
    }

    /// Exact input-token count for a request, when the provider exposes one.
    ///
    /// Returns `None` when no counting endpoint exists; callers fall back to
    /// [`estimate_tokens`].
    async fn count_tokens(&self, _req: &CompletionRequest) -> Option<u32> {
        None
    }

    /// Context window for this provider/model, from the static catalog.
    fn context_window(&self) -> Option<u32> {
        catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    /// USD cost of a call, from the static catalog. `None` for unknown models.
    fn cost(&self, input_tokens: u32, output_tokens: u32) -> Option<f64> {
        catalog::lookup(self.name(), self.model_name()).map(|e| {
            (input_tokens as f64 * e.input_cost_per_mtok
                + output_tokens as f64 * e.output_cost_per_mtok)
                / 1_000_000.0
        })
    }
}

/// Estimator fallback when the provider has no counting endpoint:
/// ceil(chars / 4) over message text, tool payloads, and tool schemas.
pub fn estimate_tokens(req: &CompletionRequest) -> u32 {
    let msg_chars: usize = req
        .messages
        .iter()
        .map(|m| {
            m.content.len()
                + m.tool_calls
                    .iter()
                    .map(|tc| tc.name.len() + tc.arguments.to_string().len())
                    .sum::<usize>()
                + m.tool_results.iter().map(|tr| tr.text().len()).sum::<usize>()
        })
        .sum();
    let schema_chars: usize = req
        .tools
        .iter()
        .map(|t| t.name.len() + t.description.len() + t.parameters.to_string().len())
        .sum();
    ((msg_chars + schema_chars) as u32).div_ceil(4)
}

/// Aggregate a response stream into a [`ProviderResponse`].
///
/// Tool-call deltas are accumulated per parallel-call index (OpenAI-style
/// interleaving); calls with an empty name cannot be dispatched and are
/// dropped with a warning.
pub(crate) async fn drain_stream(
    mut stream: ResponseStream,
    cancel: CancellationToken,
) -> anyhow::Result<ProviderResponse> {
    struct Pending {
        id: String,
        name: String,
        args_buf: String,
    }

    let mut content = String::new();
    let mut usage: Option<Usage> = None;
    let mut pending: HashMap<u32, Pending> = HashMap::new();

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Aborted.into()),
            ev = stream.next() => match ev {
                Some(ev) => ev?,
                None => break,
            },
        };
        match event {
            ResponseEvent::TextDelta(delta) => content.push_str(&delta),
            ResponseEvent::ThinkingDelta(_) => {}
            ResponseEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let p = pending.entry(index).or_insert_with(|| Pending {
                    id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                });
                if !id.is_empty() {
                    p.id = id;
                }
                if !name.is_empty() {
                    p.name = name;
                }
                p.args_buf.push_str(&arguments);
            }
            ResponseEvent::Usage {
                prompt_tokens,
                completion_tokens,
                cache_read_tokens,
                cache_creation_tokens,
            } => {
                usage = Some(Usage {
                    prompt_tokens,
                    completion_tokens,
                    cache_read_tokens,
                    cache_creation_tokens,
                });
            }
            ResponseEvent::Done => break,
            ResponseEvent::Error(e) => warn!("model stream error: {e}"),
        }
    }

    let mut sorted: Vec<(u32, Pending)> = pending.into_iter().collect();
    sorted.sort_by_key(|(idx, _)| *idx);
    let mut tool_calls = Vec::with_capacity(sorted.len());
    for (i, (_, p)) in sorted.into_iter().enumerate() {
        if p.name.is_empty() {
            warn!(tool_call_id = %p.id, "dropping tool call with empty name from model");
            continue;
        }
        let arguments = if p.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&p.args_buf).unwrap_or_else(|e| {
                warn!(tool_name = %p.name, error = %e, "invalid JSON tool arguments; substituting {{}}");
                serde_json::Value::Object(Default::default())
            })
        };
        let id = if p.id.is_empty() {
            warn!(tool_name = %p.name, "tool call had empty id; generating synthetic id");
            format!("tc_synthetic_{i}")
        } else {
            p.id
        };
        tool_calls.push(ToolCallRequest {
            id,
            name: p.name,
            arguments,
        });
    }

    Ok(ProviderResponse {
        content,
        tool_calls,
        usage,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
