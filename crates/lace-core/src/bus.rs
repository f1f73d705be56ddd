// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-process typed publish/subscribe.
//!
//! Delivery is a synchronous enqueue in the publisher's execution context;
//! each subscriber drains its own FIFO queue at its own pace. Nothing is
//! persisted – events that matter are also in the event store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use lace_tools::{ApprovalCallback, ApprovalDecision, ApprovalRequest};

use crate::AgentEvent;

pub type SubscriberId = u64;

#[derive(Default)]
struct Inner {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<AgentEvent>>,
}

/// Typed event bus shared by the agent, executor glue, and UIs.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns its id and the receiving end.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber. O(1); unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock().subscribers.remove(&id);
    }

    /// Deliver `event` to every live subscriber, in subscription order per
    /// subscriber. Subscribers whose receiver was dropped are pruned.
    pub fn publish(&self, event: AgentEvent) {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Approval callback wrapper that announces each prompt on the bus before
/// forwarding to the real (external UI) callback.
pub struct BusApprovalCallback {
    inner: Arc<dyn ApprovalCallback>,
    bus: Arc<EventBus>,
}

impl BusApprovalCallback {
    pub fn new(inner: Arc<dyn ApprovalCallback>, bus: Arc<EventBus>) -> Self {
        Self { inner, bus }
    }
}

#[async_trait]
impl ApprovalCallback for BusApprovalCallback {
    async fn request_approval(&self, req: ApprovalRequest) -> anyhow::Result<ApprovalDecision> {
        self.bus.publish(AgentEvent::ApprovalRequest {
            tool_name: req.tool_name.clone(),
            request_id: req.request_id.clone(),
        });
        self.inner.request_approval(req).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
