// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::{
    belongs_to_tree, format_event_id, EventPayload, EventStore, EventType, StorageError,
    ThreadEvent,
};

#[derive(Default)]
struct Inner {
    /// Thread ids in creation order.
    threads: Vec<String>,
    events: HashMap<String, Vec<ThreadEvent>>,
    metadata: HashMap<String, HashMap<String, String>>,
}

/// In-memory event store for tests.
///
/// Behaviorally indistinguishable from [`crate::SqliteStore`]; everything in
/// the engine takes `Arc<dyn EventStore>` and cannot tell which one it got.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl EventStore for MemoryStore {
    fn create_thread(
        &self,
        thread_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if !inner.threads.iter().any(|t| t == thread_id) {
            inner.threads.push(thread_id.to_string());
            inner.events.insert(thread_id.to_string(), Vec::new());
            inner.metadata.insert(thread_id.to_string(), metadata);
        }
        Ok(())
    }

    fn thread_exists(&self, thread_id: &str) -> Result<bool, StorageError> {
        Ok(self.lock().threads.iter().any(|t| t == thread_id))
    }

    fn thread_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock().threads.clone())
    }

    fn append(
        &self,
        thread_id: &str,
        event_type: EventType,
        payload: EventPayload,
    ) -> Result<ThreadEvent, StorageError> {
        let mut inner = self.lock();
        let log = inner
            .events
            .get_mut(thread_id)
            .ok_or_else(|| StorageError::UnknownThread(thread_id.to_string()))?;

        let seq = log.len() as u64 + 1;
        let mut timestamp = Utc::now();
        if let Some(last) = log.last() {
            timestamp = timestamp.max(last.timestamp);
        }

        let event = ThreadEvent {
            id: format_event_id(seq),
            thread_id: thread_id.to_string(),
            event_type,
            timestamp,
            payload,
        };
        log.push(event.clone());
        Ok(event)
    }

    fn events(&self, thread_id: &str) -> Result<Vec<ThreadEvent>, StorageError> {
        Ok(self
            .lock()
            .events
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    fn events_main_and_delegates(
        &self,
        root_thread_id: &str,
    ) -> Result<Vec<ThreadEvent>, StorageError> {
        let inner = self.lock();
        let mut merged: Vec<ThreadEvent> = inner
            .events
            .iter()
            .filter(|(tid, _)| belongs_to_tree(tid, root_thread_id))
            .flat_map(|(_, evs)| evs.iter().cloned())
            .collect();
        // Stable merge by timestamp; ties keep (thread_id, id) order so the
        // result is deterministic across calls.
        merged.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.thread_id.cmp(&b.thread_id))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(merged)
    }

    fn latest_thread(&self) -> Result<Option<String>, StorageError> {
        Ok(self.lock().threads.last().cloned())
    }

    fn clear(&self, thread_id: &str) -> Result<(), StorageError> {
        if let Some(log) = self.lock().events.get_mut(thread_id) {
            log.clear();
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
