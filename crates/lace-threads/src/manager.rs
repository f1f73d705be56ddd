// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use lace_model::Message;
use lace_store::{
    EventPayload, EventStore, EventType, StorageError, ThreadEvent, ToolCallRecord,
    ToolResultRecord,
};

use crate::{generate_thread_id, reconstruct::build_conversation};

/// Thread lifecycle and the only write path into the event store.
///
/// Every component that needs to record conversation history goes through
/// this manager; nothing else calls [`EventStore::append`]. Parent and
/// delegate agents share one manager (and therefore one store).
pub struct ThreadManager {
    store: Arc<dyn EventStore>,
    /// Serializes delegate-id allocation so two concurrent delegations can
    /// never claim the same index.
    alloc_lock: Mutex<()>,
}

impl ThreadManager {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            alloc_lock: Mutex::new(()),
        }
    }

    // ── Thread lifecycle ──────────────────────────────────────────────────────

    /// Create a fresh root thread and return its id.
    pub fn create_thread(&self) -> Result<String, StorageError> {
        let id = generate_thread_id();
        self.store.create_thread(&id, HashMap::new())?;
        debug!(thread_id = %id, "thread created");
        Ok(id)
    }

    /// Register a thread under a caller-chosen id (delegates, tests).
    pub fn create_thread_with_id(
        &self,
        thread_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        self.store.create_thread(thread_id, metadata)
    }

    pub fn thread_exists(&self, thread_id: &str) -> Result<bool, StorageError> {
        self.store.thread_exists(thread_id)
    }

    pub fn latest_thread(&self) -> Result<Option<String>, StorageError> {
        self.store.latest_thread()
    }

    /// Allocate the next delegate thread id under `parent` and register it.
    ///
    /// Returns `<parent>.<next>` where `next` is one greater than the highest
    /// index ever used – abandoned delegates still consume their index.
    /// Atomic under concurrent delegation: the scan and the registration
    /// happen under one allocation lock.
    pub fn generate_delegate_thread_id(&self, parent: &str) -> Result<String, StorageError> {
        let _guard = self.alloc_lock.lock().unwrap_or_else(|p| p.into_inner());
        let prefix = format!("{parent}.");
        let max_used: u32 = self
            .store
            .thread_ids()?
            .into_iter()
            .filter_map(|id| {
                // Direct children only: the remainder after the parent prefix
                // must be a bare index.
                id.strip_prefix(&prefix)?.parse::<u32>().ok()
            })
            .max()
            .unwrap_or(0);
        let id = format!("{parent}.{}", max_used + 1);
        self.store.create_thread(&id, HashMap::new())?;
        debug!(thread_id = %id, "delegate thread allocated");
        Ok(id)
    }

    // ── Append wrappers (one per event kind) ──────────────────────────────────

    pub fn add_system_prompt(
        &self,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<ThreadEvent, StorageError> {
        self.store
            .append(thread_id, EventType::SystemPrompt, EventPayload::Text(text.into()))
    }

    pub fn add_user_system_prompt(
        &self,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<ThreadEvent, StorageError> {
        self.store.append(
            thread_id,
            EventType::UserSystemPrompt,
            EventPayload::Text(text.into()),
        )
    }

    pub fn add_user_message(
        &self,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<ThreadEvent, StorageError> {
        self.store
            .append(thread_id, EventType::UserMessage, EventPayload::Text(text.into()))
    }

    pub fn add_agent_message(
        &self,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<ThreadEvent, StorageError> {
        self.store
            .append(thread_id, EventType::AgentMessage, EventPayload::Text(text.into()))
    }

    pub fn add_local_system_message(
        &self,
        thread_id: &str,
        text: impl Into<String>,
    ) -> Result<ThreadEvent, StorageError> {
        self.store.append(
            thread_id,
            EventType::LocalSystemMessage,
            EventPayload::Text(text.into()),
        )
    }

    pub fn add_tool_call(
        &self,
        thread_id: &str,
        record: ToolCallRecord,
    ) -> Result<ThreadEvent, StorageError> {
        self.store
            .append(thread_id, EventType::ToolCall, EventPayload::ToolCall(record))
    }

    pub fn add_tool_result(
        &self,
        thread_id: &str,
        record: ToolResultRecord,
    ) -> Result<ThreadEvent, StorageError> {
        self.store
            .append(thread_id, EventType::ToolResult, EventPayload::ToolResult(record))
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn events(&self, thread_id: &str) -> Result<Vec<ThreadEvent>, StorageError> {
        self.store.events(thread_id)
    }

    pub fn events_main_and_delegates(
        &self,
        root_thread_id: &str,
    ) -> Result<Vec<ThreadEvent>, StorageError> {
        self.store.events_main_and_delegates(root_thread_id)
    }

    /// Provider-ready conversation for a thread.
    pub fn reconstruct(&self, thread_id: &str) -> Result<Vec<Message>, StorageError> {
        Ok(build_conversation(&self.store.events(thread_id)?))
    }

    /// Purge a thread's events. Test harness only.
    pub fn clear(&self, thread_id: &str) -> Result<(), StorageError> {
        self.store.clear(thread_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lace_store::MemoryStore;

    fn manager() -> Arc<ThreadManager> {
        Arc::new(ThreadManager::new(Arc::new(MemoryStore::new())))
    }

    #[test]
    fn create_thread_returns_valid_root_id() {
        let m = manager();
        let id = m.create_thread().unwrap();
        assert!(id.starts_with("lace_"));
        assert!(m.thread_exists(&id).unwrap());
    }

    #[test]
    fn delegate_ids_start_at_one_and_increase() {
        let m = manager();
        let parent = m.create_thread().unwrap();
        assert_eq!(
            m.generate_delegate_thread_id(&parent).unwrap(),
            format!("{parent}.1")
        );
        assert_eq!(
            m.generate_delegate_thread_id(&parent).unwrap(),
            format!("{parent}.2")
        );
    }

    #[test]
    fn abandoned_delegate_index_is_never_reused() {
        let m = manager();
        let parent = m.create_thread().unwrap();
        let first = m.generate_delegate_thread_id(&parent).unwrap();
        // Abandon it (no events written); the next allocation must still
        // move past it.
        let second = m.generate_delegate_thread_id(&parent).unwrap();
        assert_eq!(first, format!("{parent}.1"));
        assert_eq!(second, format!("{parent}.2"));
    }

    #[test]
    fn grandchild_indices_do_not_leak_into_parent_numbering() {
        let m = manager();
        let parent = m.create_thread().unwrap();
        let child = m.generate_delegate_thread_id(&parent).unwrap();
        // A delegate of the delegate.
        let grand = m.generate_delegate_thread_id(&child).unwrap();
        assert_eq!(grand, format!("{child}.1"));
        // Parent numbering continues from its own children only.
        assert_eq!(
            m.generate_delegate_thread_id(&parent).unwrap(),
            format!("{parent}.2")
        );
    }

    #[test]
    fn concurrent_delegation_never_duplicates_ids() {
        let m = manager();
        let parent = m.create_thread().unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            let parent = parent.clone();
            handles.push(std::thread::spawn(move || {
                m.generate_delegate_thread_id(&parent).unwrap()
            }));
        }
        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8, "every allocation must be unique");
    }

    #[test]
    fn append_wrappers_record_the_right_kinds() {
        let m = manager();
        let t = m.create_thread().unwrap();
        m.add_system_prompt(&t, "sys").unwrap();
        m.add_user_message(&t, "hi").unwrap();
        m.add_agent_message(&t, "hello").unwrap();
        m.add_local_system_message(&t, "note").unwrap();
        let events = m.events(&t).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "SYSTEM_PROMPT",
                "USER_MESSAGE",
                "AGENT_MESSAGE",
                "LOCAL_SYSTEM_MESSAGE"
            ]
        );
    }
}
