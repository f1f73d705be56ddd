// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{
    belongs_to_tree, format_event_id, EventPayload, EventStore, EventType, StorageError,
    ThreadEvent,
};

/// Durable SQLite-backed event store.
///
/// Writes are serialized through a single connection; `synchronous=FULL`
/// makes each autocommitted append a write barrier, so an append that
/// returned is on disk.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// A corrupt or unopenable database is fatal and surfaces as
    /// [`StorageError::Unavailable`].
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", path.display())))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store
            .init_schema()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        debug!(path = %path.display(), "event store opened");
        Ok(store)
    }

    /// In-memory database. Shares all SQL paths with the on-disk store.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store
            .init_schema()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock();
        // journal_mode returns a row, so it cannot ride in the batch below.
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;

            CREATE TABLE IF NOT EXISTS threads (
                thread_id  TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                metadata   TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS events (
                thread_id  TEXT NOT NULL,
                seq        INTEGER NOT NULL,
                event_id   TEXT NOT NULL,
                event_type TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                data       TEXT NOT NULL,
                PRIMARY KEY (thread_id, seq),
                FOREIGN KEY (thread_id) REFERENCES threads(thread_id)
            );

            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(thread_id, timestamp, seq);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another writer panicked mid-operation; the
        // store itself is still consistent (SQLite transactions), so recover
        // the guard rather than propagating the poison.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn row_to_event(
        thread_id: String,
        event_id: String,
        event_type: String,
        timestamp: String,
        data: String,
    ) -> Result<ThreadEvent, StorageError> {
        let event_type = EventType::parse(&event_type)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| StorageError::Internal(format!("bad timestamp in store: {e}")))?
            .with_timezone(&Utc);
        let payload = EventPayload::from_json(event_type, &data)?;
        Ok(ThreadEvent {
            id: event_id,
            thread_id,
            event_type,
            timestamp,
            payload,
        })
    }
}

impl EventStore for SqliteStore {
    fn create_thread(
        &self,
        thread_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let conn = self.lock();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let metadata = serde_json::to_string(&metadata)?;
        conn.execute(
            "INSERT OR IGNORE INTO threads (thread_id, created_at, metadata) VALUES (?1, ?2, ?3)",
            params![thread_id, created_at, metadata],
        )?;
        Ok(())
    }

    fn thread_exists(&self, thread_id: &str) -> Result<bool, StorageError> {
        let conn = self.lock();
        let found: Option<String> = conn
            .query_row(
                "SELECT thread_id FROM threads WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn thread_ids(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT thread_id FROM threads ORDER BY rowid")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn append(
        &self,
        thread_id: &str,
        event_type: EventType,
        payload: EventPayload,
    ) -> Result<ThreadEvent, StorageError> {
        let conn = self.lock();

        let exists: Option<String> = conn
            .query_row(
                "SELECT thread_id FROM threads WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::UnknownThread(thread_id.to_string()));
        }

        let last: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, timestamp FROM events WHERE thread_id = ?1 \
                 ORDER BY seq DESC LIMIT 1",
                params![thread_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (seq, floor) = match last {
            Some((prev_seq, prev_ts)) => {
                let floor = DateTime::parse_from_rfc3339(&prev_ts)
                    .map_err(|e| StorageError::Internal(format!("bad timestamp in store: {e}")))?
                    .with_timezone(&Utc);
                (prev_seq as u64 + 1, Some(floor))
            }
            None => (1, None),
        };

        // Timestamps never move backwards within a thread, even when the
        // wall clock does.
        let mut timestamp = Utc::now();
        if let Some(floor) = floor {
            timestamp = timestamp.max(floor);
        }

        let event = ThreadEvent {
            id: format_event_id(seq),
            thread_id: thread_id.to_string(),
            event_type,
            timestamp,
            payload,
        };
        conn.execute(
            "INSERT INTO events (thread_id, seq, event_id, event_type, timestamp, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                thread_id,
                seq as i64,
                event.id,
                event_type.as_str(),
                timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                event.payload.to_json()?,
            ],
        )?;
        Ok(event)
    }

    fn events(&self, thread_id: &str) -> Result<Vec<ThreadEvent>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT thread_id, event_id, event_type, timestamp, data FROM events \
             WHERE thread_id = ?1 ORDER BY timestamp, seq",
        )?;
        let rows = stmt
            .query_map(params![thread_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(tid, id, et, ts, data)| Self::row_to_event(tid, id, et, ts, data))
            .collect()
    }

    fn events_main_and_delegates(
        &self,
        root_thread_id: &str,
    ) -> Result<Vec<ThreadEvent>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT thread_id, event_id, event_type, timestamp, data FROM events \
             WHERE thread_id = ?1 OR thread_id LIKE ?1 || '.%' \
             ORDER BY timestamp, thread_id, seq",
        )?;
        let rows = stmt
            .query_map(params![root_thread_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .filter(|(tid, ..)| belongs_to_tree(tid, root_thread_id))
            .map(|(tid, id, et, ts, data)| Self::row_to_event(tid, id, et, ts, data))
            .collect()
    }

    fn latest_thread(&self) -> Result<Option<String>, StorageError> {
        let conn = self.lock();
        let id: Option<String> = conn
            .query_row(
                "SELECT thread_id FROM threads ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn clear(&self, thread_id: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM events WHERE thread_id = ?1", params![thread_id])?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
