// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Errors surfaced by event-store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store could not be opened (missing directory, corrupt database).
    /// Fatal: the engine refuses to start or continue.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// An operation referenced a thread that was never created.
    #[error("unknown thread: {0}")]
    UnknownThread(String),
    /// Any other storage failure (I/O, serialization).
    #[error("storage failure: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Internal(e.to_string())
    }
}
