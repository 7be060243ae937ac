//! Error types for the sync engine and notifier.
//!
//! Errors are classified by recoverability:
//! - Transient: storage hiccups, network failures — a later save may succeed
//! - Fatal: missing home directory, unreadable config
//!
//! Ineligibility (wrong content type, no data, no edit rights) is never an
//! error — the engine reports those as skip outcomes.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the persistence seams (`MetaStore`, `RecordStore`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Config file unreadable: {0}")]
    ConfigRead(PathBuf),
}

impl StoreError {
    /// Transient failures may succeed on a later save attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Sqlite(_))
    }
}

/// Errors from the notifier's server round-trip.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed server response: {0}")]
    Decode(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}
