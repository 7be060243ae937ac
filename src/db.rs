//! SQLite-backed host adapter.
//!
//! The database lives at `~/.worknotes/worknotes.db`. `entity_meta` backs
//! the generic attribute store (including the stored save fingerprint),
//! `work_notes` holds the linked records, and `prompt_log` tracks
//! per-(entity, principal) prompt history for the server-side policy.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::host::{MetaStore, RecordStore};
use crate::types::{WorkAttributes, WorkNote};

/// SQLite connection wrapper.
///
/// Intentionally NOT `Clone` or `Sync`. Hold it behind a `std::sync::Mutex`
/// in shared state; each request borrows it briefly.
pub struct NoteDb {
    conn: Connection,
}

impl NoteDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at `~/.worknotes/worknotes.db`.
    pub fn open() -> Result<Self, StoreError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Idempotent schema
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    fn db_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
        Ok(home.join(".worknotes").join("worknotes.db"))
    }

    // =========================================================================
    // Work notes
    // =========================================================================

    /// Notes linked to an entity, newest first.
    pub fn get_entity_notes(&self, entity_id: i64) -> Result<Vec<WorkNote>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, title, body, requester, worker, status, work_date, created_at
             FROM work_notes
             WHERE entity_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;

        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(WorkNote {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                title: row.get(2)?,
                body: row.get(3)?,
                attributes: WorkAttributes {
                    requester: row.get(4)?,
                    worker: row.get(5)?,
                    status: row.get(6)?,
                    work_date: row.get(7)?,
                },
                created_at: row.get(8)?,
            })
        })?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }

    /// Delete a note. Deletion is a user action — the engine never calls
    /// this. The entity's stored fingerprint is left intact: re-saving the
    /// same payload after a manual delete is still "already recorded".
    pub fn delete_work_note(&self, note_id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute("DELETE FROM work_notes WHERE id = ?1", params![note_id])?;
        Ok(affected > 0)
    }

    // =========================================================================
    // Prompt log
    // =========================================================================

    /// Whether a prompt was shown to this principal for this entity within
    /// the last `cooldown_secs` seconds.
    pub fn prompted_within(
        &self,
        entity_id: i64,
        principal_id: i64,
        cooldown_secs: u64,
    ) -> Result<bool, StoreError> {
        let window = format!("-{}", cooldown_secs);
        let hit = self
            .conn
            .query_row(
                "SELECT 1 FROM prompt_log
                 WHERE entity_id = ?1 AND principal_id = ?2
                   AND last_prompted_at >= datetime('now', ?3 || ' seconds')",
                params![entity_id, principal_id, window],
                |_| Ok(()),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Content hash recorded at the last prompt, if any.
    pub fn last_logged_hash(
        &self,
        entity_id: i64,
        principal_id: i64,
    ) -> Result<Option<String>, StoreError> {
        let hash = self
            .conn
            .query_row(
                "SELECT content_hash FROM prompt_log
                 WHERE entity_id = ?1 AND principal_id = ?2",
                params![entity_id, principal_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Record a shown prompt: stores the content hash and resets the cooldown.
    pub fn record_prompt(
        &self,
        entity_id: i64,
        principal_id: i64,
        content_hash: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO prompt_log (entity_id, principal_id, content_hash, last_prompted_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(entity_id, principal_id) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 last_prompted_at = excluded.last_prompted_at",
            params![entity_id, principal_id, content_hash],
        )?;
        Ok(())
    }
}

impl MetaStore for NoteDb {
    fn read_attribute(&self, entity_id: i64, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM entity_meta WHERE entity_id = ?1 AND key = ?2",
                params![entity_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_attribute(&self, entity_id: i64, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO entity_meta (entity_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(entity_id, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![entity_id, key, value],
        )?;
        Ok(())
    }
}

impl RecordStore for NoteDb {
    fn create_work_note(&self, note: &WorkNote) -> Result<String, StoreError> {
        self.conn.execute(
            "INSERT INTO work_notes
                (id, entity_id, title, body, requester, worker, status, work_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                note.id,
                note.entity_id,
                note.title,
                note.body,
                note.attributes.requester,
                note.attributes.worker,
                note.attributes.status,
                note.attributes.work_date,
                note.created_at,
            ],
        )?;
        Ok(note.id.clone())
    }
}

/// Create a temporary database for testing.
///
/// We leak the `TempDir` so the directory persists for the duration of
/// the test; the OS cleans up test temp dirs.
#[cfg(test)]
pub(crate) fn test_db() -> NoteDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("test_worknotes.db");
    std::mem::forget(dir);
    NoteDb::open_at(path).expect("Failed to open test database")
}

// =============================================================================
// Tests
// =============================================================================
