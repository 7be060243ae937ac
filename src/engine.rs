//! Save dedup/sync engine.
//!
//! A single save of a content entity can fire several partially redundant
//! triggers (an early hook that sees the pending request payload, a late
//! hook that re-reads committed storage), in no guaranteed order. The engine
//! must create the linked work note exactly once per semantically distinct
//! save: a content fingerprint catches repeats across saves, and a short-TTL
//! creation lock catches re-entries within the same logical save before the
//! fingerprint write is visible.
//!
//! Every failure here is a best-effort side effect. Nothing propagates to
//! the caller — the entity's own save must never be blocked by this engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::fingerprint::note_fingerprint;
use crate::host::{AccessControl, LockProvider, MetaStore, RecordStore};
use crate::types::{meta_keys, EngineConfig, WorkAttributes, WorkNote};

/// Which storage layer is authoritative for the invoking trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveSource {
    /// Early trigger: the request payload may carry fresher values than
    /// committed storage.
    StructuredPayload,
    /// Late trigger: the entity is durably persisted; committed storage is
    /// authoritative.
    CommittedStorage,
}

/// Normalized view of one save trigger.
///
/// Collapses the per-trigger visibility differences into a single
/// `read_field`: payload overrides first (on the structured-payload path),
/// committed storage otherwise.
#[derive(Debug, Clone)]
pub struct SaveContext {
    pub entity_id: i64,
    pub entity_type: String,
    pub source: SaveSource,
    /// Pending request values, keyed by the same names as `meta_keys`.
    pub payload: HashMap<String, String>,
    pub is_autosave: bool,
    pub is_revision: bool,
    pub principal_id: i64,
}

impl SaveContext {
    pub fn committed(entity_id: i64, entity_type: &str, principal_id: i64) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.to_string(),
            source: SaveSource::CommittedStorage,
            payload: HashMap::new(),
            is_autosave: false,
            is_revision: false,
            principal_id,
        }
    }

    pub fn structured(
        entity_id: i64,
        entity_type: &str,
        principal_id: i64,
        payload: HashMap<String, String>,
    ) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.to_string(),
            source: SaveSource::StructuredPayload,
            payload,
            is_autosave: false,
            is_revision: false,
            principal_id,
        }
    }

    /// Read one tracked field through the context-appropriate source.
    fn read_field(&self, meta: &dyn MetaStore, key: &str) -> Result<Option<String>, StoreError> {
        if self.source == SaveSource::StructuredPayload {
            if let Some(value) = self.payload.get(key) {
                return Ok(Some(value.clone()));
            }
        }
        meta.read_attribute(self.entity_id, key)
    }
}

/// Outcome of one engine invocation. Skips are expected, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A work note was created.
    Created(String),
    /// Entity type not eligible, autosave/revision, or no edit rights.
    SkippedIneligible,
    /// Every tracked field was empty — nothing worth recording.
    SkippedEmpty,
    /// A creation lock is active: this logical save was already handled.
    SkippedLocked,
    /// Fingerprint unchanged since the last created note.
    SkippedUnchanged,
    /// Storage failed. Logged; the entity save itself is unaffected.
    Failed(String),
}

/// Dedup/sync engine. One instance per process; the lock provider it holds
/// must be the one shared by every save trigger.
pub struct SyncEngine {
    config: EngineConfig,
    locks: Arc<dyn LockProvider>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, locks: Arc<dyn LockProvider>) -> Self {
        Self { config, locks }
    }

    fn lock_key(entity_id: i64) -> String {
        format!("worknote-recent-{}", entity_id)
    }

    /// Evaluate one save trigger and create a linked work note if this is
    /// the first sight of a semantically new payload.
    ///
    /// Idempotent under re-invocation with identical inputs: the fingerprint
    /// compare stops repeats across saves, the creation lock stops re-entries
    /// within one. A crash between note creation and the fingerprint write
    /// leaves the old fingerprint in place; the next save recreates the note
    /// (accepted minor duplication, same as the lock race window).
    pub fn evaluate_and_maybe_create(
        &self,
        ctx: &SaveContext,
        meta: &dyn MetaStore,
        records: &dyn RecordStore,
        access: &dyn AccessControl,
    ) -> SyncOutcome {
        // Early rejects are silent no-ops
        if !self.config.eligible_types.iter().any(|t| t == &ctx.entity_type) {
            return SyncOutcome::SkippedIneligible;
        }
        if ctx.is_autosave || ctx.is_revision {
            return SyncOutcome::SkippedIneligible;
        }
        if !access.can_edit(ctx.entity_id, ctx.principal_id) {
            return SyncOutcome::SkippedIneligible;
        }

        let (title, body, attrs) = match self.read_payload(ctx, meta) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!(
                    "SyncEngine: failed to read attributes for entity {}: {}",
                    ctx.entity_id,
                    e
                );
                return SyncOutcome::Failed(e.to_string());
            }
        };

        if title.trim().is_empty() && body.trim().is_empty() && attrs.is_empty() {
            return SyncOutcome::SkippedEmpty;
        }

        let fresh = note_fingerprint(&title, &body, &attrs);

        // Lock check first: another trigger in this logical save already
        // created the note, even if its fingerprint write isn't visible yet.
        let lock_key = Self::lock_key(ctx.entity_id);
        if self.locks.held(&lock_key) {
            log::debug!(
                "SyncEngine: creation lock active for entity {}, skipping ({:?})",
                ctx.entity_id,
                ctx.source
            );
            return SyncOutcome::SkippedLocked;
        }

        let stored = match meta.read_attribute(ctx.entity_id, meta_keys::FINGERPRINT) {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!(
                    "SyncEngine: failed to read stored fingerprint for entity {}: {}",
                    ctx.entity_id,
                    e
                );
                return SyncOutcome::Failed(e.to_string());
            }
        };
        if stored.as_deref() == Some(fresh.as_str()) {
            return SyncOutcome::SkippedUnchanged;
        }

        let note = build_note(ctx.entity_id, &title, &body, attrs);
        let note_id = match records.create_work_note(&note) {
            Ok(id) => id,
            Err(e) => {
                // Abort this invocation only; no rollback, no retry here. A
                // later save (changed fingerprint or expired lock) may succeed.
                log::warn!(
                    "SyncEngine: failed to create work note for entity {}: {}",
                    ctx.entity_id,
                    e
                );
                return SyncOutcome::Failed(e.to_string());
            }
        };

        // Fingerprint is written only after creation succeeded, so a partial
        // failure can lose the update but never the creation opportunity.
        if let Err(e) = meta.write_attribute(ctx.entity_id, meta_keys::FINGERPRINT, &fresh) {
            log::warn!(
                "SyncEngine: note {} created but fingerprint update failed for entity {}: {}",
                note_id,
                ctx.entity_id,
                e
            );
        }

        if !self.locks.acquire(&lock_key, self.config.lock_ttl_secs) {
            // Lost the acquire race to a parallel trigger; the note exists
            // either way, so this is log-only.
            log::debug!("SyncEngine: lock already set for entity {}", ctx.entity_id);
        }

        log::info!(
            "SyncEngine: created work note {} for entity {} ({:?})",
            note_id,
            ctx.entity_id,
            ctx.source
        );
        SyncOutcome::Created(note_id)
    }

    /// Read the full tracked payload through the context's source.
    fn read_payload(
        &self,
        ctx: &SaveContext,
        meta: &dyn MetaStore,
    ) -> Result<(String, String, WorkAttributes), StoreError> {
        let title = ctx.read_field(meta, meta_keys::TITLE)?.unwrap_or_default();
        let body = ctx.read_field(meta, meta_keys::CONTENT)?.unwrap_or_default();
        let attrs = WorkAttributes {
            requester: ctx.read_field(meta, meta_keys::REQUESTER)?,
            worker: ctx.read_field(meta, meta_keys::WORKER)?,
            status: ctx.read_field(meta, meta_keys::STATUS)?,
            work_date: ctx.read_field(meta, meta_keys::WORK_DATE)?,
        };
        Ok((title, body, attrs))
    }
}

/// Assemble the note, filling defaults where the author wrote nothing:
/// a timestamped placeholder title and an attribute-summary body.
fn build_note(entity_id: i64, title: &str, body: &str, attrs: WorkAttributes) -> WorkNote {
    let now = Utc::now();
    let title = if title.trim().is_empty() {
        format!("Work note {}", now.format("%Y-%m-%d %H:%M"))
    } else {
        title.to_string()
    };
    let body = if body.trim().is_empty() {
        attrs.summary()
    } else {
        body.to_string()
    };

    WorkNote {
        id: format!("note-{}", Uuid::new_v4()),
        entity_id,
        title,
        body,
        attributes: attrs,
        created_at: now.to_rfc3339(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, NoteDb};
    use crate::lock::CreationLocks;

    struct AllowAll;
    impl AccessControl for AllowAll {
        fn can_edit(&self, _entity_id: i64, _principal_id: i64) -> bool {
            true
        }
    }

    struct DenyAll;
    impl AccessControl for DenyAll {
        fn can_edit(&self, _entity_id: i64, _principal_id: i64) -> bool {
            false
        }
    }

    /// Record store that always fails, for failure-semantics tests.
    struct BrokenRecords;
    impl RecordStore for BrokenRecords {
        fn create_work_note(&self, _note: &WorkNote) -> Result<String, StoreError> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(EngineConfig::default(), Arc::new(CreationLocks::new()))
    }

    fn engine_with_ttl(ttl: u64) -> SyncEngine {
        let config = EngineConfig {
            lock_ttl_secs: ttl,
            ..Default::default()
        };
        SyncEngine::new(config, Arc::new(CreationLocks::new()))
    }

    fn seed_entity(db: &NoteDb, entity_id: i64, requester: &str, status: &str) {
        db.write_attribute(entity_id, meta_keys::REQUESTER, requester).unwrap();
        db.write_attribute(entity_id, meta_keys::STATUS, status).unwrap();
    }

    #[test]
    fn test_first_save_creates_note_and_stores_fingerprint() {
        let db = test_db();
        let engine = engine();
        seed_entity(&db, 1, "A", "依頼");

        let ctx = SaveContext::committed(1, "post", 7);
        let outcome = engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll);

        assert!(matches!(outcome, SyncOutcome::Created(_)));
        let notes = db.get_entity_notes(1).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].attributes.requester.as_deref(), Some("A"));
        assert_eq!(notes[0].attributes.status.as_deref(), Some("依頼"));
        assert!(db.read_attribute(1, meta_keys::FINGERPRINT).unwrap().is_some());
    }

    #[test]
    fn test_identical_resave_is_noop() {
        // Re-invocation with an unchanged payload must not create again.
        // Zero lock TTL so the fingerprint compare, not the lock, does the work.
        let db = test_db();
        let engine = engine_with_ttl(0);
        seed_entity(&db, 1, "A", "依頼");
        let ctx = SaveContext::committed(1, "post", 7);

        assert!(matches!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::Created(_)
        ));
        let stored = db.read_attribute(1, meta_keys::FINGERPRINT).unwrap();

        for _ in 0..3 {
            assert_eq!(
                engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
                SyncOutcome::SkippedUnchanged
            );
        }
        assert_eq!(db.get_entity_notes(1).unwrap().len(), 1);
        assert_eq!(db.read_attribute(1, meta_keys::FINGERPRINT).unwrap(), stored);
    }

    #[test]
    fn test_attribute_change_creates_exactly_one_more() {
        let db = test_db();
        let engine = engine_with_ttl(0);
        seed_entity(&db, 1, "A", "依頼");
        let ctx = SaveContext::committed(1, "post", 7);

        engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll);
        let f0 = db.read_attribute(1, meta_keys::FINGERPRINT).unwrap().unwrap();

        db.write_attribute(1, meta_keys::STATUS, "完了").unwrap();
        assert!(matches!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::Created(_)
        ));

        let f1 = db.read_attribute(1, meta_keys::FINGERPRINT).unwrap().unwrap();
        assert_ne!(f0, f1);
        assert_eq!(db.get_entity_notes(1).unwrap().len(), 2);

        // And the new state is itself now deduped
        assert_eq!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::SkippedUnchanged
        );
    }

    #[test]
    fn test_lock_suppresses_reentry_across_trigger_contexts() {
        // Same logical save, two triggers with different visibility: the
        // second must skip on the lock even though its payload would
        // fingerprint differently from committed storage.
        let db = test_db();
        let engine = engine_with_ttl(30);
        seed_entity(&db, 1, "A", "依頼");

        let committed = SaveContext::committed(1, "post", 7);
        assert!(matches!(
            engine.evaluate_and_maybe_create(&committed, &db, &db, &AllowAll),
            SyncOutcome::Created(_)
        ));

        let mut payload = HashMap::new();
        payload.insert(meta_keys::STATUS.to_string(), "完了".to_string());
        let structured = SaveContext::structured(1, "post", 7, payload);
        assert_eq!(
            engine.evaluate_and_maybe_create(&structured, &db, &db, &AllowAll),
            SyncOutcome::SkippedLocked
        );

        assert_eq!(db.get_entity_notes(1).unwrap().len(), 1);
    }

    #[test]
    fn test_lock_is_per_entity() {
        let db = test_db();
        let engine = engine_with_ttl(30);
        seed_entity(&db, 1, "A", "依頼");
        seed_entity(&db, 2, "B", "依頼");

        let ctx1 = SaveContext::committed(1, "post", 7);
        let ctx2 = SaveContext::committed(2, "post", 7);
        assert!(matches!(
            engine.evaluate_and_maybe_create(&ctx1, &db, &db, &AllowAll),
            SyncOutcome::Created(_)
        ));
        assert!(matches!(
            engine.evaluate_and_maybe_create(&ctx2, &db, &db, &AllowAll),
            SyncOutcome::Created(_)
        ));
    }

    #[test]
    fn test_structured_payload_overrides_committed_storage() {
        let db = test_db();
        let engine = engine_with_ttl(0);
        seed_entity(&db, 1, "A", "依頼");

        let mut payload = HashMap::new();
        payload.insert(meta_keys::REQUESTER.to_string(), "B".to_string());
        let ctx = SaveContext::structured(1, "post", 7, payload);

        engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll);
        let notes = db.get_entity_notes(1).unwrap();
        assert_eq!(notes[0].attributes.requester.as_deref(), Some("B"));
        // Field absent from the payload falls through to committed storage
        assert_eq!(notes[0].attributes.status.as_deref(), Some("依頼"));
    }

    #[test]
    fn test_ineligible_type_autosave_revision_permission() {
        let db = test_db();
        let engine = engine();
        seed_entity(&db, 1, "A", "依頼");

        let ctx = SaveContext::committed(1, "attachment", 7);
        assert_eq!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::SkippedIneligible
        );

        let mut ctx = SaveContext::committed(1, "post", 7);
        ctx.is_autosave = true;
        assert_eq!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::SkippedIneligible
        );

        let mut ctx = SaveContext::committed(1, "post", 7);
        ctx.is_revision = true;
        assert_eq!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::SkippedIneligible
        );

        let ctx = SaveContext::committed(1, "post", 7);
        assert_eq!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &DenyAll),
            SyncOutcome::SkippedIneligible
        );

        assert!(db.get_entity_notes(1).unwrap().is_empty());
    }

    #[test]
    fn test_all_fields_empty_skips() {
        let db = test_db();
        let engine = engine();
        let ctx = SaveContext::committed(1, "post", 7);
        assert_eq!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::SkippedEmpty
        );
    }

    #[test]
    fn test_defaults_fill_title_and_body() {
        let db = test_db();
        let engine = engine();
        seed_entity(&db, 1, "A", "依頼");

        let ctx = SaveContext::committed(1, "post", 7);
        engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll);

        let notes = db.get_entity_notes(1).unwrap();
        assert!(notes[0].title.starts_with("Work note "), "placeholder title");
        assert_eq!(notes[0].body, "Requester: A\nStatus: 依頼", "summary body");
    }

    #[test]
    fn test_user_title_and_body_are_kept() {
        let db = test_db();
        let engine = engine();
        seed_entity(&db, 1, "A", "依頼");
        db.write_attribute(1, meta_keys::TITLE, "Server migration").unwrap();
        db.write_attribute(1, meta_keys::CONTENT, "Move to new host").unwrap();

        let ctx = SaveContext::committed(1, "post", 7);
        engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll);

        let notes = db.get_entity_notes(1).unwrap();
        assert_eq!(notes[0].title, "Server migration");
        assert_eq!(notes[0].body, "Move to new host");
    }

    #[test]
    fn test_creation_failure_preserves_creation_opportunity() {
        let db = test_db();
        let engine = engine();
        seed_entity(&db, 1, "A", "依頼");
        let ctx = SaveContext::committed(1, "post", 7);

        // Broken store: outcome is Failed, nothing propagates, and the
        // fingerprint must NOT have been written.
        let outcome = engine.evaluate_and_maybe_create(&ctx, &db, &BrokenRecords, &AllowAll);
        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert!(db.read_attribute(1, meta_keys::FINGERPRINT).unwrap().is_none());

        // Retry against a working store succeeds with the same payload.
        assert!(matches!(
            engine.evaluate_and_maybe_create(&ctx, &db, &db, &AllowAll),
            SyncOutcome::Created(_)
        ));
    }
}
