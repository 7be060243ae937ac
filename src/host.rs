//! Boundary traits for the surrounding host system.
//!
//! The engine and notifier never talk to the host's storage, authorization,
//! or UI directly — everything goes through these seams so tests (and
//! alternate hosts) can swap implementations.

use async_trait::async_trait;

use crate::error::{ClientError, StoreError};
use crate::types::WorkNote;

/// Generic key/value persistence for entity attributes and the stored
/// fingerprint.
pub trait MetaStore {
    fn read_attribute(&self, entity_id: i64, key: &str) -> Result<Option<String>, StoreError>;
    fn write_attribute(&self, entity_id: i64, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Persistence for linked work-note records.
pub trait RecordStore {
    /// Persist a new work note, returning its id.
    fn create_work_note(&self, note: &WorkNote) -> Result<String, StoreError>;
}

/// Short-TTL marker primitive.
///
/// Implementations must make markers visible to every request sharing the
/// instance. The engine's check-then-act over this interface is not atomic;
/// two overlapping requests can both pass `held` before either acquires.
pub trait LockProvider: Send + Sync {
    /// Set the marker. Returns false if an unexpired marker already exists.
    fn acquire(&self, key: &str, ttl_secs: u64) -> bool;
    /// Whether an unexpired marker exists.
    fn held(&self, key: &str) -> bool;
}

/// Authorization check for the acting principal.
pub trait AccessControl {
    fn can_edit(&self, entity_id: i64, principal_id: i64) -> bool;
}

/// Server endpoint consumed by the notifier.
#[async_trait]
pub trait PromptClient: Send + Sync {
    /// May the prompt be shown for this entity/principal right now?
    async fn should_prompt(&self, entity_id: i64, principal_id: i64) -> Result<bool, ClientError>;

    /// Record that a prompt was shown (resets cooldown, stores content hash).
    async fn mark_prompted(&self, entity_id: i64, principal_id: i64) -> Result<(), ClientError>;
}

/// The input surface the prompt's "write now" action opens.
pub trait PromptSurface: Send + Sync {
    /// Open the worklog composer (e.g. an editor sidebar panel).
    fn open_composer(&self, entity_id: i64) -> Result<(), String>;

    /// Fallback when the composer cannot open: focus an alternate input.
    fn focus_fallback(&self, entity_id: i64);
}

/// Probe into the host editor, used while bootstrapping the notifier before
/// the editor has exposed a document id.
pub trait EditorHandle: Send + Sync {
    fn current_entity_id(&self) -> Option<i64>;
}
