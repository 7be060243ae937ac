//! Server-side prompt policy.
//!
//! The notifier's local guards only know about the current page lifetime.
//! This policy adds the durable checks: who the prompt targets, which
//! content types it applies to, a per-(entity, principal) cooldown, and an
//! already-logged check — if the entity's content hash has not changed since
//! the last prompt, there is nothing new to log.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::NoteDb;
use crate::error::{ClientError, StoreError};
use crate::fingerprint::note_fingerprint;
use crate::host::{MetaStore, PromptClient};
use crate::types::{meta_keys, NotifierConfig, WorkAttributes};

/// Everything the policy needs to evaluate one query.
#[derive(Debug, Clone)]
pub struct PromptQuery {
    pub entity_id: i64,
    pub principal_id: i64,
    pub principal_role: String,
    pub entity_type: String,
}

/// Prompt eligibility policy over the note database.
pub struct PromptPolicy {
    config: NotifierConfig,
}

impl PromptPolicy {
    pub fn new(config: NotifierConfig) -> Self {
        Self { config }
    }

    /// May a prompt be shown for this query right now?
    pub fn should_prompt(&self, db: &NoteDb, query: &PromptQuery) -> Result<bool, StoreError> {
        // Audience targeting: empty lists mean "everyone" / "all types"
        if !self.config.target_roles.is_empty()
            && !self.config.target_roles.iter().any(|r| r == &query.principal_role)
        {
            return Ok(false);
        }
        if !self.config.target_types.is_empty()
            && !self.config.target_types.iter().any(|t| t == &query.entity_type)
        {
            return Ok(false);
        }

        if db.prompted_within(query.entity_id, query.principal_id, self.config.cooldown_secs)? {
            log::debug!(
                "PromptPolicy: cooldown active for entity {} / principal {}",
                query.entity_id,
                query.principal_id
            );
            return Ok(false);
        }

        // Already logged: nothing changed since the last prompt
        let current = current_content_hash(db, query.entity_id)?;
        if db.last_logged_hash(query.entity_id, query.principal_id)?.as_deref()
            == Some(current.as_str())
        {
            log::debug!(
                "PromptPolicy: entity {} already logged at this content hash",
                query.entity_id
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Record that a prompt was shown: stores the current content hash and
    /// resets the cooldown for this (entity, principal).
    pub fn mark_prompted(
        &self,
        db: &NoteDb,
        entity_id: i64,
        principal_id: i64,
    ) -> Result<(), StoreError> {
        let hash = current_content_hash(db, entity_id)?;
        db.record_prompt(entity_id, principal_id, &hash)
    }
}

/// Hash of the entity's current tracked payload, read from committed storage.
fn current_content_hash(db: &NoteDb, entity_id: i64) -> Result<String, StoreError> {
    let read = |key: &str| db.read_attribute(entity_id, key);
    let title = read(meta_keys::TITLE)?.unwrap_or_default();
    let body = read(meta_keys::CONTENT)?.unwrap_or_default();
    let attrs = WorkAttributes {
        requester: read(meta_keys::REQUESTER)?,
        worker: read(meta_keys::WORKER)?,
        status: read(meta_keys::STATUS)?,
        work_date: read(meta_keys::WORK_DATE)?,
    };
    Ok(note_fingerprint(&title, &body, &attrs))
}

/// In-process adapter exposing the policy through the notifier's client
/// seam. A remote host would implement [`PromptClient`] over HTTP instead.
pub struct LocalPromptClient {
    db: Arc<Mutex<NoteDb>>,
    policy: PromptPolicy,
    principal_role: String,
}

impl LocalPromptClient {
    pub fn new(db: Arc<Mutex<NoteDb>>, policy: PromptPolicy, principal_role: &str) -> Self {
        Self {
            db,
            policy,
            principal_role: principal_role.to_string(),
        }
    }
}

#[async_trait]
impl PromptClient for LocalPromptClient {
    async fn should_prompt(&self, entity_id: i64, principal_id: i64) -> Result<bool, ClientError> {
        let db = self
            .db
            .lock()
            .map_err(|_| ClientError::Server("state lock poisoned".to_string()))?;
        let entity_type = db
            .read_attribute(entity_id, meta_keys::TYPE)
            .map_err(|e| ClientError::Server(e.to_string()))?
            .unwrap_or_else(|| "post".to_string());
        let query = PromptQuery {
            entity_id,
            principal_id,
            principal_role: self.principal_role.clone(),
            entity_type,
        };
        self.policy
            .should_prompt(&db, &query)
            .map_err(|e| ClientError::Server(e.to_string()))
    }

    async fn mark_prompted(&self, entity_id: i64, principal_id: i64) -> Result<(), ClientError> {
        let db = self
            .db
            .lock()
            .map_err(|_| ClientError::Server("state lock poisoned".to_string()))?;
        self.policy
            .mark_prompted(&db, entity_id, principal_id)
            .map_err(|e| ClientError::Server(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
