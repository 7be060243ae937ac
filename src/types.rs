//! Configuration and shared types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Meta keys the engine reads from / writes to the host's key-value store.
pub mod meta_keys {
    pub const TYPE: &str = "type";
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
    pub const REQUESTER: &str = "requester";
    pub const WORKER: &str = "worker";
    pub const STATUS: &str = "status";
    pub const WORK_DATE: &str = "work_date";
    /// Stored fingerprint of the last save that produced a work note.
    pub const FINGERPRINT: &str = "_worknote_fingerprint";
}

/// Top-level configuration, loaded from `~/.worknotes/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load config from the default path. Missing file yields defaults.
    pub fn load() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
        Self::load_from(home.join(".worknotes").join("config.json"))
    }

    pub fn load_from(path: PathBuf) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|_| StoreError::ConfigRead(path.clone()))?;
        serde_json::from_str(&raw).map_err(|_| StoreError::ConfigRead(path))
    }
}

/// Dedup/sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Content types whose saves can produce work notes.
    #[serde(default = "default_eligible_types")]
    pub eligible_types: Vec<String>,
    /// TTL for the per-entity creation lock, seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eligible_types: default_eligible_types(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

fn default_eligible_types() -> Vec<String> {
    vec!["post".to_string(), "page".to_string()]
}

fn default_lock_ttl() -> u64 {
    10
}

/// How the notifier decides whether to prompt after a qualifying save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Never prompt.
    Disabled,
    /// Ask the server (`should_prompt`) before prompting.
    Ask,
    /// Always prompt (local guards still apply).
    Force,
}

impl Default for PromptMode {
    fn default() -> Self {
        PromptMode::Ask
    }
}

/// Save-cycle notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub mode: PromptMode,
    /// Minimum gap between two visible prompts, seconds.
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    /// Server-side cooldown per (entity, principal), seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Content types the prompt targets. Empty = all eligible types.
    #[serde(default)]
    pub target_types: Vec<String>,
    /// Principal roles the prompt targets. Empty = all roles.
    #[serde(default)]
    pub target_roles: Vec<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            mode: PromptMode::default(),
            debounce_secs: default_debounce(),
            cooldown_secs: default_cooldown(),
            target_types: Vec::new(),
            target_roles: Vec::new(),
        }
    }
}

fn default_debounce() -> u64 {
    3
}

fn default_cooldown() -> u64 {
    600
}

/// The auxiliary attribute set copied onto each work note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkAttributes {
    pub requester: Option<String>,
    pub worker: Option<String>,
    pub status: Option<String>,
    pub work_date: Option<String>,
}

impl WorkAttributes {
    /// True when every field is absent or blank.
    pub fn is_empty(&self) -> bool {
        fn blank(v: &Option<String>) -> bool {
            v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
        }
        blank(&self.requester) && blank(&self.worker) && blank(&self.status) && blank(&self.work_date)
    }

    /// Human-readable summary, used as the note body when the author wrote none.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(v) = self.requester.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("Requester: {}", v));
        }
        if let Some(v) = self.worker.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("Worker: {}", v));
        }
        if let Some(v) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("Status: {}", v));
        }
        if let Some(v) = self.work_date.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("Date: {}", v));
        }
        lines.join("\n")
    }
}

/// A linked work-note record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkNote {
    pub id: String,
    /// Back-reference to the owning content entity (not ownership).
    pub entity_id: i64,
    pub title: String,
    pub body: String,
    #[serde(flatten)]
    pub attributes: WorkAttributes,
    pub created_at: String,
}

// =============================================================================
// Tests
// =============================================================================
