//! Work-note sync core.
//!
//! Two coupled components: the server-side dedup/sync engine, which decides
//! whether a save of a content entity should create a linked work note
//! (exactly once per semantically distinct save, despite redundant save
//! triggers), and the client-side save-cycle notifier, which watches an
//! editor's save-state stream and prompts for a worklog entry at most once
//! per genuine content-changing save.
//!
//! Host-specific surfaces (forms, list tables, endpoint registration) live
//! outside this crate and are reached through the traits in [`host`].

pub mod db;
pub mod engine;
mod error;
pub mod fingerprint;
pub mod host;
pub mod lock;
pub mod notifier;
pub mod prompt_service;
pub mod types;

pub use error::{ClientError, StoreError};

/// Initialize env-filtered logging for binaries and examples.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init();
}
