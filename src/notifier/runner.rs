//! Notifier subscription loop.
//!
//! Runs as a long-lived async task over the host editor's state stream.
//! The editor may not have exposed a document id when the task starts, so a
//! disposable bootstrap phase consumes the stream until an id appears, with
//! a fallback timer probing the editor directly in case the stream was
//! subscribed before the editor was ready. Only then is the state machine
//! created and the main observation loop entered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::host::{EditorHandle, PromptClient};
use crate::notifier::fsm::{EditorSnapshot, PromptDecision, SaveCycleNotifier, SaveEdge, WorklogPrompt};
use crate::types::NotifierConfig;

/// Fallback probe interval while waiting for the editor to expose an id.
const BOOTSTRAP_RETRY_SECS: u64 = 2;

/// Host-side collaborators the runner needs.
pub struct NotifierHandles {
    pub client: Arc<dyn PromptClient>,
    pub editor: Arc<dyn EditorHandle>,
}

/// Drive the notifier for the lifetime of the state stream.
///
/// Prompts that pass every guard are sent on `prompt_tx`; the host UI
/// renders them and reports the user's choice back through
/// [`SaveCycleNotifier::resolve_prompt`]. Returns when the stream closes.
pub async fn run_notifier(
    mut rx: mpsc::Receiver<EditorSnapshot>,
    prompt_tx: mpsc::Sender<WorklogPrompt>,
    config: NotifierConfig,
    principal_id: i64,
    handles: NotifierHandles,
) {
    let entity_id = match bootstrap_entity_id(&mut rx, handles.editor.as_ref()).await {
        Some(id) => id,
        None => {
            log::info!("Notifier: state stream closed before an entity id appeared");
            return;
        }
    };
    log::info!("Notifier: bound to entity {}", entity_id);

    let mut notifier = SaveCycleNotifier::new(entity_id, principal_id, config);

    while let Some(snapshot) = rx.recv().await {
        if notifier.observe(snapshot) != SaveEdge::CycleCompleted {
            continue;
        }
        match notifier.maybe_notify(handles.client.as_ref()).await {
            PromptDecision::Show(prompt) => {
                if prompt_tx.send(prompt).await.is_err() {
                    log::warn!("Notifier: prompt channel closed, stopping");
                    return;
                }
            }
            PromptDecision::Suppressed(reason) => {
                log::debug!("Notifier: prompt suppressed ({:?})", reason);
            }
        }
    }

    log::info!("Notifier: state stream closed");
}

/// Bootstrap phase: wait for a current-document id.
///
/// Snapshots observed here are consumed and not replayed into the state
/// machine — the main subscription begins after an id is known. Returns
/// `None` if the stream closes first.
async fn bootstrap_entity_id(
    rx: &mut mpsc::Receiver<EditorSnapshot>,
    editor: &dyn EditorHandle,
) -> Option<i64> {
    if let Some(id) = editor.current_entity_id() {
        return Some(id);
    }

    let mut retry = tokio::time::interval(Duration::from_secs(BOOTSTRAP_RETRY_SECS));
    retry.tick().await; // first tick resolves immediately

    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                match snapshot {
                    Some(s) => {
                        if let Some(id) = s.entity_id {
                            return Some(id);
                        }
                    }
                    None => return None,
                }
            }
            _ = retry.tick() => {
                if let Some(id) = editor.current_entity_id() {
                    return Some(id);
                }
                log::debug!("Notifier: still waiting for an entity id");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
