//! Worklog prompt state machine.
//!
//! The host editor exposes only a polled state stream, not discrete save
//! events, so save-start and save-completion edges are inferred from
//! consecutive snapshots. Each guard in `maybe_notify` defends against a
//! different false-positive source: dirty-at-start against no-op saves,
//! the per-cycle flag against duplicate edge detections, the debounce
//! window against rapid re-triggers, and the autosave check against
//! background save noise.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::host::{PromptClient, PromptSurface};
use crate::types::{NotifierConfig, PromptMode};

/// One observation of the host editor's save state.
#[derive(Debug, Clone, Default)]
pub struct EditorSnapshot {
    pub is_saving: bool,
    pub is_autosaving: bool,
    pub saved_ok: bool,
    pub is_dirty: bool,
    pub entity_id: Option<i64>,
}

/// Named states of the save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Saving,
    JustCompleted,
}

/// Edge detected by one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveEdge {
    None,
    /// not-saving -> saving: a new cycle began.
    CycleStarted,
    /// saving -> not-saving with a real, successful save: prompt opportunity.
    CycleCompleted,
}

/// Why a prompt was not shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Document had no unsaved changes when the cycle began.
    NotDirtyAtStart,
    Autosaving,
    /// Already prompted within this cycle.
    AlreadyShown,
    /// Within the debounce window of the last shown prompt.
    Debounced,
    Disabled,
    ServerDeclined,
    /// Round-trip failed; fail closed.
    ServerUnreachable,
}

/// Result of a prompt attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptDecision {
    Show(WorklogPrompt),
    Suppressed(SuppressReason),
}

/// Payload for the host UI when a prompt should be shown.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogPrompt {
    pub entity_id: i64,
    pub cycle_id: u64,
}

/// The user's response to a shown prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAction {
    /// Open the worklog composer.
    WriteNow,
    Skip,
}

/// Save-cycle notifier. Process-local; all state is lost on reload.
pub struct SaveCycleNotifier {
    config: NotifierConfig,
    entity_id: i64,
    principal_id: i64,
    state: SaveState,
    /// Monotonic cycle counter, bumped at every save-start edge.
    cycle_id: u64,
    dirty_at_cycle_start: bool,
    shown_in_cycle: bool,
    last_shown_at: Option<Instant>,
    prev: Option<EditorSnapshot>,
}

impl SaveCycleNotifier {
    pub fn new(entity_id: i64, principal_id: i64, config: NotifierConfig) -> Self {
        Self {
            config,
            entity_id,
            principal_id,
            state: SaveState::Idle,
            cycle_id: 0,
            dirty_at_cycle_start: false,
            shown_in_cycle: false,
            last_shown_at: None,
            prev: None,
        }
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    /// Feed one observation; returns the detected edge.
    ///
    /// Autosave completions and failed saves produce no completion edge —
    /// they return the machine to `Idle` with no side effect.
    pub fn observe(&mut self, snapshot: EditorSnapshot) -> SaveEdge {
        let edge = match &self.prev {
            None => {
                self.state = SaveState::Idle;
                SaveEdge::None
            }
            Some(prev) if !prev.is_saving && snapshot.is_saving => {
                self.state = SaveState::Saving;
                self.cycle_id += 1;
                self.dirty_at_cycle_start = prev.is_dirty;
                self.shown_in_cycle = false;
                log::debug!(
                    "Notifier: cycle {} started (dirty_at_start={})",
                    self.cycle_id,
                    self.dirty_at_cycle_start
                );
                SaveEdge::CycleStarted
            }
            Some(prev)
                if prev.is_saving
                    && !snapshot.is_saving
                    && !snapshot.is_autosaving
                    && snapshot.saved_ok =>
            {
                self.state = SaveState::JustCompleted;
                SaveEdge::CycleCompleted
            }
            Some(_) => {
                self.state = SaveState::Idle;
                SaveEdge::None
            }
        };

        self.prev = Some(snapshot);
        edge
    }

    /// Decide whether to show the worklog prompt for the just-completed cycle.
    ///
    /// Local guards run first; only then does the configured mode apply,
    /// so `Force` cannot bypass the dirty/cycle/debounce checks. The server
    /// round-trip is not tagged with the cycle id: a slow response landing
    /// after a new cycle began is filtered only by the shown and debounce
    /// guards. `shown_in_cycle` is set after a positive resolution, so a
    /// second completion edge during a pending round-trip can issue a
    /// duplicate query — both results still pass through the guards.
    pub async fn maybe_notify(&mut self, client: &dyn PromptClient) -> PromptDecision {
        if !self.dirty_at_cycle_start {
            return PromptDecision::Suppressed(SuppressReason::NotDirtyAtStart);
        }
        if self.prev.as_ref().map(|s| s.is_autosaving).unwrap_or(false) {
            return PromptDecision::Suppressed(SuppressReason::Autosaving);
        }
        if self.shown_in_cycle {
            return PromptDecision::Suppressed(SuppressReason::AlreadyShown);
        }
        if let Some(at) = self.last_shown_at {
            if at.elapsed() < Duration::from_secs(self.config.debounce_secs) {
                return PromptDecision::Suppressed(SuppressReason::Debounced);
            }
        }

        match self.config.mode {
            PromptMode::Disabled => {
                return PromptDecision::Suppressed(SuppressReason::Disabled);
            }
            PromptMode::Force => {}
            PromptMode::Ask => {
                match client.should_prompt(self.entity_id, self.principal_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return PromptDecision::Suppressed(SuppressReason::ServerDeclined);
                    }
                    Err(e) => {
                        log::warn!(
                            "Notifier: should_prompt failed for entity {}: {}",
                            self.entity_id,
                            e
                        );
                        return PromptDecision::Suppressed(SuppressReason::ServerUnreachable);
                    }
                }
            }
        }

        self.shown_in_cycle = true;
        self.last_shown_at = Some(Instant::now());
        log::info!(
            "Notifier: showing worklog prompt for entity {} (cycle {})",
            self.entity_id,
            self.cycle_id
        );
        PromptDecision::Show(WorklogPrompt {
            entity_id: self.entity_id,
            cycle_id: self.cycle_id,
        })
    }

    /// Handle the user's response to a shown prompt.
    ///
    /// Both actions inform the server that a prompt was shown, fire-and-
    /// forget on the ambient runtime: failure is logged, never surfaced.
    /// Host UI callbacks may run off-runtime, so the spawn degrades to a
    /// logged skip rather than panicking when no runtime is active.
    /// "Write now" opens the composer; if the surface fails (e.g. the
    /// sidebar cannot open), falls back to focusing an alternate input
    /// rather than erroring.
    pub fn resolve_prompt(
        &self,
        action: PromptAction,
        client: Arc<dyn PromptClient>,
        surface: &dyn PromptSurface,
    ) {
        if action == PromptAction::WriteNow {
            if let Err(e) = surface.open_composer(self.entity_id) {
                log::warn!(
                    "Notifier: composer failed for entity {} ({}), using fallback input",
                    self.entity_id,
                    e
                );
                surface.focus_fallback(self.entity_id);
            }
        }

        let entity_id = self.entity_id;
        let principal_id = self.principal_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.mark_prompted(entity_id, principal_id).await {
                        log::warn!(
                            "Notifier: mark_prompted failed for entity {}: {}",
                            entity_id,
                            e
                        );
                    }
                });
            }
            Err(_) => {
                log::warn!(
                    "Notifier: no async runtime, mark_prompted not sent for entity {}",
                    entity_id
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
