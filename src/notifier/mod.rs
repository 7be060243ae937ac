//! Save-cycle notifier: worklog prompt state machine and its runner.

pub mod fsm;
pub mod runner;

pub use fsm::{
    EditorSnapshot, PromptAction, PromptDecision, SaveCycleNotifier, SaveEdge, SaveState,
    SuppressReason, WorklogPrompt,
};
pub use runner::{run_notifier, NotifierHandles};
