// Defines the core data structures for the application.

use std::fmt;

/// The pair systemd reports for a one-shot unit that ran to completion.
pub const TERMINAL_ACTIVE_STATE: &str = "active";
pub const TERMINAL_SUB_STATE: &str = "exited";

/// Lifecycle of a systemd unit as reported by the service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub active_state: String, // e.g., "active", "activating", "failed"
    pub sub_state: String,    // e.g., "running", "exited", "dead"
}

impl UnitState {
    pub fn new(active_state: impl Into<String>, sub_state: impl Into<String>) -> Self {
        Self {
            active_state: active_state.into(),
            sub_state: sub_state.into(),
        }
    }

    /// Both fields must match; `active (running)` or `failed (exited)` are not done.
    pub fn is_terminal(&self) -> bool {
        self.active_state == TERMINAL_ACTIVE_STATE && self.sub_state == TERMINAL_SUB_STATE
    }

    pub fn is_failed(&self) -> bool {
        self.active_state == "failed"
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.active_state, self.sub_state)
    }
}
