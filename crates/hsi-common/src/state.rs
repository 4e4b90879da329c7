//! Run-control state machine for emulator modules.
//!
//! State transitions follow the DAQ run-control lifecycle:
//! INITIAL → CONFIGURED → RUNNING → STOPPED → (RUNNING | CONFIGURED | INITIAL)
//!
//! Each stop ends a run; a later start begins a fresh one.

use crate::error::{HsiError, HsiResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run-control states for an emulator module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    /// No configuration loaded.
    #[default]
    Initial,
    /// Configuration accepted; ready to start.
    Configured,
    /// Generation thread running.
    Running,
    /// Run ended; configuration retained.
    Stopped,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "INITIAL"),
            Self::Configured => write!(f, "CONFIGURED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl ModuleState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: ModuleState) -> bool {
        use ModuleState::{Configured, Initial, Running, Stopped};

        matches!(
            (self, target),
            // Configure, including reconfiguration before a start
            (Initial | Configured | Stopped, Configured)
                // Start a run (a stopped module starts a fresh run)
                | (Configured | Stopped, Running)
                // Stop the current run
                | (Running, Stopped)
                // Scrap releases the configuration
                | (Configured | Stopped, Initial)
        )
    }

    /// Returns true if a generation thread may be active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the module holds a configuration.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !matches!(self, Self::Initial)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: ModuleState,
    previous: Option<ModuleState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in INITIAL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<ModuleState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Check that `command` would move the machine to `target`, without transitioning.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::InvalidCommand`] if the command is not accepted in the current state.
    pub fn check_command(&self, command: &str, target: ModuleState) -> HsiResult<()> {
        if self.current.can_transition_to(target) {
            Ok(())
        } else {
            Err(HsiError::InvalidCommand {
                command: command.to_string(),
                state: self.current.to_string(),
            })
        }
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::InvalidStateTransition`] if the transition is not allowed.
    pub fn transition(&mut self, target: ModuleState) -> HsiResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(HsiError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
