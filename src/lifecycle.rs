//! Module Lifecycle State Machine
//!
//! Every module instance tracked by the [`Registry`](crate::registry::Registry)
//! carries a [`LifecycleStage`]. The registry is the only place where stages
//! change, and it asks this module whether a requested operation is legal.
//!
//! # Stage Flow
//!
//! ```text
//! Constructed
//!     ↓ initialize
//! Initialized ⟲ initialize
//!     ↓ execute
//! Executed ⟲ execute
//!
//! (Constructed, Initialized and Executed can all be released)
//!     ↓ release
//! Released (terminal, record dropped from tracking)
//! ```

use serde::Serialize;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::registry::Handle;

/// Lifecycle stages of a tracked module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStage {
    /// `construct` returned an instance
    Constructed,

    /// `initialize` completed at least once
    Initialized,

    /// `execute` completed at least once
    Executed,

    /// `release` was called; terminal
    Released,
}

/// Operations that move an instance between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Initialize,
    Execute,
    Release,
}

impl LifecycleStage {
    /// Returns true for the terminal stage.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released)
    }

    /// Returns true while the instance still owes a `release` call.
    #[inline]
    pub const fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// Stage reached by applying `op`, or None if the transition is illegal.
    pub const fn after(self, op: Operation) -> Option<Self> {
        match (self, op) {
            (Self::Constructed | Self::Initialized, Operation::Initialize) => {
                Some(Self::Initialized)
            }
            (Self::Initialized | Self::Executed, Operation::Execute) => Some(Self::Executed),
            (Self::Constructed | Self::Initialized | Self::Executed, Operation::Release) => {
                Some(Self::Released)
            }
            _ => None,
        }
    }

    /// Validate `op` for a named module and return the resulting stage.
    ///
    /// # Errors
    ///
    /// - `InvalidState` naming the module, its current stage and `op`
    pub fn transition(self, module: &str, op: Operation) -> Result<Self, LifecycleError> {
        self.after(op).ok_or_else(|| LifecycleError::InvalidState {
            module: module.to_string(),
            stage: self,
            operation: op,
        })
    }

    /// Human-readable description of the stage
    pub const fn description(self) -> &'static str {
        match self {
            Self::Constructed => "constructed, awaiting initialize",
            Self::Initialized => "initialized, ready to execute",
            Self::Executed => "executed, awaiting release",
            Self::Released => "released",
        }
    }
}

/// Errors raised by the registry while driving an instance's lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// No descriptor is registered under this type name
    #[error("Module type '{type_name}' is not registered")]
    NotFound { type_name: String },

    /// The type's constructor rejected its parameters
    #[error("Failed to construct module '{type_name}': {reason}")]
    ConstructionError { type_name: String, reason: String },

    /// The operation is not legal from the instance's current stage
    #[error("Cannot {operation} module '{module}' in stage {stage}")]
    InvalidState {
        module: String,
        stage: LifecycleStage,
        operation: Operation,
    },

    /// The handle is not (or no longer) tracked by the registry
    #[error("Handle {handle} is not tracked (never created or already released)")]
    NotTracked { handle: Handle },

    /// A lifecycle hook returned an error
    #[error("Module '{module}' failed during {operation}: {reason}")]
    HookFailed {
        module: String,
        operation: Operation,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    // =========================================================================
    // Transition Table Tests
    // =========================================================================

    #[test]
    fn test_forward_chain() {
        let stage = LifecycleStage::Constructed;
        let stage = stage.after(Operation::Initialize).unwrap();
        assert_eq!(stage, LifecycleStage::Initialized);
        let stage = stage.after(Operation::Execute).unwrap();
        assert_eq!(stage, LifecycleStage::Executed);
        let stage = stage.after(Operation::Release).unwrap();
        assert_eq!(stage, LifecycleStage::Released);
    }

    #[test]
    fn test_reinitialize_and_reexecute_allowed() {
        assert_eq!(
            LifecycleStage::Initialized.after(Operation::Initialize),
            Some(LifecycleStage::Initialized)
        );
        assert_eq!(
            LifecycleStage::Executed.after(Operation::Execute),
            Some(LifecycleStage::Executed)
        );
    }

    #[test]
    fn test_execute_requires_initialize() {
        assert_eq!(LifecycleStage::Constructed.after(Operation::Execute), None);
    }

    #[test]
    fn test_cannot_reinitialize_after_execute() {
        assert_eq!(LifecycleStage::Executed.after(Operation::Initialize), None);
    }

    #[test]
    fn test_every_live_stage_can_release() {
        for stage in LifecycleStage::iter().filter(|s| s.is_live()) {
            assert_eq!(
                stage.after(Operation::Release),
                Some(LifecycleStage::Released),
                "{stage} should be releasable"
            );
        }
    }

    #[test]
    fn test_released_is_terminal() {
        assert!(LifecycleStage::Released.is_terminal());
        for op in Operation::iter() {
            assert_eq!(LifecycleStage::Released.after(op), None);
        }
    }

    // =========================================================================
    // Error Display Tests
    // =========================================================================

    #[test]
    fn test_invalid_state_names_module_stage_and_operation() {
        let err = LifecycleStage::Constructed
            .transition("flowSolver", Operation::Execute)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("flowSolver"));
        assert!(msg.contains("CONSTRUCTED"));
        assert!(msg.contains("execute"));
    }

    #[test]
    fn test_stage_display_and_parse() {
        assert_eq!(LifecycleStage::Initialized.to_string(), "INITIALIZED");
        let parsed: LifecycleStage = "EXECUTED".parse().unwrap();
        assert_eq!(parsed, LifecycleStage::Executed);
    }
}
