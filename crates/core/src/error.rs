//! Error types for conductor operations.
//!
//! Every failure the conductor reports to an operator is one of these
//! variants. Validation errors are raised before any step runs; step and
//! timeout errors are also recorded on the node as `last_error`.

use crate::drivers::base::DriverError;
use mk_protocol::ProvisionState;
use thiserror::Error;

/// Errors raised by the conductor, the step engine and the lock manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConductorError {
    /// Another conductor holds the node's reservation. Retryable.
    #[error("Node {node} is locked by host {holder}, please retry after the current operation is completed")]
    NodeLocked { node: String, holder: String },

    #[error("Node {0} could not be found")]
    NodeNotFound(String),

    #[error("Runbook {0} could not be found")]
    RunbookNotFound(String),

    /// The requested transition is not in the state table, or the node is in
    /// a state that does not allow the operation.
    #[error("Invalid state for node {node}: cannot {action} from '{state}'")]
    InvalidState {
        node: String,
        state: ProvisionState,
        action: String,
    },

    #[error("Invalid step {step}: {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("Step {step} is missing required arguments: {}", .args.join(", "))]
    MissingStepArgs { step: String, args: Vec<String> },

    #[error("Duplicate step {0} in step list")]
    DuplicateStep(String),

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Timeout reached while {0}")]
    CallbackTimeout(String),

    #[error("Node store error: {0}")]
    Store(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ConductorError {
    /// Short machine-readable name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::NodeLocked { .. } => "NodeLocked",
            ConductorError::NodeNotFound(_) => "NodeNotFound",
            ConductorError::RunbookNotFound(_) => "RunbookNotFound",
            ConductorError::InvalidState { .. } => "InvalidState",
            ConductorError::InvalidStep { .. } => "InvalidStep",
            ConductorError::MissingStepArgs { .. } => "MissingStepArgs",
            ConductorError::DuplicateStep(_) => "DuplicateStep",
            ConductorError::StepFailed { .. } => "StepFailed",
            ConductorError::CallbackTimeout(_) => "CallbackTimeout",
            ConductorError::Store(_) => "Store",
            ConductorError::Driver(_) => "Driver",
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConductorError::NodeLocked { .. })
    }

    /// Validation errors are raised before any step executes.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConductorError::InvalidStep { .. }
                | ConductorError::MissingStepArgs { .. }
                | ConductorError::DuplicateStep(_)
        )
    }

    pub(crate) fn invalid_state(
        node: impl Into<String>,
        state: ProvisionState,
        action: impl Into<String>,
    ) -> Self {
        ConductorError::InvalidState {
            node: node.into(),
            state,
            action: action.into(),
        }
    }

    pub(crate) fn invalid_step(step: impl Into<String>, reason: impl Into<String>) -> Self {
        ConductorError::InvalidStep {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with ConductorError.
pub type ConductorResult<T> = Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_locked_message_names_holder() {
        let err = ConductorError::NodeLocked {
            node: "node-1".to_string(),
            holder: "conductor-2".to_string(),
        };
        assert!(err.to_string().contains("conductor-2"));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "NodeLocked");
    }

    #[test]
    fn test_missing_args_lists_every_argument() {
        let err = ConductorError::MissingStepArgs {
            step: "bios.apply_configuration".to_string(),
            args: vec!["settings".to_string(), "reset".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Step bios.apply_configuration is missing required arguments: settings, reset"
        );
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }
}
