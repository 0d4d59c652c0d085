// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the interception engine
//!
//! Every failure a call site can observe from a gate, a filter, or a
//! command context is mapped to one of these variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RunCommandStep;

/// Unified error type for all interception operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GateError {
    /// A filter denied the command by name. Raised before any context exists.
    #[error("A '{command}' command cannot be used here")]
    PolicyRejected { command: String },

    /// The wire message shape is not one the gate understands.
    #[error("Invalid protocol: {message}")]
    InvalidProtocol { message: String },

    /// A command context was driven out of order.
    #[error("Invalid step: {expected} expected, but got {actual}")]
    InvalidStep {
        expected: RunCommandStep,
        actual: RunCommandStep,
    },

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Command aborted: {reason}")]
    CommandAborted { reason: String },

    /// `resume` was called while no context is claimed by the controller.
    #[error("Not paused currently")]
    NotPaused,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl GateError {
    pub fn policy_rejected(command: impl Into<String>) -> Self {
        Self::PolicyRejected {
            command: command.into(),
        }
    }

    pub fn invalid_protocol(msg: impl Into<String>) -> Self {
        Self::InvalidProtocol {
            message: msg.into(),
        }
    }

    pub fn invalid_step(expected: RunCommandStep, actual: RunCommandStep) -> Self {
        Self::InvalidStep { expected, actual }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::CommandAborted {
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Returns true for outcomes delivered through a suspended call rather
    /// than raised synchronously by misuse or classification.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::OperationCancelled | Self::CommandAborted { .. })
    }
}

/// Result type alias for interception operations
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_details() {
        let err = GateError::policy_rejected("dropDatabase");
        assert_eq!(err.to_string(), "A 'dropDatabase' command cannot be used here");

        let err = GateError::invalid_step(RunCommandStep::None, RunCommandStep::Pre);
        assert_eq!(err.to_string(), "Invalid step: NONE expected, but got PRE");

        let err = GateError::aborted("policy denied");
        assert_eq!(err.to_string(), "Command aborted: policy denied");
    }

    #[test]
    fn interruption_classification() {
        assert!(GateError::OperationCancelled.is_interruption());
        assert!(GateError::aborted("x").is_interruption());
        assert!(!GateError::NotPaused.is_interruption());
        assert!(!GateError::policy_rejected("x").is_interruption());
    }
}
