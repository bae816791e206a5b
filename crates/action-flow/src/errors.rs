//! Script translation and execution error types

use agent_bridge::AgentError;
use thiserror::Error;

/// Problems detected while validating or translating a script, before any
/// instruction reaches an agent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Action kind outside the supported set
    #[error("Unsupported action type: {0}")]
    UnsupportedAction(String),

    /// Validation kind outside the supported set
    #[error("Unsupported validation type: {0}")]
    UnsupportedValidation(String),

    /// Field required by the action or validation kind is absent
    #[error("{kind} in step {step_id} requires '{field}'")]
    MissingField {
        step_id: String,
        kind: String,
        field: &'static str,
    },

    /// Two steps share an identifier
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    /// Structurally invalid script
    #[error("Invalid script: {0}")]
    InvalidScript(String),
}

/// Errors surfaced by the script executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Fatal, raised before dispatch
    #[error("Action translation failed: {0}")]
    Translation(#[from] ScriptError),

    /// Every attempt for one instruction failed
    #[error("Action '{instruction}' failed after {attempts} attempt(s): {source}")]
    ActionExecution {
        instruction: String,
        attempts: u32,
        #[source]
        source: AgentError,
    },

    /// A run ended unsuccessfully; carries the last underlying error
    #[error("Run {run_number} failed: {last_error}")]
    RunFailure { run_number: u64, last_error: String },

    /// Cooperative cancellation observed mid-execution
    #[error("Script execution cancelled")]
    Cancelled,
}

impl ExecutorError {
    /// Check if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::ActionExecution { source, .. } => source.is_retryable(),
            ExecutorError::RunFailure { .. } => true,
            ExecutorError::Translation(_) | ExecutorError::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Cancelled)
    }
}
