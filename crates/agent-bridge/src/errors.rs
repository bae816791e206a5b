//! Error types for agent and browser collaborators

use thiserror::Error;

/// Errors raised by agent handles, browser handles and LLM configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Transient failure reported by the agent or browser (retryable)
    #[error("Transient agent failure: {0}")]
    Transient(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Target element could not be located
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Instruction cannot be executed by this handle
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),

    /// Model name does not map to a supported provider
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// No credential supplied and none configured for the provider
    #[error("No API key available for model: {0}")]
    MissingApiKey(String),

    /// Agent or browser session could not be created or has been closed
    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transient(_) | AgentError::Timeout(_) | AgentError::ElementNotFound(_)
        )
    }

    /// Check if this error is caused by caller input rather than the agent
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AgentError::UnsupportedModel(_)
                | AgentError::MissingApiKey(_)
                | AgentError::InvalidInstruction(_)
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Internal(format!("IO error: {}", err))
    }
}
